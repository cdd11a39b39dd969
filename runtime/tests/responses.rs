#![allow(clippy::expect_used, clippy::unwrap_used)]
//! Every event gets exactly one response that echoes its identity, whatever
//! path handled it.

use inventory_cmd_core::command::{DeleteFilter, UpdateCommand, UpdateOutcome};
use inventory_cmd_core::item::ItemId;
use inventory_cmd_core::value::{FieldMap, FieldValue};
use inventory_cmd_core::{CommandResponse, DomainEvent, ErrorCode, RecordStore};
use inventory_cmd_runtime::{CommandKind, CommandRouter, ResponseEmitter, handlers};
use inventory_cmd_testing::{
    InMemoryEventBus, InMemoryLockCoordinator, InMemoryRecordStore, fixtures,
};
use proptest::prelude::*;

const NIL: &str = "00000000-0000-0000-0000-000000000000";

fn by_item(item_id: ItemId) -> FieldMap {
    FieldMap::new().with("itemID", FieldValue::Text(item_id.to_string()))
}

#[tokio::test]
async fn responses_echo_identity_on_every_path() {
    let store = InMemoryRecordStore::new();
    let locks = InMemoryLockCoordinator::new();
    let router = CommandRouter::default();
    let stocked = fixtures::item(50.0);
    store.insert_one(&stocked).await.unwrap();

    let mut zero_id = fixtures::item(1.0);
    zero_id.item_id = ItemId::default();

    let events = vec![
        (fixtures::insert_event(&fixtures::item(3.0)), None),
        (fixtures::insert_event(&zero_id), Some(ErrorCode::InternalError)),
        (
            fixtures::update_event(&UpdateCommand {
                filter: by_item(stocked.item_id),
                update: FieldMap::new().with("lot", FieldValue::Text("lot-7".into())),
            }),
            None,
        ),
        (
            fixtures::update_event(&UpdateCommand::default()),
            Some(ErrorCode::InternalError),
        ),
        (
            fixtures::sale_event(&fixtures::sale(&[(stocked.item_id, 5.0)])),
            None,
        ),
        (
            fixtures::sale_event(&fixtures::sale(&[(stocked.item_id, 500.0)])),
            Some(ErrorCode::InternalError),
        ),
        (
            fixtures::delete_event(&DeleteFilter(FieldMap::new())),
            Some(ErrorCode::InternalError),
        ),
        (
            fixtures::delete_event(&DeleteFilter(by_item(stocked.item_id))),
            None,
        ),
        (
            DomainEvent::new("replace", fixtures::INVENTORY_AGGREGATE_ID, Vec::new()),
            Some(ErrorCode::InternalError),
        ),
        (
            DomainEvent::new("insert", fixtures::INVENTORY_AGGREGATE_ID, b"{".to_vec()),
            Some(ErrorCode::InternalError),
        ),
    ];

    for (event, expected_code) in events {
        let response = router.dispatch(&store, &locks, &event).await;
        assert_eq!(response.correlation_id, event.correlation_id);
        assert_eq!(response.event_id, event.event_id);
        assert_eq!(response.aggregate_id, event.aggregate_id);
        assert_eq!(response.event_action, event.action);
        assert_eq!(
            response.error_code, expected_code,
            "{}: {:?}",
            event.action, response.error
        );
        assert_eq!(response.result.is_some(), expected_code.is_none());
    }

    store.set_unavailable(true);
    let event = fixtures::insert_event(&fixtures::item(1.0));
    let response = router.dispatch(&store, &locks, &event).await;
    assert_eq!(response.correlation_id, event.correlation_id);
    assert_eq!(response.error_code, Some(ErrorCode::DatabaseError));
}

#[tokio::test]
async fn single_match_update_reports_one_and_one() {
    let store = InMemoryRecordStore::new();
    let locks = InMemoryLockCoordinator::new();
    let item = fixtures::item(10.0);
    store.insert_one(&item).await.unwrap();

    let event = fixtures::update_event(&UpdateCommand {
        filter: by_item(item.item_id),
        update: FieldMap::new().with("wasteWeight", FieldValue::Float(1.5)),
    });
    let response = CommandRouter::default().dispatch(&store, &locks, &event).await;

    let outcome: UpdateOutcome =
        serde_json::from_slice(response.result.as_deref().unwrap()).unwrap();
    assert_eq!(outcome.matched_count, 1);
    assert_eq!(outcome.modified_count, 1);
}

#[tokio::test]
async fn ill_typed_update_leaves_the_item_sellable() {
    let store = InMemoryRecordStore::new();
    let locks = InMemoryLockCoordinator::new();
    let router = CommandRouter::default();
    let item = fixtures::item(10.0);
    store.insert_one(&item).await.unwrap();

    let update = fixtures::update_event(&UpdateCommand {
        filter: by_item(item.item_id),
        update: FieldMap::new().with("lot", FieldValue::Integer(5)),
    });
    let response = router.dispatch(&store, &locks, &update).await;
    assert_eq!(response.error_code, Some(ErrorCode::InternalError));
    assert!(response.error.as_deref().unwrap().contains("lot"));

    let sale = fixtures::sale_event(&fixtures::sale(&[(item.item_id, 4.0)]));
    let response = router.dispatch(&store, &locks, &sale).await;
    assert_eq!(response.error_code, None, "{:?}", response.error);
    assert_eq!(store.total_weight(item.item_id), Some(6.0));
}

#[tokio::test]
async fn published_sale_response_lands_on_the_aggregate_topic() {
    let store = InMemoryRecordStore::new();
    let locks = InMemoryLockCoordinator::new();
    let bus = InMemoryEventBus::new();
    let emitter = ResponseEmitter::new("inventory.response", "inventory.service.response", 3);
    let item = fixtures::item(4.0);
    store.insert_one(&item).await.unwrap();

    // Sales arrive from the sales aggregate; the reply still goes to ours.
    let mut event = fixtures::sale_event(&fixtures::sale(&[(item.item_id, 1.0)]));
    event.aggregate_id = 2;

    let response = CommandRouter::default().dispatch(&store, &locks, &event).await;
    emitter.publish(&bus, &response).await.unwrap();

    let sent = bus.messages("inventory.service.response.3");
    assert_eq!(sent.len(), 1);
    let decoded: CommandResponse = serde_json::from_slice(&sent[0].payload).unwrap();
    assert_eq!(decoded.correlation_id, event.correlation_id);
    assert_eq!(decoded.aggregate_id, 2);
    assert!(bus.messages("inventory.response").is_empty());
}

fn field_map(entries: Vec<(String, i64)>) -> FieldMap {
    let mut map = FieldMap::new();
    for (key, value) in entries {
        map.insert(key, FieldValue::Integer(value));
    }
    map
}

/// Names no item field uses, so only the ordering checks apply.
fn extra_fields() -> impl Strategy<Value = Vec<(String, i64)>> {
    prop::collection::vec(("x_[a-z]{1,8}", any::<i64>()), 0..4)
}

proptest! {
    #[test]
    fn update_validation_checks_filter_then_update_then_item_id(
        filter in extra_fields(),
        update in extra_fields(),
        zero_item in any::<bool>(),
    ) {
        let filter = field_map(filter);
        let mut update = field_map(update);
        if zero_item {
            update = update.with("itemID", FieldValue::Text(NIL.into()));
        }

        let store = InMemoryRecordStore::new();
        let command = UpdateCommand { filter: filter.clone(), update: update.clone() };
        let payload = serde_json::to_vec(&command).unwrap();
        let result = tokio_test::block_on(handlers::update(&store, &payload));

        let expected = if filter.is_empty() {
            Some("blank filter provided")
        } else if update.is_empty() {
            Some("blank update provided")
        } else if zero_item {
            Some("found blank itemID in update")
        } else {
            None
        };

        match expected {
            Some(message) => {
                prop_assert_eq!(result.unwrap_err().to_string(), message);
                prop_assert_eq!(store.mutation_count(), 0);
            }
            None => prop_assert!(result.is_ok()),
        }
    }

    #[test]
    fn only_the_three_actions_classify(
        action in "(insert|update|delete|[a-z]{1,10})",
        service in proptest::option::of("(createSale|createFlashSale|[a-zA-Z]{1,16})"),
    ) {
        let mut event = DomainEvent::new(action.clone(), 3, Vec::new());
        event.service_action = service.clone();

        let kind = CommandRouter::classify(&event);
        match action.as_str() {
            "insert" => prop_assert_eq!(kind.unwrap(), CommandKind::Insert),
            "delete" => prop_assert_eq!(kind.unwrap(), CommandKind::Delete),
            "update" => {
                let is_sale = matches!(service.as_deref(), Some("createSale" | "createFlashSale"));
                prop_assert_eq!(matches!(kind.unwrap(), CommandKind::Sale(_)), is_sale);
            }
            _ => prop_assert!(kind.is_err()),
        }
    }
}
