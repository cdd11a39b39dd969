//! Ready-made items and events.

#![allow(clippy::expect_used)] // Encoding fixtures with known-good shapes cannot fail

use chrono::Utc;
use inventory_cmd_core::DomainEvent;
use inventory_cmd_core::command::{DeleteFilter, SaleLineItem, SaleRequest, UpdateCommand};
use inventory_cmd_core::item::{InventoryItem, ItemId};
use uuid::Uuid;

/// Aggregate ID of the inventory aggregate.
pub const INVENTORY_AGGREGATE_ID: i32 = 3;

/// A fully populated item with fresh identifiers and the given stock.
#[must_use]
pub fn item(total_weight: f64) -> InventoryItem {
    let now = Utc::now().timestamp();
    InventoryItem {
        record_id: None,
        item_id: ItemId::new(),
        barcode: "test-barcode".to_string(),
        date_arrived: now,
        date_sold: None,
        device_id: Uuid::new_v4(),
        expiry_date: None,
        lot: "test-lot".to_string(),
        name: "test-name".to_string(),
        origin: "test-origin".to_string(),
        price: 13.4,
        rs_customer_id: Uuid::new_v4(),
        sale_price: 12.23,
        sku: "test-sku".to_string(),
        timestamp: now,
        total_weight,
        upc: 123_456_789_012,
        waste_weight: 12.0,
    }
}

/// A sale with one line per `(item, weight)` pair, in the given order.
#[must_use]
pub fn sale(lines: &[(ItemId, f64)]) -> SaleRequest {
    SaleRequest {
        sale_id: Uuid::new_v4(),
        timestamp: Utc::now().timestamp_nanos_opt().unwrap_or_default(),
        items: lines
            .iter()
            .map(|&(item_id, weight)| SaleLineItem {
                item_id,
                barcode: "test-barcode".to_string(),
                lot: "test-lot".to_string(),
                sku: "test-sku".to_string(),
                weight,
            })
            .collect(),
    }
}

/// `insert` event carrying `item`.
///
/// # Panics
///
/// Never in practice; the item always encodes.
#[must_use]
pub fn insert_event(item: &InventoryItem) -> DomainEvent {
    DomainEvent::new(
        "insert",
        INVENTORY_AGGREGATE_ID,
        serde_json::to_vec(item).expect("item encodes"),
    )
}

/// Generic `update` event carrying `command`.
///
/// # Panics
///
/// Never in practice; the command always encodes.
#[must_use]
pub fn update_event(command: &UpdateCommand) -> DomainEvent {
    DomainEvent::new(
        "update",
        INVENTORY_AGGREGATE_ID,
        serde_json::to_vec(command).expect("command encodes"),
    )
}

/// `delete` event carrying `filter`.
///
/// # Panics
///
/// Never in practice; the filter always encodes.
#[must_use]
pub fn delete_event(filter: &DeleteFilter) -> DomainEvent {
    DomainEvent::new(
        "delete",
        INVENTORY_AGGREGATE_ID,
        serde_json::to_vec(filter).expect("filter encodes"),
    )
}

/// `update`/`createSale` event carrying `sale`.
///
/// # Panics
///
/// Never in practice; the sale always encodes.
#[must_use]
pub fn sale_event(sale: &SaleRequest) -> DomainEvent {
    DomainEvent::new(
        "update",
        INVENTORY_AGGREGATE_ID,
        serde_json::to_vec(sale).expect("sale encodes"),
    )
    .with_service_action("createSale")
}
