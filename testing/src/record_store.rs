//! In-memory [`RecordStore`].
//!
//! Records are kept as JSON documents, the same shape the Postgres adapter
//! stores, so filter and merge semantics line up with production.

#![allow(clippy::unwrap_used)] // Test infrastructure: lock poisoning is a test bug

use inventory_cmd_core::command::{DeleteOutcome, UpdateOutcome};
use inventory_cmd_core::item::{ITEM_ID_FIELD, InventoryItem, ItemId, RECORD_ID_FIELD, RecordId, TOTAL_WEIGHT_FIELD};
use inventory_cmd_core::record_store::{RecordStore, RecordStoreError, StoreFuture};
use inventory_cmd_core::value::FieldMap;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

type Document = Map<String, Value>;

/// Insertion-ordered document store for tests.
///
/// Besides implementing [`RecordStore`], it exposes knobs to make the
/// concurrency and failure paths reproducible:
///
/// - [`with_read_delay`](Self::with_read_delay) sleeps after every
///   [`find_item`](RecordStore::find_item), widening the read→write window
/// - [`set_unavailable`](Self::set_unavailable) makes every call fail with
///   [`RecordStoreError::Connection`]
/// - [`mutation_count`](Self::mutation_count) counts write attempts
///
/// # Example
///
/// ```
/// use inventory_cmd_testing::{InMemoryRecordStore, fixtures};
/// use inventory_cmd_core::RecordStore;
///
/// # tokio_test::block_on(async {
/// let store = InMemoryRecordStore::new();
/// let item = fixtures::item(300.0);
/// store.insert_one(&item).await.unwrap();
///
/// assert_eq!(store.total_weight(item.item_id), Some(300.0));
/// # });
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryRecordStore {
    docs: Arc<RwLock<Vec<Document>>>,
    next_id: Arc<AtomicI64>,
    read_delay: Option<Duration>,
    unavailable: Arc<AtomicBool>,
    mutations: Arc<AtomicUsize>,
}

impl InMemoryRecordStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `delay` after every item read.
    #[must_use]
    pub const fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    /// Make every subsequent call fail (or succeed again).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of write operations attempted against the store.
    #[must_use]
    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.docs.read().unwrap().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.docs.read().unwrap().is_empty()
    }

    /// Stored `totalWeight` of an item, bypassing the trait.
    #[must_use]
    pub fn total_weight(&self, item_id: ItemId) -> Option<f64> {
        let docs = self.docs.read().unwrap();
        find_doc(&docs, item_id)
            .and_then(|doc| doc.get(TOTAL_WEIGHT_FIELD))
            .and_then(Value::as_f64)
    }

    /// Overwrite an item's `totalWeight` directly, the way a writer that does
    /// not take the item lock would.
    pub fn set_total_weight(&self, item_id: ItemId, weight: f64) {
        let mut docs = self.docs.write().unwrap();
        if let Some(doc) = docs.iter_mut().find(|d| has_item_id(d, item_id)) {
            doc.insert(TOTAL_WEIGHT_FIELD.to_string(), json_number(weight));
        }
    }

    /// Snapshot of every stored document.
    #[must_use]
    pub fn documents(&self) -> Vec<Value> {
        self.docs
            .read()
            .unwrap()
            .iter()
            .cloned()
            .map(Value::Object)
            .collect()
    }

    fn check_available(&self) -> Result<(), RecordStoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(RecordStoreError::Connection("store unavailable".to_string()))
        } else {
            Ok(())
        }
    }

    fn count_mutation(&self) {
        self.mutations.fetch_add(1, Ordering::SeqCst);
    }
}

impl RecordStore for InMemoryRecordStore {
    fn insert_one<'a>(&'a self, item: &'a InventoryItem) -> StoreFuture<'a, RecordId> {
        Box::pin(async move {
            self.count_mutation();
            self.check_available()?;

            let Value::Object(mut doc) = serde_json::to_value(item)
                .map_err(|e| RecordStoreError::Serialization(e.to_string()))?
            else {
                return Err(RecordStoreError::Serialization(
                    "item did not serialize to an object".to_string(),
                ));
            };

            let id = RecordId::new(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
            doc.insert(RECORD_ID_FIELD.to_string(), Value::from(id.get()));
            self.docs.write().unwrap().push(doc);
            Ok(id)
        })
    }

    fn update_many<'a>(
        &'a self,
        filter: &'a FieldMap,
        update: &'a FieldMap,
    ) -> StoreFuture<'a, UpdateOutcome> {
        Box::pin(async move {
            self.count_mutation();
            self.check_available()?;

            let filter = filter.to_json_object();
            let mut outcome = UpdateOutcome::default();
            let mut docs = self.docs.write().unwrap();
            for doc in docs.iter_mut().filter(|d| matches(d, &filter)) {
                outcome.matched_count += 1;
                let mut changed = false;
                for (field, value) in update.iter() {
                    let value = value.to_json();
                    if doc.get(field).is_none_or(|old| !values_equal(old, &value)) {
                        doc.insert(field.to_string(), value);
                        changed = true;
                    }
                }
                if changed {
                    outcome.modified_count += 1;
                }
            }
            drop(docs);
            Ok(outcome)
        })
    }

    fn delete_many<'a>(&'a self, filter: &'a FieldMap) -> StoreFuture<'a, DeleteOutcome> {
        Box::pin(async move {
            self.count_mutation();
            self.check_available()?;

            let filter = filter.to_json_object();
            let mut docs = self.docs.write().unwrap();
            let before = docs.len();
            docs.retain(|d| !matches(d, &filter));
            let deleted = before - docs.len();
            drop(docs);

            Ok(DeleteOutcome {
                deleted_count: i64::try_from(deleted).unwrap_or(i64::MAX),
            })
        })
    }

    fn find_item(&self, item_id: ItemId) -> StoreFuture<'_, Option<InventoryItem>> {
        Box::pin(async move {
            self.check_available()?;

            let doc = {
                let docs = self.docs.read().unwrap();
                find_doc(&docs, item_id).cloned()
            };
            let item = doc
                .map(|d| serde_json::from_value::<InventoryItem>(Value::Object(d)))
                .transpose()
                .map_err(|e| RecordStoreError::Serialization(e.to_string()))?;

            if let Some(delay) = self.read_delay {
                tokio::time::sleep(delay).await;
            }
            Ok(item)
        })
    }

    fn compare_and_set_total_weight(
        &self,
        record_id: RecordId,
        expected: f64,
        new: f64,
    ) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            self.count_mutation();
            self.check_available()?;

            let mut docs = self.docs.write().unwrap();
            let Some(doc) = docs.iter_mut().find(|d| has_record_id(d, record_id)) else {
                return Ok(false);
            };
            #[allow(clippy::float_cmp)] // exact match against the value read is the condition
            let current_matches = doc.get(TOTAL_WEIGHT_FIELD).and_then(Value::as_f64) == Some(expected);
            if !current_matches {
                return Ok(false);
            }
            doc.insert(TOTAL_WEIGHT_FIELD.to_string(), json_number(new));
            drop(docs);
            Ok(true)
        })
    }
}

fn has_item_id(doc: &Document, item_id: ItemId) -> bool {
    doc.get(ITEM_ID_FIELD)
        .and_then(Value::as_str)
        .is_some_and(|s| s == item_id.to_string())
}

fn has_record_id(doc: &Document, record_id: RecordId) -> bool {
    doc.get(RECORD_ID_FIELD).and_then(Value::as_i64) == Some(record_id.get())
}

fn find_doc(docs: &[Document], item_id: ItemId) -> Option<&Document> {
    docs.iter().find(|d| has_item_id(d, item_id))
}

fn matches(doc: &Document, filter: &Map<String, Value>) -> bool {
    filter
        .iter()
        .all(|(field, want)| doc.get(field).is_some_and(|have| values_equal(have, want)))
}

/// JSON equality with numbers compared by value, so `300` equals `300.0`.
#[allow(clippy::float_cmp)]
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(k, v)| y.get(k).is_some_and(|w| values_equal(v, w)))
        }
        _ => a == b,
    }
}

fn json_number(n: f64) -> Value {
    serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use inventory_cmd_core::value::FieldValue;

    #[tokio::test]
    async fn filters_compare_numbers_numerically() {
        let store = InMemoryRecordStore::new();
        let item = fixtures::item(300.0);
        store.insert_one(&item).await.unwrap();

        let filter = FieldMap::new()
            .with("itemID", FieldValue::Text(item.item_id.to_string()))
            .with("totalWeight", FieldValue::Integer(300));
        let update = FieldMap::new().with("origin", FieldValue::Text("elsewhere".into()));

        let outcome = store.update_many(&filter, &update).await.unwrap();
        assert_eq!(outcome, UpdateOutcome { matched_count: 1, modified_count: 1 });
    }

    #[tokio::test]
    async fn unchanged_update_is_matched_but_not_modified() {
        let store = InMemoryRecordStore::new();
        let item = fixtures::item(300.0);
        store.insert_one(&item).await.unwrap();

        let filter = FieldMap::new().with("itemID", FieldValue::Text(item.item_id.to_string()));
        let update = FieldMap::new().with("lot", FieldValue::Text(item.lot.clone()));

        let outcome = store.update_many(&filter, &update).await.unwrap();
        assert_eq!(outcome, UpdateOutcome { matched_count: 1, modified_count: 0 });
    }

    #[tokio::test]
    async fn compare_and_set_rejects_stale_expectation() {
        let store = InMemoryRecordStore::new();
        let item = fixtures::item(10.0);
        let record_id = store.insert_one(&item).await.unwrap();

        assert!(!store.compare_and_set_total_weight(record_id, 9.0, 8.0).await.unwrap());
        assert_eq!(store.total_weight(item.item_id), Some(10.0));

        assert!(store.compare_and_set_total_weight(record_id, 10.0, 8.0).await.unwrap());
        assert_eq!(store.total_weight(item.item_id), Some(8.0));

        assert!(!store.compare_and_set_total_weight(RecordId::new(999), 8.0, 1.0).await.unwrap());
    }

    #[tokio::test]
    async fn compare_and_set_writes_only_the_record_read() {
        let store = InMemoryRecordStore::new();
        let item = fixtures::item(10.0);
        let oldest = store.insert_one(&item).await.unwrap();
        store.insert_one(&item).await.unwrap();

        let found = store.find_item(item.item_id).await.unwrap().unwrap();
        assert_eq!(found.record_id, Some(oldest));

        assert!(store.compare_and_set_total_weight(oldest, 10.0, 3.0).await.unwrap());

        let weights: Vec<f64> = store
            .documents()
            .iter()
            .filter_map(|d| d.get(TOTAL_WEIGHT_FIELD).and_then(Value::as_f64))
            .collect();
        assert_eq!(weights, vec![3.0, 10.0]);
    }

    #[tokio::test]
    async fn insert_assigns_increasing_record_ids() {
        let store = InMemoryRecordStore::new();
        let a = store.insert_one(&fixtures::item(1.0)).await.unwrap();
        let b = store.insert_one(&fixtures::item(1.0)).await.unwrap();
        assert!(b > a);
    }

    #[tokio::test]
    async fn unavailable_store_fails_with_connection_error() {
        let store = InMemoryRecordStore::new();
        store.set_unavailable(true);

        let result = store.find_item(ItemId::new()).await;
        assert!(matches!(result, Err(RecordStoreError::Connection(_))));
    }
}
