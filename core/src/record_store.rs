//! Record Store Gateway abstraction.
//!
//! The command processor never talks to a database driver directly. It goes
//! through [`RecordStore`], which exposes exactly the operations the handlers
//! need: point insert, filtered multi-update, filtered multi-delete, point read
//! by item ID, and a conditional stock write.
//!
//! # Implementations
//!
//! - `PostgresRecordStore` (`inventory-cmd-postgres`): JSONB documents in PostgreSQL
//! - `InMemoryRecordStore` (`inventory-cmd-testing`): for tests
//!
//! # Filter semantics
//!
//! A record matches a filter when every filter field is present on the
//! record with an equal value. Numbers compare numerically, so `300` matches
//! `300.0`. Nested maps must match exactly.

use crate::command::{DeleteOutcome, UpdateOutcome};
use crate::item::{InventoryItem, ItemId, RecordId};
use crate::value::FieldMap;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors returned by record store operations.
#[derive(Error, Debug, Clone)]
pub enum RecordStoreError {
    /// Could not reach the store.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The store rejected or failed a query.
    #[error("query failed: {0}")]
    Query(String),

    /// A record could not be encoded or decoded.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The operation did not finish in time.
    #[error("operation timed out: {0}")]
    Timeout(String),
}

/// Boxed future returned by [`RecordStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RecordStoreError>> + Send + 'a>>;

/// Gateway to the materialized inventory records.
///
/// Shared across all concurrently handled events as `Arc<dyn RecordStore>`
/// and passed by reference into each handler. There is no cross-call
/// transaction: each method is one independent store operation.
pub trait RecordStore: Send + Sync {
    /// Insert one record and return its newly assigned identifier.
    ///
    /// Any `record_id` already set on `item` is ignored.
    ///
    /// # Errors
    ///
    /// Returns a [`RecordStoreError`] if the store rejects the write.
    fn insert_one<'a>(&'a self, item: &'a InventoryItem) -> StoreFuture<'a, RecordId>;

    /// Set the `update` fields on every record matching `filter`.
    ///
    /// `modified_count` counts records whose document actually changed.
    ///
    /// # Errors
    ///
    /// Returns a [`RecordStoreError`] if the store rejects the write.
    fn update_many<'a>(
        &'a self,
        filter: &'a FieldMap,
        update: &'a FieldMap,
    ) -> StoreFuture<'a, UpdateOutcome>;

    /// Remove every record matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns a [`RecordStoreError`] if the store rejects the delete.
    fn delete_many<'a>(&'a self, filter: &'a FieldMap) -> StoreFuture<'a, DeleteOutcome>;

    /// Read the record with the given item ID, if any.
    ///
    /// When several records share the item ID, the oldest one (lowest
    /// [`RecordId`]) wins. The returned item carries its `record_id`.
    ///
    /// # Errors
    ///
    /// Returns a [`RecordStoreError`] if the read fails or the stored
    /// document is not a valid [`InventoryItem`].
    fn find_item(&self, item_id: ItemId) -> StoreFuture<'_, Option<InventoryItem>>;

    /// Write `new` as the `totalWeight` of record `record_id` only if it still
    /// equals `expected`.
    ///
    /// Keyed on the record rather than the item ID, so the write lands on the
    /// same record [`find_item`](Self::find_item) returned. Returns `false`,
    /// writing nothing, when the stored value differs or the record no longer
    /// exists.
    ///
    /// # Errors
    ///
    /// Returns a [`RecordStoreError`] if the store rejects the write.
    fn compare_and_set_total_weight(
        &self,
        record_id: RecordId,
        expected: f64,
        new: f64,
    ) -> StoreFuture<'_, bool>;
}
