//! Stock Decrement Coordinator.
//!
//! Applies a [`SaleRequest`] by decrementing `totalWeight` on each referenced
//! item. Many processor instances may handle sales for the same item at the
//! same time, from different partitions, in no particular order. The only
//! thing serializing them is the per-item lock:
//!
//! ```text
//! for each line item, in request order:
//!     acquire lock(item)           ── timeout ⇒ fail, nothing written for this item
//!     read totalWeight             ── missing ⇒ fail
//!     weight > totalWeight?        ── yes ⇒ fail (insufficient stock)
//!     CAS totalWeight: read → read − weight
//!                                  ── stale ⇒ fail (concurrent modification)
//!     release lock(item)
//! ```
//!
//! At most one lock is held at any moment and it is released on every path
//! before the next line starts or the call returns. A failed release is
//! retried with backoff. If the lock service keeps failing, the line's result
//! stands and the lease is left to expire by TTL, logged at error level and
//! counted in `inventory_cmd_lock_release_failures_total`.
//!
//! # Partial failure
//!
//! Lines are committed one at a time. If line *k* fails, lines `1..k` stay
//! committed and the whole sale is reported as failed. No compensation is
//! attempted here.

use crate::handlers::{decode, encode};
use crate::metrics::LockMetrics;
use crate::retry::{RetryPolicy, retry_with_predicate};
use inventory_cmd_core::command::{SaleLineItem, SaleLineOutcome, SaleOutcome, SaleRequest};
use inventory_cmd_core::lock::ITEM_LOCK_PREFIX;
use inventory_cmd_core::{
    CommandError, LockCoordinator, LockError, LockKey, LockLease, RecordStore, RecordStoreError,
};
use std::time::{Duration, Instant};

/// Default bound on how long a sale waits for one item's lock.
pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(5);

/// Serializes per-item read-check-decrement-write cycles.
#[derive(Clone, Debug)]
pub struct StockDecrementCoordinator {
    lock_wait: Duration,
    lock_prefix: String,
    release_retry: RetryPolicy,
}

impl Default for StockDecrementCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_WAIT)
    }
}

impl StockDecrementCoordinator {
    /// Coordinator that waits at most `lock_wait` per item lock.
    #[must_use]
    pub fn new(lock_wait: Duration) -> Self {
        Self {
            lock_wait,
            lock_prefix: ITEM_LOCK_PREFIX.to_string(),
            release_retry: default_release_retry(),
        }
    }

    /// Use a different lock key namespace.
    #[must_use]
    pub fn with_lock_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.lock_prefix = prefix.into();
        self
    }

    /// Backoff used when releasing an item lock fails.
    #[must_use]
    pub fn with_release_retry(mut self, policy: RetryPolicy) -> Self {
        self.release_retry = policy;
        self
    }

    /// Lock key for one item under this coordinator's namespace.
    #[must_use]
    pub fn lock_key(&self, line: &SaleLineItem) -> LockKey {
        LockKey::for_item_with_prefix(&self.lock_prefix, line.item_id)
    }

    /// Decode a sale payload, apply it, and encode the outcome.
    ///
    /// # Errors
    ///
    /// [`CommandError::Decode`] for a malformed payload, otherwise whatever
    /// [`apply`](Self::apply) returns.
    pub async fn handle(
        &self,
        store: &dyn RecordStore,
        locks: &dyn LockCoordinator,
        data: &[u8],
    ) -> Result<Vec<u8>, CommandError> {
        let sale: SaleRequest = decode(data)?;
        let outcome = self.apply(store, locks, &sale).await?;
        encode(&outcome)
    }

    /// Apply a sale line by line.
    ///
    /// The whole request is validated before any lock is taken: at least one
    /// line, every weight finite and positive, every item ID non-zero.
    ///
    /// # Errors
    ///
    /// - [`CommandError::Validation`] for a malformed request
    /// - [`CommandError::Lock`] if an item lock is not acquired in time
    /// - [`CommandError::ItemNotFound`] if an item does not exist
    /// - [`CommandError::InsufficientStock`] if a line asks for too much
    /// - [`CommandError::ConcurrentModification`] if the conditional write
    ///   finds a value other than the one read
    /// - [`CommandError::Store`] if the store fails
    pub async fn apply(
        &self,
        store: &dyn RecordStore,
        locks: &dyn LockCoordinator,
        sale: &SaleRequest,
    ) -> Result<SaleOutcome, CommandError> {
        validate(sale)?;

        let mut items = Vec::with_capacity(sale.items.len());
        for (index, line) in sale.items.iter().enumerate() {
            match self.apply_line(store, locks, line).await {
                Ok(outcome) => items.push(outcome),
                Err(err) => {
                    if index > 0 {
                        tracing::warn!(
                            sale_id = %sale.sale_id,
                            committed_lines = index,
                            failed_item = %line.item_id,
                            "Sale failed after earlier lines were committed"
                        );
                    }
                    return Err(err);
                }
            }
        }

        tracing::debug!(sale_id = %sale.sale_id, lines = items.len(), "Sale applied");
        Ok(SaleOutcome {
            sale_id: sale.sale_id,
            items,
        })
    }

    async fn apply_line(
        &self,
        store: &dyn RecordStore,
        locks: &dyn LockCoordinator,
        line: &SaleLineItem,
    ) -> Result<SaleLineOutcome, CommandError> {
        let key = self.lock_key(line);

        let started = Instant::now();
        let acquired = locks.acquire(&key, self.lock_wait).await;
        LockMetrics::record_wait(started.elapsed());

        let lease = acquired.map_err(|source| {
            if matches!(source, LockError::Timeout { .. }) {
                LockMetrics::record_timeout();
            }
            CommandError::Lock {
                item_id: line.item_id,
                source,
            }
        })?;
        tracing::trace!(lock_key = %key, item_id = %line.item_id, "Item lock acquired");

        let result = decrement(store, line).await;
        self.release(locks, lease).await;
        result
    }

    async fn release(&self, locks: &dyn LockCoordinator, lease: LockLease) {
        let released = retry_with_predicate(
            &self.release_retry,
            || locks.release(lease.clone()),
            |e| matches!(e, LockError::Backend(_)),
        )
        .await;

        if let Err(e) = released {
            LockMetrics::record_release_failure();
            tracing::error!(
                lock_key = %lease.key(),
                error = %e,
                "Item lock not released, left to expire by TTL"
            );
        }
    }
}

fn default_release_retry() -> RetryPolicy {
    RetryPolicy::builder()
        .max_retries(3)
        .initial_delay(Duration::from_millis(10))
        .max_delay(Duration::from_millis(200))
        .build()
}

/// Read, check, and conditionally write one line. Runs under the item lock.
async fn decrement(
    store: &dyn RecordStore,
    line: &SaleLineItem,
) -> Result<SaleLineOutcome, CommandError> {
    let item = store
        .find_item(line.item_id)
        .await?
        .ok_or(CommandError::ItemNotFound(line.item_id))?;

    let record_id = item.record_id.ok_or_else(|| {
        RecordStoreError::Serialization(format!("stored item {} has no record id", line.item_id))
    })?;

    let available = item.total_weight;
    if line.weight > available {
        return Err(CommandError::InsufficientStock {
            item_id: line.item_id,
            requested: line.weight,
            available,
        });
    }

    let remaining = available - line.weight;
    if !store
        .compare_and_set_total_weight(record_id, available, remaining)
        .await?
    {
        return Err(CommandError::ConcurrentModification(line.item_id));
    }

    tracing::debug!(
        item_id = %line.item_id,
        %record_id,
        previous_weight = available,
        total_weight = remaining,
        "Stock decremented"
    );
    Ok(SaleLineOutcome {
        item_id: line.item_id,
        previous_weight: available,
        total_weight: remaining,
    })
}

fn validate(sale: &SaleRequest) -> Result<(), CommandError> {
    if sale.items.is_empty() {
        return Err(CommandError::validation("sale has no items"));
    }
    for line in &sale.items {
        if line.item_id.is_zero() {
            return Err(CommandError::validation("found blank itemID in sale item"));
        }
        if !line.weight.is_finite() || line.weight <= 0.0 {
            return Err(CommandError::validation(format!(
                "sale weight for item {} must be positive",
                line.item_id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use inventory_cmd_core::item::ItemId;
    use inventory_cmd_testing::{InMemoryLockCoordinator, InMemoryRecordStore, fixtures};

    async fn stocked(store: &InMemoryRecordStore, weight: f64) -> ItemId {
        let item = fixtures::item(weight);
        store.insert_one(&item).await.unwrap();
        item.item_id
    }

    #[tokio::test]
    async fn decrements_and_reports_each_line() {
        let store = InMemoryRecordStore::new();
        let locks = InMemoryLockCoordinator::new();
        let item_id = stocked(&store, 300.0).await;

        let outcome = StockDecrementCoordinator::default()
            .apply(&store, &locks, &fixtures::sale(&[(item_id, 12.24)]))
            .await
            .unwrap();

        assert_eq!(outcome.items.len(), 1);
        assert!((outcome.items[0].previous_weight - 300.0).abs() < 1e-9);
        assert!((outcome.items[0].total_weight - 287.76).abs() < 1e-9);
        assert!((store.total_weight(item_id).unwrap() - 287.76).abs() < 1e-9);
        assert!(locks.held_keys().is_empty());
    }

    #[tokio::test]
    async fn insufficient_stock_leaves_item_unchanged() {
        let store = InMemoryRecordStore::new();
        let locks = InMemoryLockCoordinator::new();
        let item_id = stocked(&store, 10.0).await;

        let err = StockDecrementCoordinator::default()
            .apply(&store, &locks, &fixtures::sale(&[(item_id, 10.5)]))
            .await
            .unwrap_err();

        assert!(matches!(err, CommandError::InsufficientStock { .. }));
        assert_eq!(store.total_weight(item_id), Some(10.0));
        assert!(locks.held_keys().is_empty());
    }

    #[tokio::test]
    async fn selling_exact_stock_reaches_zero() {
        let store = InMemoryRecordStore::new();
        let locks = InMemoryLockCoordinator::new();
        let item_id = stocked(&store, 4.0).await;

        StockDecrementCoordinator::default()
            .apply(&store, &locks, &fixtures::sale(&[(item_id, 4.0)]))
            .await
            .unwrap();
        assert_eq!(store.total_weight(item_id), Some(0.0));
    }

    #[tokio::test]
    async fn invalid_lines_are_rejected_before_locking() {
        let store = InMemoryRecordStore::new();
        let locks = InMemoryLockCoordinator::new();
        let item_id = stocked(&store, 10.0).await;
        let coordinator = StockDecrementCoordinator::default();

        for sale in [
            fixtures::sale(&[]),
            fixtures::sale(&[(item_id, 0.0)]),
            fixtures::sale(&[(item_id, -1.0)]),
            fixtures::sale(&[(item_id, f64::NAN)]),
            fixtures::sale(&[(item_id, 1.0), (ItemId::default(), 1.0)]),
        ] {
            let err = coordinator.apply(&store, &locks, &sale).await.unwrap_err();
            assert!(matches!(err, CommandError::Validation(_)), "{err}");
        }
        assert_eq!(locks.acquisition_count(), 0);
        assert_eq!(store.total_weight(item_id), Some(10.0));
    }

    #[tokio::test]
    async fn missing_item_fails_and_releases_lock() {
        let store = InMemoryRecordStore::new();
        let locks = InMemoryLockCoordinator::new();

        let missing = ItemId::new();
        let err = StockDecrementCoordinator::default()
            .apply(&store, &locks, &fixtures::sale(&[(missing, 1.0)]))
            .await
            .unwrap_err();

        assert!(matches!(err, CommandError::ItemNotFound(id) if id == missing));
        assert!(locks.held_keys().is_empty());
    }

    #[tokio::test]
    async fn later_line_failure_keeps_earlier_lines_committed() {
        let store = InMemoryRecordStore::new();
        let locks = InMemoryLockCoordinator::new();
        let first = stocked(&store, 10.0).await;
        let second = stocked(&store, 1.0).await;

        let err = StockDecrementCoordinator::default()
            .apply(&store, &locks, &fixtures::sale(&[(first, 3.0), (second, 2.0)]))
            .await
            .unwrap_err();

        assert!(matches!(err, CommandError::InsufficientStock { item_id, .. } if item_id == second));
        assert_eq!(store.total_weight(first), Some(7.0));
        assert_eq!(store.total_weight(second), Some(1.0));
        assert!(locks.held_keys().is_empty());
    }

    #[tokio::test]
    async fn conditional_write_rejects_uncooperative_writer() {
        let store = InMemoryRecordStore::new().with_read_delay(Duration::from_millis(50));
        let locks = InMemoryLockCoordinator::new();
        let item_id = stocked(&store, 10.0).await;

        let sale = {
            let store = store.clone();
            let locks = locks.clone();
            tokio::spawn(async move {
                StockDecrementCoordinator::default()
                    .apply(&store, &locks, &fixtures::sale(&[(item_id, 1.0)]))
                    .await
            })
        };

        // Lands inside the read→write window without taking the lock.
        tokio::time::sleep(Duration::from_millis(10)).await;
        store.set_total_weight(item_id, 2.0);

        let err = sale.await.unwrap().unwrap_err();
        assert!(matches!(err, CommandError::ConcurrentModification(id) if id == item_id));
        assert_eq!(store.total_weight(item_id), Some(2.0));
        assert!(locks.held_keys().is_empty());
    }

    #[tokio::test]
    async fn lock_backend_failure_is_a_lock_error() {
        let store = InMemoryRecordStore::new();
        let locks = InMemoryLockCoordinator::new();
        let item_id = stocked(&store, 10.0).await;
        locks.set_failing(true);

        let err = StockDecrementCoordinator::default()
            .apply(&store, &locks, &fixtures::sale(&[(item_id, 1.0)]))
            .await
            .unwrap_err();

        assert!(matches!(err, CommandError::Lock { source: LockError::Backend(_), .. }));
        assert_eq!(store.total_weight(item_id), Some(10.0));
    }

    #[tokio::test]
    async fn transient_release_failure_is_retried() {
        let store = InMemoryRecordStore::new();
        let locks = InMemoryLockCoordinator::new();
        let item_id = stocked(&store, 10.0).await;
        locks.fail_next_releases(2);

        let coordinator = StockDecrementCoordinator::default();
        coordinator
            .apply(&store, &locks, &fixtures::sale(&[(item_id, 1.0)]))
            .await
            .unwrap();

        assert!(locks.held_keys().is_empty());
        coordinator
            .apply(&store, &locks, &fixtures::sale(&[(item_id, 1.0)]))
            .await
            .unwrap();
        assert_eq!(store.total_weight(item_id), Some(8.0));
    }

    #[tokio::test]
    async fn exhausted_release_keeps_the_committed_line() {
        let store = InMemoryRecordStore::new();
        let locks = InMemoryLockCoordinator::new();
        let item_id = stocked(&store, 10.0).await;
        locks.fail_next_releases(usize::MAX);

        let coordinator = StockDecrementCoordinator::default().with_release_retry(
            RetryPolicy::builder()
                .max_retries(1)
                .initial_delay(Duration::from_millis(1))
                .build(),
        );
        let outcome = coordinator
            .apply(&store, &locks, &fixtures::sale(&[(item_id, 1.0)]))
            .await
            .unwrap();

        assert!((outcome.items[0].total_weight - 9.0).abs() < 1e-9);
        assert_eq!(locks.held_keys().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_item_rows_decrement_only_the_oldest() {
        let store = InMemoryRecordStore::new();
        let locks = InMemoryLockCoordinator::new();
        let item = fixtures::item(10.0);
        store.insert_one(&item).await.unwrap();
        store.insert_one(&item).await.unwrap();

        let outcome = StockDecrementCoordinator::default()
            .apply(&store, &locks, &fixtures::sale(&[(item.item_id, 4.0)]))
            .await
            .unwrap();

        assert!((outcome.items[0].total_weight - 6.0).abs() < 1e-9);
        let weights: Vec<f64> = store
            .documents()
            .iter()
            .filter_map(|d| d["totalWeight"].as_f64())
            .collect();
        assert_eq!(weights, vec![6.0, 10.0]);
    }

    #[tokio::test]
    async fn custom_prefix_namespaces_lock_keys() {
        let coordinator = StockDecrementCoordinator::default().with_lock_prefix("tenant-a:lock");
        let sale = fixtures::sale(&[(ItemId::new(), 1.0)]);

        assert!(coordinator.lock_key(&sale.items[0]).as_str().starts_with("tenant-a:lock:"));
    }
}
