//! In-memory [`LockCoordinator`].

#![allow(clippy::unwrap_used)] // Test infrastructure: lock poisoning is a test bug

use inventory_cmd_core::lock::{LockCoordinator, LockError, LockFuture, LockKey, LockLease};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

/// Process-local lock table with the same contract as the Redis coordinator.
///
/// Waiters park on a [`Notify`] and retry whenever any lock is released, so
/// contention resolves without polling.
///
/// # Example
///
/// ```
/// use inventory_cmd_testing::InMemoryLockCoordinator;
/// use inventory_cmd_core::{LockCoordinator, LockKey};
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let locks = InMemoryLockCoordinator::new();
/// let key = LockKey::new("k");
///
/// let lease = locks.acquire(&key, Duration::from_millis(10)).await.unwrap();
/// assert!(locks.acquire(&key, Duration::from_millis(10)).await.is_err());
///
/// locks.release(lease).await.unwrap();
/// assert!(locks.held_keys().is_empty());
/// # });
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryLockCoordinator {
    held: Arc<Mutex<HashMap<LockKey, Uuid>>>,
    released: Arc<Notify>,
    failing: Arc<AtomicBool>,
    failing_releases: Arc<AtomicUsize>,
    acquisitions: Arc<AtomicUsize>,
}

impl InMemoryLockCoordinator {
    /// Create an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys currently held.
    #[must_use]
    pub fn held_keys(&self) -> Vec<LockKey> {
        self.held.lock().unwrap().keys().cloned().collect()
    }

    /// Whether `key` is currently held.
    #[must_use]
    pub fn is_held(&self, key: &LockKey) -> bool {
        self.held.lock().unwrap().contains_key(key)
    }

    /// Successful acquisitions so far.
    #[must_use]
    pub fn acquisition_count(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    /// Make every subsequent call fail with [`LockError::Backend`].
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make the next `count` releases fail with [`LockError::Backend`]
    /// without releasing anything.
    pub fn fail_next_releases(&self, count: usize) {
        self.failing_releases.store(count, Ordering::SeqCst);
    }

    fn try_take(&self, key: &LockKey) -> Option<LockLease> {
        let mut held = self.held.lock().unwrap();
        if held.contains_key(key) {
            return None;
        }
        let lease = LockLease::new(key.clone());
        held.insert(key.clone(), lease.token());
        drop(held);
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        Some(lease)
    }

    fn check_backend(&self) -> Result<(), LockError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(LockError::Backend("lock service unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

impl LockCoordinator for InMemoryLockCoordinator {
    fn acquire<'a>(&'a self, key: &'a LockKey, wait: Duration) -> LockFuture<'a, LockLease> {
        Box::pin(async move {
            self.check_backend()?;
            let deadline = Instant::now() + wait;

            loop {
                // Register before trying so a release between the two is not missed.
                let notified = self.released.notified();

                if let Some(lease) = self.try_take(key) {
                    return Ok(lease);
                }

                if tokio::time::timeout_at(deadline, notified).await.is_err() {
                    return Err(LockError::Timeout {
                        key: key.to_string(),
                        waited: wait,
                    });
                }
            }
        })
    }

    fn release(&self, lease: LockLease) -> LockFuture<'_, ()> {
        Box::pin(async move {
            self.check_backend()?;
            if self
                .failing_releases
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(LockError::Backend("release rejected".to_string()));
            }

            let mut held = self.held.lock().unwrap();
            if held.get(lease.key()) == Some(&lease.token()) {
                held.remove(lease.key());
            }
            drop(held);

            self.released.notify_waiters();
            Ok(())
        })
    }
}
