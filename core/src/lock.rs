//! Distributed lock abstraction.
//!
//! A [`LockCoordinator`] provides cross-process mutual exclusion keyed by a
//! string. Every processor instance that mutates the same item's stock must
//! contend on the same [`LockKey`], which is why keys are derived
//! deterministically from the item ID by [`LockKey::for_item`].
//!
//! The lock is a mutual-exclusion primitive only. It does not make a remote
//! read followed by a remote write atomic; callers pair it with a conditional
//! store write.

use crate::item::ItemId;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Namespace for per-item stock locks.
pub const ITEM_LOCK_PREFIX: &str = "inventory:item-lock";

/// Errors returned by lock operations.
#[derive(Error, Debug, Clone)]
pub enum LockError {
    /// The lock was still held by someone else when the wait ran out.
    #[error("timed out after {waited:?} waiting for lock {key}")]
    Timeout {
        /// Contended key.
        key: String,
        /// How long the caller waited.
        waited: Duration,
    },

    /// The lock service failed.
    #[error("lock backend error: {0}")]
    Backend(String),
}

/// Key identifying one lockable resource.
///
/// # Examples
///
/// ```
/// use inventory_cmd_core::item::ItemId;
/// use inventory_cmd_core::lock::LockKey;
///
/// let item = ItemId::new();
/// assert_eq!(LockKey::for_item(item), LockKey::for_item(item));
/// assert!(LockKey::for_item(item).as_str().starts_with("inventory:item-lock:"));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LockKey(String);

impl LockKey {
    /// Wrap an arbitrary key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Stock lock for one item.
    #[must_use]
    pub fn for_item(item_id: ItemId) -> Self {
        Self::for_item_with_prefix(ITEM_LOCK_PREFIX, item_id)
    }

    /// Stock lock for one item under a custom namespace.
    #[must_use]
    pub fn for_item_with_prefix(prefix: &str, item_id: ItemId) -> Self {
        Self(format!("{prefix}:{item_id}"))
    }

    /// The key as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Proof of a held lock.
///
/// The token identifies this particular acquisition, so a lease that has
/// expired and been re-acquired by someone else cannot release the new
/// holder's lock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockLease {
    key: LockKey,
    token: Uuid,
}

impl LockLease {
    /// Create a lease for `key` with a fresh token.
    #[must_use]
    pub fn new(key: LockKey) -> Self {
        Self {
            key,
            token: Uuid::new_v4(),
        }
    }

    /// Locked key.
    #[must_use]
    pub const fn key(&self) -> &LockKey {
        &self.key
    }

    /// Ownership token.
    #[must_use]
    pub const fn token(&self) -> Uuid {
        self.token
    }
}

/// Boxed future returned by [`LockCoordinator`] methods.
pub type LockFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, LockError>> + Send + 'a>>;

/// Cross-instance mutual exclusion.
pub trait LockCoordinator: Send + Sync {
    /// Acquire `key`, waiting at most `wait`.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Timeout`] if the key stays held for the whole
    /// wait, or [`LockError::Backend`] if the lock service fails.
    fn acquire<'a>(&'a self, key: &'a LockKey, wait: Duration) -> LockFuture<'a, LockLease>;

    /// Release a held lease.
    ///
    /// Releasing a lease that already expired is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Backend`] if the lock service fails.
    fn release(&self, lease: LockLease) -> LockFuture<'_, ()>;
}
