//! Redis-based [`LockCoordinator`] implementation.
//!
//! # Protocol
//!
//! - **Acquire**: `SET {key} {token} NX PX {ttl}`, polled with capped
//!   exponential backoff until it succeeds or the caller's wait runs out
//! - **Release**: a Lua compare-and-delete, so only the holder whose token is
//!   still stored can free the key
//!
//! Every lease carries a TTL. A holder that crashes mid-sale blocks the item
//! for at most that long.
//!
//! # Example
//!
//! ```no_run
//! use inventory_cmd_redis::RedisLockCoordinator;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let locks = RedisLockCoordinator::new("redis://127.0.0.1:6379", Duration::from_secs(30)).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use inventory_cmd_core::lock::LockFuture;
use inventory_cmd_core::{LockCoordinator, LockError, LockKey, LockLease};
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use std::time::Duration;
use tokio::time::Instant;

const RELEASE_SCRIPT: &str = r"
    if redis.call('GET', KEYS[1]) == ARGV[1] then
        return redis.call('DEL', KEYS[1])
    end
    return 0
";

const FIRST_POLL: Duration = Duration::from_millis(10);
const MAX_POLL: Duration = Duration::from_millis(250);

/// Distributed lock over a single Redis instance.
#[derive(Clone)]
pub struct RedisLockCoordinator {
    /// Connection manager for connection pooling.
    conn_manager: ConnectionManager,
    ttl: Duration,
    release: Script,
}

impl RedisLockCoordinator {
    /// Connect to Redis. Leases expire after `ttl` unless released first.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Backend`] if the connection cannot be set up.
    pub async fn new(redis_url: &str, ttl: Duration) -> Result<Self, LockError> {
        let client = Client::open(redis_url)
            .map_err(|e| LockError::Backend(format!("Failed to create Redis client: {e}")))?;

        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            LockError::Backend(format!("Failed to create Redis connection manager: {e}"))
        })?;

        Ok(Self::from_manager(conn_manager, ttl))
    }

    /// Use an existing connection manager.
    #[must_use]
    pub fn from_manager(conn_manager: ConnectionManager, ttl: Duration) -> Self {
        Self {
            conn_manager,
            ttl,
            release: Script::new(RELEASE_SCRIPT),
        }
    }

    /// Lease lifetime.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    fn ttl_millis(&self) -> u64 {
        u64::try_from(self.ttl.as_millis()).unwrap_or(u64::MAX).max(1)
    }

    async fn try_set(&self, lease: &LockLease) -> Result<bool, LockError> {
        let mut conn = self.conn_manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(lease.key().as_str())
            .arg(lease.token().to_string())
            .arg("NX")
            .arg("PX")
            .arg(self.ttl_millis())
            .query_async(&mut conn)
            .await
            .map_err(|e| LockError::Backend(format!("Failed to set lock: {e}")))?;
        Ok(reply.is_some())
    }
}

impl std::fmt::Debug for RedisLockCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisLockCoordinator")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

/// Sleep before the next acquisition attempt: doubles from [`FIRST_POLL`] up
/// to [`MAX_POLL`], never past the deadline.
fn next_poll(previous: Duration, remaining: Duration) -> Duration {
    previous.saturating_mul(2).min(MAX_POLL).min(remaining)
}

impl LockCoordinator for RedisLockCoordinator {
    fn acquire<'a>(&'a self, key: &'a LockKey, wait: Duration) -> LockFuture<'a, LockLease> {
        Box::pin(async move {
            let started = Instant::now();
            let deadline = started + wait;
            let lease = LockLease::new(key.clone());
            let mut poll = FIRST_POLL / 2;

            loop {
                if self.try_set(&lease).await? {
                    tracing::trace!(lock_key = %key, "Acquired Redis lock");
                    return Ok(lease);
                }

                let now = Instant::now();
                if now >= deadline {
                    return Err(LockError::Timeout {
                        key: key.to_string(),
                        waited: now - started,
                    });
                }
                poll = next_poll(poll, deadline - now);
                tokio::time::sleep(poll).await;
            }
        })
    }

    fn release(&self, lease: LockLease) -> LockFuture<'_, ()> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let deleted: i64 = self
                .release
                .key(lease.key().as_str())
                .arg(lease.token().to_string())
                .invoke_async(&mut conn)
                .await
                .map_err(|e| LockError::Backend(format!("Failed to release lock: {e}")))?;

            if deleted == 0 {
                tracing::warn!(
                    lock_key = %lease.key(),
                    "Lock lease had already expired or changed hands at release"
                );
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polling_backs_off_and_respects_deadline() {
        let first = next_poll(FIRST_POLL / 2, Duration::from_secs(1));
        assert_eq!(first, FIRST_POLL);
        assert_eq!(next_poll(Duration::from_millis(200), Duration::from_secs(1)), MAX_POLL);
        assert_eq!(
            next_poll(Duration::from_millis(100), Duration::from_millis(30)),
            Duration::from_millis(30)
        );
    }
}
