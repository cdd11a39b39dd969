//! Integration tests for `RedisLockCoordinator` using testcontainers.
//!
//! Docker must be running. Run with `cargo test -p inventory-cmd-redis -- --ignored`.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use inventory_cmd_core::{LockCoordinator, LockError, LockKey};
use inventory_cmd_redis::RedisLockCoordinator;
use std::time::Duration;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;

async fn setup(ttl: Duration) -> (ContainerAsync<Redis>, RedisLockCoordinator) {
    let container = Redis::default()
        .start()
        .await
        .expect("Failed to start redis container");
    let port = container
        .get_host_port_ipv4(6379)
        .await
        .expect("Failed to get redis port");

    let locks = RedisLockCoordinator::new(&format!("redis://127.0.0.1:{port}"), ttl)
        .await
        .expect("Failed to connect to redis");
    (container, locks)
}

fn key() -> LockKey {
    LockKey::new(format!("test:lock:{}", uuid::Uuid::new_v4()))
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn second_holder_times_out_until_release() {
    let (_container, locks) = setup(Duration::from_secs(30)).await;
    let key = key();

    let lease = locks.acquire(&key, Duration::from_secs(1)).await.unwrap();
    let err = locks.acquire(&key, Duration::from_millis(100)).await.unwrap_err();
    assert!(matches!(err, LockError::Timeout { .. }));

    locks.release(lease).await.unwrap();
    let again = locks.acquire(&key, Duration::from_millis(100)).await.unwrap();
    locks.release(again).await.unwrap();
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn expired_lease_cannot_release_the_next_holder() {
    let (_container, locks) = setup(Duration::from_millis(100)).await;
    let key = key();

    let stale = locks.acquire(&key, Duration::from_secs(1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let current = locks.acquire(&key, Duration::from_secs(1)).await.unwrap();
    locks.release(stale).await.unwrap();

    // The current holder still owns the key.
    let err = locks.acquire(&key, Duration::from_millis(50)).await.unwrap_err();
    assert!(matches!(err, LockError::Timeout { .. }));
    locks.release(current).await.unwrap();
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn waiter_gets_the_lock_once_freed() {
    let (_container, locks) = setup(Duration::from_secs(30)).await;
    let key = key();

    let lease = locks.acquire(&key, Duration::from_secs(1)).await.unwrap();
    let waiter = {
        let (locks, key) = (locks.clone(), key.clone());
        tokio::spawn(async move { locks.acquire(&key, Duration::from_secs(2)).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    locks.release(lease).await.unwrap();

    let next = waiter.await.unwrap().unwrap();
    locks.release(next).await.unwrap();
}
