//! # Inventory Command Testing
//!
//! Testing utilities for the inventory command processor.
//!
//! This crate provides:
//! - [`InMemoryRecordStore`]: document store with injectable delay and failures
//! - [`InMemoryLockCoordinator`]: process-local lock table
//! - [`InMemoryEventBus`]: broker stand-in that records every publish
//! - [`fixtures`]: sample items, sales, and events
//! - [`init_test_tracing`]: opt-in log output for a test run
//!
//! ## Example
//!
//! ```ignore
//! use inventory_cmd_testing::{InMemoryLockCoordinator, InMemoryRecordStore, fixtures};
//! use inventory_cmd_runtime::CommandRouter;
//!
//! #[tokio::test]
//! async fn sells_stock() {
//!     let store = InMemoryRecordStore::new();
//!     let locks = InMemoryLockCoordinator::new();
//!     let router = CommandRouter::new(Default::default());
//!
//!     let item = fixtures::item(300.0);
//!     router.dispatch(&store, &locks, &fixtures::insert_event(&item)).await;
//!     router.dispatch(&store, &locks, &fixtures::sale_event(&fixtures::sale(&[(item.item_id, 12.24)]))).await;
//!
//!     assert!((store.total_weight(item.item_id).unwrap() - 287.76).abs() < 1e-9);
//! }
//! ```

pub mod event_bus;
pub mod fixtures;
pub mod lock;
pub mod record_store;

pub use event_bus::InMemoryEventBus;
pub use lock::InMemoryLockCoordinator;
pub use record_store::InMemoryRecordStore;

/// Install a `tracing` subscriber for tests, honouring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
