//! # Inventory Command Runtime
//!
//! The write side of the inventory aggregate: everything between a decoded
//! domain event and its correlated response.
//!
//! ## Core Components
//!
//! - **Command Router** ([`CommandRouter`]): classifies an event and runs one handler
//! - **CRUD Translators** ([`handlers`]): insert, generic update, delete
//! - **Stock Decrement Coordinator** ([`StockDecrementCoordinator`]): per-item
//!   lock, read, check, conditional write
//! - **Response Emitter** ([`ResponseEmitter`]): one response per event, to the right topic
//! - **Event Processor** ([`EventProcessor`]): subscribe, dispatch per partition, reconnect
//!
//! Store, lock, and bus handles are passed into every call; nothing here
//! holds process-wide state.
//!
//! ## Example
//!
//! ```ignore
//! use inventory_cmd_runtime::{CommandRouter, StockDecrementCoordinator};
//!
//! let router = CommandRouter::new(StockDecrementCoordinator::default());
//! let response = router.dispatch(&store, &locks, &event).await;
//! assert_eq!(response.correlation_id, event.correlation_id);
//! ```

/// Retry logic with exponential backoff
pub mod retry;

/// Prometheus metrics for observability
pub mod metrics;

pub mod handlers;
pub mod processor;
pub mod response;
pub mod router;
pub mod sale;

pub use processor::{EventProcessor, ProcessorConfig};
pub use response::ResponseEmitter;
pub use router::{CommandKind, CommandRouter};
pub use sale::StockDecrementCoordinator;
