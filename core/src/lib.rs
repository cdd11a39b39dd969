//! # Inventory Command Core
//!
//! Domain types and collaborator traits for the write side of the inventory
//! aggregate.
//!
//! The command processor consumes [`DomainEvent`]s from a partitioned log,
//! applies them to a materialized record store, and answers every event with
//! exactly one [`CommandResponse`]. This crate holds everything that is
//! independent of how that happens:
//!
//! - **Records**: [`item::InventoryItem`] and its identifiers
//! - **Payloads**: [`command::UpdateCommand`], [`command::DeleteFilter`], [`command::SaleRequest`]
//! - **Envelopes**: [`DomainEvent`], [`CommandResponse`], [`ErrorCode`]
//! - **Errors**: [`CommandError`]
//! - **Collaborators**: [`RecordStore`], [`LockCoordinator`], [`EventBus`]
//!
//! Collaborators are object-safe traits. Implementations are shared as
//! `Arc<dyn Trait>` and passed by reference into each handler call; nothing in
//! the workspace reaches for a process-wide singleton.

pub mod command;
pub mod envelope;
pub mod error;
pub mod event_bus;
pub mod item;
pub mod lock;
pub mod record_store;
pub mod value;

pub use envelope::{CommandResponse, DomainEvent, ErrorCode};
pub use error::CommandError;
pub use event_bus::{BusMessage, EventBus, EventBusError, EventStream};
pub use lock::{LockCoordinator, LockError, LockKey, LockLease};
pub use record_store::{RecordStore, RecordStoreError};
