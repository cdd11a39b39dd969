//! `PostgreSQL` record store for the inventory command processor.
//!
//! Implements [`RecordStore`](inventory_cmd_core::RecordStore) over a single
//! `inventory_items` table holding one JSONB document per item:
//!
//! - Point insert returning the `BIGSERIAL` id as the record identifier
//! - Filtered multi-update and multi-delete with per-field JSONB equality
//! - Point read by `itemID`
//! - A conditional `totalWeight` write for the stock decrement path
//!
//! # Example
//!
//! ```ignore
//! use inventory_cmd_postgres::PostgresRecordStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresRecordStore::connect("postgres://localhost/inventory", 10).await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod query;
mod store;

pub use store::PostgresRecordStore;
