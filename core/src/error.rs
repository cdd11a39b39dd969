//! Command error taxonomy.
//!
//! Every failure a handler can produce is a [`CommandError`]. None of them is
//! fatal: the router turns each into a populated error on the response, with
//! the [`ErrorCode`] chosen by [`CommandError::code`].

use crate::envelope::ErrorCode;
use crate::item::ItemId;
use crate::lock::LockError;
use crate::record_store::RecordStoreError;
use thiserror::Error;

/// Errors produced while handling a single command.
#[derive(Error, Debug)]
pub enum CommandError {
    /// The event's action is not one the router understands.
    #[error("unknown event action: {0:?}")]
    UnknownAction(String),

    /// The payload could not be decoded into the expected command type.
    #[error("failed to decode payload: {0}")]
    Decode(String),

    /// The payload decoded but violates a command invariant.
    #[error("{0}")]
    Validation(String),

    /// A sale line asked for more stock than the item holds.
    #[error("insufficient stock for item {item_id}: requested {requested}, available {available}")]
    InsufficientStock {
        /// Item that ran short.
        item_id: ItemId,
        /// Weight requested by the sale line.
        requested: f64,
        /// Weight held by the store at read time.
        available: f64,
    },

    /// The per-item lock could not be acquired.
    #[error("could not lock item {item_id}: {source}")]
    Lock {
        /// Item whose lock was contended.
        item_id: ItemId,
        /// Underlying lock failure.
        #[source]
        source: LockError,
    },

    /// A sale referenced an item the store does not hold.
    #[error("item {0} not found")]
    ItemNotFound(ItemId),

    /// The conditional stock write found a value other than the one read
    /// under the lock.
    #[error("item {0} was modified concurrently; stock write rejected")]
    ConcurrentModification(ItemId),

    /// The record store failed.
    #[error("record store error: {0}")]
    Store(#[from] RecordStoreError),

    /// A result body could not be encoded.
    #[error("failed to encode result: {0}")]
    Encode(String),
}

impl CommandError {
    /// The wire error code for this failure.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Store(_) => ErrorCode::DatabaseError,
            _ => ErrorCode::InternalError,
        }
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::UnknownAction(_) => "unknown_action",
            Self::Decode(_) => "decode",
            Self::Validation(_) => "validation",
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::Lock { .. } => "lock",
            Self::ItemNotFound(_) => "item_not_found",
            Self::ConcurrentModification(_) => "concurrent_modification",
            Self::Store(_) => "store",
            Self::Encode(_) => "encode",
        }
    }

    /// Shorthand for [`CommandError::Validation`].
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}
