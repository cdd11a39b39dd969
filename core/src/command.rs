//! Command payloads carried in [`DomainEvent::data`](crate::envelope::DomainEvent).
//!
//! Each payload type mirrors one handler: [`UpdateCommand`] for generic
//! updates, [`DeleteFilter`] for deletes, [`SaleRequest`] for the stock
//! decrement. Insert payloads are plain [`InventoryItem`](crate::item::InventoryItem)s.

use crate::item::ItemId;
use crate::value::FieldMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Primary action of a domain event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventAction {
    /// Create a record.
    Insert,
    /// Mutate records (generic or service-specific).
    Update,
    /// Remove records.
    Delete,
}

impl EventAction {
    /// Parse the wire name; `None` for anything unrecognized.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "insert" => Some(Self::Insert),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }

    /// Wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// Service actions that route an `update` to the stock decrement coordinator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ServiceAction {
    /// Regular sale.
    CreateSale,
    /// Flash sale. Same stock semantics as a regular sale.
    CreateFlashSale,
}

impl ServiceAction {
    /// Parse the wire name; `None` means "not a sale" (generic update).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "createSale" => Some(Self::CreateSale),
            "createFlashSale" => Some(Self::CreateFlashSale),
            _ => None,
        }
    }

    /// Wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CreateSale => "createSale",
            Self::CreateFlashSale => "createFlashSale",
        }
    }
}

/// Generic multi-record update: every record matching `filter` receives the
/// `update` field set.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateCommand {
    /// Match criteria.
    #[serde(default)]
    pub filter: FieldMap,
    /// Fields to set.
    #[serde(default)]
    pub update: FieldMap,
}

/// Delete criteria. Must identify records by `itemID` at minimum.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeleteFilter(pub FieldMap);

/// One line of a sale.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SaleLineItem {
    /// Item being sold.
    #[serde(rename = "itemID")]
    pub item_id: ItemId,
    /// Barcode, informational.
    #[serde(default)]
    pub barcode: String,
    /// Lot, informational.
    #[serde(default)]
    pub lot: String,
    /// SKU, informational.
    #[serde(default)]
    pub sku: String,
    /// Weight sold. Must be positive.
    pub weight: f64,
}

/// A sale to apply against stock.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SaleRequest {
    /// Sale identity.
    #[serde(rename = "saleID")]
    pub sale_id: Uuid,
    /// When the sale happened (producer clock, nanoseconds).
    #[serde(default)]
    pub timestamp: i64,
    /// Line items, applied in this order.
    pub items: Vec<SaleLineItem>,
}

/// Outcome of a multi-record update; also the generic-update result body.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateOutcome {
    /// Records matching the filter.
    #[serde(rename = "matchedCount")]
    pub matched_count: i64,
    /// Records actually changed.
    #[serde(rename = "modifiedCount")]
    pub modified_count: i64,
}

/// Outcome of a multi-record delete; also the delete result body.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOutcome {
    /// Records removed.
    #[serde(rename = "deletedCount")]
    pub deleted_count: i64,
}

/// Per-line outcome of a committed sale.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SaleLineOutcome {
    /// Item decremented.
    #[serde(rename = "itemID")]
    pub item_id: ItemId,
    /// Stock before this sale line.
    #[serde(rename = "previousWeight")]
    pub previous_weight: f64,
    /// Stock after this sale line.
    #[serde(rename = "totalWeight")]
    pub total_weight: f64,
}

/// Result body of a fully applied sale.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SaleOutcome {
    /// Sale identity, echoed.
    #[serde(rename = "saleID")]
    pub sale_id: Uuid,
    /// One entry per line item, in request order.
    pub items: Vec<SaleLineOutcome>,
}
