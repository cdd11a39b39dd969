//! Inventory record types.
//!
//! An [`InventoryItem`] is the materialized record the command processor
//! mutates. Its identity is the upstream-assigned [`ItemId`]; the store adds
//! a [`RecordId`] once, at first insert.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Field name of the item identity inside filters and updates.
pub const ITEM_ID_FIELD: &str = "itemID";

/// Field name of the store-assigned identifier.
pub const RECORD_ID_FIELD: &str = "_id";

/// Field name of the sellable stock weight.
pub const TOTAL_WEIGHT_FIELD: &str = "totalWeight";

/// Field name of the wasted stock weight.
pub const WASTE_WEIGHT_FIELD: &str = "wasteWeight";

/// Globally unique identity of an inventory item, assigned upstream.
///
/// The nil UUID is the "zero value" and never identifies a real item.
///
/// # Examples
///
/// ```
/// use inventory_cmd_core::item::ItemId;
///
/// assert!(ItemId::default().is_zero());
/// assert!(!ItemId::new().is_zero());
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(Uuid);

impl ItemId {
    /// Generate a fresh random item ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// The underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Whether this is the zero (nil) ID.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.is_nil()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ItemId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Store-assigned persistent identifier of a record.
///
/// Set exactly once, when the record is first inserted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(i64);

impl RecordId {
    /// Wrap a raw identifier.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// The raw identifier.
    #[must_use]
    pub const fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A materialized inventory record.
///
/// Field names on the wire are the upstream producer's camelCase names.
/// Timestamps are Unix seconds.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InventoryItem {
    /// Store-assigned identifier, absent until inserted.
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<RecordId>,

    /// Item identity.
    #[serde(rename = "itemID")]
    pub item_id: ItemId,

    /// Barcode printed on the item.
    pub barcode: String,

    /// When the stock arrived.
    #[serde(rename = "dateArrived")]
    pub date_arrived: i64,

    /// When the item was sold out, if ever.
    #[serde(rename = "dateSold", default, skip_serializing_if = "Option::is_none")]
    pub date_sold: Option<i64>,

    /// Device that recorded the item.
    #[serde(rename = "deviceID")]
    pub device_id: Uuid,

    /// Expiry date, if known.
    #[serde(rename = "expiryDate", default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<i64>,

    /// Lot identifier.
    pub lot: String,

    /// Display name.
    pub name: String,

    /// Origin of the stock.
    pub origin: String,

    /// List price.
    pub price: f64,

    /// Retail customer owning this stock.
    #[serde(rename = "rsCustomerID")]
    pub rs_customer_id: Uuid,

    /// Discounted price.
    #[serde(rename = "salePrice")]
    pub sale_price: f64,

    /// Stock keeping unit.
    pub sku: String,

    /// Last observation time.
    pub timestamp: i64,

    /// Sellable weight remaining. Never negative once committed.
    #[serde(rename = "totalWeight")]
    pub total_weight: f64,

    /// Universal product code.
    pub upc: i64,

    /// Weight written off as waste.
    #[serde(rename = "wasteWeight")]
    pub waste_weight: f64,
}
