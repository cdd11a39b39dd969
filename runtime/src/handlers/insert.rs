use super::{check_weight, decode, encode};
use inventory_cmd_core::item::{InventoryItem, TOTAL_WEIGHT_FIELD, WASTE_WEIGHT_FIELD};
use inventory_cmd_core::{CommandError, RecordStore};

/// Insert one inventory record.
///
/// `data` must decode into a complete [`InventoryItem`] with a non-zero item
/// ID and non-negative weights. Any client-supplied record ID is discarded;
/// the result body is the item with the store-assigned one.
///
/// Duplicate item IDs are not checked here. Uniqueness is left to the store.
///
/// # Errors
///
/// [`CommandError::Decode`] or [`CommandError::Validation`] before any store
/// call, [`CommandError::Store`] if the insert fails.
pub async fn insert(store: &dyn RecordStore, data: &[u8]) -> Result<Vec<u8>, CommandError> {
    let mut item: InventoryItem = decode(data)?;

    if item.item_id.is_zero() {
        return Err(CommandError::validation("missing ItemID"));
    }
    check_weight(TOTAL_WEIGHT_FIELD, Some(item.total_weight))?;
    check_weight(WASTE_WEIGHT_FIELD, Some(item.waste_weight))?;

    item.record_id = None;
    let record_id = store.insert_one(&item).await?;
    item.record_id = Some(record_id);

    tracing::debug!(item_id = %item.item_id, record_id = %record_id, "Inserted inventory item");
    encode(&item)
}
