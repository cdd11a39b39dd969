use super::{
    ItemIdField, check_item_fields, check_weight_fields, decode, encode, item_id_field,
};
use inventory_cmd_core::command::UpdateCommand;
use inventory_cmd_core::item::RECORD_ID_FIELD;
use inventory_cmd_core::{CommandError, RecordStore};

/// Apply a generic multi-record update.
///
/// Checks run in this order and the first failure wins, with no store call:
///
/// 1. the filter is non-empty
/// 2. the update is non-empty
/// 3. an `itemID` in the update is not the zero UUID
/// 4. an `itemID` in the update is a UUID string at all
/// 5. the update does not touch `_id`
/// 6. `totalWeight`/`wasteWeight` in the update are non-negative numbers
/// 7. every other known item field keeps its type, so the record still reads
///    back as an item afterwards
///
/// The result body is `{matchedCount, modifiedCount}` as reported by the store.
///
/// # Errors
///
/// [`CommandError::Decode`] or [`CommandError::Validation`] before any store
/// call, [`CommandError::Store`] if the update fails.
pub async fn update(store: &dyn RecordStore, data: &[u8]) -> Result<Vec<u8>, CommandError> {
    let command: UpdateCommand = decode(data)?;
    validate(&command)?;

    let outcome = store.update_many(&command.filter, &command.update).await?;
    tracing::debug!(
        matched = outcome.matched_count,
        modified = outcome.modified_count,
        "Updated inventory records"
    );
    encode(&outcome)
}

fn validate(command: &UpdateCommand) -> Result<(), CommandError> {
    if command.filter.is_empty() {
        return Err(CommandError::validation("blank filter provided"));
    }
    if command.update.is_empty() {
        return Err(CommandError::validation("blank update provided"));
    }
    match item_id_field(&command.update) {
        ItemIdField::Zero => return Err(CommandError::validation("found blank itemID in update")),
        ItemIdField::Invalid => {
            return Err(CommandError::validation("itemID in update is not a valid UUID"));
        }
        ItemIdField::Absent | ItemIdField::Valid(_) => {}
    }
    if command.update.contains_key(RECORD_ID_FIELD) {
        return Err(CommandError::validation("_id cannot be updated"));
    }
    check_weight_fields(&command.update)?;
    check_item_fields(&command.update)
}
