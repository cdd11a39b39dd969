use super::{ItemIdField, decode, encode, item_id_field};
use inventory_cmd_core::command::DeleteFilter;
use inventory_cmd_core::{CommandError, RecordStore};

/// Remove every record matching a filter.
///
/// The filter must name a non-zero `itemID`; other fields narrow the match
/// further. The result body is `{deletedCount}`.
///
/// # Errors
///
/// [`CommandError::Decode`] or [`CommandError::Validation`] before any store
/// call, [`CommandError::Store`] if the delete fails.
pub async fn delete(store: &dyn RecordStore, data: &[u8]) -> Result<Vec<u8>, CommandError> {
    let DeleteFilter(filter) = decode(data)?;

    if filter.is_empty() {
        return Err(CommandError::validation("blank filter provided"));
    }
    match item_id_field(&filter) {
        ItemIdField::Absent => return Err(CommandError::validation("missing itemID in filter")),
        ItemIdField::Zero => return Err(CommandError::validation("found blank itemID in filter")),
        ItemIdField::Invalid => {
            return Err(CommandError::validation("itemID in filter is not a valid UUID"));
        }
        ItemIdField::Valid(_) => {}
    }

    let outcome = store.delete_many(&filter).await?;
    tracing::debug!(deleted = outcome.deleted_count, "Deleted inventory records");
    encode(&outcome)
}
