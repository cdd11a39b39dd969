//! CRUD translators.
//!
//! Each handler validates one simple command and turns it into a single
//! [`RecordStore`](inventory_cmd_core::RecordStore) call. They share one shape:
//!
//! ```text
//! async fn(&dyn RecordStore, data: &[u8]) -> Result<Vec<u8>, CommandError>
//! ```
//!
//! The `Ok` bytes are the encoded result body. Validation failures never reach
//! the store; store failures surface as [`CommandError::Store`].

mod delete;
mod insert;
mod update;

pub use delete::delete;
pub use insert::insert;
pub use update::update;

use inventory_cmd_core::CommandError;
use inventory_cmd_core::item::{
    ITEM_ID_FIELD, InventoryItem, ItemId, TOTAL_WEIGHT_FIELD, WASTE_WEIGHT_FIELD,
};
use inventory_cmd_core::value::{FieldMap, FieldValue};
use serde::Serialize;
use serde::de::DeserializeOwned;

pub(crate) fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, CommandError> {
    serde_json::from_slice(data).map_err(|e| CommandError::Decode(e.to_string()))
}

pub(crate) fn encode<T: Serialize>(body: &T) -> Result<Vec<u8>, CommandError> {
    serde_json::to_vec(body).map_err(|e| CommandError::Encode(e.to_string()))
}

/// How an `itemID` entry inside a filter or update reads.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ItemIdField {
    Absent,
    Zero,
    Invalid,
    Valid(ItemId),
}

pub(crate) fn item_id_field(fields: &FieldMap) -> ItemIdField {
    match fields.get(ITEM_ID_FIELD) {
        None => ItemIdField::Absent,
        Some(FieldValue::Text(s)) => match s.parse::<ItemId>() {
            Ok(id) if id.is_zero() => ItemIdField::Zero,
            Ok(id) => ItemIdField::Valid(id),
            Err(_) => ItemIdField::Invalid,
        },
        Some(_) => ItemIdField::Invalid,
    }
}

/// Stock weights must stay non-negative numbers.
pub(crate) fn check_weight_fields(fields: &FieldMap) -> Result<(), CommandError> {
    for field in [TOTAL_WEIGHT_FIELD, WASTE_WEIGHT_FIELD] {
        if let Some(value) = fields.get(field) {
            check_weight(field, value.as_f64())?;
        }
    }
    Ok(())
}

/// Every field an update sets must still decode as part of an
/// [`InventoryItem`], so later reads of the record keep working.
///
/// Fields the item does not know are left alone.
pub(crate) fn check_item_fields(fields: &FieldMap) -> Result<(), CommandError> {
    let Ok(serde_json::Value::Object(template)) = serde_json::to_value(InventoryItem::default())
    else {
        return Err(CommandError::Encode("inventory item is not a JSON object".to_string()));
    };

    for (field, value) in fields.iter() {
        let mut doc = template.clone();
        doc.insert(field.to_string(), value.to_json());
        if let Err(e) = serde_json::from_value::<InventoryItem>(serde_json::Value::Object(doc)) {
            return Err(CommandError::validation(format!(
                "invalid value for {field}: {e}"
            )));
        }
    }
    Ok(())
}

pub(crate) fn check_weight(field: &str, value: Option<f64>) -> Result<(), CommandError> {
    match value {
        Some(w) if w.is_finite() && w >= 0.0 => Ok(()),
        _ => Err(CommandError::validation(format!(
            "{field} must be a non-negative number"
        ))),
    }
}
