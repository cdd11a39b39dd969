//! SQL assembly for filtered statements, and driver error mapping.
//!
//! A filter becomes one equality predicate per field. JSONB equality compares
//! numbers by value (`300` equals `300.0`) and nested objects exactly, which
//! matches the record store's filter contract. `_id` filters on the row id.

use inventory_cmd_core::RecordStoreError;
use inventory_cmd_core::item::RECORD_ID_FIELD;
use inventory_cmd_core::value::{FieldMap, FieldValue};
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder};

fn push_filter(qb: &mut QueryBuilder<'static, Postgres>, filter: &FieldMap) {
    qb.push(" WHERE TRUE");
    for (field, value) in filter.iter() {
        if field == RECORD_ID_FIELD {
            if let FieldValue::Integer(id) = value {
                qb.push(" AND id = ").push_bind(*id);
            } else {
                qb.push(" AND FALSE");
            }
        } else {
            qb.push(" AND doc -> ")
                .push_bind(field.to_string())
                .push("::text = ")
                .push_bind(Json(value.to_json()));
        }
    }
}

/// `SELECT matched, modified` for a shallow merge of `update` into every
/// document matching `filter`. Documents the merge leaves unchanged count as
/// matched but not modified.
pub(crate) fn update_many(filter: &FieldMap, update: &FieldMap) -> QueryBuilder<'static, Postgres> {
    let patch = serde_json::Value::Object(update.to_json_object());

    let mut qb = QueryBuilder::new("WITH matched AS (SELECT id, doc FROM inventory_items");
    push_filter(&mut qb, filter);
    qb.push(
        " FOR UPDATE), changed AS (\
         UPDATE inventory_items AS i SET doc = i.doc || ",
    )
    .push_bind(Json(patch.clone()))
    .push(" FROM matched AS m WHERE i.id = m.id AND (m.doc || ")
    .push_bind(Json(patch))
    .push(
        ") <> m.doc RETURNING i.id) \
         SELECT (SELECT count(*) FROM matched), (SELECT count(*) FROM changed)",
    );
    qb
}

/// `DELETE` of every document matching `filter`.
pub(crate) fn delete_many(filter: &FieldMap) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new("DELETE FROM inventory_items");
    push_filter(&mut qb, filter);
    qb
}

/// Classify a driver error.
pub(crate) fn store_error(error: sqlx::Error) -> RecordStoreError {
    match error {
        sqlx::Error::PoolTimedOut => RecordStoreError::Timeout(error.to_string()),
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => RecordStoreError::Connection(error.to_string()),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::Encode(_) => {
            RecordStoreError::Serialization(error.to_string())
        }
        _ => RecordStoreError::Query(error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_fields_become_jsonb_equalities() {
        let filter = FieldMap::new()
            .with("itemID", FieldValue::Text("abc".into()))
            .with("_id", FieldValue::Integer(7));

        let qb = delete_many(&filter);
        assert_eq!(
            qb.sql(),
            "DELETE FROM inventory_items WHERE TRUE AND doc -> $1::text = $2 AND id = $3"
        );
    }

    #[test]
    fn non_integer_record_id_matches_nothing() {
        let filter = FieldMap::new().with("_id", FieldValue::Text("7".into()));
        assert!(delete_many(&filter).sql().ends_with("AND FALSE"));
    }

    #[test]
    fn update_binds_patch_twice_after_filter() {
        let filter = FieldMap::new().with("lot", FieldValue::Text("a".into()));
        let update = FieldMap::new().with("lot", FieldValue::Text("b".into()));

        let qb = update_many(&filter, &update);
        let sql = qb.sql();
        assert!(sql.contains("doc -> $1::text = $2 FOR UPDATE"));
        assert!(sql.contains("SET doc = i.doc || $3"));
        assert!(sql.contains("(m.doc || $4) <> m.doc"));
    }

    #[test]
    fn driver_errors_are_classified() {
        assert!(matches!(store_error(sqlx::Error::PoolTimedOut), RecordStoreError::Timeout(_)));
        assert!(matches!(store_error(sqlx::Error::PoolClosed), RecordStoreError::Connection(_)));
        assert!(matches!(store_error(sqlx::Error::RowNotFound), RecordStoreError::Query(_)));
    }
}
