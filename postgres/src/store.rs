use crate::query;
use inventory_cmd_core::command::{DeleteOutcome, UpdateOutcome};
use inventory_cmd_core::item::{InventoryItem, ItemId, RECORD_ID_FIELD, RecordId};
use inventory_cmd_core::record_store::StoreFuture;
use inventory_cmd_core::value::FieldMap;
use inventory_cmd_core::{RecordStore, RecordStoreError};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use std::time::Duration;

/// PostgreSQL-backed [`RecordStore`].
///
/// # Schema
///
/// ```sql
/// CREATE TABLE inventory_items (
///     id BIGSERIAL PRIMARY KEY,
///     doc JSONB NOT NULL,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT now()
/// );
/// CREATE INDEX idx_inventory_items_item_id ON inventory_items ((doc ->> 'itemID'));
/// ```
///
/// The row id is the record identifier; it is never stored inside `doc` and
/// is merged back in as `_id` on read.
///
/// Item ID uniqueness is not enforced by the schema. Inserting the same
/// `itemID` twice creates two rows; point reads return the oldest.
#[derive(Clone, Debug)]
pub struct PostgresRecordStore {
    pool: PgPool,
}

impl PostgresRecordStore {
    /// Create a store over an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a new pool of at most `max_connections`.
    ///
    /// # Errors
    ///
    /// Returns [`RecordStoreError::Connection`] if the database is unreachable.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
    ) -> Result<Self, RecordStoreError> {
        Self::connect_with(
            PgPoolOptions::new()
                .max_connections(max_connections)
                .acquire_timeout(Duration::from_secs(5)),
            database_url,
        )
        .await
    }

    /// Connect a new pool with caller-chosen options.
    ///
    /// # Errors
    ///
    /// Returns [`RecordStoreError::Connection`] if the database is unreachable.
    pub async fn connect_with(
        options: PgPoolOptions,
        database_url: &str,
    ) -> Result<Self, RecordStoreError> {
        let pool = options
            .connect(database_url)
            .await
            .map_err(|e| RecordStoreError::Connection(format!("Failed to connect: {e}")))?;
        Ok(Self::new(pool))
    }

    /// Create the `inventory_items` table and its index if missing.
    ///
    /// # Errors
    ///
    /// Returns [`RecordStoreError::Query`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), RecordStoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| RecordStoreError::Query(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// The underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn count(rows: u64) -> i64 {
    i64::try_from(rows).unwrap_or(i64::MAX)
}

impl RecordStore for PostgresRecordStore {
    fn insert_one<'a>(&'a self, item: &'a InventoryItem) -> StoreFuture<'a, RecordId> {
        Box::pin(async move {
            let mut doc = serde_json::to_value(item)
                .map_err(|e| RecordStoreError::Serialization(e.to_string()))?;
            if let Some(fields) = doc.as_object_mut() {
                fields.remove(RECORD_ID_FIELD);
            }

            let (id,): (i64,) =
                sqlx::query_as("INSERT INTO inventory_items (doc) VALUES ($1) RETURNING id")
                    .bind(Json(doc))
                    .fetch_one(&self.pool)
                    .await
                    .map_err(query::store_error)?;

            tracing::debug!(item_id = %item.item_id, record_id = id, "Inserted inventory document");
            Ok(RecordId::new(id))
        })
    }

    fn update_many<'a>(
        &'a self,
        filter: &'a FieldMap,
        update: &'a FieldMap,
    ) -> StoreFuture<'a, UpdateOutcome> {
        Box::pin(async move {
            if update.contains_key(RECORD_ID_FIELD) {
                return Err(RecordStoreError::Query("_id cannot be updated".to_string()));
            }

            let (matched, modified): (i64, i64) = query::update_many(filter, update)
                .build_query_as()
                .fetch_one(&self.pool)
                .await
                .map_err(query::store_error)?;

            Ok(UpdateOutcome {
                matched_count: matched,
                modified_count: modified,
            })
        })
    }

    fn delete_many<'a>(&'a self, filter: &'a FieldMap) -> StoreFuture<'a, DeleteOutcome> {
        Box::pin(async move {
            let result = query::delete_many(filter)
                .build()
                .execute(&self.pool)
                .await
                .map_err(query::store_error)?;

            Ok(DeleteOutcome {
                deleted_count: count(result.rows_affected()),
            })
        })
    }

    fn find_item(&self, item_id: ItemId) -> StoreFuture<'_, Option<InventoryItem>> {
        Box::pin(async move {
            let row: Option<(i64, Json<serde_json::Value>)> = sqlx::query_as(
                "SELECT id, doc FROM inventory_items \
                 WHERE doc ->> 'itemID' = $1 ORDER BY id LIMIT 1",
            )
            .bind(item_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(query::store_error)?;

            row.map(|(id, Json(doc))| {
                let mut item: InventoryItem = serde_json::from_value(doc)
                    .map_err(|e| RecordStoreError::Serialization(e.to_string()))?;
                item.record_id = Some(RecordId::new(id));
                Ok(item)
            })
            .transpose()
        })
    }

    fn compare_and_set_total_weight(
        &self,
        record_id: RecordId,
        expected: f64,
        new: f64,
    ) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let result = sqlx::query(
                "UPDATE inventory_items \
                 SET doc = jsonb_set(doc, '{totalWeight}', to_jsonb($3::float8)) \
                 WHERE id = $1 AND (doc ->> 'totalWeight')::float8 = $2",
            )
            .bind(record_id.get())
            .bind(expected)
            .bind(new)
            .execute(&self.pool)
            .await
            .map_err(query::store_error)?;

            let written = result.rows_affected() > 0;
            if !written {
                metrics::counter!("inventory_cmd_store_cas_conflicts_total").increment(1);
                tracing::warn!(%record_id, expected, "Conditional stock write matched no row");
            }
            Ok(written)
        })
    }
}
