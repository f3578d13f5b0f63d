//! SQLite implementation of [`LibraryStore`]
//!
//! Items reference their payload either by file path (`source_path`) or as an
//! embedded blob (`payload`). File payloads are checked on resolution so a
//! file removed from disk surfaces as `PayloadMissing` while the item stays
//! listed.

use crate::error::{LibraryError, Result};
use crate::models::{
    sanitize_position, Collection, CollectionId, Context, Item, ItemId, ItemUpload, PayloadRef,
    SessionSettings,
};
use crate::store::LibraryStore;
use async_trait::async_trait;
use bridge_traits::playback::MediaSource;
use bytes::Bytes;
use chrono::Utc;
use sqlx::{query, query_as, FromRow, SqlitePool};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, instrument, warn};

const SETTINGS_ROW_ID: &str = "app-settings";

/// SQLite-backed library store
pub struct SqliteLibraryStore {
    pool: SqlitePool,
}

impl SqliteLibraryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

// =============================================================================
// Row mapping
// =============================================================================

#[derive(Debug, FromRow)]
struct CollectionRow {
    id: String,
    title: String,
    cover_ref: Option<String>,
    last_played_index: i64,
}

#[derive(Debug, FromRow)]
struct ItemRow {
    id: String,
    collection_id: Option<String>,
    name: String,
    size_bytes: i64,
    position_seconds: f64,
    source_path: Option<String>,
}

#[derive(Debug, FromRow)]
struct SettingsRow {
    context_kind: Option<String>,
    collection_id: Option<String>,
    active_index: i64,
    position_seconds: f64,
}

#[derive(Debug, FromRow)]
struct PayloadRow {
    source_path: Option<String>,
    payload: Option<Vec<u8>>,
}

fn invalid_record(table: &str, message: impl Into<String>) -> LibraryError {
    LibraryError::InvalidRecord {
        table: table.to_string(),
        message: message.into(),
    }
}

fn index_from_db(value: i64) -> Option<usize> {
    usize::try_from(value).ok()
}

fn index_to_db(index: Option<usize>) -> i64 {
    index.and_then(|i| i64::try_from(i).ok()).unwrap_or(-1)
}

fn size_to_db(size_bytes: u64) -> Result<i64> {
    i64::try_from(size_bytes).map_err(|_| LibraryError::InvalidInput {
        field: "size_bytes".to_string(),
        message: format!("{} does not fit the store", size_bytes),
    })
}

impl ItemRow {
    fn into_item(self) -> Result<Item> {
        let id = ItemId::from_string(&self.id)
            .map_err(|e| invalid_record("items", format!("bad id {}: {}", self.id, e)))?;
        let payload = match self.source_path {
            Some(path) => PayloadRef::File {
                path: PathBuf::from(path),
            },
            None => PayloadRef::Embedded,
        };
        Ok(Item {
            id,
            name: self.name,
            size_bytes: u64::try_from(self.size_bytes).unwrap_or(0),
            position_seconds: sanitize_position(self.position_seconds),
            payload,
        })
    }
}

impl CollectionRow {
    fn into_collection(self, items: Vec<Item>) -> Result<Collection> {
        let id = CollectionId::from_string(&self.id)
            .map_err(|e| invalid_record("collections", format!("bad id {}: {}", self.id, e)))?;
        Ok(Collection {
            id,
            title: self.title,
            cover_ref: self.cover_ref,
            items,
            last_played_index: index_from_db(self.last_played_index),
        })
    }
}

impl SettingsRow {
    fn into_settings(self) -> SessionSettings {
        let active_context = match (self.context_kind.as_deref(), self.collection_id) {
            (Some("ungrouped"), _) => Some(Context::Ungrouped),
            (Some("collection"), Some(raw)) => match CollectionId::from_string(&raw) {
                Ok(id) => Some(Context::Collection(id)),
                Err(e) => {
                    debug!(collection_id = %raw, error = %e, "Discarding unparsable settings context");
                    None
                }
            },
            _ => None,
        };
        SessionSettings::new(
            active_context,
            index_from_db(self.active_index),
            self.position_seconds,
        )
    }
}

/// Column filter for a context on the items table.
fn context_clause(context: &Context) -> (&'static str, Option<String>) {
    match context {
        Context::Collection(id) => ("collection_id = ?", Some(id.to_string())),
        Context::Ungrouped => ("collection_id IS NULL", None),
    }
}

// =============================================================================
// LibraryStore
// =============================================================================

#[async_trait]
impl LibraryStore for SqliteLibraryStore {
    async fn list_collections(&self) -> Result<Vec<Collection>> {
        let rows = query_as::<_, CollectionRow>(
            "SELECT id, title, cover_ref, last_played_index FROM collections ORDER BY created_at, rowid",
        )
        .fetch_all(&self.pool)
        .await?;

        let item_rows = query_as::<_, ItemRow>(
            r#"
            SELECT id, collection_id, name, size_bytes, position_seconds, source_path
            FROM items
            WHERE collection_id IS NOT NULL
            ORDER BY collection_id, ordinal
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: HashMap<String, Vec<Item>> = HashMap::new();
        for row in item_rows {
            let key = row.collection_id.clone().unwrap_or_default();
            grouped.entry(key).or_default().push(row.into_item()?);
        }

        rows.into_iter()
            .map(|row| {
                let items = grouped.remove(&row.id).unwrap_or_default();
                row.into_collection(items)
            })
            .collect()
    }

    async fn list_ungrouped_items(&self) -> Result<Vec<Item>> {
        let rows = query_as::<_, ItemRow>(
            r#"
            SELECT id, collection_id, name, size_bytes, position_seconds, source_path
            FROM items
            WHERE collection_id IS NULL
            ORDER BY ordinal
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ItemRow::into_item).collect()
    }

    #[instrument(skip(self, collection), fields(collection_id = %collection.id))]
    async fn create_or_replace_collection(&self, collection: &Collection) -> Result<()> {
        query(
            r#"
            INSERT INTO collections (id, title, cover_ref, last_played_index, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                cover_ref = excluded.cover_ref,
                last_played_index = excluded.last_played_index
            "#,
        )
        .bind(collection.id.to_string())
        .bind(&collection.title)
        .bind(&collection.cover_ref)
        .bind(index_to_db(collection.last_played_index))
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_collection_metadata(
        &self,
        id: CollectionId,
        title: &str,
        cover_ref: Option<String>,
        last_played_index: Option<usize>,
    ) -> Result<()> {
        let result = query(
            "UPDATE collections SET title = ?, cover_ref = ?, last_played_index = ? WHERE id = ?",
        )
        .bind(title)
        .bind(cover_ref)
        .bind(index_to_db(last_played_index))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LibraryError::NotFound {
                entity_type: "Collection".to_string(),
                id: id.to_string(),
            });
        }

        Ok(())
    }

    #[instrument(skip(self), fields(collection_id = %id))]
    async fn delete_collection(&self, id: CollectionId) -> Result<bool> {
        let result = query("DELETE FROM collections WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, uploads), fields(context = %context, count = uploads.len()))]
    async fn insert_items(&self, context: &Context, uploads: &[ItemUpload]) -> Result<()> {
        if uploads.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        let collection_id = context.collection_id().map(|id| id.to_string());
        if let Some(id) = &collection_id {
            let exists = query("SELECT 1 FROM collections WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
            if exists.is_none() {
                return Err(LibraryError::NotFound {
                    entity_type: "Collection".to_string(),
                    id: id.clone(),
                });
            }
        }

        let (next_ordinal,): (i64,) =
            query_as("SELECT COALESCE(MAX(ordinal), -1) + 1 FROM items WHERE collection_id IS ?")
                .bind(&collection_id)
                .fetch_one(&mut *tx)
                .await?;

        let now = Utc::now().timestamp_millis();
        for (offset, upload) in uploads.iter().enumerate() {
            let (source_path, payload) = match &upload.source {
                MediaSource::LocalFile { path } => (Some(path.to_string_lossy().into_owned()), None),
                MediaSource::MemoryBuffer { data } => (None, Some(data.to_vec())),
            };

            query(
                r#"
                INSERT INTO items (
                    id, collection_id, ordinal, name, size_bytes, position_seconds,
                    source_path, payload, created_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(upload.item.id.to_string())
            .bind(&collection_id)
            .bind(next_ordinal + offset as i64)
            .bind(&upload.item.name)
            .bind(size_to_db(upload.item.size_bytes)?)
            .bind(upload.item.position_seconds)
            .bind(source_path)
            .bind(payload)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!("Inserted items");
        Ok(())
    }

    async fn delete_item(&self, item_id: ItemId) -> Result<bool> {
        let result = query("DELETE FROM items WHERE id = ?")
            .bind(item_id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(item_id = %item_id))]
    async fn get_item_payload(&self, item_id: ItemId) -> Result<MediaSource> {
        let row = query_as::<_, PayloadRow>("SELECT source_path, payload FROM items WHERE id = ?")
            .bind(item_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| LibraryError::NotFound {
                entity_type: "Item".to_string(),
                id: item_id.to_string(),
            })?;

        if let Some(data) = row.payload {
            return Ok(MediaSource::MemoryBuffer {
                data: Bytes::from(data),
            });
        }

        let Some(source_path) = row.source_path else {
            return Err(LibraryError::PayloadMissing {
                item_id: item_id.to_string(),
                reason: "no payload stored".to_string(),
            });
        };

        let path = PathBuf::from(source_path);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(MediaSource::LocalFile { path }),
            Ok(_) => Err(LibraryError::PayloadMissing {
                item_id: item_id.to_string(),
                reason: "indexed path is not a file".to_string(),
            }),
            Err(e) => {
                warn!(error = %e, "Indexed payload file is unreadable");
                Err(LibraryError::PayloadMissing {
                    item_id: item_id.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn update_item_position(
        &self,
        context: Option<Context>,
        item_id: ItemId,
        position_seconds: f64,
    ) -> Result<()> {
        let position = sanitize_position(position_seconds);
        let result = match context {
            Some(context) => {
                let (clause, collection_id) = context_clause(&context);
                let sql = format!(
                    "UPDATE items SET position_seconds = ? WHERE id = ? AND {}",
                    clause
                );
                let mut statement = query(&sql).bind(position).bind(item_id.to_string());
                if let Some(collection_id) = collection_id {
                    statement = statement.bind(collection_id);
                }
                statement.execute(&self.pool).await?
            }
            None => {
                query("UPDATE items SET position_seconds = ? WHERE id = ?")
                    .bind(position)
                    .bind(item_id.to_string())
                    .execute(&self.pool)
                    .await?
            }
        };

        if result.rows_affected() == 0 {
            debug!(item_id = %item_id, "Position update matched no item");
        }
        Ok(())
    }

    async fn get_session_settings(&self) -> Result<SessionSettings> {
        let row = query_as::<_, SettingsRow>(
            "SELECT context_kind, collection_id, active_index, position_seconds FROM session_settings WHERE id = ?",
        )
        .bind(SETTINGS_ROW_ID)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(SettingsRow::into_settings).unwrap_or_default())
    }

    async fn set_session_settings(&self, settings: &SessionSettings) -> Result<()> {
        let (context_kind, collection_id) = match &settings.active_context {
            Some(Context::Collection(id)) => (Some("collection"), Some(id.to_string())),
            Some(Context::Ungrouped) => (Some("ungrouped"), None),
            None => (None, None),
        };

        query(
            r#"
            INSERT INTO session_settings (id, context_kind, collection_id, active_index, position_seconds, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                context_kind = excluded.context_kind,
                collection_id = excluded.collection_id,
                active_index = excluded.active_index,
                position_seconds = excluded.position_seconds,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(SETTINGS_ROW_ID)
        .bind(context_kind)
        .bind(collection_id)
        .bind(index_to_db(settings.active_index))
        .bind(sanitize_position(settings.position_seconds))
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
