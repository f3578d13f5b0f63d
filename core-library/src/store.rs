//! Store Adapter contract
//!
//! The engine reaches persistent storage only through [`LibraryStore`]. Every
//! call may fail; callers treat a failure as "storage unavailable", keep their
//! in-memory state and surface a notification.

use crate::error::Result;
use crate::models::{Collection, CollectionId, Context, Item, ItemId, ItemUpload, SessionSettings};
use async_trait::async_trait;
use bridge_traits::playback::MediaSource;

/// Persistent backing store for the library and session settings.
#[async_trait]
pub trait LibraryStore: Send + Sync {
    /// All collections with their items in insertion order.
    async fn list_collections(&self) -> Result<Vec<Collection>>;

    /// The ungrouped set in insertion order.
    async fn list_ungrouped_items(&self) -> Result<Vec<Item>>;

    /// Insert a collection or overwrite its metadata.
    ///
    /// Items are not written here; they are added with [`insert_items`](Self::insert_items)
    /// so their payloads travel with them.
    async fn create_or_replace_collection(&self, collection: &Collection) -> Result<()>;

    /// Overwrite title, cover and resume hint of an existing collection.
    ///
    /// # Errors
    /// `NotFound` when the collection does not exist.
    async fn update_collection_metadata(
        &self,
        id: CollectionId,
        title: &str,
        cover_ref: Option<String>,
        last_played_index: Option<usize>,
    ) -> Result<()>;

    /// Delete a collection and, by cascade, its items.
    ///
    /// # Returns
    /// `Ok(false)` when the collection did not exist.
    async fn delete_collection(&self, id: CollectionId) -> Result<bool>;

    /// Append items with their payloads to the end of a context.
    async fn insert_items(&self, context: &Context, uploads: &[ItemUpload]) -> Result<()>;

    /// Delete a single item and its payload.
    async fn delete_item(&self, item_id: ItemId) -> Result<bool>;

    /// Resolve an item's payload.
    ///
    /// # Errors
    /// `PayloadMissing` when the item is listed but its bytes are gone.
    async fn get_item_payload(&self, item_id: ItemId) -> Result<MediaSource>;

    /// Persist an item's position. With a context, the update is scoped to it.
    /// Unknown items are ignored.
    async fn update_item_position(
        &self,
        context: Option<Context>,
        item_id: ItemId,
        position_seconds: f64,
    ) -> Result<()>;

    /// The persisted selection triple, or defaults when nothing was stored yet.
    async fn get_session_settings(&self) -> Result<SessionSettings>;

    async fn set_session_settings(&self, settings: &SessionSettings) -> Result<()>;
}
