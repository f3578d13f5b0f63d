//! Embedded in-process implementation of [`LibraryStore`]
//!
//! Keeps collections, items and payload bytes behind a shared lock. Clones
//! share the same state, so a second engine built from a clone sees what the
//! first one wrote, the same way it would reopen a database file.

use crate::error::{LibraryError, Result};
use crate::models::{
    sanitize_position, Collection, CollectionId, Context, Item, ItemId, ItemUpload,
    SessionSettings,
};
use crate::store::LibraryStore;
use async_trait::async_trait;
use bridge_traits::playback::MediaSource;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Default)]
struct MemoryState {
    collections: Vec<Collection>,
    ungrouped: Vec<Item>,
    payloads: HashMap<ItemId, MediaSource>,
    settings: Option<SessionSettings>,
}

impl MemoryState {
    fn collection_mut(&mut self, id: CollectionId) -> Option<&mut Collection> {
        self.collections.iter_mut().find(|c| c.id == id)
    }

    fn items_mut(&mut self, context: &Context) -> Option<&mut Vec<Item>> {
        match context {
            Context::Collection(id) => self.collection_mut(*id).map(|c| &mut c.items),
            Context::Ungrouped => Some(&mut self.ungrouped),
        }
    }

    fn all_items_mut(&mut self) -> impl Iterator<Item = &mut Item> {
        self.ungrouped
            .iter_mut()
            .chain(self.collections.iter_mut().flat_map(|c| c.items.iter_mut()))
    }
}

/// In-memory library store
#[derive(Debug, Clone, Default)]
pub struct MemoryLibraryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryLibraryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of payloads currently held.
    pub async fn payload_count(&self) -> usize {
        self.state.read().await.payloads.len()
    }
}

#[async_trait]
impl LibraryStore for MemoryLibraryStore {
    async fn list_collections(&self) -> Result<Vec<Collection>> {
        Ok(self.state.read().await.collections.clone())
    }

    async fn list_ungrouped_items(&self) -> Result<Vec<Item>> {
        Ok(self.state.read().await.ungrouped.clone())
    }

    async fn create_or_replace_collection(&self, collection: &Collection) -> Result<()> {
        let mut state = self.state.write().await;
        match state.collection_mut(collection.id) {
            Some(existing) => {
                existing.title = collection.title.clone();
                existing.cover_ref = collection.cover_ref.clone();
                existing.last_played_index = collection.last_played_index;
            }
            None => {
                let mut stored = collection.clone();
                stored.items.clear();
                state.collections.push(stored);
            }
        }
        Ok(())
    }

    async fn update_collection_metadata(
        &self,
        id: CollectionId,
        title: &str,
        cover_ref: Option<String>,
        last_played_index: Option<usize>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let collection = state
            .collection_mut(id)
            .ok_or_else(|| LibraryError::NotFound {
                entity_type: "Collection".to_string(),
                id: id.to_string(),
            })?;
        collection.title = title.to_string();
        collection.cover_ref = cover_ref;
        collection.last_played_index = last_played_index;
        Ok(())
    }

    async fn delete_collection(&self, id: CollectionId) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(idx) = state.collections.iter().position(|c| c.id == id) else {
            return Ok(false);
        };
        let removed = state.collections.remove(idx);
        for item in &removed.items {
            state.payloads.remove(&item.id);
        }
        debug!(collection_id = %id, items = removed.items.len(), "Deleted collection");
        Ok(true)
    }

    async fn insert_items(&self, context: &Context, uploads: &[ItemUpload]) -> Result<()> {
        let mut state = self.state.write().await;
        let items = state
            .items_mut(context)
            .ok_or_else(|| LibraryError::NotFound {
                entity_type: "Collection".to_string(),
                id: context.to_string(),
            })?;
        items.extend(uploads.iter().map(|u| u.item.clone()));
        for upload in uploads {
            state.payloads.insert(upload.item.id, upload.source.clone());
        }
        Ok(())
    }

    async fn delete_item(&self, item_id: ItemId) -> Result<bool> {
        let mut state = self.state.write().await;
        let before = state.ungrouped.len();
        state.ungrouped.retain(|i| i.id != item_id);
        let mut removed = state.ungrouped.len() != before;
        for collection in state.collections.iter_mut() {
            let before = collection.items.len();
            collection.items.retain(|i| i.id != item_id);
            removed |= collection.items.len() != before;
        }
        state.payloads.remove(&item_id);
        Ok(removed)
    }

    async fn get_item_payload(&self, item_id: ItemId) -> Result<MediaSource> {
        let source = self
            .state
            .read()
            .await
            .payloads
            .get(&item_id)
            .cloned()
            .ok_or_else(|| LibraryError::PayloadMissing {
                item_id: item_id.to_string(),
                reason: "no payload stored".to_string(),
            })?;

        if let MediaSource::LocalFile { path } = &source {
            if !tokio::fs::try_exists(path).await.unwrap_or(false) {
                return Err(LibraryError::PayloadMissing {
                    item_id: item_id.to_string(),
                    reason: format!("{} no longer exists", path.display()),
                });
            }
        }
        Ok(source)
    }

    async fn update_item_position(
        &self,
        context: Option<Context>,
        item_id: ItemId,
        position_seconds: f64,
    ) -> Result<()> {
        let position = sanitize_position(position_seconds);
        let mut state = self.state.write().await;
        let item = match context {
            Some(context) => state
                .items_mut(&context)
                .and_then(|items| items.iter_mut().find(|i| i.id == item_id)),
            None => state.all_items_mut().find(|i| i.id == item_id),
        };
        match item {
            Some(item) => item.position_seconds = position,
            None => debug!(item_id = %item_id, "Position update matched no item"),
        }
        Ok(())
    }

    async fn get_session_settings(&self) -> Result<SessionSettings> {
        Ok(self.state.read().await.settings.clone().unwrap_or_default())
    }

    async fn set_session_settings(&self, settings: &SessionSettings) -> Result<()> {
        self.state.write().await.settings = Some(settings.clone());
        Ok(())
    }
}
