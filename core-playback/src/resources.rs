//! # Resource Lifecycle
//!
//! Owns the payload handle backing the item currently loaded into the
//! media device. At most one handle is outstanding at any time: acquiring
//! a new one releases the previous handle first, and teardown releases
//! everything.

use crate::error::Result;
use bridge_traits::playback::MediaSource;
use core_library::models::ItemId;
use core_library::store::LibraryStore;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Identifier of a granted payload handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl HandleId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handle#{}", self.0)
    }
}

/// A granted payload, valid until released.
#[derive(Debug, Clone)]
pub struct PayloadHandle {
    pub id: HandleId,
    pub item_id: ItemId,
    pub source: MediaSource,
}

pub struct ResourceManager {
    store: Arc<dyn LibraryStore>,
    current: Option<PayloadHandle>,
    next_id: u64,
}

impl ResourceManager {
    pub fn new(store: Arc<dyn LibraryStore>) -> Self {
        Self {
            store,
            current: None,
            next_id: 1,
        }
    }

    /// Release the current handle, then resolve the payload for `item_id`.
    ///
    /// On failure no handle is outstanding.
    #[instrument(skip(self), fields(item_id = %item_id))]
    pub async fn acquire(&mut self, item_id: ItemId) -> Result<PayloadHandle> {
        self.release_all();

        let source = match self.store.get_item_payload(item_id).await {
            Ok(source) => source,
            Err(e) => {
                warn!(error = %e, "Payload could not be resolved");
                return Err(e.into());
            }
        };

        let handle = PayloadHandle {
            id: HandleId(self.next_id),
            item_id,
            source,
        };
        self.next_id += 1;
        debug!(handle = %handle.id, embedded = handle.source.is_embedded(), "Payload acquired");
        self.current = Some(handle.clone());
        Ok(handle)
    }

    /// Release `id` if it is the outstanding handle. Returns `false` otherwise.
    pub fn release(&mut self, id: HandleId) -> bool {
        match &self.current {
            Some(handle) if handle.id == id => {
                debug!(handle = %id, "Payload released");
                self.current = None;
                true
            }
            _ => false,
        }
    }

    /// Release whatever is outstanding. Safe to call repeatedly.
    pub fn release_all(&mut self) {
        if let Some(handle) = self.current.take() {
            debug!(handle = %handle.id, "Payload released");
        }
    }

    pub fn current(&self) -> Option<&PayloadHandle> {
        self.current.as_ref()
    }

    /// Number of handles not yet released (0 or 1).
    pub fn outstanding(&self) -> usize {
        usize::from(self.current.is_some())
    }
}

impl fmt::Debug for ResourceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceManager")
            .field("current", &self.current)
            .field("next_id", &self.next_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PlaybackError;
    use core_library::models::{Context, ItemUpload, NewItem};
    use core_library::MemoryLibraryStore;

    async fn store_with(names: &[&str]) -> (Arc<MemoryLibraryStore>, Vec<ItemId>) {
        let store = Arc::new(MemoryLibraryStore::new());
        let uploads: Vec<ItemUpload> = names
            .iter()
            .map(|n| ItemUpload::from(NewItem::from_bytes(*n, n.as_bytes().to_vec())))
            .collect();
        store.insert_items(&Context::Ungrouped, &uploads).await.unwrap();
        let ids = uploads.iter().map(|u| u.item.id).collect();
        (store, ids)
    }

    #[tokio::test]
    async fn test_acquire_releases_previous_handle() {
        let (store, ids) = store_with(&["a.mp3", "b.mp3"]).await;
        let mut resources = ResourceManager::new(store);

        let first = resources.acquire(ids[0]).await.unwrap();
        let second = resources.acquire(ids[1]).await.unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(resources.outstanding(), 1);
        assert_eq!(resources.current().unwrap().item_id, ids[1]);
        assert!(!resources.release(first.id));
        assert!(resources.release(second.id));
        assert_eq!(resources.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_failed_acquire_leaves_nothing_outstanding() {
        let (store, ids) = store_with(&["a.mp3"]).await;
        let mut resources = ResourceManager::new(store);
        resources.acquire(ids[0]).await.unwrap();

        let err = resources.acquire(ItemId::new()).await.unwrap_err();
        assert!(matches!(err, PlaybackError::PayloadMissing { .. }));
        assert_eq!(resources.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_release_all_is_idempotent() {
        let (store, ids) = store_with(&["a.mp3"]).await;
        let mut resources = ResourceManager::new(store);
        resources.acquire(ids[0]).await.unwrap();

        resources.release_all();
        resources.release_all();
        assert_eq!(resources.outstanding(), 0);
        assert!(resources.current().is_none());
    }
}
