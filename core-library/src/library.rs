//! In-memory library model
//!
//! [`LibraryModel`] is the single owner of collections and ungrouped items at
//! runtime. It never performs I/O: the engine persists through the store
//! first and then commits the same change here, so a failed write leaves the
//! model untouched.

use crate::error::{LibraryError, Result};
use crate::models::{
    sanitize_position, Collection, CollectionId, Context, DedupKey, Item, ItemId, ItemUpload,
    NewItem,
};
use std::collections::HashSet;
use tracing::debug;

/// Result of deduplicating an upload batch against a context.
#[derive(Debug, Clone)]
pub struct UploadPlan {
    /// Uploads to persist, in submission order.
    pub accepted: Vec<ItemUpload>,
    /// Number of submitted items dropped as duplicates.
    pub skipped: usize,
}

/// Outcome of [`LibraryModel::add_items`].
#[derive(Debug, Clone, PartialEq)]
pub struct AddItemsOutcome {
    pub inserted: Vec<Item>,
    pub skipped: usize,
}

#[derive(Debug, Clone, Default)]
pub struct LibraryModel {
    collections: Vec<Collection>,
    ungrouped: Vec<Item>,
}

impl LibraryModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a model from a store snapshot.
    pub fn from_parts(collections: Vec<Collection>, ungrouped: Vec<Item>) -> Self {
        Self {
            collections,
            ungrouped,
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn collections(&self) -> &[Collection] {
        &self.collections
    }

    pub fn ungrouped(&self) -> &[Item] {
        &self.ungrouped
    }

    pub fn collection(&self, id: CollectionId) -> Option<&Collection> {
        self.collections.iter().find(|c| c.id == id)
    }

    fn collection_mut(&mut self, id: CollectionId) -> Option<&mut Collection> {
        self.collections.iter_mut().find(|c| c.id == id)
    }

    /// Items of a context. `None` when the collection does not exist.
    pub fn items(&self, context: &Context) -> Option<&[Item]> {
        match context {
            Context::Collection(id) => self.collection(*id).map(|c| c.items.as_slice()),
            Context::Ungrouped => Some(self.ungrouped.as_slice()),
        }
    }

    fn items_mut(&mut self, context: &Context) -> Option<&mut Vec<Item>> {
        match context {
            Context::Collection(id) => self.collection_mut(*id).map(|c| &mut c.items),
            Context::Ungrouped => Some(&mut self.ungrouped),
        }
    }

    pub fn contains_context(&self, context: &Context) -> bool {
        self.items(context).is_some()
    }

    pub fn len(&self, context: &Context) -> usize {
        self.items(context).map_or(0, |items| items.len())
    }

    pub fn item_at(&self, context: &Context, index: usize) -> Option<&Item> {
        self.items(context).and_then(|items| items.get(index))
    }

    /// Resolve an item id to its context and index.
    pub fn find_item(&self, item_id: ItemId) -> Option<(Context, usize)> {
        if let Some(idx) = self.ungrouped.iter().position(|i| i.id == item_id) {
            return Some((Context::Ungrouped, idx));
        }
        self.collections.iter().find_map(|c| {
            c.items
                .iter()
                .position(|i| i.id == item_id)
                .map(|idx| (Context::Collection(c.id), idx))
        })
    }

    /// Collections whose title contains `query`, case-insensitively.
    /// An empty query matches everything.
    pub fn search_collections(&self, query: &str) -> Vec<&Collection> {
        let needle = query.trim().to_lowercase();
        self.collections
            .iter()
            .filter(|c| needle.is_empty() || c.title.to_lowercase().contains(&needle))
            .collect()
    }

    // =========================================================================
    // Collections
    // =========================================================================

    /// Create and insert an empty collection.
    pub fn create_collection(&mut self, title: impl Into<String>, cover_ref: Option<String>) -> &Collection {
        self.insert_collection(Collection::new(title, cover_ref))
    }

    /// Insert a collection built elsewhere (e.g. already persisted).
    /// An existing collection with the same id is replaced.
    pub fn insert_collection(&mut self, collection: Collection) -> &Collection {
        let idx = match self.collections.iter().position(|c| c.id == collection.id) {
            Some(idx) => {
                self.collections[idx] = collection;
                idx
            }
            None => {
                self.collections.push(collection);
                self.collections.len() - 1
            }
        };
        &self.collections[idx]
    }

    /// Remove a collection and its items. Unknown ids are a no-op.
    pub fn delete_collection(&mut self, id: CollectionId) -> Option<Collection> {
        let idx = self.collections.iter().position(|c| c.id == id)?;
        Some(self.collections.remove(idx))
    }

    /// Update title and cover. Items are never touched.
    pub fn rename_or_recover(
        &mut self,
        id: CollectionId,
        title: impl Into<String>,
        cover_ref: Option<String>,
    ) -> Option<&Collection> {
        let collection = self.collection_mut(id)?;
        collection.title = title.into();
        collection.cover_ref = cover_ref;
        Some(collection)
    }

    pub fn set_last_played_index(&mut self, id: CollectionId, index: Option<usize>) -> bool {
        match self.collection_mut(id) {
            Some(collection) => {
                collection.last_played_index = index;
                true
            }
            None => false,
        }
    }

    // =========================================================================
    // Items
    // =========================================================================

    /// Drop uploads whose `(name, size_bytes)` already exists in the context
    /// or earlier in the same batch.
    pub fn plan_upload(&self, context: &Context, uploads: Vec<NewItem>) -> Result<UploadPlan> {
        let existing = self.items(context).ok_or_else(|| unknown_context(context))?;
        let mut seen: HashSet<DedupKey> = existing.iter().map(Item::dedup_key).collect();

        let submitted = uploads.len();
        let accepted: Vec<ItemUpload> = uploads
            .into_iter()
            .filter(|upload| seen.insert(upload.dedup_key()))
            .map(ItemUpload::from)
            .collect();
        let skipped = submitted - accepted.len();

        debug!(context = %context, submitted, accepted = accepted.len(), skipped, "Planned upload");
        Ok(UploadPlan { accepted, skipped })
    }

    /// Append items to the end of a context in the given order.
    pub fn append_items(&mut self, context: &Context, items: Vec<Item>) -> Result<()> {
        let target = self
            .items_mut(context)
            .ok_or_else(|| unknown_context(context))?;
        target.extend(items);
        Ok(())
    }

    /// Deduplicate and append in one step.
    pub fn add_items(&mut self, context: &Context, uploads: Vec<NewItem>) -> Result<AddItemsOutcome> {
        let plan = self.plan_upload(context, uploads)?;
        let inserted: Vec<Item> = plan.accepted.into_iter().map(|u| u.item).collect();
        self.append_items(context, inserted.clone())?;
        Ok(AddItemsOutcome {
            inserted,
            skipped: plan.skipped,
        })
    }

    /// Set an item's stored position. Returns `false` if the item is not in the context.
    pub fn update_item_position(&mut self, context: &Context, item_id: ItemId, seconds: f64) -> bool {
        let Some(items) = self.items_mut(context) else {
            return false;
        };
        match items.iter_mut().find(|i| i.id == item_id) {
            Some(item) => {
                item.position_seconds = sanitize_position(seconds);
                true
            }
            None => false,
        }
    }

    /// Remove a single item, returning its former index.
    ///
    /// A collection's resume hint follows the removal: it moves down when an
    /// earlier item goes and is cleared when the hinted item itself goes.
    pub fn remove_item(&mut self, context: &Context, item_id: ItemId) -> Option<(usize, Item)> {
        let Context::Collection(id) = *context else {
            let items = self.items_mut(context)?;
            let idx = items.iter().position(|i| i.id == item_id)?;
            return Some((idx, items.remove(idx)));
        };

        let collection = self.collection_mut(id)?;
        let idx = collection.items.iter().position(|i| i.id == item_id)?;
        let removed = collection.items.remove(idx);
        collection.last_played_index = match collection.last_played_index {
            Some(hint) if idx < hint => Some(hint - 1),
            Some(hint) if idx == hint => None,
            hint => hint,
        };
        Some((idx, removed))
    }
}

fn unknown_context(context: &Context) -> LibraryError {
    LibraryError::NotFound {
        entity_type: "Collection".to_string(),
        id: context.to_string(),
    }
}
