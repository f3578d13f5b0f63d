//! Read-only projections handed to the presentation layer.

use core_library::models::{Collection, CollectionId, Context, Item, ItemId};
use core_library::LibraryModel;
use core_playback::SessionState;
use serde::{Deserialize, Serialize};

/// Snapshot of the playback session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionView {
    pub active_item: Option<Item>,
    pub context: Option<Context>,
    pub active_index: Option<usize>,
    pub state: SessionState,
    pub is_playing: bool,
    pub position_seconds: f64,
    pub duration_seconds: Option<f64>,
    pub progress_percent: Option<f64>,
    pub has_next: bool,
    pub has_previous: bool,
    pub volume: f32,
    pub muted: bool,
}

/// One row of the library listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSummary {
    pub id: CollectionId,
    pub title: String,
    pub cover_ref: Option<String>,
    pub item_count: usize,
    pub last_played_index: Option<usize>,
}

impl From<&Collection> for CollectionSummary {
    fn from(collection: &Collection) -> Self {
        Self {
            id: collection.id,
            title: collection.title.clone(),
            cover_ref: collection.cover_ref.clone(),
            item_count: collection.items.len(),
            last_played_index: collection.valid_last_played_index(),
        }
    }
}

/// Library listing: collections in creation order plus the ungrouped set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryView {
    pub collections: Vec<CollectionSummary>,
    pub ungrouped: Vec<Item>,
    /// Collection currently holding the session, if any.
    pub active_collection: Option<CollectionId>,
}

impl LibraryView {
    pub(crate) fn build(library: &LibraryModel, active: Option<Context>, query: Option<&str>) -> Self {
        let collections = match query {
            Some(query) => library
                .search_collections(query)
                .into_iter()
                .map(CollectionSummary::from)
                .collect(),
            None => library
                .collections()
                .iter()
                .map(CollectionSummary::from)
                .collect(),
        };
        Self {
            collections,
            ungrouped: library.ungrouped().to_vec(),
            active_collection: active.and_then(|c| c.collection_id()),
        }
    }
}

/// Outcome of an upload batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReport {
    pub inserted: Vec<ItemId>,
    /// Duplicates dropped from the batch.
    pub skipped: usize,
}
