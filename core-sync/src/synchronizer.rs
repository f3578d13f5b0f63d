//! # Synchronizer
//!
//! Keeps the playback session durably mirrored in the [`LibraryStore`].
//!
//! ## Overview
//!
//! - **Rehydration**: reads the library snapshot and the persisted selection
//!   once at start and turns them into a [`RestorePoint`] that is always
//!   consistent with the library. Stale state is clamped, never reported.
//! - **Position flush**: time updates only mark the session dirty; the write
//!   happens once the debounce window has elapsed, or immediately on item
//!   switch, pause, seek and teardown.
//! - **Selection flush**: selection changes are written immediately, together
//!   with the collection's resume hint.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let mut sync = Synchronizer::new(store, clock, config.position_flush_interval());
//! let Rehydrated { library, restore } = sync.rehydrate().await?;
//!
//! // on every time update
//! sync.note_position_change();
//! sync.maybe_flush(&session.snapshot()).await?;
//!
//! // on exit
//! sync.shutdown(&session.snapshot()).await?;
//! ```

use crate::error::{Result, SyncError};
use bridge_traits::time::Clock;
use core_library::models::{Collection, Context, ItemId, SessionSettings};
use core_library::store::LibraryStore;
use core_library::LibraryModel;
use core_playback::SessionSnapshot;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

// ============================================================================
// Types
// ============================================================================

/// Why a position flush was forced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// The debounce window elapsed with pending changes.
    Debounced,
    ItemSwitch,
    Pause,
    Seek,
    Teardown,
}

impl fmt::Display for FlushReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FlushReason::Debounced => "debounced",
            FlushReason::ItemSwitch => "item_switch",
            FlushReason::Pause => "pause",
            FlushReason::Seek => "seek",
            FlushReason::Teardown => "teardown",
        };
        f.write_str(s)
    }
}

/// Validated selection to hand to the session after start.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RestorePoint {
    pub context: Option<Context>,
    /// Always a valid index into `context` when set.
    pub index: Option<usize>,
    /// Item at `index` and the persisted session-level position for it.
    pub item: Option<(ItemId, f64)>,
}

/// Result of [`Synchronizer::rehydrate`].
#[derive(Debug, Clone)]
pub struct Rehydrated {
    pub library: LibraryModel,
    pub restore: RestorePoint,
}

// ============================================================================
// Synchronizer
// ============================================================================

pub struct Synchronizer {
    store: Arc<dyn LibraryStore>,
    clock: Arc<dyn Clock>,
    flush_interval_ms: i64,
    last_flush_ms: i64,
    dirty: bool,
    /// Set while the stored selection could not be read. Flushes leave the
    /// settings record alone until this process persists a selection.
    settings_unread: bool,
}

impl Synchronizer {
    pub fn new(store: Arc<dyn LibraryStore>, clock: Arc<dyn Clock>, flush_interval: Duration) -> Self {
        let last_flush_ms = clock.unix_timestamp_millis();
        Self {
            store,
            clock,
            flush_interval_ms: i64::try_from(flush_interval.as_millis()).unwrap_or(i64::MAX),
            last_flush_ms,
            dirty: false,
            settings_unread: false,
        }
    }

    pub fn store(&self) -> &Arc<dyn LibraryStore> {
        &self.store
    }

    /// Whether position changes are waiting for the next flush.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Whether the stored selection is protected from flushes because it
    /// could not be read at start.
    pub fn settings_unread(&self) -> bool {
        self.settings_unread
    }

    // ------------------------------------------------------------------------
    // Rehydration
    // ------------------------------------------------------------------------

    /// Load the library and the persisted selection.
    ///
    /// # Errors
    /// Only when the store cannot be read. Inconsistent settings are clamped.
    #[instrument(skip(self))]
    pub async fn rehydrate(&mut self) -> Result<Rehydrated> {
        self.settings_unread = true;
        let collections = self
            .store
            .list_collections()
            .await
            .map_err(SyncError::storage("list_collections"))?;
        let ungrouped = self
            .store
            .list_ungrouped_items()
            .await
            .map_err(SyncError::storage("list_ungrouped_items"))?;
        let settings = self
            .store
            .get_session_settings()
            .await
            .map_err(SyncError::storage("get_session_settings"))?;

        let library = LibraryModel::from_parts(collections, ungrouped);
        let restore = validate_settings(&library, &settings);

        info!(
            collections = library.collections().len(),
            ungrouped = library.ungrouped().len(),
            context = ?restore.context,
            index = ?restore.index,
            "Library rehydrated"
        );

        self.dirty = false;
        self.settings_unread = false;
        self.last_flush_ms = self.clock.unix_timestamp_millis();
        Ok(Rehydrated { library, restore })
    }

    // ------------------------------------------------------------------------
    // Position flush
    // ------------------------------------------------------------------------

    /// Mark the position as changed since the last flush.
    pub fn note_position_change(&mut self) {
        self.dirty = true;
    }

    /// Flush if dirty and the debounce window has elapsed. Returns whether a
    /// write happened.
    pub async fn maybe_flush(&mut self, snapshot: &SessionSnapshot) -> Result<bool> {
        if !self.dirty {
            return Ok(false);
        }
        let elapsed = self.clock.unix_timestamp_millis() - self.last_flush_ms;
        if elapsed < self.flush_interval_ms {
            return Ok(false);
        }
        self.flush(snapshot, FlushReason::Debounced).await?;
        Ok(true)
    }

    /// Write the item's own position and the settings triple from one snapshot.
    ///
    /// The dirty flag survives a failed write so the next window retries.
    #[instrument(skip(self, snapshot), fields(reason = %reason, index = ?snapshot.index))]
    pub async fn flush(&mut self, snapshot: &SessionSnapshot, reason: FlushReason) -> Result<()> {
        self.last_flush_ms = self.clock.unix_timestamp_millis();

        if let Some(item_id) = snapshot.item_id {
            self.store
                .update_item_position(snapshot.context, item_id, snapshot.position_seconds)
                .await
                .map_err(SyncError::storage("update_item_position"))?;
        }
        if self.settings_unread {
            debug!("Stored selection was never read, leaving it untouched");
        } else {
            self.store
                .set_session_settings(&settings_from(snapshot))
                .await
                .map_err(SyncError::storage("set_session_settings"))?;
        }

        self.dirty = false;
        debug!(position = snapshot.position_seconds, "Position flushed");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Selection flush
    // ------------------------------------------------------------------------

    /// Persist a selection change right away.
    ///
    /// `collection` is the active collection with its resume hint already
    /// updated in memory; its metadata is written alongside the settings.
    #[instrument(skip(self, snapshot, collection), fields(context = ?snapshot.context, index = ?snapshot.index))]
    pub async fn persist_selection(
        &mut self,
        snapshot: &SessionSnapshot,
        collection: Option<&Collection>,
    ) -> Result<()> {
        self.store
            .set_session_settings(&settings_from(snapshot))
            .await
            .map_err(SyncError::storage("set_session_settings"))?;

        self.settings_unread = false;

        if let Some(collection) = collection {
            self.store
                .update_collection_metadata(
                    collection.id,
                    &collection.title,
                    collection.cover_ref.clone(),
                    collection.last_played_index,
                )
                .await
                .map_err(SyncError::storage("update_collection_metadata"))?;
        }

        debug!("Selection persisted");
        Ok(())
    }

    /// Final flush. Always writes, dirty or not.
    pub async fn shutdown(&mut self, snapshot: &SessionSnapshot) -> Result<()> {
        self.flush(snapshot, FlushReason::Teardown).await?;
        info!("Session state flushed on shutdown");
        Ok(())
    }
}

impl fmt::Debug for Synchronizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Synchronizer")
            .field("flush_interval_ms", &self.flush_interval_ms)
            .field("last_flush_ms", &self.last_flush_ms)
            .field("dirty", &self.dirty)
            .finish()
    }
}

fn settings_from(snapshot: &SessionSnapshot) -> SessionSettings {
    SessionSettings::new(snapshot.context, snapshot.index, snapshot.position_seconds)
}

/// Clamp persisted settings against the library.
///
/// - unknown collection: context and index are dropped
/// - index out of range, or missing: the context is kept with nothing selected
pub fn validate_settings(library: &LibraryModel, settings: &SessionSettings) -> RestorePoint {
    let Some(context) = settings.active_context else {
        if settings.active_index.is_some() {
            debug!("Persisted index without a context, ignoring");
        }
        return RestorePoint::default();
    };

    let Some(items) = library.items(&context) else {
        debug!(context = %context, "Persisted context no longer exists, resetting");
        return RestorePoint::default();
    };

    let Some(index) = settings.active_index else {
        return RestorePoint {
            context: Some(context),
            ..RestorePoint::default()
        };
    };

    match items.get(index) {
        Some(item) => RestorePoint {
            context: Some(context),
            index: Some(index),
            item: Some((item.id, settings.position_seconds)),
        },
        None => {
            debug!(
                context = %context,
                index,
                len = items.len(),
                "Persisted index out of range, restoring with nothing selected"
            );
            RestorePoint {
                context: Some(context),
                ..RestorePoint::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_library::models::{CollectionId, Item, PayloadRef};

    fn library_with_collection(len: usize) -> (LibraryModel, CollectionId) {
        let mut collection = Collection::new("Dune", None);
        for i in 0..len {
            collection
                .items
                .push(Item::new(format!("{:02}.mp3", i), 100, PayloadRef::Embedded));
        }
        let id = collection.id;
        (LibraryModel::from_parts(vec![collection], Vec::new()), id)
    }

    #[test]
    fn test_validate_keeps_consistent_selection() {
        let (library, id) = library_with_collection(3);
        let ctx = Context::Collection(id);
        let settings = SessionSettings::new(Some(ctx), Some(2), 33.0);

        let restore = validate_settings(&library, &settings);
        assert_eq!(restore.context, Some(ctx));
        assert_eq!(restore.index, Some(2));
        let expected_item = library.item_at(&ctx, 2).unwrap().id;
        assert_eq!(restore.item, Some((expected_item, 33.0)));
    }

    #[test]
    fn test_validate_out_of_range_index_keeps_context() {
        let (library, id) = library_with_collection(2);
        let ctx = Context::Collection(id);
        let restore = validate_settings(&library, &SessionSettings::new(Some(ctx), Some(5), 1.0));

        assert_eq!(restore.context, Some(ctx));
        assert_eq!(restore.index, None);
        assert_eq!(restore.item, None);
    }

    #[test]
    fn test_validate_unknown_collection_resets_everything() {
        let (library, _) = library_with_collection(2);
        let settings =
            SessionSettings::new(Some(Context::Collection(CollectionId::new())), Some(0), 9.0);
        assert_eq!(validate_settings(&library, &settings), RestorePoint::default());
    }

    #[test]
    fn test_validate_index_without_context_is_dropped() {
        let (library, _) = library_with_collection(2);
        let settings = SessionSettings::new(None, Some(1), 9.0);
        assert_eq!(validate_settings(&library, &settings), RestorePoint::default());
    }

    #[test]
    fn test_validate_empty_ungrouped_context() {
        let library = LibraryModel::new();
        let settings = SessionSettings::new(Some(Context::Ungrouped), Some(0), 0.0);
        let restore = validate_settings(&library, &settings);
        assert_eq!(restore.context, Some(Context::Ungrouped));
        assert_eq!(restore.index, None);
    }

    #[test]
    fn test_flush_reason_display() {
        assert_eq!(FlushReason::ItemSwitch.to_string(), "item_switch");
        assert_eq!(FlushReason::Teardown.to_string(), "teardown");
    }
}
