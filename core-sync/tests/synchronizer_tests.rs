//! Synchronizer integration tests
//!
//! This test suite verifies:
//! - Debounced position flushes driven by a manual clock
//! - Forced flushes and flush-on-shutdown
//! - Selection persistence with collection resume hints
//! - Rehydration against real and failing stores

use async_trait::async_trait;
use bridge_traits::playback::MediaSource;
use bridge_traits::time::ManualClock;
use core_library::error::{LibraryError, Result as LibraryResult};
use core_library::models::{
    Collection, CollectionId, Context, Item, ItemId, ItemUpload, NewItem, SessionSettings,
};
use core_library::store::LibraryStore;
use core_library::MemoryLibraryStore;
use core_playback::SessionSnapshot;
use core_sync::{FlushReason, Synchronizer};
use mockall::mock;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Mock Store
// ============================================================================

mock! {
    Store {}

    #[async_trait]
    impl LibraryStore for Store {
        async fn list_collections(&self) -> LibraryResult<Vec<Collection>>;
        async fn list_ungrouped_items(&self) -> LibraryResult<Vec<Item>>;
        async fn create_or_replace_collection(&self, collection: &Collection) -> LibraryResult<()>;
        async fn update_collection_metadata(
            &self,
            id: CollectionId,
            title: &str,
            cover_ref: Option<String>,
            last_played_index: Option<usize>,
        ) -> LibraryResult<()>;
        async fn delete_collection(&self, id: CollectionId) -> LibraryResult<bool>;
        async fn insert_items(&self, context: &Context, uploads: &[ItemUpload]) -> LibraryResult<()>;
        async fn delete_item(&self, item_id: ItemId) -> LibraryResult<bool>;
        async fn get_item_payload(&self, item_id: ItemId) -> LibraryResult<MediaSource>;
        async fn update_item_position(
            &self,
            context: Option<Context>,
            item_id: ItemId,
            position_seconds: f64,
        ) -> LibraryResult<()>;
        async fn get_session_settings(&self) -> LibraryResult<SessionSettings>;
        async fn set_session_settings(&self, settings: &SessionSettings) -> LibraryResult<()>;
    }
}

const WINDOW: Duration = Duration::from_secs(5);

fn snapshot(item_id: Option<ItemId>, position: f64) -> SessionSnapshot {
    SessionSnapshot {
        context: Some(Context::Ungrouped),
        index: item_id.map(|_| 0),
        item_id,
        position_seconds: position,
    }
}

fn locked() -> LibraryError {
    LibraryError::Migration("database is locked".to_string())
}

// ============================================================================
// Position Flush
// ============================================================================

#[tokio::test]
async fn test_position_flush_waits_for_debounce_window() {
    let item_id = ItemId::new();
    let mut store = MockStore::new();
    store
        .expect_update_item_position()
        .withf(move |ctx, id, pos| *ctx == Some(Context::Ungrouped) && *id == item_id && *pos == 42.0)
        .times(1)
        .returning(|_, _, _| Ok(()));
    store
        .expect_set_session_settings()
        .withf(|s| s.active_index == Some(0) && s.position_seconds == 42.0)
        .times(1)
        .returning(|_| Ok(()));

    let clock = Arc::new(ManualClock::new(0));
    let mut sync = Synchronizer::new(Arc::new(store), clock.clone(), WINDOW);
    let snap = snapshot(Some(item_id), 42.0);

    // Clean: nothing to do even after the window.
    clock.advance(Duration::from_secs(10));
    assert!(!sync.maybe_flush(&snap).await.unwrap());

    sync.note_position_change();
    assert!(sync.maybe_flush(&snap).await.unwrap());
    assert!(!sync.is_dirty());

    sync.note_position_change();
    clock.advance(Duration::from_secs(1));
    assert!(!sync.maybe_flush(&snap).await.unwrap());
    assert!(sync.is_dirty());
}

#[tokio::test]
async fn test_failed_flush_stays_dirty_and_retries() {
    let item_id = ItemId::new();
    let mut store = MockStore::new();
    store
        .expect_update_item_position()
        .times(2)
        .returning(|_, _, _| Ok(()));
    let mut attempts = 0;
    store
        .expect_set_session_settings()
        .times(2)
        .returning(move |_| {
            attempts += 1;
            if attempts == 1 {
                Err(locked())
            } else {
                Ok(())
            }
        });

    let clock = Arc::new(ManualClock::new(0));
    let mut sync = Synchronizer::new(Arc::new(store), clock.clone(), WINDOW);
    let snap = snapshot(Some(item_id), 7.0);

    sync.note_position_change();
    clock.advance(WINDOW);
    let err = sync.maybe_flush(&snap).await.unwrap_err();
    assert_eq!(err.operation(), "set_session_settings");
    assert!(sync.is_dirty());

    // The failed attempt restarted the window.
    assert!(!sync.maybe_flush(&snap).await.unwrap());
    clock.advance(WINDOW);
    assert!(sync.maybe_flush(&snap).await.unwrap());
    assert!(!sync.is_dirty());
}

#[tokio::test]
async fn test_forced_flush_ignores_window() {
    let mut store = MockStore::new();
    store
        .expect_update_item_position()
        .times(1)
        .returning(|_, _, _| Ok(()));
    store
        .expect_set_session_settings()
        .times(1)
        .returning(|_| Ok(()));

    let clock = Arc::new(ManualClock::new(0));
    let mut sync = Synchronizer::new(Arc::new(store), clock, WINDOW);
    sync.note_position_change();

    sync.flush(&snapshot(Some(ItemId::new()), 60.0), FlushReason::Seek)
        .await
        .unwrap();
    assert!(!sync.is_dirty());
}

#[tokio::test]
async fn test_flush_without_item_writes_settings_only() {
    let mut store = MockStore::new();
    store.expect_update_item_position().never();
    store
        .expect_set_session_settings()
        .withf(|s| s.active_index.is_none())
        .times(1)
        .returning(|_| Ok(()));

    let mut sync = Synchronizer::new(Arc::new(store), Arc::new(ManualClock::new(0)), WINDOW);
    sync.flush(&snapshot(None, 0.0), FlushReason::Pause).await.unwrap();
}

#[tokio::test]
async fn test_shutdown_flushes_even_when_clean() {
    let mut store = MockStore::new();
    store
        .expect_update_item_position()
        .times(1)
        .returning(|_, _, _| Ok(()));
    store
        .expect_set_session_settings()
        .times(1)
        .returning(|_| Ok(()));

    let mut sync = Synchronizer::new(Arc::new(store), Arc::new(ManualClock::new(0)), WINDOW);
    assert!(!sync.is_dirty());
    sync.shutdown(&snapshot(Some(ItemId::new()), 3.0)).await.unwrap();
}

// ============================================================================
// Selection
// ============================================================================

#[tokio::test]
async fn test_persist_selection_writes_resume_hint() {
    let mut collection = Collection::new("Dune", Some("covers/dune.jpg".to_string()));
    collection.last_played_index = Some(1);
    let collection_id = collection.id;

    let mut store = MockStore::new();
    store
        .expect_set_session_settings()
        .withf(move |s| {
            s.active_context == Some(Context::Collection(collection_id)) && s.active_index == Some(1)
        })
        .times(1)
        .returning(|_| Ok(()));
    store
        .expect_update_collection_metadata()
        .withf(move |id, title, cover, hint| {
            *id == collection_id
                && title == "Dune"
                && cover.as_deref() == Some("covers/dune.jpg")
                && *hint == Some(1)
        })
        .times(1)
        .returning(|_, _, _, _| Ok(()));

    let mut sync = Synchronizer::new(Arc::new(store), Arc::new(ManualClock::new(0)), WINDOW);
    let snap = SessionSnapshot {
        context: Some(Context::Collection(collection_id)),
        index: Some(1),
        item_id: Some(ItemId::new()),
        position_seconds: 0.0,
    };
    sync.persist_selection(&snap, Some(&collection)).await.unwrap();
}

#[tokio::test]
async fn test_persist_selection_failure_is_reported() {
    let mut store = MockStore::new();
    store
        .expect_set_session_settings()
        .returning(|_| Err(locked()));
    store.expect_update_collection_metadata().never();

    let mut sync = Synchronizer::new(Arc::new(store), Arc::new(ManualClock::new(0)), WINDOW);
    let err = sync
        .persist_selection(&snapshot(None, 0.0), None)
        .await
        .unwrap_err();
    assert_eq!(err.operation(), "set_session_settings");
}

// ============================================================================
// Rehydration
// ============================================================================

#[tokio::test]
async fn test_rehydrate_storage_failure() {
    let mut store = MockStore::new();
    store.expect_list_collections().returning(|| Err(locked()));

    let mut sync = Synchronizer::new(Arc::new(store), Arc::new(ManualClock::new(0)), WINDOW);
    let err = sync.rehydrate().await.unwrap_err();
    assert_eq!(err.operation(), "list_collections");
}

#[tokio::test]
async fn test_unread_settings_survive_flushes_until_selection() {
    let mut store = MockStore::new();
    store.expect_list_collections().returning(|| Err(locked()));
    store.expect_set_session_settings().times(1).returning(|_| Ok(()));

    let mut sync = Synchronizer::new(Arc::new(store), Arc::new(ManualClock::new(0)), WINDOW);
    assert!(sync.rehydrate().await.is_err());
    assert!(sync.settings_unread());

    sync.flush(&snapshot(None, 0.0), FlushReason::Seek).await.unwrap();
    sync.shutdown(&snapshot(None, 0.0)).await.unwrap();

    // A selection made in this process owns the record from here on.
    sync.persist_selection(&snapshot(None, 0.0), None).await.unwrap();
    assert!(!sync.settings_unread());
}

#[tokio::test]
async fn test_rehydrate_clamps_out_of_range_index() {
    let store = Arc::new(MemoryLibraryStore::new());
    let collection = Collection::new("Dune", None);
    let ctx = Context::Collection(collection.id);
    store.create_or_replace_collection(&collection).await.unwrap();
    let uploads: Vec<ItemUpload> = ["01.mp3", "02.mp3"]
        .iter()
        .map(|n| ItemUpload::from(NewItem::from_bytes(*n, n.as_bytes().to_vec())))
        .collect();
    store.insert_items(&ctx, &uploads).await.unwrap();
    store
        .set_session_settings(&SessionSettings::new(Some(ctx), Some(5), 12.0))
        .await
        .unwrap();

    let mut sync = Synchronizer::new(store, Arc::new(ManualClock::new(0)), WINDOW);
    let rehydrated = sync.rehydrate().await.unwrap();

    assert_eq!(rehydrated.library.len(&ctx), 2);
    assert_eq!(rehydrated.restore.context, Some(ctx));
    assert_eq!(rehydrated.restore.index, None);
    assert_eq!(rehydrated.restore.item, None);
}

#[tokio::test]
async fn test_rehydrate_round_trips_flushed_state() {
    let store = Arc::new(MemoryLibraryStore::new());
    let uploads: Vec<ItemUpload> = ["a.mp3", "b.mp3"]
        .iter()
        .map(|n| ItemUpload::from(NewItem::from_bytes(*n, n.as_bytes().to_vec())))
        .collect();
    store.insert_items(&Context::Ungrouped, &uploads).await.unwrap();
    let item_id = uploads[1].item.id;

    let clock = Arc::new(ManualClock::new(0));
    let mut sync = Synchronizer::new(store.clone(), clock.clone(), WINDOW);
    let snap = SessionSnapshot {
        context: Some(Context::Ungrouped),
        index: Some(1),
        item_id: Some(item_id),
        position_seconds: 88.5,
    };
    sync.shutdown(&snap).await.unwrap();

    let mut fresh = Synchronizer::new(store, clock, WINDOW);
    let rehydrated = fresh.rehydrate().await.unwrap();
    assert_eq!(rehydrated.restore.context, Some(Context::Ungrouped));
    assert_eq!(rehydrated.restore.index, Some(1));
    assert_eq!(rehydrated.restore.item, Some((item_id, 88.5)));
    assert_eq!(rehydrated.library.ungrouped()[1].position_seconds, 88.5);
}
