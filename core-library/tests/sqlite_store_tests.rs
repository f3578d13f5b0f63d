//! Integration tests for the SQLite library store

use core_library::db::{create_pool, create_test_pool, DatabaseConfig};
use core_library::{
    Collection, CollectionId, Context, ItemUpload, LibraryError, LibraryStore, NewItem,
    PayloadRef, SessionSettings, SqliteLibraryStore,
};
use bridge_traits::playback::MediaSource;
use std::io::Write;

async fn store() -> SqliteLibraryStore {
    SqliteLibraryStore::new(create_test_pool().await.unwrap())
}

fn embedded(names: &[&str]) -> Vec<ItemUpload> {
    names
        .iter()
        .map(|n| ItemUpload::from(NewItem::from_bytes(*n, format!("bytes of {}", n).into_bytes())))
        .collect()
}

#[tokio::test]
async fn test_collections_round_trip_in_insertion_order() {
    let store = store().await;

    let first = Collection::new("Dune", Some("covers/dune.jpg".to_string()));
    let second = Collection::new("Foundation", None);
    store.create_or_replace_collection(&first).await.unwrap();
    store.create_or_replace_collection(&second).await.unwrap();

    let ctx = Context::Collection(first.id);
    store
        .insert_items(&ctx, &embedded(&["01.mp3", "02.mp3"]))
        .await
        .unwrap();
    store
        .insert_items(&ctx, &embedded(&["03.mp3"]))
        .await
        .unwrap();

    let collections = store.list_collections().await.unwrap();
    assert_eq!(collections.len(), 2);
    assert_eq!(collections[0].id, first.id);
    assert_eq!(collections[0].cover_ref.as_deref(), Some("covers/dune.jpg"));
    assert_eq!(collections[0].last_played_index, None);
    let names: Vec<_> = collections[0].items.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, vec!["01.mp3", "02.mp3", "03.mp3"]);
    assert!(collections[1].items.is_empty());
}

#[tokio::test]
async fn test_create_or_replace_does_not_drop_items() {
    let store = store().await;
    let mut collection = Collection::new("Draft", None);
    store.create_or_replace_collection(&collection).await.unwrap();
    store
        .insert_items(&Context::Collection(collection.id), &embedded(&["01.mp3"]))
        .await
        .unwrap();

    collection.title = "Dune".to_string();
    collection.last_played_index = Some(0);
    store.create_or_replace_collection(&collection).await.unwrap();

    let stored = store.list_collections().await.unwrap();
    assert_eq!(stored[0].title, "Dune");
    assert_eq!(stored[0].last_played_index, Some(0));
    assert_eq!(stored[0].items.len(), 1);
}

#[tokio::test]
async fn test_update_metadata_of_unknown_collection_is_not_found() {
    let store = store().await;
    let result = store
        .update_collection_metadata(CollectionId::new(), "x", None, None)
        .await;
    assert!(matches!(result, Err(LibraryError::NotFound { .. })));
}

#[tokio::test]
async fn test_delete_collection_cascades_to_items() {
    let store = store().await;
    let collection = Collection::new("Dune", None);
    store.create_or_replace_collection(&collection).await.unwrap();
    let batch = embedded(&["01.mp3"]);
    store
        .insert_items(&Context::Collection(collection.id), &batch)
        .await
        .unwrap();

    assert!(store.delete_collection(collection.id).await.unwrap());
    assert!(!store.delete_collection(collection.id).await.unwrap());

    let result = store.get_item_payload(batch[0].item.id).await;
    assert!(matches!(result, Err(LibraryError::NotFound { .. })));
}

#[tokio::test]
async fn test_insert_into_unknown_collection_fails() {
    let store = store().await;
    let result = store
        .insert_items(&Context::Collection(CollectionId::new()), &embedded(&["a.mp3"]))
        .await;
    assert!(matches!(result, Err(LibraryError::NotFound { .. })));
    assert!(store.list_ungrouped_items().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_payload_resolution() {
    let store = store().await;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"ID3").unwrap();
    let on_disk = ItemUpload::from(NewItem::from_file("on-disk.mp3", file.path(), 3));
    let gone = ItemUpload::from(NewItem::from_file("gone.mp3", "/no/such/dir/gone.mp3", 9));
    let bytes = embedded(&["embedded.mp3"]).remove(0);

    store
        .insert_items(
            &Context::Ungrouped,
            &[on_disk.clone(), gone.clone(), bytes.clone()],
        )
        .await
        .unwrap();

    match store.get_item_payload(on_disk.item.id).await.unwrap() {
        MediaSource::LocalFile { path } => assert_eq!(path, file.path()),
        other => panic!("expected file payload, got {:?}", other),
    }

    let err = store.get_item_payload(gone.item.id).await.unwrap_err();
    assert!(err.is_payload_missing());

    match store.get_item_payload(bytes.item.id).await.unwrap() {
        MediaSource::MemoryBuffer { data } => assert_eq!(&data[..], b"bytes of embedded.mp3"),
        other => panic!("expected embedded payload, got {:?}", other),
    }

    let listed = store.list_ungrouped_items().await.unwrap();
    assert_eq!(listed.len(), 3);
    assert!(matches!(listed[0].payload, PayloadRef::File { .. }));
    assert_eq!(listed[2].payload, PayloadRef::Embedded);
}

#[tokio::test]
async fn test_item_positions_and_deletion() {
    let store = store().await;
    let batch = embedded(&["a.mp3", "b.mp3"]);
    store.insert_items(&Context::Ungrouped, &batch).await.unwrap();

    store
        .update_item_position(Some(Context::Ungrouped), batch[0].item.id, 60.0)
        .await
        .unwrap();
    // Scoped to the wrong context: ignored.
    store
        .update_item_position(
            Some(Context::Collection(CollectionId::new())),
            batch[1].item.id,
            99.0,
        )
        .await
        .unwrap();

    let items = store.list_ungrouped_items().await.unwrap();
    assert_eq!(items[0].position_seconds, 60.0);
    assert_eq!(items[1].position_seconds, 0.0);

    assert!(store.delete_item(batch[0].item.id).await.unwrap());
    assert!(!store.delete_item(batch[0].item.id).await.unwrap());
    let items = store.list_ungrouped_items().await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].name, "b.mp3");
}

#[tokio::test]
async fn test_session_settings_round_trip() {
    let store = store().await;
    assert_eq!(
        store.get_session_settings().await.unwrap(),
        SessionSettings::default()
    );

    let id = CollectionId::new();
    let settings = SessionSettings::new(Some(Context::Collection(id)), Some(3), 42.5);
    store.set_session_settings(&settings).await.unwrap();
    assert_eq!(store.get_session_settings().await.unwrap(), settings);

    let cleared = SessionSettings::new(None, None, 0.0);
    store.set_session_settings(&cleared).await.unwrap();
    assert_eq!(store.get_session_settings().await.unwrap(), cleared);

    let ungrouped = SessionSettings::new(Some(Context::Ungrouped), Some(0), 1.0);
    store.set_session_settings(&ungrouped).await.unwrap();
    assert_eq!(store.get_session_settings().await.unwrap(), ungrouped);
}

#[tokio::test]
async fn test_state_survives_reopening_database_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("library.db");

    let collection = Collection::new("Dune", None);
    {
        let pool = create_pool(DatabaseConfig::new(&path)).await.unwrap();
        let store = SqliteLibraryStore::new(pool.clone());
        store.create_or_replace_collection(&collection).await.unwrap();
        store
            .insert_items(&Context::Collection(collection.id), &embedded(&["01.mp3"]))
            .await
            .unwrap();
        store
            .set_session_settings(&SessionSettings::new(
                Some(Context::Collection(collection.id)),
                Some(0),
                12.0,
            ))
            .await
            .unwrap();
        pool.close().await;
    }

    let store = SqliteLibraryStore::new(create_pool(DatabaseConfig::new(&path)).await.unwrap());
    let collections = store.list_collections().await.unwrap();
    assert_eq!(collections.len(), 1);
    assert_eq!(collections[0].items.len(), 1);
    let settings = store.get_session_settings().await.unwrap();
    assert_eq!(settings.active_context, Some(Context::Collection(collection.id)));
    assert_eq!(settings.position_seconds, 12.0);
}
