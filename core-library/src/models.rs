//! Domain models for the audio library
//!
//! Collections own ordered items; ungrouped items live outside any
//! collection. Both are addressed through a [`Context`].

use bridge_traits::playback::MediaSource;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

// =============================================================================
// ID Types
// =============================================================================

/// Unique identifier for a collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionId(pub Uuid);

impl CollectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for CollectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an item, global across collections and the ungrouped set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemId(pub Uuid);

impl ItemId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Addressing
// =============================================================================

/// The sequence an index refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Context {
    Collection(CollectionId),
    Ungrouped,
}

impl Context {
    pub fn collection_id(&self) -> Option<CollectionId> {
        match self {
            Context::Collection(id) => Some(*id),
            Context::Ungrouped => None,
        }
    }

    pub fn is_ungrouped(&self) -> bool {
        matches!(self, Context::Ungrouped)
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Context::Collection(id) => write!(f, "{}", id),
            Context::Ungrouped => f.write_str("ungrouped"),
        }
    }
}

// =============================================================================
// Domain Models
// =============================================================================

/// Where an item's bytes live. Resolved lazily through the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PayloadRef {
    /// Bytes are held by the store itself.
    Embedded,
    /// The store indexes a file on disk.
    File { path: PathBuf },
}

impl From<&MediaSource> for PayloadRef {
    fn from(source: &MediaSource) -> Self {
        match source {
            MediaSource::LocalFile { path } => PayloadRef::File { path: path.clone() },
            MediaSource::MemoryBuffer { .. } => PayloadRef::Embedded,
        }
    }
}

/// One playable unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub name: String,
    pub size_bytes: u64,
    /// Last known playback position in seconds.
    pub position_seconds: f64,
    pub payload: PayloadRef,
}

impl Item {
    pub fn new(name: impl Into<String>, size_bytes: u64, payload: PayloadRef) -> Self {
        Self {
            id: ItemId::new(),
            name: name.into(),
            size_bytes,
            position_seconds: 0.0,
            payload,
        }
    }

    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            name: self.name.clone(),
            size_bytes: self.size_bytes,
        }
    }
}

/// Named, ordered group of items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub id: CollectionId,
    pub title: String,
    pub cover_ref: Option<String>,
    pub items: Vec<Item>,
    /// Resume hint. `None` means nothing was played yet. May be stale.
    pub last_played_index: Option<usize>,
}

impl Collection {
    pub fn new(title: impl Into<String>, cover_ref: Option<String>) -> Self {
        Self {
            id: CollectionId::new(),
            title: title.into(),
            cover_ref,
            items: Vec::new(),
            last_played_index: None,
        }
    }

    /// `last_played_index` if it still points at an item.
    pub fn valid_last_played_index(&self) -> Option<usize> {
        self.last_played_index.filter(|&idx| idx < self.items.len())
    }

    /// Index to select when switching to this collection: the valid resume
    /// hint, else the first item, else nothing.
    pub fn resume_index(&self) -> Option<usize> {
        self.valid_last_played_index()
            .or_else(|| (!self.items.is_empty()).then_some(0))
    }
}

/// Identity used to detect duplicate uploads within one context.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub name: String,
    pub size_bytes: u64,
}

/// Upload descriptor supplied by the host.
#[derive(Debug, Clone)]
pub struct NewItem {
    pub name: String,
    pub size_bytes: u64,
    pub source: MediaSource,
}

impl NewItem {
    /// A file on disk; the host reports its size.
    pub fn from_file(name: impl Into<String>, path: impl Into<PathBuf>, size_bytes: u64) -> Self {
        Self {
            name: name.into(),
            size_bytes,
            source: MediaSource::LocalFile { path: path.into() },
        }
    }

    /// In-memory bytes; the size is the buffer length.
    pub fn from_bytes(name: impl Into<String>, data: impl Into<bytes::Bytes>) -> Self {
        let data = data.into();
        Self {
            name: name.into(),
            size_bytes: data.len() as u64,
            source: MediaSource::MemoryBuffer { data },
        }
    }

    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            name: self.name.clone(),
            size_bytes: self.size_bytes,
        }
    }
}

/// An accepted upload: the item record plus the payload to store with it.
#[derive(Debug, Clone)]
pub struct ItemUpload {
    pub item: Item,
    pub source: MediaSource,
}

impl From<NewItem> for ItemUpload {
    fn from(new_item: NewItem) -> Self {
        let payload = PayloadRef::from(&new_item.source);
        Self {
            item: Item::new(new_item.name, new_item.size_bytes, payload),
            source: new_item.source,
        }
    }
}

/// Persisted selection and position triple.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionSettings {
    pub active_context: Option<Context>,
    pub active_index: Option<usize>,
    pub position_seconds: f64,
}

impl SessionSettings {
    pub fn new(active_context: Option<Context>, active_index: Option<usize>, position_seconds: f64) -> Self {
        Self {
            active_context,
            active_index,
            position_seconds: sanitize_position(position_seconds),
        }
    }
}

/// Clamp a position to a finite, non-negative number of seconds.
pub fn sanitize_position(seconds: f64) -> f64 {
    if seconds.is_finite() && seconds > 0.0 {
        seconds
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resume_index_clamps_stale_hint() {
        let mut collection = Collection::new("Dune", None);
        assert_eq!(collection.resume_index(), None);

        collection
            .items
            .push(Item::new("01.mp3", 10, PayloadRef::Embedded));
        collection
            .items
            .push(Item::new("02.mp3", 20, PayloadRef::Embedded));
        assert_eq!(collection.resume_index(), Some(0));

        collection.last_played_index = Some(1);
        assert_eq!(collection.resume_index(), Some(1));

        collection.last_played_index = Some(7);
        assert_eq!(collection.valid_last_played_index(), None);
        assert_eq!(collection.resume_index(), Some(0));
    }

    #[test]
    fn test_upload_maps_source_to_payload_ref() {
        let from_file: ItemUpload = NewItem::from_file("a.mp3", "/books/a.mp3", 42).into();
        assert_eq!(
            from_file.item.payload,
            PayloadRef::File {
                path: PathBuf::from("/books/a.mp3")
            }
        );
        assert_eq!(from_file.item.size_bytes, 42);

        let from_bytes: ItemUpload = NewItem::from_bytes("b.mp3", vec![0u8; 5]).into();
        assert_eq!(from_bytes.item.payload, PayloadRef::Embedded);
        assert_eq!(from_bytes.item.size_bytes, 5);
        assert_eq!(from_bytes.item.position_seconds, 0.0);
    }

    #[test]
    fn test_context_serialization() {
        let id = CollectionId::new();
        let json = serde_json::to_string(&Context::Collection(id)).unwrap();
        assert!(json.contains("\"kind\":\"collection\""));
        let back: Context = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Context::Collection(id));

        let ungrouped = serde_json::to_string(&Context::Ungrouped).unwrap();
        assert_eq!(ungrouped, r#"{"kind":"ungrouped"}"#);
        assert_eq!(Context::Ungrouped.to_string(), "ungrouped");
    }

    #[test]
    fn test_sanitize_position() {
        assert_eq!(sanitize_position(-3.0), 0.0);
        assert_eq!(sanitize_position(f64::NAN), 0.0);
        assert_eq!(sanitize_position(f64::INFINITY), 0.0);
        assert_eq!(sanitize_position(12.5), 12.5);
        assert_eq!(SessionSettings::new(None, None, -1.0).position_seconds, 0.0);
    }

    #[test]
    fn test_ids_round_trip_through_strings() {
        let id = ItemId::new();
        assert_eq!(ItemId::from_string(&id.to_string()).unwrap(), id);
        assert!(CollectionId::from_string("not-a-uuid").is_err());
    }
}
