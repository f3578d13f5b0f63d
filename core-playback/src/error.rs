//! # Playback Error Types

use bridge_traits::error::BridgeError;
use bridge_traits::playback::LoadToken;
use core_library::error::LibraryError;
use thiserror::Error;

/// Errors raised by the session and resource layers.
#[derive(Error, Debug)]
pub enum PlaybackError {
    // ========================================================================
    // Source Errors
    // ========================================================================
    /// The item is listed but its payload cannot be produced.
    #[error("Payload missing for item {item_id}: {reason}")]
    PayloadMissing { item_id: String, reason: String },

    /// The item does not exist in the library or the store.
    #[error("Item not found: {0}")]
    ItemNotFound(String),

    /// The store could not be reached or failed mid-operation.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    // ========================================================================
    // Selection Errors
    // ========================================================================
    #[error("Index {index} is out of range for a context with {len} items")]
    InvalidIndex { index: usize, len: usize },

    #[error("Unknown context: {0}")]
    UnknownContext(String),

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// The operation needs a loaded item.
    #[error("No item is ready")]
    NotReady,

    /// The device never reported the load as ready.
    #[error("Load {0} timed out")]
    LoadTimedOut(LoadToken),

    #[error("Media device error: {0}")]
    Device(#[from] BridgeError),
}

impl PlaybackError {
    /// Errors that leave the session empty but are expected in normal use.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, PlaybackError::InvalidIndex { .. } | PlaybackError::UnknownContext(_))
    }
}

impl From<LibraryError> for PlaybackError {
    fn from(err: LibraryError) -> Self {
        match err {
            LibraryError::PayloadMissing { item_id, reason } => {
                PlaybackError::PayloadMissing { item_id, reason }
            }
            LibraryError::NotFound { entity_type, id } if entity_type == "Item" => {
                PlaybackError::ItemNotFound(id)
            }
            other => PlaybackError::StorageUnavailable(other.to_string()),
        }
    }
}

/// Result type for playback operations.
pub type Result<T> = std::result::Result<T, PlaybackError>;
