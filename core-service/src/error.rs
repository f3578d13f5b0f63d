use core_library::LibraryError;
use core_playback::PlaybackError;
use core_runtime::{Notification, NotificationKind};
use core_sync::SyncError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Core initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Configuration error: {0}")]
    Config(#[from] core_runtime::Error),

    #[error("Library error: {0}")]
    Library(#[from] LibraryError),

    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),
}

pub type Result<T> = std::result::Result<T, ServiceError>;

impl From<&ServiceError> for Notification {
    fn from(err: &ServiceError) -> Self {
        let kind = match err {
            ServiceError::InitializationFailed(_) | ServiceError::Sync(_) => {
                NotificationKind::StorageUnavailable
            }
            ServiceError::Config(_) => NotificationKind::InvalidRequest,
            ServiceError::Library(e) => match e {
                LibraryError::PayloadMissing { .. } => NotificationKind::PayloadMissing,
                LibraryError::NotFound { .. } | LibraryError::InvalidInput { .. } => {
                    NotificationKind::InvalidRequest
                }
                _ => NotificationKind::StorageUnavailable,
            },
            ServiceError::Playback(e) => match e {
                PlaybackError::PayloadMissing { .. } => NotificationKind::PayloadMissing,
                PlaybackError::StorageUnavailable(_) => NotificationKind::StorageUnavailable,
                PlaybackError::ItemNotFound(_)
                | PlaybackError::InvalidIndex { .. }
                | PlaybackError::UnknownContext(_)
                | PlaybackError::NotReady => NotificationKind::InvalidRequest,
                PlaybackError::LoadTimedOut(_) | PlaybackError::Device(_) => {
                    NotificationKind::PlaybackFailed
                }
            },
        };
        Notification::new(kind, err.to_string())
    }
}
