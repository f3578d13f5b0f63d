use core_library::error::LibraryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Storage unavailable during {operation}: {source}")]
    Storage {
        operation: &'static str,
        #[source]
        source: LibraryError,
    },
}

impl SyncError {
    pub(crate) fn storage(operation: &'static str) -> impl FnOnce(LibraryError) -> SyncError {
        move |source| SyncError::Storage { operation, source }
    }

    /// The store operation that failed.
    pub fn operation(&self) -> &'static str {
        match self {
            SyncError::Storage { operation, .. } => operation,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
