use bridge_traits::error::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Invalid input: {field} - {message}")]
    InvalidInput { field: String, message: String },

    #[error("Payload for item {item_id} is unavailable: {reason}")]
    PayloadMissing { item_id: String, reason: String },

    #[error("Stored record in {table} is invalid: {message}")]
    InvalidRecord { table: String, message: String },

    #[error("Migration failed: {0}")]
    Migration(String),
}

impl LibraryError {
    /// The item exists but its bytes cannot be produced.
    pub fn is_payload_missing(&self) -> bool {
        matches!(self, LibraryError::PayloadMissing { .. })
    }
}

pub type Result<T> = std::result::Result<T, LibraryError>;
