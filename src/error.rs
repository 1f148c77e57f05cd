//! Error types shared by the storage layer

use crate::id::IdError;

/// Errors raised by the event store, sorted index and cursor store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid filter field: {0}")]
    InvalidField(String),

    #[error("Invalid event id: {0}")]
    InvalidId(#[from] IdError),

    #[error("Connection lock poisoned")]
    LockPoisoned,
}

pub type StoreResult<T> = Result<T, StoreError>;
