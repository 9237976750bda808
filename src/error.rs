//! Error types for the sync layer.

use thiserror::Error;

/// Main error type for backend and event-handling operations.
///
/// None of these reach a collection's consumer: the background worker logs
/// them and degrades to "no change".
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Fetch failed for {resource}: {message}")]
    Fetch { resource: String, message: String },

    #[error("Subscribe failed for {resource}: {message}")]
    Subscribe { resource: String, message: String },

    #[error("Record is missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Deserialization(e.to_string())
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
