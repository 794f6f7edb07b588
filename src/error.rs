//! Error types for mnemo-core.

use thiserror::Error;

/// Result type alias using mnemo-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during memory operations.
///
/// Not-found and scope mismatches are deliberately absent: the produced API
/// reports those as negative results (`Option::None` / `false`), never as
/// errors, so a caller cannot distinguish "does not exist" from "not yours".
#[derive(Error, Debug)]
pub enum Error {
    /// Request payload failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Record store (authoritative backend) failure
    #[error("Record store error: {0}")]
    RecordStore(String),

    /// Search index (derived backend) failure
    #[error("Search index error: {message}")]
    SearchIndex {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Rate-governor counter backend failure
    #[error("Counter backend error: {0}")]
    Counter(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a record store error.
    pub fn record_store(message: impl Into<String>) -> Self {
        Self::RecordStore(message.into())
    }

    /// Create a search index error.
    pub fn search_index(message: impl Into<String>) -> Self {
        Self::SearchIndex {
            message: message.into(),
            source: None,
        }
    }

    /// Create a search index error with source.
    pub fn search_index_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::SearchIndex {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a counter backend error.
    pub fn counter(message: impl Into<String>) -> Self {
        Self::Counter(message.into())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Self::RecordStore(e.to_string())
    }
}
