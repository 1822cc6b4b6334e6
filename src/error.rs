//! Error types for runlog
//!
//! Every failure is surfaced synchronously to the caller; nothing is retried and
//! no collection is partially modified when an operation fails.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// runlog error types
#[derive(Error, Debug)]
pub enum Error {
    /// Query string is malformed (lexical or grammatical failure)
    #[error("Syntax error in query: {0}")]
    Syntax(String),

    /// Key is outside the queryable namespace or absent from a collection's columns
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// A map's output shape contradicts the requested application mode
    #[error("Invalid map: {0}")]
    InvalidMap(String),

    /// Artifact type has no registered codec, or the artifact registry is unreadable
    #[error("Invalid artifact: {0}")]
    InvalidArtifact(String),

    /// A lazily loaded field is registered but has no data on disk
    #[error("Missing field: {0}")]
    MissingField(String),

    /// Destination directory cannot be created or written
    #[error("Permission denied for {}\nPlease select a different destination directory.", path.display())]
    Permission {
        /// Offending directory
        path: PathBuf,
    },

    /// Unknown result format requested from the reader
    #[error("Invalid format string: {0}. Valid formats are: [\"records\", \"table\"]")]
    InvalidFormat(String),

    /// Snapshot or table persistence failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error (snapshot, metric logs, JSON artifacts)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error (run metadata, key registries)
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Generic error
    #[error("{0}")]
    Other(String),
}
