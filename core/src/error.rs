//! Error types for the store engine and its persistence layer.
//!
//! Reads of missing paths, expired persisted data and undo/redo on an empty
//! stack are not errors and never surface here.

use std::path::PathBuf;

use thiserror::Error;

/// Boxed error produced by caller-supplied hooks (migrations, codecs).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

// ---------------------------------------------------------------------------
// StorageError
// ---------------------------------------------------------------------------

/// Failure reported by a `StorageAdapter`.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("storage quota exceeded: {0}")]
    QuotaExceeded(String),
}

// ---------------------------------------------------------------------------
// StoreError
// ---------------------------------------------------------------------------

/// Errors surfaced by store construction, persistence and configuration.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("migration from version {from} to {to} failed: {source}")]
    Migration {
        from: u32,
        to: u32,
        #[source]
        source: BoxError,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Codec(e.to_string())
    }
}

impl From<serde_yaml::Error> for StoreError {
    fn from(e: serde_yaml::Error) -> Self {
        StoreError::Codec(e.to_string())
    }
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;
