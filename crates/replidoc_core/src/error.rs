use std::path::PathBuf;

use thiserror::Error;

/// Unified error type for replidoc operations
#[derive(Debug, Error)]
pub enum ReplidocError {
    // IO errors
    /// Underlying filesystem failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A specific file could not be read
    #[error("Failed to read file '{path}': {source}")]
    FileRead {
        /// Path that failed to read
        path: PathBuf,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// A specific file could not be written
    #[error("Failed to write file '{path}': {source}")]
    FileWrite {
        /// Path that failed to write
        path: PathBuf,
        /// Underlying IO error
        source: std::io::Error,
    },

    // Serialization errors
    /// Malformed or unserializable JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Protocol errors
    /// The replica sent an impossible base revision. Indicates a bug;
    /// fatal, never retried.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// A single operation was rejected; storage is left intact.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A lock is already held. Callers wait and retry, never force.
    #[error("Lock contention: {0}")]
    Contention(String),

    /// The changeset exchange failed in transit. Sync state resets,
    /// the overlay is untouched, and the next periodic trigger retries.
    #[error("Sync failed: {0}")]
    SyncFailure(String),

    /// Local writes and new syncs are rejected until every pending
    /// merge conflict has been resolved.
    #[error("Merge conflicts are pending resolution")]
    ConflictsPending,

    // Storage errors
    /// The on-disk store was written by an incompatible version
    #[error("Schema version mismatch: storage has {found}, expected {expected}")]
    SchemaVersionMismatch {
        /// Version found in the storage meta record
        found: u32,
        /// Version this build understands
        expected: u32,
    },
}

/// Result type alias for replidoc operations
pub type Result<T> = std::result::Result<T, ReplidocError>;
