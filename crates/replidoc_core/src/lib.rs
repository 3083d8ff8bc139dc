#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Attachment metadata
pub mod attachment;

/// Changeset wire contract (replica <-> primary)
pub mod changeset;

/// Documents and their typed properties
pub mod document;

/// Error (common error types)
pub mod error;

/// Changeset transports
pub mod exchange;

/// Lock manager (whole-store and per-document locks)
pub mod locks;

/// Primary: the authoritative store
pub mod primary;

/// Markup reference extraction
pub mod refs;

/// Replica: local snapshot + overlay of unsynced edits
pub mod replica;

pub use error::{ReplidocError, Result};
