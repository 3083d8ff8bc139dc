//! Attachment metadata.
//!
//! The binary payload lives out of band, addressed by id. Metadata and
//! payload have independent existence: after compaction the metadata
//! remains (as a tombstone) while the payload is gone.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::document::Revision;

/// Globally unique, immutable attachment id
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttachmentId(String);

impl AttachmentId {
    /// Wrap an existing id
    pub fn new(id: impl Into<String>) -> Self {
        AttachmentId(id.into())
    }

    /// The id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AttachmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AttachmentId {
    fn from(id: &str) -> Self {
        AttachmentId(id.to_string())
    }
}

/// Attachment metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Immutable, globally unique id
    pub id: AttachmentId,
    /// Global storage revision this metadata was written at
    pub rev: Revision,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// MIME type of the payload
    pub mime_type: String,
    /// Payload size in bytes
    pub size: u64,
    /// Tombstone flag; set by compaction once the payload is reclaimed
    #[serde(default)]
    pub deleted: bool,
}

impl Attachment {
    /// Create fresh attachment metadata.
    ///
    /// `rev` is the replica's current base revision, a placeholder
    /// until the primary accepts the attachment and assigns a real one.
    pub fn new(id: AttachmentId, rev: Revision, mime_type: impl Into<String>, size: u64) -> Self {
        Attachment {
            id,
            rev,
            created_at: Utc::now(),
            mime_type: mime_type.into(),
            size,
            deleted: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_roundtrip() {
        let attachment = Attachment::new(AttachmentId::from("att1"), Revision(3), "image/png", 42);
        let json = serde_json::to_string(&attachment).unwrap();
        let parsed: Attachment = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, attachment);
        assert!(!parsed.deleted);
    }
}
