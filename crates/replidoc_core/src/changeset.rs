//! Changeset wire contract.
//!
//! One round trip: the replica proposes its overlay as a [`Changeset`]
//! (plus a payload side channel for new attachments) and receives a
//! [`ChangesetResult`] carrying everything newer than its base
//! revision. The protocol is not idempotent-safe against duplicate
//! delivery; the lock manager keeps at most one sync in flight.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::attachment::{Attachment, AttachmentId};
use crate::document::{Document, Revision};

/// Wire schema version. A mismatch rejects the changeset; there is no
/// migration beyond this single check.
pub const SCHEMA_VERSION: u32 = 1;

/// Binary payloads for new attachments, keyed by attachment id.
pub type AttachmentPayloads = HashMap<AttachmentId, Vec<u8>>;

/// The batch of new/changed documents and attachments a replica
/// proposes to the primary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Changeset {
    /// The revision the replica last fully reconciled with
    pub base_rev: Revision,
    /// Wire schema version, must equal [`SCHEMA_VERSION`]
    pub schema_version: u32,
    /// New or changed documents
    pub documents: Vec<Document>,
    /// New attachments (metadata; payloads travel out of band)
    pub attachments: Vec<Attachment>,
}

impl Changeset {
    /// An empty changeset at `base_rev`
    pub fn empty(base_rev: Revision) -> Self {
        Changeset {
            base_rev,
            schema_version: SCHEMA_VERSION,
            documents: Vec::new(),
            attachments: Vec::new(),
        }
    }

    /// True if the changeset proposes nothing
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty() && self.attachments.is_empty()
    }
}

/// Whether the primary applied the proposed changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangesetStatus {
    /// Changes applied (or nothing to apply)
    Accepted,
    /// The replica's base revision is stale; nothing was applied.
    /// The replica reconciles against the returned delta and retries.
    Outdated,
}

/// The primary's answer: status plus every document/attachment whose
/// stored `rev` is strictly greater than `base_rev`, no gaps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangesetResult {
    /// Whether the proposed changes were applied
    pub status: ChangesetStatus,
    /// Echo of the changeset's base revision
    pub base_rev: Revision,
    /// The primary's revision after the call
    pub current_rev: Revision,
    /// All documents with `rev > base_rev`
    pub documents: Vec<Document>,
    /// All attachments with `rev > base_rev`
    pub attachments: Vec<Attachment>,
}

impl ChangesetResult {
    /// True if the proposed changes were applied
    pub fn is_accepted(&self) -> bool {
        self.status == ChangesetStatus::Accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DocumentId, DocumentProps};

    #[test]
    fn empty_changeset() {
        let changeset = Changeset::empty(Revision(5));
        assert!(changeset.is_empty());
        assert_eq!(changeset.base_rev, Revision(5));
        assert_eq!(changeset.schema_version, SCHEMA_VERSION);
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&ChangesetStatus::Outdated).unwrap();
        assert_eq!(json, "\"outdated\"");
    }

    #[test]
    fn changeset_with_documents_is_not_empty() {
        let mut changeset = Changeset::empty(Revision::ZERO);
        changeset.documents.push(Document::new(
            DocumentId::from("doc1"),
            Revision::ZERO,
            DocumentProps::Note {
                name: "n".to_string(),
                markup: String::new(),
            },
        ));
        assert!(!changeset.is_empty());
    }
}
