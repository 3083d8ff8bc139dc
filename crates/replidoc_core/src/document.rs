//! Documents and their typed properties.
//!
//! A document's `rev` is the *global* storage revision it was last
//! written at, not a per-document counter. Ids are generated on the
//! replica and never change; neither does the props variant of an id.

use std::fmt;

use chrono::{DateTime, Utc};
use rand::{Rng, distributions::Alphanumeric};
use serde::{Deserialize, Serialize};

use crate::attachment::AttachmentId;

/// Length of generated document/attachment ids
pub const ID_LENGTH: usize = 16;

/// Global storage revision. Strictly increasing, shared across
/// documents and attachments; `0` means empty storage.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Revision(pub u64);

impl Revision {
    /// The empty-storage revision
    pub const ZERO: Revision = Revision(0);

    /// The next revision
    #[must_use]
    pub fn next(self) -> Revision {
        Revision(self.0 + 1)
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Globally unique, immutable document id
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    /// Wrap an existing id
    pub fn new(id: impl Into<String>) -> Self {
        DocumentId(id.into())
    }

    /// The id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(id: &str) -> Self {
        DocumentId(id.to_string())
    }
}

/// Generate a random lowercase alphanumeric id.
///
/// Callers must probe existing documents and attachments for
/// collisions; ids are client-generated, never server-assigned.
pub fn generate_random_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ID_LENGTH)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}

/// Typed document properties.
///
/// A closed set: every consumption site matches exhaustively, so adding
/// a variant is a compile-time-checked change. The serde tag doubles as
/// the document type on the wire and on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DocumentProps {
    /// Free-form note
    Note {
        /// Display name
        name: String,
        /// Markup body; refs are derived from it
        markup: String,
    },
    /// Actionable task
    Task {
        /// Display name
        name: String,
        /// Markup body; refs are derived from it
        markup: String,
        /// Whether the task is completed
        done: bool,
    },
}

impl DocumentProps {
    /// The wire name of this variant
    pub fn type_name(&self) -> &'static str {
        match self {
            DocumentProps::Note { .. } => "note",
            DocumentProps::Task { .. } => "task",
        }
    }

    /// Display name
    pub fn name(&self) -> &str {
        match self {
            DocumentProps::Note { name, .. } => name,
            DocumentProps::Task { name, .. } => name,
        }
    }

    /// The markup body that references are derived from
    pub fn markup(&self) -> &str {
        match self {
            DocumentProps::Note { markup, .. } => markup,
            DocumentProps::Task { markup, .. } => markup,
        }
    }
}

/// A single document version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Immutable, globally unique id
    pub id: DocumentId,
    /// Global storage revision this version was written at
    pub rev: Revision,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp
    pub updated_at: DateTime<Utc>,
    /// Referenced document ids, derived from the markup
    #[serde(default)]
    pub refs: Vec<DocumentId>,
    /// Referenced attachment ids, derived from the markup
    #[serde(default)]
    pub attachment_refs: Vec<AttachmentId>,
    /// Tombstone flag; deleted documents are retained for sync
    /// correctness but excluded from normal reads
    #[serde(default)]
    pub deleted: bool,
    /// Typed properties
    #[serde(flatten)]
    pub props: DocumentProps,
}

impl Document {
    /// Create a fresh document.
    ///
    /// `rev` is the replica's current base revision, a placeholder
    /// until the primary accepts the document and assigns a real one.
    pub fn new(id: DocumentId, rev: Revision, props: DocumentProps) -> Self {
        let now = Utc::now();
        Document {
            id,
            rev,
            created_at: now,
            updated_at: now,
            refs: Vec::new(),
            attachment_refs: Vec::new(),
            deleted: false,
            props,
        }
    }

    /// The wire name of the props variant
    pub fn type_name(&self) -> &'static str {
        self.props.type_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_ids_are_lowercase_alphanumeric() {
        let id = generate_random_id();
        assert_eq!(id.len(), ID_LENGTH);
        assert!(id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn props_variant_is_the_wire_type() {
        let doc = Document::new(
            DocumentId::from("doc1"),
            Revision::ZERO,
            DocumentProps::Note {
                name: "a note".to_string(),
                markup: String::new(),
            },
        );

        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["type"], "note");
        assert_eq!(json["id"], "doc1");
        assert_eq!(json["rev"], 0);

        let parsed: Document = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.type_name(), "note");
        assert_eq!(parsed, doc);
    }

    #[test]
    fn revision_is_ordered() {
        assert!(Revision(2) > Revision(1));
        assert_eq!(Revision::ZERO.next(), Revision(1));
    }
}
