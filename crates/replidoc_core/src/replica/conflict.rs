//! Three-way merge conflicts.
//!
//! A conflict is raised for a document id when a sync response carries
//! a newer remote version of it while the replica still holds an
//! unsynced local edit. The conflict is plain data — base, remote and
//! local snapshots — and resolution is an explicit user decision; there
//! is no automatic merging.

use chrono::Utc;

use crate::document::{Document, DocumentId};
use crate::error::{ReplidocError, Result};

/// A three-way conflict for one document id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentConflict {
    /// The version the replica branched from
    pub base: Document,
    /// The version the primary now holds
    pub remote: Document,
    /// The replica's unsynced edit
    pub local: Document,
}

/// How to resolve a [`DocumentConflict`].
#[derive(Debug, Clone)]
pub enum ConflictResolution {
    /// Keep the local edit, discard the remote version
    UseLocal,
    /// Keep the remote version, discard the local edit
    UseRemote,
    /// A caller-supplied merged snapshot
    Merged(Document),
}

impl DocumentConflict {
    /// The conflicted document id
    pub fn id(&self) -> &DocumentId {
        &self.local.id
    }

    /// Produce the final snapshot for this conflict.
    ///
    /// The result is stamped with `rev = remote.rev` and a fresh
    /// `updated_at`, ready to re-enter the overlay as a normal local
    /// write so the next sync persists the decision.
    pub fn resolve(&self, resolution: ConflictResolution) -> Result<Document> {
        let mut document = match resolution {
            ConflictResolution::UseLocal => self.local.clone(),
            ConflictResolution::UseRemote => self.remote.clone(),
            ConflictResolution::Merged(merged) => {
                if merged.id != self.local.id {
                    return Err(ReplidocError::Validation(format!(
                        "merged snapshot is for document {}, expected {}",
                        merged.id, self.local.id
                    )));
                }
                if merged.type_name() != self.base.type_name() {
                    return Err(ReplidocError::Validation(format!(
                        "merged snapshot changes document {} type from {} to {}",
                        merged.id,
                        self.base.type_name(),
                        merged.type_name()
                    )));
                }
                merged
            }
        };

        document.rev = self.remote.rev;
        document.updated_at = Utc::now();

        Ok(document)
    }
}
