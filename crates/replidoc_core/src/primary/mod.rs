//! Primary: the durable, authoritative store.
//!
//! All mutation goes through the single atomic [`Primary::apply_changeset`]
//! entry point, serialized by an internal single-writer lock so that
//! `apply_changeset` and `compact` never interleave.
//!
//! Policy for stale changesets: a non-empty changeset whose `base_rev`
//! is behind the primary's revision is declined with
//! [`ChangesetStatus::Outdated`] and nothing is applied; the replica
//! reconciles against the returned delta (raising conflicts where its
//! overlay collides) and syncs again.

pub(crate) mod storage;
mod transaction;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};

pub use storage::PrimaryStorage;
use transaction::FsTransaction;

use crate::attachment::{Attachment, AttachmentId};
use crate::changeset::{
    AttachmentPayloads, Changeset, ChangesetResult, ChangesetStatus, SCHEMA_VERSION,
};
use crate::document::{Document, DocumentId, Revision};
use crate::error::{ReplidocError, Result};

/// The authoritative store all replicas reconcile against.
#[derive(Debug)]
pub struct Primary {
    storage: Mutex<PrimaryStorage>,
}

impl Primary {
    /// Open (or initialize) a primary rooted at `root`.
    pub fn open(root: &Path) -> Result<Self> {
        Ok(Primary {
            storage: Mutex::new(PrimaryStorage::open(root)?),
        })
    }

    /// The current storage revision
    pub fn current_rev(&self) -> Revision {
        self.storage().revision()
    }

    /// Latest version of a document
    pub fn get_document(&self, id: &DocumentId) -> Option<Document> {
        self.storage().document(id).cloned()
    }

    /// Latest version of every document
    pub fn get_documents(&self) -> Vec<Document> {
        self.storage().documents().cloned().collect()
    }

    /// Attachment metadata
    pub fn get_attachment(&self, id: &AttachmentId) -> Option<Attachment> {
        self.storage().attachment(id).cloned()
    }

    /// Metadata of every attachment
    pub fn get_attachments(&self) -> Vec<Attachment> {
        self.storage().attachments().cloned().collect()
    }

    /// Path to an attachment payload, if it still exists
    pub fn get_attachment_payload_path(&self, id: &AttachmentId) -> Option<PathBuf> {
        self.storage().attachment_payload_path(id)
    }

    /// Apply a changeset and return the delta since its base revision.
    ///
    /// - `base_rev` ahead of the store is a protocol violation (a bug
    ///   on the replica side, fatal).
    /// - An empty changeset never bumps the revision; the delta is
    ///   returned with [`ChangesetStatus::Accepted`].
    /// - A stale non-empty changeset is declined (`Outdated`), see the
    ///   module docs.
    /// - Otherwise every incoming entity is stored at `current_rev + 1`
    ///   and the revision advances exactly once, atomically with the
    ///   writes.
    pub fn apply_changeset(
        &self,
        changeset: Changeset,
        payloads: &AttachmentPayloads,
    ) -> Result<ChangesetResult> {
        let mut storage = self.storage();

        if changeset.schema_version != SCHEMA_VERSION {
            return Err(ReplidocError::Validation(format!(
                "unsupported changeset schema version {} (expected {SCHEMA_VERSION})",
                changeset.schema_version
            )));
        }

        let current_rev = storage.revision();
        let base_rev = changeset.base_rev;

        if base_rev > current_rev {
            return Err(ReplidocError::ProtocolViolation(format!(
                "replica base rev {base_rev} is ahead of primary rev {current_rev}"
            )));
        }

        if changeset.is_empty() {
            debug!("empty changeset at base rev {base_rev}, skipping rev bump");
            return Ok(delta(&storage, base_rev, ChangesetStatus::Accepted));
        }

        if base_rev < current_rev {
            debug!("declining stale changeset: base rev {base_rev} behind {current_rev}");
            return Ok(delta(&storage, base_rev, ChangesetStatus::Outdated));
        }

        validate_changeset(&storage, &changeset, payloads)?;

        let new_rev = current_rev.next();
        let document_count = changeset.documents.len();
        let attachment_count = changeset.attachments.len();

        let mut tx = FsTransaction::new();
        let staged = stage_changeset(&storage, &mut tx, changeset, payloads, new_rev);
        let (documents, attachments) = match staged {
            Ok(staged) => staged,
            Err(err) => {
                tx.rollback();
                return Err(err);
            }
        };

        storage.commit(tx, new_rev, documents, attachments)?;

        info!(
            "applied changeset at rev {new_rev}: {document_count} documents, {attachment_count} attachments"
        );

        Ok(delta(&storage, base_rev, ChangesetStatus::Accepted))
    }

    /// Reclaim payloads of attachments referenced by no non-deleted
    /// document. Each reclaimed attachment gets a tombstone metadata
    /// write; the revision bumps once for the whole pass. Document data
    /// is never touched. Returns the number of reclaimed attachments.
    pub fn compact(&self) -> Result<usize> {
        let mut storage = self.storage();

        let referenced: HashSet<AttachmentId> = storage
            .documents()
            .filter(|document| !document.deleted)
            .flat_map(|document| document.attachment_refs.iter().cloned())
            .collect();

        let unused: Vec<Attachment> = storage
            .attachments()
            .filter(|attachment| !attachment.deleted && !referenced.contains(&attachment.id))
            .cloned()
            .collect();

        if unused.is_empty() {
            return Ok(0);
        }

        let new_rev = storage.revision().next();
        let count = unused.len();

        for mut attachment in unused {
            warn!("reclaiming unused attachment {}", attachment.id);
            attachment.rev = new_rev;
            attachment.deleted = true;
            storage.tombstone_attachment(attachment)?;
        }

        storage.set_revision(new_rev)?;
        info!("compacted {count} attachments at rev {new_rev}");

        Ok(count)
    }

    fn storage(&self) -> MutexGuard<'_, PrimaryStorage> {
        // the single-writer queue
        self.storage.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn delta(storage: &PrimaryStorage, base_rev: Revision, status: ChangesetStatus) -> ChangesetResult {
    let mut documents: Vec<Document> = storage
        .documents()
        .filter(|document| document.rev > base_rev)
        .cloned()
        .collect();
    documents.sort_by(|a, b| a.id.cmp(&b.id));

    let mut attachments: Vec<Attachment> = storage
        .attachments()
        .filter(|attachment| attachment.rev > base_rev)
        .cloned()
        .collect();
    attachments.sort_by(|a, b| a.id.cmp(&b.id));

    ChangesetResult {
        status,
        base_rev,
        current_rev: storage.revision(),
        documents,
        attachments,
    }
}

fn validate_changeset(
    storage: &PrimaryStorage,
    changeset: &Changeset,
    payloads: &AttachmentPayloads,
) -> Result<()> {
    let incoming: HashSet<&AttachmentId> = changeset
        .attachments
        .iter()
        .map(|attachment| &attachment.id)
        .collect();

    for attachment in &changeset.attachments {
        if storage.attachment(&attachment.id).is_some() {
            return Err(ReplidocError::Validation(format!(
                "attachment {} already exists",
                attachment.id
            )));
        }
        if !payloads.contains_key(&attachment.id) {
            return Err(ReplidocError::Validation(format!(
                "missing payload for new attachment {}",
                attachment.id
            )));
        }
    }

    for document in &changeset.documents {
        if let Some(existing) = storage.document(&document.id) {
            if existing.type_name() != document.type_name() {
                return Err(ReplidocError::Validation(format!(
                    "document {} can't change type from {} to {}",
                    document.id,
                    existing.type_name(),
                    document.type_name()
                )));
            }
        }

        if !document.deleted {
            for id in &document.attachment_refs {
                if storage.attachment(id).is_none() && !incoming.contains(id) {
                    return Err(ReplidocError::Validation(format!(
                        "document {} references missing attachment {id}",
                        document.id
                    )));
                }
            }
        }
    }

    Ok(())
}

fn stage_changeset(
    storage: &PrimaryStorage,
    tx: &mut FsTransaction,
    changeset: Changeset,
    payloads: &AttachmentPayloads,
    new_rev: Revision,
) -> Result<(Vec<Document>, Vec<Attachment>)> {
    let mut documents = Vec::with_capacity(changeset.documents.len());
    for mut document in changeset.documents {
        document.rev = new_rev;
        storage.stage_document(tx, &document)?;
        documents.push(document);
    }

    let mut attachments = Vec::with_capacity(changeset.attachments.len());
    for mut attachment in changeset.attachments {
        let Some(payload) = payloads.get(&attachment.id) else {
            // checked in validate_changeset
            return Err(ReplidocError::Validation(format!(
                "missing payload for new attachment {}",
                attachment.id
            )));
        };

        attachment.rev = new_rev;
        attachment.size = payload.len() as u64;
        storage.stage_new_attachment(tx, &attachment, payload)?;
        attachments.push(attachment);
    }

    Ok((documents, attachments))
}
