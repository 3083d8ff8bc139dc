//! Replica: a writable local copy that periodically reconciles with a
//! primary.
//!
//! All local edits land in an overlay on top of the last-synced
//! snapshot. A sync proposes the overlay as a changeset; an accepted
//! sync clears the overlay, a stale one either fast-forwards the
//! snapshot (no collisions) or raises three-way conflicts that must all
//! be resolved before the replica accepts further writes or syncs.

pub mod conflict;
pub mod storage;

use std::collections::{BTreeMap, HashSet};

use chrono::Utc;
use log::{debug, info, warn};

pub use conflict::{ConflictResolution, DocumentConflict};
pub use storage::{FsReplicaStorage, MemoryReplicaStorage, ReplicaStorage};

use crate::attachment::{Attachment, AttachmentId};
use crate::changeset::{AttachmentPayloads, Changeset, ChangesetResult};
use crate::document::{Document, DocumentId, DocumentProps, Revision, generate_random_id};
use crate::error::{ReplidocError, Result};
use crate::exchange::ChangesetExchange;
use crate::locks::{DocumentLockGuard, LockManager};
use crate::refs::{MarkupRefExtractor, RefExtractor};

/// Where the replica stands relative to its primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Ready to edit and sync
    Initial,
    /// A sync raised conflicts; writes and syncs are refused until
    /// every conflict is resolved
    ConflictsPending,
}

/// Outcome of a completed [`Replica::sync`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The overlay was accepted and cleared; the snapshot is current
    Synced,
    /// The base revision was stale but nothing collided; the snapshot
    /// was fast-forwarded and the overlay kept for the next sync
    Outdated,
    /// Conflicts were raised; resolve all of them, then sync again
    Conflicts(usize),
}

/// A declined sync waiting for its conflicts to be resolved. The
/// snapshot upgrade is deferred until the last resolution.
struct PendingMerge {
    result: ChangesetResult,
    conflicts: Vec<DocumentConflict>,
    resolved: Vec<Document>,
}

/// A writable local copy of the collection.
pub struct Replica<S: ReplicaStorage> {
    storage: S,
    extractor: Box<dyn RefExtractor>,
    locks: LockManager,
    pending: Option<PendingMerge>,
}

impl<S: ReplicaStorage> Replica<S> {
    /// Open a replica over `storage` with the default `[[id]]` link
    /// extractor. Runs a compaction pass to drop local attachments
    /// orphaned by an earlier crash.
    pub fn new(storage: S) -> Result<Self> {
        Replica::with_extractor(storage, Box::new(MarkupRefExtractor::new()))
    }

    /// Open a replica with a custom reference extractor.
    pub fn with_extractor(storage: S, extractor: Box<dyn RefExtractor>) -> Result<Self> {
        let mut replica = Replica {
            storage,
            extractor,
            locks: LockManager::new(),
            pending: None,
        };

        let dropped = replica.compact()?;
        if dropped > 0 {
            info!("startup compaction dropped {dropped} local attachments");
        }

        Ok(replica)
    }

    /// The revision of the last fully reconciled snapshot
    pub fn rev(&self) -> Revision {
        self.storage.rev()
    }

    /// The current sync state
    pub fn sync_state(&self) -> SyncState {
        if self.pending.is_some() {
            SyncState::ConflictsPending
        } else {
            SyncState::Initial
        }
    }

    /// Lock a document for interactive editing. While any document lock
    /// is held, [`Replica::sync`] fails with contention.
    pub fn lock_document(&self, id: &DocumentId) -> Result<DocumentLockGuard> {
        self.locks.lock_document(id)
    }

    /// The current version of a document: the overlay shadows the
    /// snapshot, and deleted documents read as absent.
    pub fn document(&self, id: &DocumentId) -> Option<Document> {
        let document = self
            .storage
            .local_document(id)
            .or_else(|| self.storage.synced_document(id))?;
        (!document.deleted).then_some(document)
    }

    /// All live documents, overlay over snapshot, ordered by id.
    pub fn documents(&self) -> Vec<Document> {
        let mut merged: BTreeMap<DocumentId, Document> = BTreeMap::new();
        for document in self.storage.synced_documents() {
            merged.insert(document.id.clone(), document);
        }
        for document in self.storage.local_documents() {
            merged.insert(document.id.clone(), document);
        }

        merged
            .into_values()
            .filter(|document| !document.deleted)
            .collect()
    }

    /// Attachment metadata, overlay over snapshot. Tombstoned
    /// attachments are returned as-is; check `deleted`.
    pub fn attachment(&self, id: &AttachmentId) -> Option<Attachment> {
        self.storage
            .local_attachment(id)
            .or_else(|| self.storage.synced_attachment(id))
    }

    /// The payload of a not-yet-synced attachment. Synced payloads live
    /// on the primary and are fetched over its file endpoint.
    pub fn local_attachment_payload(&self, id: &AttachmentId) -> Option<Vec<u8>> {
        self.storage.local_attachment_payload(id)
    }

    /// Generate an id unused by any known document or attachment.
    pub fn random_id(&self) -> String {
        loop {
            let id = generate_random_id();
            let document_id = DocumentId::new(id.clone());
            let attachment_id = AttachmentId::new(id.clone());

            if self.storage.synced_document(&document_id).is_none()
                && self.storage.local_document(&document_id).is_none()
                && self.storage.synced_attachment(&attachment_id).is_none()
                && self.storage.local_attachment(&attachment_id).is_none()
            {
                return id;
            }
        }
    }

    /// Create a document with a fresh id and write it to the overlay.
    pub fn create_document(&mut self, props: DocumentProps) -> Result<Document> {
        self.ensure_no_pending()?;
        let id = DocumentId::new(self.random_id());
        let document = Document::new(id, self.storage.rev(), props);
        self.save_document(document)
    }

    /// Write a document version to the overlay.
    ///
    /// Recomputes `refs`/`attachment_refs` from the markup and stamps
    /// `updated_at`; the stored snapshot is returned. A document can
    /// never change its props variant.
    pub fn save_document(&mut self, mut document: Document) -> Result<Document> {
        self.ensure_no_pending()?;

        if let Some(existing) = self
            .storage
            .local_document(&document.id)
            .or_else(|| self.storage.synced_document(&document.id))
        {
            if existing.type_name() != document.type_name() {
                return Err(ReplidocError::Validation(format!(
                    "document {} can't change type from {} to {}",
                    document.id,
                    existing.type_name(),
                    document.type_name()
                )));
            }
        }

        let extracted = self.extractor.extract(document.props.markup());
        document.refs = extracted.refs;
        document.attachment_refs = extracted.attachment_refs;
        document.updated_at = Utc::now();

        self.storage.put_local_document(document.clone())?;
        debug!("saved document {}", document.id);

        Ok(document)
    }

    /// Tombstone a document. Its refs are dropped so compaction can
    /// reclaim attachments it alone referenced.
    pub fn delete_document(&mut self, id: &DocumentId) -> Result<()> {
        self.ensure_no_pending()?;

        let Some(mut document) = self
            .storage
            .local_document(id)
            .or_else(|| self.storage.synced_document(id))
        else {
            return Err(ReplidocError::Validation(format!("unknown document {id}")));
        };

        document.deleted = true;
        document.refs.clear();
        document.attachment_refs.clear();
        document.updated_at = Utc::now();

        self.storage.put_local_document(document)?;
        debug!("deleted document {id}");

        Ok(())
    }

    /// Store a new attachment locally and return its id. It is only
    /// sent to the primary once some document's markup embeds it.
    pub fn save_attachment(
        &mut self,
        payload: Vec<u8>,
        mime_type: impl Into<String>,
    ) -> Result<AttachmentId> {
        self.ensure_no_pending()?;

        let id = AttachmentId::new(self.random_id());
        let attachment = Attachment::new(
            id.clone(),
            self.storage.rev(),
            mime_type,
            payload.len() as u64,
        );

        self.storage.put_local_attachment(attachment, payload)?;
        debug!("saved attachment {id}");

        Ok(id)
    }

    /// Snapshot the overlay as a changeset plus its payload side
    /// channel. Local attachments referenced by no overlay document are
    /// abandoned drafts and excluded.
    pub fn changeset(&self) -> (Changeset, AttachmentPayloads) {
        let documents = self.storage.local_documents();

        let referenced: HashSet<AttachmentId> = documents
            .iter()
            .flat_map(|document| document.attachment_refs.iter().cloned())
            .collect();

        let mut attachments = Vec::new();
        let mut payloads = AttachmentPayloads::new();
        for attachment in self.storage.local_attachments() {
            if !referenced.contains(&attachment.id) {
                continue;
            }
            match self.storage.local_attachment_payload(&attachment.id) {
                Some(payload) => {
                    payloads.insert(attachment.id.clone(), payload);
                    attachments.push(attachment);
                }
                None => warn!("local attachment {} has no payload, skipping", attachment.id),
            }
        }

        let changeset = Changeset {
            documents,
            attachments,
            ..Changeset::empty(self.storage.rev())
        };

        (changeset, payloads)
    }

    /// Run one sync round trip.
    ///
    /// Takes the store lock for the duration (contention if a document
    /// is being edited or another sync is in flight). On a transport or
    /// server failure the error propagates, the overlay is untouched
    /// and the replica stays in the initial state.
    pub fn sync(&mut self, exchange: &impl ChangesetExchange) -> Result<SyncOutcome> {
        self.ensure_no_pending()?;
        let _guard = self.locks.lock_db()?;

        let (changeset, payloads) = self.changeset();
        let base_rev = changeset.base_rev;
        info!(
            "syncing at base rev {base_rev}: {} documents, {} attachments",
            changeset.documents.len(),
            changeset.attachments.len()
        );

        let result = exchange.exchange(changeset, &payloads)?;

        if result.base_rev != base_rev {
            return Err(ReplidocError::ProtocolViolation(format!(
                "exchange answered for base rev {} instead of {base_rev}",
                result.base_rev
            )));
        }

        if result.is_accepted() {
            self.storage
                .upgrade(result.current_rev, result.documents, result.attachments)?;
            self.storage.clear_local()?;
            self.compact()?;
            info!("synced to rev {}", self.storage.rev());
            return Ok(SyncOutcome::Synced);
        }

        // declined: every overlay document that also appears in the
        // delta is a three-way conflict
        let mut conflicts = Vec::new();
        for local in self.storage.local_documents() {
            let Some(remote) = result
                .documents
                .iter()
                .find(|document| document.id == local.id)
            else {
                continue;
            };
            let Some(base) = self.storage.synced_document(&local.id) else {
                return Err(ReplidocError::ProtocolViolation(format!(
                    "conflicting document {} has no synced base",
                    local.id
                )));
            };
            conflicts.push(DocumentConflict {
                base,
                remote: remote.clone(),
                local,
            });
        }

        if conflicts.is_empty() {
            self.storage
                .upgrade(result.current_rev, result.documents, result.attachments)?;
            self.compact()?;
            info!(
                "fast-forwarded to rev {}, overlay kept for the next sync",
                self.storage.rev()
            );
            return Ok(SyncOutcome::Outdated);
        }

        let count = conflicts.len();
        info!("sync raised {count} conflicts");
        self.pending = Some(PendingMerge {
            result,
            conflicts,
            resolved: Vec::new(),
        });

        Ok(SyncOutcome::Conflicts(count))
    }

    /// The conflicts of the pending sync, if any.
    pub fn conflicts(&self) -> &[DocumentConflict] {
        self.pending
            .as_ref()
            .map(|pending| pending.conflicts.as_slice())
            .unwrap_or(&[])
    }

    /// Resolve one pending conflict.
    ///
    /// The resolved snapshot re-enters the overlay as a normal local
    /// write. When the last conflict is resolved the deferred snapshot
    /// upgrade is applied and the replica returns to the initial state.
    pub fn resolve_conflict(
        &mut self,
        id: &DocumentId,
        resolution: ConflictResolution,
    ) -> Result<()> {
        let Some(pending) = self.pending.as_mut() else {
            return Err(ReplidocError::Validation(
                "no conflicts pending".to_string(),
            ));
        };
        let Some(position) = pending
            .conflicts
            .iter()
            .position(|conflict| conflict.id() == id)
        else {
            return Err(ReplidocError::Validation(format!(
                "no pending conflict for document {id}"
            )));
        };

        let mut document = pending.conflicts[position].resolve(resolution)?;
        pending.conflicts.remove(position);

        let extracted = self.extractor.extract(document.props.markup());
        document.refs = extracted.refs;
        document.attachment_refs = extracted.attachment_refs;
        pending.resolved.push(document);
        debug!("resolved conflict for document {id}");

        if !pending.conflicts.is_empty() {
            return Ok(());
        }

        if let Some(pending) = self.pending.take() {
            self.storage.upgrade(
                pending.result.current_rev,
                pending.result.documents,
                pending.result.attachments,
            )?;
            for document in pending.resolved {
                self.storage.put_local_document(document)?;
            }
            self.compact()?;
            info!(
                "all conflicts resolved, snapshot upgraded to rev {}",
                self.storage.rev()
            );
        }

        Ok(())
    }

    /// Drop local attachments referenced by no live document. Returns
    /// the number dropped.
    pub fn compact(&mut self) -> Result<usize> {
        let referenced: HashSet<AttachmentId> = self
            .documents()
            .iter()
            .flat_map(|document| document.attachment_refs.iter().cloned())
            .collect();

        let unused: Vec<AttachmentId> = self
            .storage
            .local_attachments()
            .into_iter()
            .filter(|attachment| !referenced.contains(&attachment.id))
            .map(|attachment| attachment.id)
            .collect();

        let count = unused.len();
        for id in unused {
            debug!("dropping unused local attachment {id}");
            self.storage.remove_local_attachment(&id)?;
        }

        Ok(count)
    }

    fn ensure_no_pending(&self) -> Result<()> {
        if self.pending.is_some() {
            return Err(ReplidocError::ConflictsPending);
        }
        Ok(())
    }
}
