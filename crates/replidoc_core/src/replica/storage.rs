//! Replica storage: the last-synced snapshot plus a local overlay.
//!
//! The overlay holds every not-yet-synced edit and shadows the snapshot
//! entry of the same id. `upgrade` folds a sync response into the
//! snapshot; `clear_local` drops the overlay after an accepted sync.
//!
//! Two implementations: an in-memory one, and a filesystem one that
//! persists the whole state as a single JSON file (replaced atomically
//! on every mutation) with payloads stored alongside.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::attachment::{Attachment, AttachmentId};
use crate::document::{Document, DocumentId, Revision};
use crate::error::{ReplidocError, Result};
use crate::primary::storage::write_json_atomic;

/// Storage backend for a [`super::Replica`].
pub trait ReplicaStorage {
    /// The revision of the last fully reconciled snapshot
    fn rev(&self) -> Revision;

    /// A document from the synced snapshot
    fn synced_document(&self, id: &DocumentId) -> Option<Document>;
    /// All documents in the synced snapshot, ordered by id
    fn synced_documents(&self) -> Vec<Document>;
    /// An attachment from the synced snapshot
    fn synced_attachment(&self, id: &AttachmentId) -> Option<Attachment>;
    /// All attachments in the synced snapshot, ordered by id
    fn synced_attachments(&self) -> Vec<Attachment>;

    /// A document from the local overlay
    fn local_document(&self, id: &DocumentId) -> Option<Document>;
    /// All overlay documents, ordered by id
    fn local_documents(&self) -> Vec<Document>;
    /// An attachment from the local overlay
    fn local_attachment(&self, id: &AttachmentId) -> Option<Attachment>;
    /// All overlay attachments, ordered by id
    fn local_attachments(&self) -> Vec<Attachment>;
    /// The payload of a local overlay attachment
    fn local_attachment_payload(&self, id: &AttachmentId) -> Option<Vec<u8>>;

    /// Write a document into the overlay
    fn put_local_document(&mut self, document: Document) -> Result<()>;
    /// Write an attachment and its payload into the overlay
    fn put_local_attachment(&mut self, attachment: Attachment, payload: Vec<u8>) -> Result<()>;
    /// Remove a document from the overlay
    fn remove_local_document(&mut self, id: &DocumentId) -> Result<()>;
    /// Remove an attachment (and its payload) from the overlay
    fn remove_local_attachment(&mut self, id: &AttachmentId) -> Result<()>;

    /// Fold a sync response into the snapshot and advance the revision.
    /// The overlay is untouched.
    fn upgrade(
        &mut self,
        rev: Revision,
        documents: Vec<Document>,
        attachments: Vec<Attachment>,
    ) -> Result<()>;

    /// Drop the whole overlay (after an accepted sync)
    fn clear_local(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ReplicaState {
    rev: Revision,
    synced_documents: HashMap<DocumentId, Document>,
    synced_attachments: HashMap<AttachmentId, Attachment>,
    local_documents: HashMap<DocumentId, Document>,
    local_attachments: HashMap<AttachmentId, Attachment>,
}

impl ReplicaState {
    fn upgrade(&mut self, rev: Revision, documents: Vec<Document>, attachments: Vec<Attachment>) {
        for document in documents {
            self.synced_documents.insert(document.id.clone(), document);
        }
        for attachment in attachments {
            self.synced_attachments
                .insert(attachment.id.clone(), attachment);
        }
        self.rev = rev;
    }
}

fn sorted_by_id<K: Ord, V: Clone>(map: &HashMap<K, V>, id_of: impl Fn(&V) -> &K) -> Vec<V> {
    let mut values: Vec<V> = map.values().cloned().collect();
    values.sort_by(|a, b| id_of(a).cmp(id_of(b)));
    values
}

/// In-memory replica storage, primarily for tests and ephemeral use.
#[derive(Default)]
pub struct MemoryReplicaStorage {
    state: ReplicaState,
    payloads: HashMap<AttachmentId, Vec<u8>>,
}

impl MemoryReplicaStorage {
    /// Create empty storage at revision zero
    pub fn new() -> Self {
        MemoryReplicaStorage::default()
    }
}

impl ReplicaStorage for MemoryReplicaStorage {
    fn rev(&self) -> Revision {
        self.state.rev
    }

    fn synced_document(&self, id: &DocumentId) -> Option<Document> {
        self.state.synced_documents.get(id).cloned()
    }

    fn synced_documents(&self) -> Vec<Document> {
        sorted_by_id(&self.state.synced_documents, |document| &document.id)
    }

    fn synced_attachment(&self, id: &AttachmentId) -> Option<Attachment> {
        self.state.synced_attachments.get(id).cloned()
    }

    fn synced_attachments(&self) -> Vec<Attachment> {
        sorted_by_id(&self.state.synced_attachments, |attachment| &attachment.id)
    }

    fn local_document(&self, id: &DocumentId) -> Option<Document> {
        self.state.local_documents.get(id).cloned()
    }

    fn local_documents(&self) -> Vec<Document> {
        sorted_by_id(&self.state.local_documents, |document| &document.id)
    }

    fn local_attachment(&self, id: &AttachmentId) -> Option<Attachment> {
        self.state.local_attachments.get(id).cloned()
    }

    fn local_attachments(&self) -> Vec<Attachment> {
        sorted_by_id(&self.state.local_attachments, |attachment| &attachment.id)
    }

    fn local_attachment_payload(&self, id: &AttachmentId) -> Option<Vec<u8>> {
        self.payloads.get(id).cloned()
    }

    fn put_local_document(&mut self, document: Document) -> Result<()> {
        self.state
            .local_documents
            .insert(document.id.clone(), document);
        Ok(())
    }

    fn put_local_attachment(&mut self, attachment: Attachment, payload: Vec<u8>) -> Result<()> {
        self.payloads.insert(attachment.id.clone(), payload);
        self.state
            .local_attachments
            .insert(attachment.id.clone(), attachment);
        Ok(())
    }

    fn remove_local_document(&mut self, id: &DocumentId) -> Result<()> {
        self.state.local_documents.remove(id);
        Ok(())
    }

    fn remove_local_attachment(&mut self, id: &AttachmentId) -> Result<()> {
        self.state.local_attachments.remove(id);
        self.payloads.remove(id);
        Ok(())
    }

    fn upgrade(
        &mut self,
        rev: Revision,
        documents: Vec<Document>,
        attachments: Vec<Attachment>,
    ) -> Result<()> {
        self.state.upgrade(rev, documents, attachments);
        Ok(())
    }

    fn clear_local(&mut self) -> Result<()> {
        self.state.local_documents.clear();
        self.state.local_attachments.clear();
        self.payloads.clear();
        Ok(())
    }
}

/// Filesystem replica storage.
///
/// ```text
/// <root>/
///   replica.json        whole replica state (snapshot + overlay)
///   payloads/<id>       local overlay attachment payloads
/// ```
pub struct FsReplicaStorage {
    state: ReplicaState,
    state_path: PathBuf,
    payloads_dir: PathBuf,
}

impl FsReplicaStorage {
    /// Open (or initialize) replica storage rooted at `root`.
    pub fn open(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)?;
        let state_path = root.join("replica.json");
        let payloads_dir = root.join("payloads");
        fs::create_dir_all(&payloads_dir)?;

        let state = if state_path.exists() {
            let content =
                fs::read_to_string(&state_path).map_err(|source| ReplidocError::FileRead {
                    path: state_path.clone(),
                    source,
                })?;
            serde_json::from_str(&content)?
        } else {
            ReplicaState::default()
        };

        Ok(FsReplicaStorage {
            state,
            state_path,
            payloads_dir,
        })
    }

    fn persist(&self) -> Result<()> {
        write_json_atomic(&self.state_path, &self.state)
    }

    fn payload_path(&self, id: &AttachmentId) -> PathBuf {
        self.payloads_dir.join(id.as_str())
    }

    fn remove_payload(&self, id: &AttachmentId) -> Result<()> {
        let path = self.payload_path(id);
        if path.exists() {
            fs::remove_file(&path).map_err(|source| ReplidocError::FileWrite { path, source })?;
        }
        Ok(())
    }
}

impl ReplicaStorage for FsReplicaStorage {
    fn rev(&self) -> Revision {
        self.state.rev
    }

    fn synced_document(&self, id: &DocumentId) -> Option<Document> {
        self.state.synced_documents.get(id).cloned()
    }

    fn synced_documents(&self) -> Vec<Document> {
        sorted_by_id(&self.state.synced_documents, |document| &document.id)
    }

    fn synced_attachment(&self, id: &AttachmentId) -> Option<Attachment> {
        self.state.synced_attachments.get(id).cloned()
    }

    fn synced_attachments(&self) -> Vec<Attachment> {
        sorted_by_id(&self.state.synced_attachments, |attachment| &attachment.id)
    }

    fn local_document(&self, id: &DocumentId) -> Option<Document> {
        self.state.local_documents.get(id).cloned()
    }

    fn local_documents(&self) -> Vec<Document> {
        sorted_by_id(&self.state.local_documents, |document| &document.id)
    }

    fn local_attachment(&self, id: &AttachmentId) -> Option<Attachment> {
        self.state.local_attachments.get(id).cloned()
    }

    fn local_attachments(&self) -> Vec<Attachment> {
        sorted_by_id(&self.state.local_attachments, |attachment| &attachment.id)
    }

    fn local_attachment_payload(&self, id: &AttachmentId) -> Option<Vec<u8>> {
        fs::read(self.payload_path(id)).ok()
    }

    fn put_local_document(&mut self, document: Document) -> Result<()> {
        self.state
            .local_documents
            .insert(document.id.clone(), document);
        self.persist()
    }

    fn put_local_attachment(&mut self, attachment: Attachment, payload: Vec<u8>) -> Result<()> {
        let path = self.payload_path(&attachment.id);
        fs::write(&path, &payload).map_err(|source| ReplidocError::FileWrite { path, source })?;
        self.state
            .local_attachments
            .insert(attachment.id.clone(), attachment);
        self.persist()
    }

    fn remove_local_document(&mut self, id: &DocumentId) -> Result<()> {
        self.state.local_documents.remove(id);
        self.persist()
    }

    fn remove_local_attachment(&mut self, id: &AttachmentId) -> Result<()> {
        self.state.local_attachments.remove(id);
        self.remove_payload(id)?;
        self.persist()
    }

    fn upgrade(
        &mut self,
        rev: Revision,
        documents: Vec<Document>,
        attachments: Vec<Attachment>,
    ) -> Result<()> {
        self.state.upgrade(rev, documents, attachments);
        self.persist()
    }

    fn clear_local(&mut self) -> Result<()> {
        let ids: Vec<AttachmentId> = self.state.local_attachments.keys().cloned().collect();
        for id in &ids {
            self.remove_payload(id)?;
        }
        self.state.local_documents.clear();
        self.state.local_attachments.clear();
        self.persist()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentProps;

    fn note(id: &str, name: &str) -> Document {
        Document::new(
            DocumentId::from(id),
            Revision::ZERO,
            DocumentProps::Note {
                name: name.to_string(),
                markup: String::new(),
            },
        )
    }

    #[test]
    fn fs_storage_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();

        {
            let mut storage = FsReplicaStorage::open(dir.path()).unwrap();
            storage.put_local_document(note("doc1", "a")).unwrap();
            storage
                .put_local_attachment(
                    Attachment::new(AttachmentId::from("att1"), Revision::ZERO, "a/b", 3),
                    b"abc".to_vec(),
                )
                .unwrap();
            storage.upgrade(Revision(4), vec![note("doc2", "b")], vec![]).unwrap();
        }

        let storage = FsReplicaStorage::open(dir.path()).unwrap();
        assert_eq!(storage.rev(), Revision(4));
        assert!(storage.local_document(&DocumentId::from("doc1")).is_some());
        assert!(storage.synced_document(&DocumentId::from("doc2")).is_some());
        assert_eq!(
            storage.local_attachment_payload(&AttachmentId::from("att1")),
            Some(b"abc".to_vec())
        );
    }

    #[test]
    fn clear_local_drops_overlay_and_payloads() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = FsReplicaStorage::open(dir.path()).unwrap();

        storage.put_local_document(note("doc1", "a")).unwrap();
        storage
            .put_local_attachment(
                Attachment::new(AttachmentId::from("att1"), Revision::ZERO, "a/b", 1),
                b"x".to_vec(),
            )
            .unwrap();

        storage.clear_local().unwrap();

        assert!(storage.local_documents().is_empty());
        assert!(storage.local_attachments().is_empty());
        assert_eq!(
            storage.local_attachment_payload(&AttachmentId::from("att1")),
            None
        );
    }

    #[test]
    fn upgrade_replaces_snapshot_entries_by_id() {
        let mut storage = MemoryReplicaStorage::new();

        storage
            .upgrade(Revision(1), vec![note("doc1", "old")], vec![])
            .unwrap();
        storage
            .upgrade(Revision(2), vec![note("doc1", "new")], vec![])
            .unwrap();

        assert_eq!(storage.rev(), Revision(2));
        let documents = storage.synced_documents();
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].props.name(), "new");
    }
}
