//! Filesystem layout of the primary store.
//!
//! ```text
//! <root>/
//!   meta.json                    {schema_version, revision}
//!   documents/<id>/<rev>         one immutable JSON file per revision
//!   attachments/<id>/metadata    attachment metadata (JSON)
//!   attachments/<id>/data        binary payload
//! ```
//!
//! Full document history is retained: a document directory accumulates
//! one file per revision and the largest file name is the latest
//! version. The meta record is replaced via temp-write + rename; if a
//! crash leaves entity files newer than the recorded revision, `open`
//! adopts the higher revision instead of losing the entities.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use super::transaction::FsTransaction;
use crate::attachment::{Attachment, AttachmentId};
use crate::changeset::SCHEMA_VERSION;
use crate::document::{Document, DocumentId, Revision};
use crate::error::{ReplidocError, Result};

#[derive(Debug, Serialize, Deserialize)]
struct StorageMeta {
    schema_version: u32,
    revision: Revision,
}

/// Durable storage backing a [`super::Primary`].
///
/// Keeps an in-memory index of the latest version of every document and
/// attachment; the filesystem is the authority.
#[derive(Debug)]
pub struct PrimaryStorage {
    documents_dir: PathBuf,
    attachments_dir: PathBuf,
    meta_path: PathBuf,
    revision: Revision,
    documents: HashMap<DocumentId, Document>,
    attachments: HashMap<AttachmentId, Attachment>,
}

impl PrimaryStorage {
    /// Open (or initialize) the storage rooted at `root`.
    ///
    /// A schema version mismatch in the meta record is fatal.
    pub fn open(root: &Path) -> Result<Self> {
        let documents_dir = root.join("documents");
        let attachments_dir = root.join("attachments");
        let meta_path = root.join("meta.json");

        fs::create_dir_all(&documents_dir)?;
        fs::create_dir_all(&attachments_dir)?;

        let meta: Option<StorageMeta> = if meta_path.exists() {
            Some(read_json(&meta_path)?)
        } else {
            None
        };

        if let Some(meta) = &meta {
            if meta.schema_version != SCHEMA_VERSION {
                return Err(ReplidocError::SchemaVersionMismatch {
                    found: meta.schema_version,
                    expected: SCHEMA_VERSION,
                });
            }
        }

        let documents = load_documents(&documents_dir)?;
        let attachments = load_attachments(&attachments_dir)?;

        let max_entity_rev = documents
            .values()
            .map(|document| document.rev)
            .chain(attachments.values().map(|attachment| attachment.rev))
            .max()
            .unwrap_or(Revision::ZERO);

        let recorded = meta.as_ref().map(|meta| meta.revision);
        let revision = recorded.unwrap_or(Revision::ZERO).max(max_entity_rev);

        if recorded != Some(revision) {
            if let Some(recorded) = recorded {
                warn!("meta revision {recorded} lags entity revision {revision}, adopting");
            }
            write_json_atomic(
                &meta_path,
                &StorageMeta {
                    schema_version: SCHEMA_VERSION,
                    revision,
                },
            )?;
        }

        info!(
            "opened primary storage at rev {revision}: {} documents, {} attachments",
            documents.len(),
            attachments.len()
        );

        Ok(PrimaryStorage {
            documents_dir,
            attachments_dir,
            meta_path,
            revision,
            documents,
            attachments,
        })
    }

    /// The storage revision
    pub fn revision(&self) -> Revision {
        self.revision
    }

    /// Latest version of a document
    pub fn document(&self, id: &DocumentId) -> Option<&Document> {
        self.documents.get(id)
    }

    /// Latest version of every document
    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.documents.values()
    }

    /// Attachment metadata
    pub fn attachment(&self, id: &AttachmentId) -> Option<&Attachment> {
        self.attachments.get(id)
    }

    /// Metadata of every attachment
    pub fn attachments(&self) -> impl Iterator<Item = &Attachment> {
        self.attachments.values()
    }

    /// Path to an attachment payload, if both the attachment and its
    /// payload still exist.
    pub fn attachment_payload_path(&self, id: &AttachmentId) -> Option<PathBuf> {
        if !self.attachments.contains_key(id) {
            return None;
        }

        let path = self.attachments_dir.join(id.as_str()).join("data");
        path.exists().then_some(path)
    }

    /// Stage a document version. Fails with a validation error if this
    /// exact revision was already written (duplicate delivery).
    pub(crate) fn stage_document(&self, tx: &mut FsTransaction, document: &Document) -> Result<()> {
        let path = self
            .documents_dir
            .join(document.id.as_str())
            .join(document.rev.to_string());

        if path.exists() {
            return Err(ReplidocError::Validation(format!(
                "document {}@{} already exists",
                document.id, document.rev
            )));
        }

        tx.write_json(&path, document)
    }

    /// Stage a new attachment: metadata plus payload.
    pub(crate) fn stage_new_attachment(
        &self,
        tx: &mut FsTransaction,
        attachment: &Attachment,
        payload: &[u8],
    ) -> Result<()> {
        let dir = self.attachments_dir.join(attachment.id.as_str());
        tx.write_json(&dir.join("metadata"), attachment)?;
        tx.write_bytes(&dir.join("data"), payload)
    }

    /// Commit staged writes: record the new revision (the atomic commit
    /// point), then update the in-memory index. Rolls the transaction
    /// back if the meta write fails.
    pub(crate) fn commit(
        &mut self,
        tx: FsTransaction,
        new_rev: Revision,
        documents: Vec<Document>,
        attachments: Vec<Attachment>,
    ) -> Result<()> {
        if let Err(err) = self.write_meta(new_rev) {
            tx.rollback();
            return Err(err);
        }
        tx.commit();

        for document in documents {
            self.documents.insert(document.id.clone(), document);
        }
        for attachment in attachments {
            self.attachments.insert(attachment.id.clone(), attachment);
        }
        self.revision = new_rev;

        Ok(())
    }

    /// Overwrite attachment metadata with a tombstone and reclaim the
    /// payload. Used by compaction; document data is never touched.
    pub(crate) fn tombstone_attachment(&mut self, attachment: Attachment) -> Result<()> {
        let dir = self.attachments_dir.join(attachment.id.as_str());
        write_json_atomic(&dir.join("metadata"), &attachment)?;

        let data = dir.join("data");
        if data.exists() {
            fs::remove_file(&data).map_err(|source| ReplidocError::FileWrite {
                path: data.clone(),
                source,
            })?;
        }

        self.attachments.insert(attachment.id.clone(), attachment);
        Ok(())
    }

    /// Record a new revision without staged entity writes (compaction).
    pub(crate) fn set_revision(&mut self, revision: Revision) -> Result<()> {
        self.write_meta(revision)?;
        self.revision = revision;
        Ok(())
    }

    fn write_meta(&self, revision: Revision) -> Result<()> {
        write_json_atomic(
            &self.meta_path,
            &StorageMeta {
                schema_version: SCHEMA_VERSION,
                revision,
            },
        )
    }
}

/// Replace a JSON file via temp-write + rename.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;

    let tmp = path.with_extension("tmp");
    fs::write(&tmp, &bytes).map_err(|source| ReplidocError::FileWrite {
        path: tmp.clone(),
        source,
    })?;
    fs::rename(&tmp, path).map_err(|source| ReplidocError::FileWrite {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path).map_err(|source| ReplidocError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&content)?)
}

fn load_documents(dir: &Path) -> Result<HashMap<DocumentId, Document>> {
    let mut documents = HashMap::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }

        // file names are revision numbers; the largest is the latest
        let mut latest: Option<(u64, PathBuf)> = None;
        for file in fs::read_dir(entry.path())? {
            let file = file?;
            let Some(rev) = file
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<u64>().ok())
            else {
                continue;
            };
            if latest.as_ref().is_none_or(|(max, _)| rev > *max) {
                latest = Some((rev, file.path()));
            }
        }

        if let Some((_, path)) = latest {
            let document: Document = read_json(&path)?;
            documents.insert(document.id.clone(), document);
        }
    }

    Ok(documents)
}

fn load_attachments(dir: &Path) -> Result<HashMap<AttachmentId, Attachment>> {
    let mut attachments = HashMap::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }

        let metadata_path = entry.path().join("metadata");
        if !metadata_path.exists() {
            continue;
        }

        let attachment: Attachment = read_json(&metadata_path)?;
        attachments.insert(attachment.id.clone(), attachment);
    }

    Ok(attachments)
}
