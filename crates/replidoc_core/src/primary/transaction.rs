//! Staged filesystem writes with revert-on-failure.
//!
//! `apply_changeset` writes are all-or-nothing: every file created
//! through a transaction is removed again if any later step fails. The
//! commit point itself is the atomic meta-record rename performed by
//! the storage, after which the staged files simply stay.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::warn;
use serde::Serialize;

use crate::error::{ReplidocError, Result};

pub(crate) struct FsTransaction {
    created: Vec<PathBuf>,
}

impl FsTransaction {
    pub(crate) fn new() -> Self {
        FsTransaction {
            created: Vec::new(),
        }
    }

    /// Write `value` as JSON to a new file. Fails if the file exists.
    pub(crate) fn write_json<T: Serialize>(&mut self, path: &Path, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_new(path, &bytes)
    }

    /// Write raw bytes to a new file. Fails if the file exists.
    pub(crate) fn write_bytes(&mut self, path: &Path, bytes: &[u8]) -> Result<()> {
        self.write_new(path, bytes)
    }

    fn write_new(&mut self, path: &Path, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ReplidocError::FileWrite {
                path: path.to_path_buf(),
                source,
            })?;
        }

        // create_new keeps committed revisions immutable
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|source| ReplidocError::FileWrite {
                path: path.to_path_buf(),
                source,
            })?;

        // track before writing so a partial write is reverted too
        self.created.push(path.to_path_buf());

        file.write_all(bytes).map_err(|source| ReplidocError::FileWrite {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Keep all staged files.
    pub(crate) fn commit(self) {}

    /// Remove every staged file, newest first.
    pub(crate) fn rollback(self) {
        for path in self.created.iter().rev() {
            if let Err(err) = fs::remove_file(path) {
                warn!("failed to revert staged file {}: {err}", path.display());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollback_removes_staged_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("file");

        let mut tx = FsTransaction::new();
        tx.write_bytes(&path, b"data").unwrap();
        assert!(path.exists());

        tx.rollback();
        assert!(!path.exists());
    }

    #[test]
    fn commit_keeps_staged_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file");

        let mut tx = FsTransaction::new();
        tx.write_bytes(&path, b"data").unwrap();
        tx.commit();

        assert!(path.exists());
    }

    #[test]
    fn staged_files_are_create_new() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file");
        fs::write(&path, b"old").unwrap();

        let mut tx = FsTransaction::new();
        assert!(tx.write_bytes(&path, b"new").is_err());
        tx.rollback();

        // the pre-existing file is untouched
        assert_eq!(fs::read(&path).unwrap(), b"old");
    }
}
