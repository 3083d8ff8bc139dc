//! Lock manager.
//!
//! Serializes access at two granularities: a whole-store lock held for
//! the duration of a sync, and per-document locks held during
//! interactive editing. The two are mutually exclusive by construction:
//! the store lock is only grantable from the free state, and document
//! locks are never granted while the store is locked. A refused
//! acquisition is contention, not an error — callers wait and retry.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use log::debug;

use crate::document::DocumentId;
use crate::error::{ReplidocError, Result};

/// Current lock state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LockState {
    /// Nothing locked
    #[default]
    Free,
    /// Whole store locked (sync in progress)
    DbLocked,
    /// One or more documents locked for editing
    DocumentsLocked(HashSet<DocumentId>),
}

/// Two-granularity lock manager.
///
/// Clones share the same state.
#[derive(Clone, Default)]
pub struct LockManager {
    state: Arc<Mutex<LockState>>,
}

impl LockManager {
    /// Create a lock manager in the free state
    pub fn new() -> Self {
        LockManager::default()
    }

    /// A snapshot of the current state
    pub fn state(&self) -> LockState {
        self.lock_state().clone()
    }

    /// True if the whole store is locked
    pub fn is_db_locked(&self) -> bool {
        matches!(*self.lock_state(), LockState::DbLocked)
    }

    /// True if `id` cannot currently be edited
    pub fn is_document_locked(&self, id: &DocumentId) -> bool {
        match &*self.lock_state() {
            LockState::Free => false,
            LockState::DbLocked => true,
            LockState::DocumentsLocked(ids) => ids.contains(id),
        }
    }

    /// Acquire a per-document lock.
    ///
    /// Fails with [`ReplidocError::Contention`] while the store is
    /// locked or `id` is already locked. The lock is released when the
    /// guard drops.
    pub fn lock_document(&self, id: &DocumentId) -> Result<DocumentLockGuard> {
        let mut state = self.lock_state();

        match &mut *state {
            LockState::DbLocked => {
                return Err(ReplidocError::Contention(format!(
                    "can't lock document {id}: store is locked"
                )));
            }
            LockState::Free => {
                *state = LockState::DocumentsLocked(HashSet::from([id.clone()]));
            }
            LockState::DocumentsLocked(ids) => {
                if !ids.insert(id.clone()) {
                    return Err(ReplidocError::Contention(format!(
                        "can't lock document {id}: already locked"
                    )));
                }
            }
        }

        debug!("locked document {id}");

        Ok(DocumentLockGuard {
            state: self.state.clone(),
            id: id.clone(),
        })
    }

    /// Acquire the whole-store lock.
    ///
    /// Fails with [`ReplidocError::Contention`] unless the state is
    /// free. The lock is released when the guard drops.
    pub fn lock_db(&self) -> Result<DbLockGuard> {
        let mut state = self.lock_state();

        if *state != LockState::Free {
            return Err(ReplidocError::Contention(
                "can't lock store: not free".to_string(),
            ));
        }

        *state = LockState::DbLocked;
        debug!("locked store");

        Ok(DbLockGuard {
            state: self.state.clone(),
        })
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, LockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Holds a per-document lock until dropped.
#[must_use = "the lock is released when the guard drops"]
pub struct DocumentLockGuard {
    state: Arc<Mutex<LockState>>,
    id: DocumentId,
}

impl Drop for DocumentLockGuard {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if let LockState::DocumentsLocked(ids) = &mut *state {
            ids.remove(&self.id);
            if ids.is_empty() {
                *state = LockState::Free;
            }
        }

        debug!("unlocked document {}", self.id);
    }
}

/// Holds the whole-store lock until dropped.
#[must_use = "the lock is released when the guard drops"]
pub struct DbLockGuard {
    state: Arc<Mutex<LockState>>,
}

impl Drop for DbLockGuard {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if *state == LockState::DbLocked {
            *state = LockState::Free;
        }

        debug!("unlocked store");
    }
}
