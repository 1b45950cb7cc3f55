//! Permanent Lock Table
//!
//! Cross-cutting (namespace, path) → lock state. Consulted before ordinary votes
//! are aggregated; mutated only from inside the owning namespace's exclusive
//! section. Ledger side effects of a lock (clean-slate purges) are applied by
//! the working set, not here. Locks never enter a ledger.

use crate::types::{NamespaceId, PathId, Timestamp};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

/// Last administrative effect recorded for a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockKind {
    Lock,
    Unlock,
    CleanSlate,
}

/// Lock state of one (namespace, path)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockEntry {
    /// The pinned value while `kind` is `Lock`
    pub value: Option<String>,
    pub kind: LockKind,
    pub changed_at: Timestamp,
}

impl LockEntry {
    pub fn is_active(&self) -> bool {
        self.kind == LockKind::Lock
    }

    /// The pinned value, if this entry is an active lock
    pub fn locked_value(&self) -> Option<&str> {
        if self.is_active() {
            self.value.as_deref()
        } else {
            None
        }
    }
}

/// What an administrative vote asks the table to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRequest {
    /// `Some` locks to the value, `None` releases any existing lock
    pub value: Option<String>,
    /// Also purge votes cast with the permanent weight
    pub clean_slate: bool,
}

impl LockRequest {
    pub fn lock(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            clean_slate: false,
        }
    }

    pub fn unlock() -> Self {
        Self {
            value: None,
            clean_slate: false,
        }
    }

    pub fn with_clean_slate(mut self) -> Self {
        self.clean_slate = true;
        self
    }
}

/// Effects a request actually had
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockOutcome {
    pub did_lock: bool,
    pub did_unlock: bool,
    pub did_clean_slate: bool,
}

impl LockOutcome {
    pub fn is_noop(&self) -> bool {
        !self.did_lock && !self.did_unlock && !self.did_clean_slate
    }
}

/// Compute the outcome of `request` against `current` without touching any table
pub fn plan_lock(
    current: Option<&LockEntry>,
    request: &LockRequest,
    at: Timestamp,
) -> (LockOutcome, Option<LockEntry>) {
    let active_value = current.and_then(|entry| entry.locked_value());
    let mut outcome = LockOutcome {
        did_clean_slate: request.clean_slate,
        ..LockOutcome::default()
    };

    let mut next = current.cloned();
    match (&request.value, active_value) {
        (Some(wanted), Some(held)) if wanted == held => {}
        (Some(wanted), held) => {
            outcome.did_unlock = held.is_some();
            outcome.did_lock = true;
            next = Some(LockEntry {
                value: Some(wanted.clone()),
                kind: LockKind::Lock,
                changed_at: at,
            });
        }
        (None, Some(_)) => {
            outcome.did_unlock = true;
            next = Some(LockEntry {
                value: None,
                kind: LockKind::Unlock,
                changed_at: at,
            });
        }
        (None, None) => {}
    }

    if request.clean_slate && !next.as_ref().map_or(false, LockEntry::is_active) {
        next = Some(LockEntry {
            value: None,
            kind: LockKind::CleanSlate,
            changed_at: at,
        });
    }

    (outcome, next)
}

/// Process-wide lock table
#[derive(Default)]
pub struct PermanentLockTable {
    entries: RwLock<HashMap<(NamespaceId, PathId), LockEntry>>,
}

impl PermanentLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an administrative request and report what changed
    pub fn apply_lock(
        &self,
        namespace: &NamespaceId,
        path: PathId,
        request: &LockRequest,
        at: Timestamp,
    ) -> LockOutcome {
        let key = (namespace.clone(), path);
        let mut entries = self.entries.write();
        let (outcome, next) = plan_lock(entries.get(&key), request, at);
        match next {
            Some(entry) => {
                entries.insert(key, entry);
            }
            None => {
                entries.remove(&key);
            }
        }
        if outcome.did_lock || outcome.did_unlock {
            info!(
                namespace = %namespace,
                path = %path,
                did_lock = outcome.did_lock,
                did_unlock = outcome.did_unlock,
                did_clean_slate = outcome.did_clean_slate,
                "Lock state changed"
            );
        }
        outcome
    }

    /// Outcome and resulting entry `request` would produce, without applying it
    pub fn preview(
        &self,
        namespace: &NamespaceId,
        path: PathId,
        request: &LockRequest,
        at: Timestamp,
    ) -> (LockOutcome, Option<LockEntry>) {
        let entries = self.entries.read();
        plan_lock(entries.get(&(namespace.clone(), path)), request, at)
    }

    pub fn entry(&self, namespace: &NamespaceId, path: PathId) -> Option<LockEntry> {
        self.entries.read().get(&(namespace.clone(), path)).cloned()
    }

    /// The entry only if it is an active lock
    pub fn active_lock(&self, namespace: &NamespaceId, path: PathId) -> Option<LockEntry> {
        self.entry(namespace, path).filter(LockEntry::is_active)
    }

    pub fn is_locked(&self, namespace: &NamespaceId, path: PathId) -> bool {
        self.active_lock(namespace, path).is_some()
    }

    /// Replace all entries of a namespace with freshly loaded locks
    pub fn replace_namespace(
        &self,
        namespace: &NamespaceId,
        locks: impl IntoIterator<Item = (PathId, String, Timestamp)>,
    ) {
        let mut entries = self.entries.write();
        entries.retain(|(ns, _), _| ns != namespace);
        for (path, value, changed_at) in locks {
            entries.insert(
                (namespace.clone(), path),
                LockEntry {
                    value: Some(value),
                    kind: LockKind::Lock,
                    changed_at,
                },
            );
        }
    }

    pub fn locked_paths(&self, namespace: &NamespaceId) -> Vec<PathId> {
        let mut paths: Vec<PathId> = self
            .entries
            .read()
            .iter()
            .filter(|((ns, _), entry)| ns == namespace && entry.is_active())
            .map(|((_, path), _)| *path)
            .collect();
        paths.sort();
        paths
    }
}
