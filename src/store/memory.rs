//! In-memory collaborators: baseline values, valid paths, discussion counts,
//! and a vote store for embedding and tests.

use crate::error::StorageError;
use crate::resolver::BaselineValue;
use crate::store::{
    check_deadline, AlternateRow, BaselineStore, FlagChange, FlagRow, ForumIndex, LockChange,
    LockRow, PathSource, PathVisibility, VoteRow, VoteStore, VoteWrite,
};
use crate::types::{Deadline, NamespaceId, VoterId};
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use tracing::debug;

/// Baseline entry on disk: either a bare value or a value with its status
#[derive(Deserialize)]
#[serde(untagged)]
enum BaselineEntry {
    Plain(String),
    Full(BaselineValue),
}

impl From<BaselineEntry> for BaselineValue {
    fn from(entry: BaselineEntry) -> Self {
        match entry {
            BaselineEntry::Plain(value) => BaselineValue::new(value),
            BaselineEntry::Full(value) => value,
        }
    }
}

/// Baseline values held in memory
#[derive(Default)]
pub struct MemoryBaselineStore {
    values: RwLock<HashMap<(NamespaceId, String), BaselineValue>>,
}

impl MemoryBaselineStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, namespace: impl Into<NamespaceId>, path: impl Into<String>, value: BaselineValue) {
        self.values
            .write()
            .insert((namespace.into(), path.into()), value);
    }

    /// Load every `<namespace>.json` file in `dir`
    ///
    /// Each file is an object from path to either a string or
    /// `{"value": ..., "status": ...}`.
    pub fn load_json_dir<P: AsRef<Path>>(dir: P) -> Result<Self, StorageError> {
        let store = Self::new();
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir).map_err(|e| {
            StorageError::Unavailable(format!("Failed to read baseline dir {}: {}", dir.display(), e))
        })?;
        for entry in entries {
            let file = entry?.path();
            if file.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Some(namespace) = file.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let content = std::fs::read_to_string(&file)?;
            let parsed: BTreeMap<String, BaselineEntry> =
                serde_json::from_str(&content).map_err(|e| {
                    StorageError::Corrupt(format!("Failed to parse {}: {}", file.display(), e))
                })?;
            debug!(namespace, values = parsed.len(), "Loaded baseline file");
            for (path, value) in parsed {
                store.insert(namespace, path, value.into());
            }
        }
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

impl BaselineStore for MemoryBaselineStore {
    fn read_baseline(
        &self,
        namespace: &NamespaceId,
        path: &str,
    ) -> Result<Option<BaselineValue>, StorageError> {
        Ok(self
            .values
            .read()
            .get(&(namespace.clone(), path.to_string()))
            .cloned())
    }
}

/// Valid paths: a common set shared by all namespaces plus per-namespace extras
#[derive(Default)]
pub struct MemoryPathSource {
    common: RwLock<BTreeSet<String>>,
    extra: RwLock<HashMap<NamespaceId, BTreeSet<String>>>,
    visibility: RwLock<HashMap<String, PathVisibility>>,
}

impl MemoryPathSource {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            common: RwLock::new(paths.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn add_path(&self, path: impl Into<String>) {
        self.common.write().insert(path.into());
    }

    pub fn add_namespace_path(&self, namespace: impl Into<NamespaceId>, path: impl Into<String>) {
        self.extra
            .write()
            .entry(namespace.into())
            .or_default()
            .insert(path.into());
    }

    pub fn set_visibility(&self, path: impl Into<String>, visibility: PathVisibility) {
        self.visibility.write().insert(path.into(), visibility);
    }
}

impl PathSource for MemoryPathSource {
    fn paths_for(&self, namespace: &NamespaceId) -> Result<Vec<String>, StorageError> {
        let mut paths = self.common.read().clone();
        if let Some(extra) = self.extra.read().get(namespace) {
            paths.extend(extra.iter().cloned());
        }
        Ok(paths.into_iter().collect())
    }

    fn visibility(&self, _namespace: &NamespaceId, path: &str) -> PathVisibility {
        self.visibility
            .read()
            .get(path)
            .copied()
            .unwrap_or_default()
    }
}

/// Discussion post counts
#[derive(Default)]
pub struct MemoryForumIndex {
    counts: RwLock<HashMap<(NamespaceId, String), usize>>,
}

impl MemoryForumIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_post(&self, namespace: impl Into<NamespaceId>, path: impl Into<String>) {
        *self
            .counts
            .write()
            .entry((namespace.into(), path.into()))
            .or_insert(0) += 1;
    }
}

impl ForumIndex for MemoryForumIndex {
    fn post_count(&self, namespace: &NamespaceId, path: &str) -> Result<usize, StorageError> {
        Ok(self
            .counts
            .read()
            .get(&(namespace.clone(), path.to_string()))
            .copied()
            .unwrap_or(0))
    }
}

#[derive(Default)]
struct MemoryRows {
    votes: BTreeMap<(NamespaceId, String, VoterId), VoteRow>,
    locks: BTreeMap<(NamespaceId, String), LockRow>,
    alternates: BTreeMap<(NamespaceId, String, String), AlternateRow>,
    flags: BTreeMap<(NamespaceId, String), FlagRow>,
}

/// Vote store held in memory; a write is applied under one lock
#[derive(Default)]
pub struct MemoryVoteStore {
    rows: Mutex<MemoryRows>,
}

impl MemoryVoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vote_count(&self) -> usize {
        self.rows.lock().votes.len()
    }
}

impl VoteStore for MemoryVoteStore {
    fn query_votes(&self, namespace: &NamespaceId) -> Result<Vec<VoteRow>, StorageError> {
        Ok(self
            .rows
            .lock()
            .votes
            .values()
            .filter(|row| &row.namespace == namespace)
            .cloned()
            .collect())
    }

    fn query_locks(&self, namespace: &NamespaceId) -> Result<Vec<LockRow>, StorageError> {
        Ok(self
            .rows
            .lock()
            .locks
            .values()
            .filter(|row| &row.namespace == namespace)
            .cloned()
            .collect())
    }

    fn query_alternates(&self, namespace: &NamespaceId) -> Result<Vec<AlternateRow>, StorageError> {
        Ok(self
            .rows
            .lock()
            .alternates
            .values()
            .filter(|row| &row.namespace == namespace)
            .cloned()
            .collect())
    }

    fn query_flags(&self) -> Result<Vec<FlagRow>, StorageError> {
        Ok(self.rows.lock().flags.values().cloned().collect())
    }

    fn persist_vote(&self, write: &VoteWrite, deadline: Deadline) -> Result<(), StorageError> {
        check_deadline(deadline, "persist_vote")?;
        let mut rows = self.rows.lock();
        let ns = &write.namespace;
        for row in &write.upserts {
            rows.votes.insert(
                (row.namespace.clone(), row.path.clone(), row.voter),
                row.clone(),
            );
        }
        for voter in &write.deletes {
            rows.votes.remove(&(ns.clone(), write.path.clone(), *voter));
        }
        match &write.lock {
            Some(LockChange::Set(row)) => {
                rows.locks.insert((ns.clone(), write.path.clone()), row.clone());
            }
            Some(LockChange::Clear) => {
                rows.locks.remove(&(ns.clone(), write.path.clone()));
            }
            None => {}
        }
        if let Some(alternate) = &write.alternate {
            rows.alternates.insert(
                (ns.clone(), write.path.clone(), alternate.value.clone()),
                alternate.clone(),
            );
        }
        if write.clear_flag {
            rows.flags.remove(&(ns.clone(), write.path.clone()));
        }
        Ok(())
    }

    fn persist_flag(&self, change: &FlagChange, deadline: Deadline) -> Result<(), StorageError> {
        check_deadline(deadline, "persist_flag")?;
        let mut rows = self.rows.lock();
        match change {
            FlagChange::Set(row) => {
                rows.flags
                    .insert((row.namespace.clone(), row.path.clone()), row.clone());
            }
            FlagChange::Clear { namespace, path } => {
                rows.flags.remove(&(namespace.clone(), path.clone()));
            }
        }
        Ok(())
    }
}
