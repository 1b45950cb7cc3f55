//! Review flags, cached process-wide and keyed by (namespace, path).

use crate::types::{NamespaceId, PathId, Timestamp, VoterId};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Who flagged a path and when
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagInfo {
    pub flagged_by: VoterId,
    pub flagged_at: Timestamp,
}

#[derive(Default)]
pub struct FlagTable {
    flags: RwLock<HashMap<(NamespaceId, PathId), FlagInfo>>,
    loaded: RwLock<bool>,
}

impl FlagTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_flagged(&self, namespace: &NamespaceId, path: PathId) -> bool {
        self.flags.read().contains_key(&(namespace.clone(), path))
    }

    pub fn get(&self, namespace: &NamespaceId, path: PathId) -> Option<FlagInfo> {
        self.flags.read().get(&(namespace.clone(), path)).copied()
    }

    /// Returns true if the path was not flagged before
    pub fn set(&self, namespace: &NamespaceId, path: PathId, info: FlagInfo) -> bool {
        self.flags
            .write()
            .insert((namespace.clone(), path), info)
            .is_none()
    }

    /// Returns true if a flag was removed
    pub fn clear(&self, namespace: &NamespaceId, path: PathId) -> bool {
        self.flags.write().remove(&(namespace.clone(), path)).is_some()
    }

    pub fn flagged_in(&self, namespace: &NamespaceId) -> Vec<PathId> {
        let mut paths: Vec<PathId> = self
            .flags
            .read()
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, path)| *path)
            .collect();
        paths.sort();
        paths
    }

    /// Populate from stored rows once per process; later calls are ignored
    pub fn load_once<I>(&self, rows: I) -> bool
    where
        I: IntoIterator<Item = (NamespaceId, PathId, FlagInfo)>,
    {
        let mut loaded = self.loaded.write();
        if *loaded {
            return false;
        }
        let mut flags = self.flags.write();
        for (namespace, path, info) in rows {
            flags.entry((namespace, path)).or_insert(info);
        }
        *loaded = true;
        true
    }

    pub fn is_loaded(&self) -> bool {
        *self.loaded.read()
    }
}
