//! Path Registry
//!
//! Bijective mapping between distinguishing-path strings and compact [`PathId`]s.
//! Ids are handed out in insertion order and never reused or removed for the
//! lifetime of the process.

use crate::error::BallotError;
use crate::types::PathId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
struct RegistryInner {
    by_path: HashMap<Arc<str>, PathId>,
    by_id: Vec<Arc<str>>,
}

/// Thread-safe, append-only path interner
#[derive(Default)]
pub struct PathRegistry {
    inner: RwLock<RegistryInner>,
}

impl PathRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the id for `path`, allocating a new one on first sight
    pub fn id_for(&self, path: &str) -> PathId {
        if let Some(id) = self.lookup(path) {
            return id;
        }

        let mut inner = self.inner.write();
        // Another thread may have interned it between the read and write locks
        if let Some(id) = inner.by_path.get(path) {
            return *id;
        }
        let id = PathId(inner.by_id.len() as u32);
        let shared: Arc<str> = Arc::from(path);
        inner.by_id.push(shared.clone());
        inner.by_path.insert(shared, id);
        id
    }

    /// Return the id for `path` without allocating
    pub fn lookup(&self, path: &str) -> Option<PathId> {
        self.inner.read().by_path.get(path).copied()
    }

    pub fn path_for(&self, id: PathId) -> Result<Arc<str>, BallotError> {
        self.inner
            .read()
            .by_id
            .get(id.index())
            .cloned()
            .ok_or(BallotError::UnknownPathId(id))
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
