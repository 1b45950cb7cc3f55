//! Namespace tree: parent links, children and the read-only flag.

use crate::error::BallotError;
use crate::types::NamespaceId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// One namespace as described by the tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceRecord {
    pub id: NamespaceId,
    /// `None` only for the root
    pub parent: Option<NamespaceId>,
    #[serde(default)]
    pub read_only: bool,
}

/// Read-only view of the namespace hierarchy
pub trait NamespaceTree: Send + Sync {
    fn namespace(&self, id: &NamespaceId) -> Option<NamespaceRecord>;

    fn children_of(&self, id: &NamespaceId) -> Vec<NamespaceId>;

    /// `id` followed by its ancestors up to the root
    ///
    /// Fails with `NamespaceNotFound` for an unknown id or parent, and with
    /// `InternalInconsistency` if the parent links form a cycle.
    fn ancestry(&self, id: &NamespaceId) -> Result<Vec<NamespaceId>, BallotError> {
        let mut lineage = Vec::new();
        let mut seen = HashSet::new();
        let mut current = Some(id.clone());
        while let Some(ns) = current {
            if !seen.insert(ns.clone()) {
                return Err(BallotError::inconsistency(
                    id,
                    format!("parent cycle through {}", ns),
                ));
            }
            let record = self
                .namespace(&ns)
                .ok_or_else(|| BallotError::NamespaceNotFound(ns.clone()))?;
            lineage.push(ns);
            current = record.parent;
        }
        Ok(lineage)
    }
}

/// Locale parent by truncation: `fr_CA` → `fr` → `root`
pub fn truncated_parent(id: &NamespaceId) -> Option<NamespaceId> {
    if id.is_root() {
        return None;
    }
    match id.as_str().rsplit_once('_') {
        Some((parent, _)) if !parent.is_empty() => Some(NamespaceId::from(parent)),
        _ => Some(NamespaceId::root()),
    }
}

/// In-memory namespace tree
pub struct NamespaceDirectory {
    records: RwLock<BTreeMap<NamespaceId, NamespaceRecord>>,
}

impl Default for NamespaceDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl NamespaceDirectory {
    /// A tree containing only the root
    pub fn new() -> Self {
        let mut records = BTreeMap::new();
        records.insert(
            NamespaceId::root(),
            NamespaceRecord {
                id: NamespaceId::root(),
                parent: None,
                read_only: false,
            },
        );
        Self {
            records: RwLock::new(records),
        }
    }

    /// Build a tree from locale ids, creating truncation parents as needed
    pub fn from_locales<I, N>(locales: I, read_only: &BTreeSet<NamespaceId>) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<NamespaceId>,
    {
        let directory = Self::new();
        for locale in locales {
            directory.add_locale(locale);
        }
        for id in read_only {
            directory.set_read_only(id, true);
        }
        directory
    }

    /// Add a namespace with an explicit parent
    pub fn insert(&self, id: impl Into<NamespaceId>, parent: Option<NamespaceId>) {
        let id = id.into();
        self.records.write().insert(
            id.clone(),
            NamespaceRecord {
                id,
                parent,
                read_only: false,
            },
        );
    }

    /// Add a locale and any missing truncation ancestors
    pub fn add_locale(&self, id: impl Into<NamespaceId>) {
        let mut next = Some(id.into());
        let mut records = self.records.write();
        while let Some(id) = next {
            if records.contains_key(&id) {
                break;
            }
            let parent = truncated_parent(&id);
            records.insert(
                id.clone(),
                NamespaceRecord {
                    id,
                    parent: parent.clone(),
                    read_only: false,
                },
            );
            next = parent;
        }
    }

    /// Returns false if the namespace is unknown
    pub fn set_read_only(&self, id: &NamespaceId, read_only: bool) -> bool {
        match self.records.write().get_mut(id) {
            Some(record) => {
                record.read_only = read_only;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl NamespaceTree for NamespaceDirectory {
    fn namespace(&self, id: &NamespaceId) -> Option<NamespaceRecord> {
        self.records.read().get(id).cloned()
    }

    fn children_of(&self, id: &NamespaceId) -> Vec<NamespaceId> {
        self.records
            .read()
            .values()
            .filter(|record| record.parent.as_ref() == Some(id))
            .map(|record| record.id.clone())
            .collect()
    }
}
