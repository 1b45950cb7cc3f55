//! Per-namespace exclusive sections.
//!
//! Locks are keyed by namespace id and outlive working-set instances, so a
//! vote still running against an evicted instance finishes before the
//! replacement instance loads from the store.

use crate::types::NamespaceId;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

/// Hands out one lock per namespace id
#[derive(Default)]
pub struct NamespaceLockManager {
    locks: Mutex<HashMap<NamespaceId, Arc<RwLock<()>>>>,
}

impl NamespaceLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock for `namespace`, created on first use
    ///
    /// Vote application and construction take it for writing; nothing else
    /// needs it.
    pub fn get_lock(&self, namespace: &NamespaceId) -> Arc<RwLock<()>> {
        let mut locks = self.locks.lock();
        locks
            .entry(namespace.clone())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    /// Drop locks nobody is holding or waiting on
    pub fn prune(&self) -> usize {
        let mut locks = self.locks.lock();
        let before = locks.len();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - locks.len()
    }

    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
