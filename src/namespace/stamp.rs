//! Change stamps: one monotonic counter per namespace id.
//!
//! Counters live in a registry owned by the cache rather than in working sets,
//! so a namespace rebuilt after eviction keeps counting from where it was.

use crate::types::NamespaceId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handle to one namespace's counter
#[derive(Debug, Clone)]
pub struct ChangeStamp(Arc<AtomicU64>);

impl ChangeStamp {
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Advance and return the new value
    pub fn bump(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }
}

#[derive(Default)]
pub struct StampRegistry {
    stamps: Mutex<HashMap<NamespaceId, ChangeStamp>>,
}

impl StampRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter for `namespace`, starting at zero on first use
    pub fn handle(&self, namespace: &NamespaceId) -> ChangeStamp {
        self.stamps
            .lock()
            .entry(namespace.clone())
            .or_insert_with(|| ChangeStamp(Arc::new(AtomicU64::new(0))))
            .clone()
    }

    /// Current value without creating a counter
    pub fn peek(&self, namespace: &NamespaceId) -> Option<u64> {
        self.stamps.lock().get(namespace).map(ChangeStamp::current)
    }
}
