//! Namespace Cache
//!
//! Lazily constructs working sets, bounded by an LRU size limit and an idle
//! expiry. Construction is single-flight per namespace id: concurrent first
//! accesses share one load and one result, success or failure.
//!
//! Working sets find their parents through the cache by id, so evicting a
//! namespace never touches its ancestors. Every instance the cache drops is
//! retired; a caller still holding one is forwarded to the resident instance.

use crate::config::CacheConfig;
use crate::error::BallotError;
use crate::namespace::{InheritanceSource, NamespaceContext, NamespaceState, NamespaceWorkingSet};
use crate::types::NamespaceId;
use lru::LruCache;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tracing::{debug, info, warn};

type Construction = Arc<OnceCell<Result<Arc<NamespaceWorkingSet>, BallotError>>>;

struct Resident {
    set: Arc<NamespaceWorkingSet>,
    last_access: Instant,
}

struct CacheState {
    resident: LruCache<NamespaceId, Resident>,
    inflight: HashMap<NamespaceId, Construction>,
}

struct CacheInner {
    ctx: Arc<NamespaceContext>,
    settings: CacheConfig,
    state: Mutex<CacheState>,
    constructions: AtomicU64,
    shut_down: AtomicBool,
    this: Weak<CacheInner>,
}

/// Cache of namespace working sets
#[derive(Clone)]
pub struct NamespaceCache {
    inner: Arc<CacheInner>,
}

impl NamespaceCache {
    pub fn new(ctx: Arc<NamespaceContext>, settings: CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(settings.max_namespaces).unwrap_or(NonZeroUsize::MIN);
        let inner = Arc::new_cyclic(|this| CacheInner {
            ctx,
            settings,
            state: Mutex::new(CacheState {
                resident: LruCache::new(capacity),
                inflight: HashMap::new(),
            }),
            constructions: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
            this: this.clone(),
        });
        Self { inner }
    }

    /// Working set for `id`, constructing it and its ancestors as needed
    pub fn get(&self, id: &NamespaceId) -> Result<Arc<NamespaceWorkingSet>, BallotError> {
        self.inner.get(id)
    }

    /// Shared collaborators the working sets run against
    pub fn context(&self) -> &Arc<NamespaceContext> {
        &self.inner.ctx
    }

    /// Drop a resident namespace; returns whether one was resident
    pub fn invalidate(&self, id: &NamespaceId) -> bool {
        let evicted = self.inner.state.lock().resident.pop(id);
        match evicted {
            Some(resident) => {
                resident.set.retire();
                debug!(namespace = %id, "Namespace invalidated");
                true
            }
            None => false,
        }
    }

    /// Evict every namespace idle past the expiry; returns how many
    pub fn purge_expired(&self) -> usize {
        let Some(limit) = self.inner.settings.idle_expiry() else {
            return 0;
        };
        let now = Instant::now();
        let mut state = self.inner.state.lock();
        let expired: Vec<NamespaceId> = state
            .resident
            .iter()
            .filter(|(_, resident)| now.duration_since(resident.last_access) >= limit)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            if let Some(resident) = state.resident.pop(id) {
                resident.set.retire();
            }
        }
        drop(state);
        if !expired.is_empty() {
            let released = self.inner.ctx.lock_manager.prune();
            debug!(count = expired.len(), released, "Purged idle namespaces");
        }
        expired.len()
    }

    /// Lifecycle state of a namespace as the cache sees it
    pub fn residency(&self, id: &NamespaceId) -> NamespaceState {
        let state = self.inner.state.lock();
        if let Some(resident) = state.resident.peek(id) {
            return resident.set.state();
        }
        if state.inflight.contains_key(id) {
            NamespaceState::Loading
        } else {
            NamespaceState::Uninitialized
        }
    }

    /// Change stamp without loading the namespace
    pub fn peek_stamp(&self, id: &NamespaceId) -> Option<u64> {
        self.inner.ctx.stamps.peek(id)
    }

    /// Number of completed constructions since the cache was created
    pub fn construction_count(&self) -> u64 {
        self.inner.constructions.load(Ordering::Acquire)
    }

    pub fn resident_count(&self) -> usize {
        self.inner.state.lock().resident.len()
    }

    /// Resident namespace ids, most recently used first
    pub fn resident_ids(&self) -> Vec<NamespaceId> {
        self.inner
            .state
            .lock()
            .resident
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Refuse further lookups and drop every resident namespace
    pub fn shutdown(&self) {
        self.inner.shut_down.store(true, Ordering::Release);
        let mut state = self.inner.state.lock();
        for (_, resident) in state.resident.iter() {
            resident.set.retire();
        }
        state.resident.clear();
        state.inflight.clear();
        info!("Namespace cache shut down");
    }
}

impl CacheInner {
    fn get(&self, id: &NamespaceId) -> Result<Arc<NamespaceWorkingSet>, BallotError> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(BallotError::CacheShutdown);
        }

        let cell = {
            let mut state = self.state.lock();
            let now = Instant::now();
            let idle_limit = self.settings.idle_expiry();
            let mut stale = false;
            if let Some(resident) = state.resident.get_mut(id) {
                let expired = idle_limit
                    .map_or(false, |limit| now.duration_since(resident.last_access) >= limit);
                if !expired && !resident.set.is_poisoned() {
                    resident.last_access = now;
                    return Ok(resident.set.clone());
                }
                stale = true;
            }
            if stale {
                if let Some(resident) = state.resident.pop(id) {
                    resident.set.retire();
                    if resident.set.is_poisoned() {
                        warn!(namespace = %id, "Evicting poisoned namespace");
                    } else {
                        debug!(namespace = %id, "Evicting idle namespace");
                    }
                }
            }
            state
                .inflight
                .entry(id.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        cell.get_or_init(|| self.install(id, &cell)).clone()
    }

    /// Construct and make resident; runs once per in-flight cell
    fn install(
        &self,
        id: &NamespaceId,
        cell: &Construction,
    ) -> Result<Arc<NamespaceWorkingSet>, BallotError> {
        let result = self.construct(id);
        let mut state = self.state.lock();
        if state
            .inflight
            .get(id)
            .map_or(false, |current| Arc::ptr_eq(current, cell))
        {
            state.inflight.remove(id);
        }
        match &result {
            Ok(set) if !self.shut_down.load(Ordering::Acquire) => {
                let resident = Resident {
                    set: set.clone(),
                    last_access: Instant::now(),
                };
                if let Some((evicted, replaced)) = state.resident.push(id.clone(), resident) {
                    replaced.set.retire();
                    if &evicted != id {
                        debug!(namespace = %evicted, "Evicting least recently used namespace");
                    }
                }
            }
            Ok(_) => {}
            Err(err) => {
                warn!(namespace = %id, error = %err, "Namespace construction failed");
            }
        }
        result
    }

    fn construct(&self, id: &NamespaceId) -> Result<Arc<NamespaceWorkingSet>, BallotError> {
        let record = self
            .ctx
            .tree
            .namespace(id)
            .ok_or_else(|| BallotError::NamespaceNotFound(id.clone()))?;
        let lineage = self.ctx.tree.ancestry(id)?;

        // Parents first, before taking this namespace's gate
        if let Some(parent) = &record.parent {
            self.get(parent)?;
        }

        let gate = self.ctx.lock_manager.get_lock(id);
        let _guard = gate.write();
        let started = Instant::now();
        let inheritance: Weak<dyn InheritanceSource> = self.this.clone();
        let set = NamespaceWorkingSet::load(self.ctx.clone(), record, lineage, inheritance)?;
        self.constructions.fetch_add(1, Ordering::AcqRel);
        info!(
            namespace = %id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Namespace constructed"
        );
        Ok(Arc::new(set))
    }
}

impl InheritanceSource for CacheInner {
    fn working_set(&self, id: &NamespaceId) -> Result<Arc<NamespaceWorkingSet>, BallotError> {
        self.get(id)
    }
}
