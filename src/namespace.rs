//! Namespaces
//!
//! The per-namespace working set and what it shares with its siblings: the
//! tree it hangs in, change stamps, review flags, and change listeners.

pub mod flags;
pub mod stamp;
pub mod tree;
pub mod working_set;

pub use flags::{FlagInfo, FlagTable};
pub use stamp::{ChangeStamp, StampRegistry};
pub use tree::{truncated_parent, NamespaceDirectory, NamespaceRecord, NamespaceTree};
pub use working_set::{NamespaceWorkingSet, VoteOutcome};

use crate::concurrency::NamespaceLockManager;
use crate::config::VotingConfig;
use crate::error::BallotError;
use crate::lock::PermanentLockTable;
use crate::path::PathRegistry;
use crate::resolver::{ConsensusResolver, ResolvedValue};
use crate::store::{BaselineStore, ForumIndex, PathSource, VoteStore};
use crate::types::{NamespaceId, PathId};
use crate::voter::VoterDirectory;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Lifecycle of a namespace as seen from the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamespaceState {
    Uninitialized,
    Loading,
    Live,
    ReadOnly,
    /// Hit an internal inconsistency; rebuilt from the stores on next access
    Poisoned,
}

/// Finds working sets by id; implemented by the cache
pub trait InheritanceSource: Send + Sync {
    fn working_set(&self, id: &NamespaceId) -> Result<Arc<NamespaceWorkingSet>, BallotError>;
}

/// A resolved value that changed because of a vote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueChange {
    pub namespace: NamespaceId,
    pub path: String,
    pub path_id: PathId,
    pub previous: ResolvedValue,
    pub current: ResolvedValue,
    pub stamp: u64,
}

/// Observer of resolved-value changes; called outside any namespace lock
pub trait ChangeListener: Send + Sync {
    fn value_changed(&self, change: &ValueChange);
}

#[derive(Default, Clone)]
pub struct ListenerSet {
    listeners: Arc<RwLock<Vec<Arc<dyn ChangeListener>>>>,
}

impl ListenerSet {
    pub fn add(&self, listener: Arc<dyn ChangeListener>) {
        self.listeners.write().push(listener);
    }

    pub fn notify(&self, change: &ValueChange) {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.value_changed(change);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }
}

/// Collaborators and policy shared by every working set
pub struct NamespaceContext {
    pub tree: Arc<dyn NamespaceTree>,
    pub baseline: Arc<dyn BaselineStore>,
    pub votes: Arc<dyn VoteStore>,
    pub paths: Arc<dyn PathSource>,
    pub forum: Arc<dyn ForumIndex>,
    pub voters: Arc<dyn VoterDirectory>,
    pub registry: Arc<PathRegistry>,
    pub locks: Arc<PermanentLockTable>,
    pub flags: Arc<FlagTable>,
    pub lock_manager: Arc<NamespaceLockManager>,
    pub stamps: Arc<StampRegistry>,
    pub listeners: ListenerSet,
    pub resolver: ConsensusResolver,
    pub voting: VotingConfig,
    pub persist_timeout: Duration,
    pub load_timeout: Duration,
}
