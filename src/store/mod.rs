//! Store Collaborators
//!
//! Interfaces to the external data the engine reads and writes: the read-only
//! baseline store, the vote store, the valid-path source and the discussion
//! index. Rows are keyed by path string; path ids are process-local.

pub mod memory;
pub mod persistence;

pub use memory::{MemoryBaselineStore, MemoryForumIndex, MemoryPathSource, MemoryVoteStore};
pub use persistence::SledVoteStore;

use crate::error::StorageError;
use crate::resolver::BaselineValue;
use crate::types::{Deadline, NamespaceId, Timestamp, VoteKind, VoterId};
use serde::{Deserialize, Serialize};

/// A persisted vote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRow {
    pub namespace: NamespaceId,
    pub path: String,
    pub voter: VoterId,
    pub value: String,
    pub override_weight: Option<u32>,
    pub cast_at: Timestamp,
    pub kind: VoteKind,
}

/// A persisted lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRow {
    pub namespace: NamespaceId,
    pub path: String,
    pub value: String,
    pub locked_at: Timestamp,
}

/// A superseded proposal kept as a candidate
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlternateRow {
    pub namespace: NamespaceId,
    pub path: String,
    pub value: String,
}

/// A review flag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagRow {
    pub namespace: NamespaceId,
    pub path: String,
    pub flagged_by: VoterId,
    pub flagged_at: Timestamp,
}

/// Lock-table change carried by a vote write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockChange {
    Set(LockRow),
    Clear,
}

/// Everything one accepted vote changes in the store, applied all-or-nothing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteWrite {
    pub namespace: NamespaceId,
    pub path: String,
    /// Rows to insert or replace
    pub upserts: Vec<VoteRow>,
    /// Voters whose row for this path is removed
    pub deletes: Vec<VoterId>,
    pub lock: Option<LockChange>,
    pub alternate: Option<AlternateRow>,
    pub clear_flag: bool,
}

impl VoteWrite {
    pub fn new(namespace: NamespaceId, path: impl Into<String>) -> Self {
        Self {
            namespace,
            path: path.into(),
            upserts: Vec::new(),
            deletes: Vec::new(),
            lock: None,
            alternate: None,
            clear_flag: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty()
            && self.deletes.is_empty()
            && self.lock.is_none()
            && self.alternate.is_none()
            && !self.clear_flag
    }
}

/// Flag change persisted outside a vote
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlagChange {
    Set(FlagRow),
    Clear { namespace: NamespaceId, path: String },
}

/// Visibility of a path to voters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PathVisibility {
    #[default]
    Visible,
    /// Votable by TC and above only
    Hidden,
    /// Shown to everyone, votable by TC and above only
    ReadOnly,
    /// Never votable
    Deprecated,
}

/// Read-only store of pre-voting values
pub trait BaselineStore: Send + Sync {
    fn read_baseline(
        &self,
        namespace: &NamespaceId,
        path: &str,
    ) -> Result<Option<BaselineValue>, StorageError>;
}

/// Durable store of votes, locks, alternates and flags
pub trait VoteStore: Send + Sync {
    fn query_votes(&self, namespace: &NamespaceId) -> Result<Vec<VoteRow>, StorageError>;

    fn query_locks(&self, namespace: &NamespaceId) -> Result<Vec<LockRow>, StorageError>;

    fn query_alternates(&self, namespace: &NamespaceId) -> Result<Vec<AlternateRow>, StorageError>;

    /// Every flag in every namespace
    fn query_flags(&self) -> Result<Vec<FlagRow>, StorageError>;

    /// Apply a vote write atomically, or fail without applying any of it
    fn persist_vote(&self, write: &VoteWrite, deadline: Deadline) -> Result<(), StorageError>;

    fn persist_flag(&self, change: &FlagChange, deadline: Deadline) -> Result<(), StorageError>;
}

/// Source of the set of valid paths per namespace
pub trait PathSource: Send + Sync {
    fn paths_for(&self, namespace: &NamespaceId) -> Result<Vec<String>, StorageError>;

    fn visibility(&self, _namespace: &NamespaceId, _path: &str) -> PathVisibility {
        PathVisibility::Visible
    }
}

/// Discussion index consulted for permanent votes
pub trait ForumIndex: Send + Sync {
    fn post_count(&self, namespace: &NamespaceId, path: &str) -> Result<usize, StorageError>;
}

/// Fail with a timeout if `deadline` has passed
pub(crate) fn check_deadline(deadline: Deadline, operation: &str) -> Result<(), StorageError> {
    if deadline.is_expired() {
        Err(StorageError::Timeout(operation.to_string()))
    } else {
        Ok(())
    }
}
