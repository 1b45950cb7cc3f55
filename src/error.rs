//! Error types for the ballot engine.

use crate::types::{NamespaceId, PathId, VoterId};
use std::fmt;
use thiserror::Error;

/// Storage-related errors
///
/// Messages are captured as strings so the error stays `Clone`: a failed
/// namespace construction is handed to every caller waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store deadline exceeded during {0}")]
    Timeout(String),

    #[error("Corrupt store record: {0}")]
    Corrupt(String),
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        StorageError::Unavailable(err.to_string())
    }
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Corrupt(err.to_string())
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Unavailable(err.to_string())
    }
}

/// Why a vote was not accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteRejection {
    NoPermission(String),
    ValueTooLong { length: usize, limit: usize },
    ForumPostRequired,
    NamespaceReadOnly,
    PhaseClosed,
}

impl fmt::Display for VoteRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoteRejection::NoPermission(why) => write!(f, "no permission: {}", why),
            VoteRejection::ValueTooLong { length, limit } => {
                write!(f, "value length {} exceeds limit of {}", length, limit)
            }
            VoteRejection::ForumPostRequired => {
                write!(f, "a discussion post is required for a permanent vote")
            }
            VoteRejection::NamespaceReadOnly => write!(f, "namespace is read-only"),
            VoteRejection::PhaseClosed => write!(f, "voting phase is closed"),
        }
    }
}

/// Errors surfaced by the ballot engine
#[derive(Debug, Clone, Error)]
pub enum BallotError {
    #[error("Invalid path for {namespace}: {path}")]
    InvalidPath { namespace: NamespaceId, path: String },

    #[error("Vote rejected in {namespace}: {reason}")]
    VoteRejected {
        namespace: NamespaceId,
        reason: VoteRejection,
    },

    #[error("Unknown voter: {0}")]
    UnknownVoter(VoterId),

    #[error("Unknown path id: {0}")]
    UnknownPathId(PathId),

    #[error("Namespace not found: {0}")]
    NamespaceNotFound(NamespaceId),

    #[error("Store error: {0}")]
    StoreUnavailable(#[from] StorageError),

    #[error("Internal inconsistency in {namespace}: {detail}")]
    InternalInconsistency {
        namespace: NamespaceId,
        detail: String,
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Namespace cache has been shut down")]
    CacheShutdown,
}

impl BallotError {
    /// Whether the caller may retry the same request unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BallotError::StoreUnavailable(StorageError::Unavailable(_))
                | BallotError::StoreUnavailable(StorageError::Timeout(_))
        )
    }

    pub(crate) fn rejected(namespace: &NamespaceId, reason: VoteRejection) -> Self {
        BallotError::VoteRejected {
            namespace: namespace.clone(),
            reason,
        }
    }

    pub(crate) fn inconsistency(namespace: &NamespaceId, detail: impl Into<String>) -> Self {
        BallotError::InternalInconsistency {
            namespace: namespace.clone(),
            detail: detail.into(),
        }
    }
}

impl From<config::ConfigError> for BallotError {
    fn from(err: config::ConfigError) -> Self {
        BallotError::ConfigError(err.to_string())
    }
}
