//! Core identifier types shared across the ballot engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// Wall-clock timestamp attached to votes, locks and ledger modifications
pub type Timestamp = DateTime<Utc>;

/// Reserved value meaning "inherit whatever the parent chain provides"
pub const INHERITANCE_MARKER: &str = "↑↑↑";

/// Identifier of a namespace (a locale such as `fr` or `fr_CA`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NamespaceId(String);

impl NamespaceId {
    pub fn new(id: impl Into<String>) -> Self {
        NamespaceId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The root namespace every tree hangs from
    pub fn root() -> Self {
        NamespaceId("root".to_string())
    }

    pub fn is_root(&self) -> bool {
        self.0 == "root"
    }
}

impl fmt::Display for NamespaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NamespaceId {
    fn from(value: &str) -> Self {
        NamespaceId(value.to_string())
    }
}

impl From<String> for NamespaceId {
    fn from(value: String) -> Self {
        NamespaceId(value)
    }
}

/// Compact, process-local identifier for a distinguishing path
///
/// Allocated by [`crate::path::PathRegistry`]. Never persisted: stores key their
/// rows by the path string, so ids may differ between process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathId(pub(crate) u32);

impl PathId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifier of a voter in the voter-weight directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoterId(pub u32);

impl fmt::Display for VoterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "voter:{}", self.0)
    }
}

/// How a vote entered the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VoteKind {
    /// Cast interactively by the voter
    #[default]
    Direct,
    /// Carried over automatically from a previous release; never carries an override
    AutoImport,
    /// Imported on the voter's explicit request
    ManualImport,
    /// Arrived through a bulk submission
    BulkUpload,
}

/// Caller-supplied deadline for store I/O
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// No deadline: the call may block as long as the store needs
    pub fn none() -> Self {
        Deadline(None)
    }

    pub fn after(timeout: Duration) -> Self {
        Deadline(Some(Instant::now() + timeout))
    }

    pub fn at(instant: Instant) -> Self {
        Deadline(Some(instant))
    }

    pub fn is_expired(&self) -> bool {
        self.0.map_or(false, |at| Instant::now() >= at)
    }

    /// Time left before expiry; `None` when unbounded
    pub fn remaining(&self) -> Option<Duration> {
        self.0.map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// This deadline, or one `timeout` from now if unbounded
    pub fn or_after(self, timeout: Duration) -> Self {
        match self.0 {
            Some(_) => self,
            None => Deadline::after(timeout),
        }
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Deadline::none()
    }
}
