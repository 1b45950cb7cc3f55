//! Voters
//!
//! Voter identities, the levels and organizations their vote weights derive
//! from, and the directory that every namespace consults while resolving.

pub mod level;
pub mod registry;
pub mod source;

pub use level::{Level, Organization, LOCKING_VOTES, PERMANENT_VOTES};
pub use registry::{VoterDirectory, VoterRegistry, VoterSnapshot};
pub use source::{StaticVoterSource, TomlVoterSource, VoterSource};

use crate::types::{NamespaceId, VoterId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Voter identity as known to the directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterInfo {
    pub id: VoterId,
    pub name: String,
    pub organization: Organization,
    pub level: Level,
    /// Namespaces this voter may modify; empty means all of them
    #[serde(default)]
    pub namespaces: BTreeSet<NamespaceId>,
}

impl VoterInfo {
    pub fn new(id: VoterId, name: impl Into<String>, organization: Organization, level: Level) -> Self {
        Self {
            id,
            name: name.into(),
            organization,
            level,
            namespaces: BTreeSet::new(),
        }
    }

    /// Restrict this voter to the given namespaces (and their descendants)
    pub fn with_namespaces<I, N>(mut self, namespaces: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<NamespaceId>,
    {
        self.namespaces = namespaces.into_iter().map(Into::into).collect();
        self
    }

    /// Weight this voter votes with by default
    pub fn default_weight(&self) -> u32 {
        self.level.votes(&self.organization)
    }

    /// Weight this voter contributes given a stored override
    pub fn effective_weight(&self, override_weight: Option<u32>) -> u32 {
        self.level.effective_weight(&self.organization, override_weight)
    }

    /// Why this voter may not modify `namespace`, or `None` if they may
    ///
    /// `lineage` is the namespace followed by its ancestors; a grant on an
    /// ancestor covers its descendants.
    pub fn modify_denial(&self, lineage: &[NamespaceId]) -> Option<String> {
        if !self.level.can_modify() {
            return Some(format!("level {:?} cannot modify data", self.level));
        }
        if self.namespaces.is_empty() || self.level.is_admin() {
            return None;
        }
        if lineage.iter().any(|ns| self.namespaces.contains(ns)) {
            None
        } else {
            Some(format!(
                "{} is not assigned to {}",
                self.name,
                lineage.first().map(|ns| ns.as_str()).unwrap_or("?")
            ))
        }
    }
}
