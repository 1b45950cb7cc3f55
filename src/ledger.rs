//! Vote Ledger
//!
//! Per (namespace, path) record of who voted for what. A ledger is owned by
//! exactly one namespace working set; it carries no reference back to it.

use crate::types::{Timestamp, VoteKind, VoterId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One voter's current vote on one path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub value: String,
    /// Weight replacing the voter's level weight, if any
    pub override_weight: Option<u32>,
    pub cast_at: Timestamp,
    pub kind: VoteKind,
}

/// Votes by voter for a single path
///
/// An empty ledger is equivalent to no ledger at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoteLedger {
    votes: BTreeMap<VoterId, VoteRecord>,
    /// Superseded proposals still offered as candidates for display
    other_values: BTreeSet<String>,
    last_modified: Option<Timestamp>,
}

impl VoteLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cast, replace or (with `None`) withdraw a voter's vote
    ///
    /// Returns the record that was replaced or removed.
    pub fn set_vote(
        &mut self,
        voter: VoterId,
        value: Option<String>,
        override_weight: Option<u32>,
        cast_at: Timestamp,
        kind: VoteKind,
    ) -> Option<VoteRecord> {
        match value {
            Some(value) => {
                let previous = self.votes.insert(
                    voter,
                    VoteRecord {
                        value,
                        override_weight,
                        cast_at,
                        kind,
                    },
                );
                if self.last_modified.map_or(true, |last| last < cast_at) {
                    self.last_modified = Some(cast_at);
                }
                previous
            }
            None => {
                let removed = self.votes.remove(&voter);
                if removed.is_some() {
                    self.recompute_last_modified();
                }
                removed
            }
        }
    }

    /// Remove every vote cast with exactly this override weight
    ///
    /// Returns the voters whose votes were removed.
    pub fn remove_overrides_matching(&mut self, weight: u32) -> Vec<VoterId> {
        let doomed: Vec<VoterId> = self
            .votes
            .iter()
            .filter(|(_, record)| record.override_weight == Some(weight))
            .map(|(voter, _)| *voter)
            .collect();
        for voter in &doomed {
            self.votes.remove(voter);
        }
        if !doomed.is_empty() {
            self.recompute_last_modified();
        }
        doomed
    }

    pub fn votes_for_value(&self, value: &str) -> BTreeSet<VoterId> {
        self.votes
            .iter()
            .filter(|(_, record)| record.value == value)
            .map(|(voter, _)| *voter)
            .collect()
    }

    /// Number of votes for `value` cast with the given override weight
    pub fn count_overrides_for_value(&self, value: &str, weight: u32) -> usize {
        self.votes
            .values()
            .filter(|record| record.value == value && record.override_weight == Some(weight))
            .count()
    }

    pub fn vote(&self, voter: VoterId) -> Option<&VoteRecord> {
        self.votes.get(&voter)
    }

    pub fn vote_value(&self, voter: VoterId) -> Option<&str> {
        self.votes.get(&voter).map(|record| record.value.as_str())
    }

    pub fn did_vote(&self, voter: VoterId) -> bool {
        self.votes.contains_key(&voter)
    }

    pub fn votes(&self) -> impl Iterator<Item = (&VoterId, &VoteRecord)> {
        self.votes.iter()
    }

    pub fn overrides_per_voter(&self) -> BTreeMap<VoterId, u32> {
        self.votes
            .iter()
            .filter_map(|(voter, record)| record.override_weight.map(|w| (*voter, w)))
            .collect()
    }

    pub fn add_other_value(&mut self, value: String) {
        self.other_values.insert(value);
    }

    pub fn other_values(&self) -> &BTreeSet<String> {
        &self.other_values
    }

    /// Latest timestamp among current votes; `None` once the ledger is empty
    pub fn last_modified(&self) -> Option<Timestamp> {
        self.last_modified
    }

    pub fn len(&self) -> usize {
        self.votes.len()
    }

    /// No votes (superseded values do not count)
    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }

    /// Whether the ledger holds anything worth keeping around
    pub fn has_content(&self) -> bool {
        !self.votes.is_empty() || !self.other_values.is_empty()
    }

    fn recompute_last_modified(&mut self) {
        self.last_modified = self.votes.values().map(|record| record.cast_at).max();
    }
}
