//! Consensus Resolver
//!
//! Turns a vote ledger, a baseline value and an inherited ("bailey") value into
//! one winning value with a source and an approval status. Pure: the same
//! inputs always produce the same output, regardless of ledger insertion order.

use crate::error::BallotError;
use crate::ledger::VoteLedger;
use crate::lock::LockEntry;
use crate::types::INHERITANCE_MARKER;
use crate::voter::{VoterSnapshot, LOCKING_VOTES};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

/// Approval status of a resolved value, from weakest to strongest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Missing,
    Unconfirmed,
    Provisional,
    Contributed,
    Approved,
}

/// Pre-voting value read from the baseline store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineValue {
    pub value: String,
    #[serde(default = "BaselineValue::default_status")]
    pub status: ApprovalStatus,
}

impl BaselineValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            status: Self::default_status(),
        }
    }

    pub fn with_status(value: impl Into<String>, status: ApprovalStatus) -> Self {
        Self {
            value: value.into(),
            status,
        }
    }

    fn default_status() -> ApprovalStatus {
        ApprovalStatus::Approved
    }
}

/// Where a resolved value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WinningSource {
    /// The baseline value won (possibly supported by votes)
    Baseline,
    /// A voted value other than the baseline won
    VoteMajority,
    /// An active lock pinned the value
    Locked,
    /// No local candidate; the bailey value applies
    Inherited,
    /// No local candidate and nothing to inherit
    Missing,
}

/// One candidate and its score
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyEntry {
    pub value: String,
    pub score: u64,
    pub voters: usize,
}

/// Output of one resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedValue {
    /// Winning value; the inheritance marker when the winner equals the bailey
    pub value: Option<String>,
    pub source: WinningSource,
    pub status: ApprovalStatus,
    /// More than one candidate carries votes, or the voted candidate lost
    pub disputed: bool,
    /// Candidates ranked in resolution order
    pub tally: Vec<TallyEntry>,
    /// Inherited value the marker stands for
    pub bailey: Option<String>,
}

impl ResolvedValue {
    /// The value with the inheritance marker replaced by the bailey value
    pub fn effective_value(&self) -> Option<&str> {
        match self.value.as_deref() {
            Some(INHERITANCE_MARKER) => self.bailey.as_deref(),
            other => other,
        }
    }

    pub fn is_inherited(&self) -> bool {
        self.value.as_deref() == Some(INHERITANCE_MARKER) || self.source == WinningSource::Inherited
    }

    /// Score of the winning candidate (0 for locks and inherited values)
    pub fn winning_score(&self) -> u64 {
        match (&self.value, self.source) {
            (Some(value), WinningSource::Baseline | WinningSource::VoteMajority) => self
                .tally
                .iter()
                .find(|entry| &entry.value == value)
                .map_or(0, |entry| entry.score),
            _ => 0,
        }
    }
}

/// Everything a resolution reads
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolverInput<'a> {
    pub baseline: Option<&'a BaselineValue>,
    /// Effective value inherited from the parent chain
    pub bailey: Option<&'a str>,
    pub ledger: Option<&'a VoteLedger>,
    pub lock: Option<&'a LockEntry>,
}

/// Collapse the bailey value and the marker to the marker
pub fn normalize_candidate(value: &str, bailey: Option<&str>) -> String {
    if value == INHERITANCE_MARKER || bailey == Some(value) {
        INHERITANCE_MARKER.to_string()
    } else {
        value.to_string()
    }
}

/// Weighted-consensus resolver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsensusResolver {
    required_votes: u64,
}

impl Default for ConsensusResolver {
    fn default() -> Self {
        Self { required_votes: 8 }
    }
}

#[derive(Default)]
struct Candidate {
    score: u64,
    voters: usize,
    organizations: BTreeSet<String>,
}

impl ConsensusResolver {
    pub fn new(required_votes: u64) -> Self {
        Self { required_votes }
    }

    pub fn required_votes(&self) -> u64 {
        self.required_votes
    }

    /// Resolve one (namespace, path)
    ///
    /// 1. An active lock wins outright
    /// 2. Candidates are the baseline plus every distinct voted value, each
    ///    normalized against the bailey value
    /// 3. Each vote adds its voter's effective weight to its candidate
    /// 4. Candidates are ranked by score, then baseline, then the marker, then
    ///    code-point order; the first one wins
    ///
    /// Fails with `UnknownVoter` if a vote references a voter missing from
    /// `voters`.
    pub fn resolve(
        &self,
        input: ResolverInput<'_>,
        voters: &VoterSnapshot,
    ) -> Result<ResolvedValue, BallotError> {
        let bailey = input.bailey.map(str::to_string);

        if let Some(locked) = input.lock.and_then(LockEntry::locked_value) {
            return Ok(ResolvedValue {
                value: Some(normalize_candidate(locked, input.bailey)),
                source: WinningSource::Locked,
                status: ApprovalStatus::Approved,
                disputed: false,
                tally: Vec::new(),
                bailey,
            });
        }

        let baseline = input
            .baseline
            .map(|b| normalize_candidate(&b.value, input.bailey));

        let mut candidates: BTreeMap<String, Candidate> = BTreeMap::new();
        if let Some(baseline) = &baseline {
            candidates.entry(baseline.clone()).or_default();
        }
        if let Some(ledger) = input.ledger {
            for (voter, record) in ledger.votes() {
                // Locking weight acts through the lock table only
                if record.override_weight == Some(LOCKING_VOTES) {
                    continue;
                }
                let info = voters.get_or_error(*voter)?;
                let value = normalize_candidate(&record.value, input.bailey);
                let candidate = candidates.entry(value).or_default();
                candidate.score += u64::from(info.effective_weight(record.override_weight));
                candidate.voters += 1;
                candidate.organizations.insert(info.organization.name.clone());
            }
        }

        if candidates.is_empty() {
            let source = if bailey.is_some() {
                WinningSource::Inherited
            } else {
                WinningSource::Missing
            };
            let status = if bailey.is_some() {
                ApprovalStatus::Unconfirmed
            } else {
                ApprovalStatus::Missing
            };
            return Ok(ResolvedValue {
                value: bailey.as_ref().map(|_| INHERITANCE_MARKER.to_string()),
                source,
                status,
                disputed: false,
                tally: Vec::new(),
                bailey,
            });
        }

        let mut ranked: Vec<(String, Candidate)> = candidates.into_iter().collect();
        let is_baseline_value = |value: &str| baseline.as_deref() == Some(value);
        ranked.sort_by(|(a, ca), (b, cb)| {
            cb.score
                .cmp(&ca.score)
                .then_with(|| prefer(is_baseline_value(a), is_baseline_value(b)))
                .then_with(|| prefer(a == INHERITANCE_MARKER, b == INHERITANCE_MARKER))
                .then_with(|| a.cmp(b))
        });

        let (winner, winning) = &ranked[0];
        let runner_up = ranked.get(1).map_or(0, |(_, c)| c.score);
        let voted_candidates = ranked.iter().filter(|(_, c)| c.voters > 0).count();
        let disputed = voted_candidates > 1 || (voted_candidates == 1 && winning.voters == 0);

        let is_baseline = is_baseline_value(winner);
        let source = if is_baseline {
            WinningSource::Baseline
        } else {
            WinningSource::VoteMajority
        };
        let computed = self.compute_status(winning.score, runner_up, winning.organizations.len());
        let status = match input.baseline {
            Some(b) if is_baseline && winning.voters == 0 => b.status,
            Some(b) if is_baseline => computed.max(b.status),
            _ => computed,
        };

        let winner = winner.clone();
        let tally = ranked
            .into_iter()
            .map(|(value, c)| TallyEntry {
                value,
                score: c.score,
                voters: c.voters,
            })
            .collect();

        Ok(ResolvedValue {
            value: Some(winner),
            source,
            status,
            disputed,
            tally,
            bailey,
        })
    }

    /// Approval status from the winning score, runner-up score and the number
    /// of organizations behind the winner
    pub fn compute_status(&self, winning: u64, runner_up: u64, organizations: usize) -> ApprovalStatus {
        if winning > runner_up {
            if winning >= self.required_votes {
                return ApprovalStatus::Approved;
            }
            if winning >= 4 || (winning >= 2 && organizations >= 2) {
                return ApprovalStatus::Contributed;
            }
        }
        if winning >= runner_up && winning >= 2 {
            ApprovalStatus::Provisional
        } else {
            ApprovalStatus::Unconfirmed
        }
    }
}

/// `true` sorts first
fn prefer(a: bool, b: bool) -> Ordering {
    b.cmp(&a)
}
