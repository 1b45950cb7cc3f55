//! Voter-weight directory: snapshot-swapped, refreshed as a whole.

use crate::error::BallotError;
use crate::types::VoterId;
use crate::voter::source::VoterSource;
use crate::voter::VoterInfo;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Immutable view of the roster at one refresh generation
#[derive(Debug, Default)]
pub struct VoterSnapshot {
    voters: HashMap<VoterId, VoterInfo>,
    generation: u64,
}

impl VoterSnapshot {
    pub fn new(voters: Vec<VoterInfo>, generation: u64) -> Self {
        Self {
            voters: voters.into_iter().map(|v| (v.id, v)).collect(),
            generation,
        }
    }

    pub fn get(&self, voter: VoterId) -> Option<&VoterInfo> {
        self.voters.get(&voter)
    }

    pub fn get_or_error(&self, voter: VoterId) -> Result<&VoterInfo, BallotError> {
        self.get(voter).ok_or(BallotError::UnknownVoter(voter))
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.voters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voters.is_empty()
    }
}

/// Lookup of voter organization and level, shared by every namespace
pub trait VoterDirectory: Send + Sync {
    /// Current snapshot; resolutions hold on to it for their whole run
    fn snapshot(&self) -> Arc<VoterSnapshot>;

    /// Replace the snapshot with a fresh load of the whole roster
    fn refresh(&self) -> Result<(), BallotError>;

    fn weight_of(&self, voter: VoterId) -> Option<VoterInfo> {
        self.snapshot().get(voter).cloned()
    }
}

/// Directory backed by a [`VoterSource`]
pub struct VoterRegistry {
    source: Arc<dyn VoterSource>,
    current: RwLock<Arc<VoterSnapshot>>,
    refresh_gate: Mutex<()>,
}

impl VoterRegistry {
    /// Create a registry and perform the initial load
    pub fn load(source: Arc<dyn VoterSource>) -> Result<Self, BallotError> {
        let voters = source.load_voters()?;
        Ok(Self {
            source,
            current: RwLock::new(Arc::new(VoterSnapshot::new(voters, 1))),
            refresh_gate: Mutex::new(()),
        })
    }

    pub fn list_all(&self) -> Vec<VoterInfo> {
        let snapshot = self.snapshot();
        let mut voters: Vec<VoterInfo> = snapshot.voters.values().cloned().collect();
        voters.sort_by_key(|v| v.id);
        voters
    }
}

impl VoterDirectory for VoterRegistry {
    fn snapshot(&self) -> Arc<VoterSnapshot> {
        self.current.read().clone()
    }

    fn refresh(&self) -> Result<(), BallotError> {
        // Concurrent refreshers queue up; readers keep the old snapshot meanwhile
        let _gate = self.refresh_gate.lock();
        let voters = self.source.load_voters()?;
        let generation = self.current.read().generation + 1;
        let count = voters.len();
        *self.current.write() = Arc::new(VoterSnapshot::new(voters, generation));
        info!(generation, voters = count, "Voter directory refreshed");
        Ok(())
    }
}
