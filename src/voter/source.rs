//! Voter sources: where the voter-weight directory loads its roster from.

use crate::error::{BallotError, StorageError};
use crate::voter::VoterInfo;
use parking_lot::RwLock;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Backing source for the voter-weight directory
pub trait VoterSource: Send + Sync {
    /// Load the complete roster
    fn load_voters(&self) -> Result<Vec<VoterInfo>, BallotError>;
}

/// In-memory roster; voters can be added at runtime to simulate registrations
#[derive(Default)]
pub struct StaticVoterSource {
    voters: RwLock<Vec<VoterInfo>>,
}

impl StaticVoterSource {
    pub fn new(voters: Vec<VoterInfo>) -> Self {
        Self {
            voters: RwLock::new(voters),
        }
    }

    /// Add or replace a voter; visible after the next directory refresh
    pub fn upsert(&self, voter: VoterInfo) {
        let mut voters = self.voters.write();
        voters.retain(|existing| existing.id != voter.id);
        voters.push(voter);
    }
}

impl VoterSource for StaticVoterSource {
    fn load_voters(&self) -> Result<Vec<VoterInfo>, BallotError> {
        Ok(self.voters.read().clone())
    }
}

#[derive(Deserialize)]
struct RosterFile {
    #[serde(default)]
    voters: Vec<VoterInfo>,
}

/// Roster stored as a TOML file with a `[[voters]]` array
pub struct TomlVoterSource {
    path: PathBuf,
}

impl TomlVoterSource {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl VoterSource for TomlVoterSource {
    fn load_voters(&self) -> Result<Vec<VoterInfo>, BallotError> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            StorageError::Unavailable(format!(
                "Failed to read voter roster {}: {}",
                self.path.display(),
                e
            ))
        })?;
        let roster: RosterFile = toml::from_str(&content).map_err(|e| {
            StorageError::Corrupt(format!(
                "Failed to parse voter roster {}: {}",
                self.path.display(),
                e
            ))
        })?;
        Ok(roster.voters)
    }
}
