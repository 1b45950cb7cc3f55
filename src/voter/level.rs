//! Voter levels, organizations, and the weights they vote with.

use serde::{Deserialize, Serialize};

/// Override weight of a permanent vote: counts toward locking a path
pub const PERMANENT_VOTES: u32 = 1000;

/// Override weight of a lock held in the ledger
pub const LOCKING_VOTES: u32 = 2000;

/// Organization a voter belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Organization {
    pub name: String,
    /// Member of the technical committee; raises vetter weight
    #[serde(default)]
    pub tc_org: bool,
}

impl Organization {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tc_org: false,
        }
    }

    pub fn tc(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tc_org: true,
        }
    }
}

/// Voter level, from least to most privileged by declaration order of power
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Locked,
    Anonymous,
    Guest,
    Vetter,
    Manager,
    Tc,
    Admin,
}

impl Level {
    /// Numeric level; lower is more powerful (0 = admin, 999 = locked)
    pub fn st_level(self) -> u32 {
        match self {
            Level::Admin => 0,
            Level::Tc => 1,
            Level::Manager => 2,
            Level::Vetter => 5,
            Level::Anonymous => 8,
            Level::Guest => 10,
            Level::Locked => 999,
        }
    }

    /// Weight a voter of this level normally votes with
    pub fn votes(self, organization: &Organization) -> u32 {
        match self {
            Level::Locked | Level::Anonymous => 0,
            Level::Guest => 1,
            Level::Vetter if organization.tc_org => 6,
            Level::Vetter | Level::Manager => 4,
            Level::Tc => 50,
            Level::Admin => 100,
        }
    }

    pub fn at_least_as_powerful_as(self, other: Level) -> bool {
        self.st_level() <= other.st_level()
    }

    pub fn is_admin(self) -> bool {
        self == Level::Admin
    }

    /// TC or admin: may vote on hidden paths, clears review flags by voting
    pub fn is_tc_or_stronger(self) -> bool {
        self.at_least_as_powerful_as(Level::Tc)
    }

    /// Whether a voter of this level can change data at all
    pub fn can_modify(self) -> bool {
        !matches!(self, Level::Locked | Level::Anonymous)
    }

    /// Explicit weights this level may choose from, beyond its own default
    pub fn vote_count_menu(self) -> &'static [u32] {
        match self {
            Level::Admin => &[1, 4, 6, 50, 100, PERMANENT_VOTES],
            Level::Tc => &[1, 4, 6, 50, PERMANENT_VOTES],
            _ => &[],
        }
    }

    /// Can a voter of this level and organization vote with `weight`?
    ///
    /// Admins may hold locks directly. Any voter may lower their own weight.
    pub fn can_vote_with_count(self, organization: &Organization, weight: u32) -> bool {
        if weight == LOCKING_VOTES {
            return self.is_admin();
        }
        let default = self.votes(organization);
        weight == default
            || (weight > 0 && weight < default)
            || self.vote_count_menu().contains(&weight)
    }

    /// Effective weight for a stored override, falling back to the level weight
    /// when the override is absent or no longer permitted
    pub fn effective_weight(self, organization: &Organization, override_weight: Option<u32>) -> u32 {
        match override_weight {
            Some(weight) if self.can_vote_with_count(organization, weight) => weight,
            _ => self.votes(organization),
        }
    }
}
