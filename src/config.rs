//! Configuration System
//!
//! Layered configuration for the ballot engine: built-in defaults, a global
//! file, workspace files and `BALLOT__*` environment overrides, validated as a
//! whole before use.

use crate::logging::LoggingConfig;
use crate::types::NamespaceId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

mod facade;
mod merge;
mod sources;

pub use facade::ConfigLoader;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BallotConfig {
    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub voting: VotingConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Namespace cache bounds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Resident working sets before least-recently-used eviction
    #[serde(default = "default_max_namespaces")]
    pub max_namespaces: usize,

    /// Seconds without access before a working set expires; 0 disables expiry
    #[serde(default = "default_idle_expiry_secs")]
    pub idle_expiry_secs: u64,

    /// Budget for loading one namespace from the stores
    #[serde(default = "default_load_timeout_ms")]
    pub load_timeout_ms: u64,
}

fn default_max_namespaces() -> usize {
    64
}

fn default_idle_expiry_secs() -> u64 {
    30 * 60
}

fn default_load_timeout_ms() -> u64 {
    30_000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_namespaces: default_max_namespaces(),
            idle_expiry_secs: default_idle_expiry_secs(),
            load_timeout_ms: default_load_timeout_ms(),
        }
    }
}

impl CacheConfig {
    pub fn idle_expiry(&self) -> Option<Duration> {
        (self.idle_expiry_secs > 0).then(|| Duration::from_secs(self.idle_expiry_secs))
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }
}

/// Phase of the voting cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VotingPhase {
    #[default]
    Submission,
    Vetting,
    /// Only admins may vote
    Closed,
}

/// Voting rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotingConfig {
    #[serde(default)]
    pub phase: VotingPhase,

    /// Winning score needed for approved status
    #[serde(default = "default_required_votes")]
    pub required_votes: u64,

    /// Permanent votes for one value that lock a path
    #[serde(default = "default_permanent_votes_to_lock")]
    pub permanent_votes_to_lock: usize,

    #[serde(default)]
    pub value_limits: ValueLimits,

    /// Namespaces nobody may vote in
    #[serde(default)]
    pub read_only_namespaces: BTreeSet<NamespaceId>,
}

fn default_required_votes() -> u64 {
    8
}

fn default_permanent_votes_to_lock() -> usize {
    2
}

impl Default for VotingConfig {
    fn default() -> Self {
        Self {
            phase: VotingPhase::default(),
            required_votes: default_required_votes(),
            permanent_votes_to_lock: default_permanent_votes_to_lock(),
            value_limits: ValueLimits::default(),
            read_only_namespaces: BTreeSet::new(),
        }
    }
}

/// Maximum value length, in characters after normalization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueLimits {
    #[serde(default = "default_max_value_len")]
    pub default_max: usize,

    /// Raised limits; the first matching rule applies
    #[serde(default = "default_limit_rules")]
    pub rules: Vec<ValueLimitRule>,
}

/// Limit for paths under `path_prefix` in namespaces descending from any of
/// `namespaces`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueLimitRule {
    pub path_prefix: String,
    pub namespaces: Vec<NamespaceId>,
    pub max: usize,
}

fn default_max_value_len() -> usize {
    4096
}

fn default_limit_rules() -> Vec<ValueLimitRule> {
    vec![ValueLimitRule {
        path_prefix: "//ldml/characters/exemplarCharacters".to_string(),
        namespaces: ["ja", "ko", "zh", "zh_Hant"]
            .into_iter()
            .map(NamespaceId::from)
            .collect(),
        max: 8192,
    }]
}

impl Default for ValueLimits {
    fn default() -> Self {
        Self {
            default_max: default_max_value_len(),
            rules: default_limit_rules(),
        }
    }
}

impl ValueLimits {
    /// Limit for `path` in the namespace whose lineage (self first) is given
    pub fn limit_for(&self, lineage: &[NamespaceId], path: &str) -> usize {
        self.rules
            .iter()
            .find(|rule| {
                path.starts_with(&rule.path_prefix)
                    && lineage.iter().any(|ns| rule.namespaces.contains(ns))
            })
            .map_or(self.default_max, |rule| rule.max)
    }
}

/// Vote store settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Sled database directory
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// Deadline applied to each vote persist
    #[serde(default = "default_persist_timeout_ms")]
    pub persist_timeout_ms: u64,
}

fn default_store_path() -> PathBuf {
    PathBuf::from(".ballot/votes")
}

fn default_persist_timeout_ms() -> u64 {
    5_000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            persist_timeout_ms: default_persist_timeout_ms(),
        }
    }
}

impl StoreConfig {
    pub fn persist_timeout(&self) -> Duration {
        Duration::from_millis(self.persist_timeout_ms)
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    Cache(String),
    Voting(String),
    Store(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Cache(msg) => write!(f, "Cache: {}", msg),
            ValidationError::Voting(msg) => write!(f, "Voting: {}", msg),
            ValidationError::Store(msg) => write!(f, "Store: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl BallotConfig {
    /// Validate the entire configuration, reporting every problem found
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.cache.max_namespaces == 0 {
            errors.push(ValidationError::Cache(
                "max_namespaces must be at least 1".to_string(),
            ));
        }
        if self.cache.load_timeout_ms == 0 {
            errors.push(ValidationError::Cache(
                "load_timeout_ms must be positive".to_string(),
            ));
        }

        if self.voting.required_votes == 0 {
            errors.push(ValidationError::Voting(
                "required_votes must be positive".to_string(),
            ));
        }
        if self.voting.permanent_votes_to_lock == 0 {
            errors.push(ValidationError::Voting(
                "permanent_votes_to_lock must be at least 1".to_string(),
            ));
        }
        if self.voting.value_limits.default_max == 0 {
            errors.push(ValidationError::Voting(
                "value_limits.default_max must be positive".to_string(),
            ));
        }
        for rule in &self.voting.value_limits.rules {
            if rule.max == 0 {
                errors.push(ValidationError::Voting(format!(
                    "value limit for '{}' must be positive",
                    rule.path_prefix
                )));
            }
        }

        if self.store.path.as_os_str().is_empty() {
            errors.push(ValidationError::Store("Store path cannot be empty".to_string()));
        }
        if self.store.persist_timeout_ms == 0 {
            errors.push(ValidationError::Store(
                "persist_timeout_ms must be positive".to_string(),
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
