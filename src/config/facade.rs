//! Config loading facade: assembles the layered sources and validates the result.

use super::merge::merge_policy::builder_with_defaults;
use super::sources::{global_file, workspace_file};
use super::BallotConfig;
use crate::error::BallotError;
use config::{Environment, File};
use std::path::Path;
use tracing::debug;

/// Loads [`BallotConfig`] from its layered sources
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for a workspace
    ///
    /// Precedence (highest last): defaults, global file, `config/config.toml`,
    /// `config/{BALLOT_ENV}.toml`, `BALLOT__SECTION__KEY` environment variables.
    pub fn load(workspace_root: &Path) -> Result<BallotConfig, BallotError> {
        let builder = builder_with_defaults()?;
        let builder = global_file::add_to_builder(builder)?;
        let builder = workspace_file::add_to_builder(builder, workspace_root)?;
        let builder = builder.add_source(Self::environment());
        Self::finish(builder.build()?)
    }

    /// Load a single file on top of the defaults, ignoring other sources
    pub fn load_from_file(path: &Path) -> Result<BallotConfig, BallotError> {
        let config = builder_with_defaults()?
            .add_source(File::from(path).required(true))
            .build()?;
        Self::finish(config)
    }

    fn environment() -> Environment {
        Environment::with_prefix("BALLOT")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
    }

    fn finish(config: config::Config) -> Result<BallotConfig, BallotError> {
        let config: BallotConfig = config.try_deserialize()?;
        config.validate().map_err(|errors| {
            let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            BallotError::ConfigError(format!(
                "Configuration validation failed:\n{}",
                messages.join("\n")
            ))
        })?;
        debug!(
            max_namespaces = config.cache.max_namespaces,
            phase = ?config.voting.phase,
            "Configuration loaded"
        );
        Ok(config)
    }
}
