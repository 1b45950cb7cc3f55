//! Merge rules: defaults, override order, conflict handling.

use config::builder::DefaultState;
use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

/// Create a Config builder with scalar defaults applied.
///
/// Structured defaults (value-limit rules) come from serde defaults on the
/// config types.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("cache.max_namespaces", 64)?
        .set_default("cache.idle_expiry_secs", 30 * 60)?
        .set_default("cache.load_timeout_ms", 30_000)?
        .set_default("voting.phase", "submission")?
        .set_default("voting.required_votes", 8)?
        .set_default("voting.permanent_votes_to_lock", 2)?
        .set_default("store.path", ".ballot/votes")?
        .set_default("store.persist_timeout_ms", 5_000)
}
