//! Configuration loading and validation for the intake cache engine.
//!
//! Settings merge in three layers: built-in defaults, an optional TOML file,
//! then `INTAKE_`-prefixed environment variables. Every loaded config is
//! validated before the engine sees it.

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::{OptionExt, ResultExt};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Tunables for the cache engine.
///
/// The defaults mirror the behaviour the portal shipped with: ~2 s write
/// visibility, 500-operation batches, 5-minute query TTL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Queue length that triggers an immediate batch flush. Matches the
    /// remote batch-size ceiling.
    pub max_batch_size: usize,
    /// Delay after the most recent enqueue before a flush fires.
    pub debounce_ms: u64,
    /// Base delay for exponential backoff between failed flush attempts.
    pub flush_backoff_base_ms: u64,
    /// Flush attempts before a batch is reported as a terminal failure
    /// through metrics.
    pub max_flush_attempts: u32,
    /// Query result cache time-to-live.
    pub query_ttl_secs: u64,
    /// How often the expired-entry sweep runs.
    pub entry_sweep_interval_secs: u64,
    /// How often the dirty-entry reconciliation sweep runs.
    pub dirty_sweep_interval_secs: u64,
    /// Entries whose last remote update is older than this are swept.
    pub entry_max_age_secs: u64,
    /// Bound on any single remote read or write.
    pub remote_timeout_secs: u64,
    /// Per-operation unit costs used by the metrics tracker.
    pub cost: CostConfig,
    /// Location of the content store database; defaults to the platform
    /// data directory when unset.
    pub db_path: Option<PathBuf>,
}

/// Linear per-operation unit costs, in account currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostConfig {
    pub read_unit: f64,
    pub write_unit: f64,
    pub delete_unit: f64,
}

impl Default for CostConfig {
    fn default() -> Self {
        // Priced per 100k operations in the target backend class.
        Self { read_unit: 0.06 / 100_000.0, write_unit: 0.18 / 100_000.0, delete_unit: 0.02 / 100_000.0 }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 500,
            debounce_ms: 2_000,
            flush_backoff_base_ms: 500,
            max_flush_attempts: 5,
            query_ttl_secs: 300,
            entry_sweep_interval_secs: 600,
            dirty_sweep_interval_secs: 30,
            entry_max_age_secs: 86_400,
            remote_timeout_secs: 15,
            cost: CostConfig::default(),
            db_path: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration: defaults, then an optional TOML file, then
    /// `INTAKE_`-prefixed environment variables (nested keys split on `__`).
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(file) = file {
            figment = figment.merge(Toml::file(file));
        }
        let config: Self = figment
            .merge(Env::prefixed("INTAKE_").split("__"))
            .extract()
            .or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        tracing::debug!(?config, "configuration loaded");
        Ok(config)
    }

    /// Validate invariants the engine relies on.
    pub fn validate(&self) -> Result<()> {
        if self.max_batch_size == 0 {
            exn::bail!(ErrorKind::Invalid("max_batch_size must be at least 1"));
        }
        if self.max_flush_attempts == 0 {
            exn::bail!(ErrorKind::Invalid("max_flush_attempts must be at least 1"));
        }
        if self.remote_timeout_secs == 0 {
            exn::bail!(ErrorKind::Invalid("remote_timeout_secs must be non-zero"));
        }
        if self.query_ttl_secs == 0 {
            exn::bail!(ErrorKind::Invalid("query_ttl_secs must be non-zero"));
        }
        Ok(())
    }

    /// Resolved path of the content store database.
    pub fn db_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.db_path {
            return Ok(path.clone());
        }
        let dirs = ProjectDirs::from("", "", "intake").ok_or_raise(|| ErrorKind::NoDataDir)?;
        Ok(dirs.data_dir().join("intake.db"))
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn flush_backoff_base(&self) -> Duration {
        Duration::from_millis(self.flush_backoff_base_ms)
    }

    pub fn query_ttl(&self) -> Duration {
        Duration::from_secs(self.query_ttl_secs)
    }

    pub fn entry_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.entry_sweep_interval_secs)
    }

    pub fn dirty_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.dirty_sweep_interval_secs)
    }

    pub fn entry_max_age(&self) -> Duration {
        Duration::from_secs(self.entry_max_age_secs)
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.max_batch_size, 500);
        assert_eq!(config.debounce(), Duration::from_secs(2));
        assert_eq!(config.query_ttl(), Duration::from_secs(300));
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = EngineConfig::load(None).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_toml_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(file, "max_batch_size = 100\ndebounce_ms = 50").unwrap();
        let config = EngineConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.max_batch_size, 100);
        assert_eq!(config.debounce_ms, 50);
        // Untouched values keep their defaults
        assert_eq!(config.query_ttl_secs, 300);
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        let mut file = tempfile::NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(file, "max_batch_size = 0").unwrap();
        let err = EngineConfig::load(Some(file.path())).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid(_)));
    }

    #[test]
    fn test_explicit_db_path_wins() {
        let config = EngineConfig { db_path: Some(PathBuf::from("/tmp/custom.db")), ..Default::default() };
        assert_eq!(config.db_path().unwrap(), PathBuf::from("/tmp/custom.db"));
    }
}
