//! Engine configuration.
//!
//! Stored as JSON (default `~/.roster/config.json`) and overridable from the
//! environment:
//!
//! ```bash
//! ROSTER_BATCH_SIZE=25
//! ROSTER_BATCH_MAX_RETRIES=2
//! ROSTER_RESOLVE_CONCURRENCY=8
//! ROSTER_SWEEP_INTERVAL_SECS=60
//! ROSTER_LOG_FILTER=info,roster_core=debug
//! ROSTER_SNAPSHOT_PATH=/var/lib/roster/snapshot.json
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Hard ceiling the store puts on a single batch.
pub const MAX_BATCH_SIZE: usize = 25;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
    #[error("Failed to read config: {0}")]
    Read(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid value for {var}: {value}")]
    InvalidEnv { var: &'static str, value: String },
    #[error("Invalid config: {0}")]
    Invalid(String),
    #[error("Could not determine home directory")]
    NoHomeDir,
}

/// Tunables for the membership engine and the sweeper.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Writes per batch; clamped to [`MAX_BATCH_SIZE`].
    pub batch_size: usize,
    /// Extra attempts per batch after the first failure.
    pub batch_max_retries: u32,
    /// Linear backoff step between batch attempts.
    pub batch_retry_backoff_ms: u64,
    /// Concurrent edge fetches inside one resolver pass.
    pub resolve_concurrency: usize,
    pub sweep_interval_secs: u64,
    pub log_filter: String,
    /// JSON snapshot backing the in-memory store, if any.
    pub snapshot_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: MAX_BATCH_SIZE,
            batch_max_retries: 2,
            batch_retry_backoff_ms: 50,
            resolve_concurrency: 8,
            sweep_interval_secs: 60,
            log_filter: "info".to_string(),
            snapshot_path: None,
        }
    }
}

impl EngineConfig {
    /// Load config from the default path, falling back to defaults when the
    /// file does not exist.
    pub fn load_or_default() -> Result<Self, ConfigError> {
        match Self::load_from(Self::default_path()?) {
            Err(ConfigError::NotFound(_)) => Ok(Self::default()),
            other => other,
        }
    }

    /// Load config from custom path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::Read(e)
            }
        })?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Save config to custom path, creating parent directories.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&self)?)?;
        Ok(())
    }

    /// Get default config path (~/.roster/config.json)
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        Ok(dirs::home_dir()
            .ok_or(ConfigError::NoHomeDir)?
            .join(".roster")
            .join("config.json"))
    }

    /// Override fields from `ROSTER_*` environment variables.
    pub fn apply_env(mut self) -> Result<Self, ConfigError> {
        if let Some(v) = parse_env("ROSTER_BATCH_SIZE")? {
            self.batch_size = v;
        }
        if let Some(v) = parse_env("ROSTER_BATCH_MAX_RETRIES")? {
            self.batch_max_retries = v;
        }
        if let Some(v) = parse_env("ROSTER_RESOLVE_CONCURRENCY")? {
            self.resolve_concurrency = v;
        }
        if let Some(v) = parse_env("ROSTER_SWEEP_INTERVAL_SECS")? {
            self.sweep_interval_secs = v;
        }
        if let Ok(filter) = env::var("ROSTER_LOG_FILTER") {
            self.log_filter = filter;
        }
        if let Ok(path) = env::var("ROSTER_SNAPSHOT_PATH") {
            self.snapshot_path = Some(PathBuf::from(path));
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1".into()));
        }
        if self.resolve_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "resolve_concurrency must be at least 1".into(),
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "sweep_interval_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Batch size actually used for writes.
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.clamp(1, MAX_BATCH_SIZE)
    }
}

fn parse_env<T: std::str::FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { var, value }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    // Serializes tests that touch process environment
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const ENV_VARS: &[&str] = &[
        "ROSTER_BATCH_SIZE",
        "ROSTER_BATCH_MAX_RETRIES",
        "ROSTER_RESOLVE_CONCURRENCY",
        "ROSTER_SWEEP_INTERVAL_SECS",
        "ROSTER_LOG_FILTER",
        "ROSTER_SNAPSHOT_PATH",
    ];

    struct EnvGuard<'a> {
        _lock: std::sync::MutexGuard<'a, ()>,
    }

    impl<'a> EnvGuard<'a> {
        fn new() -> Self {
            let lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            for var in ENV_VARS {
                env::remove_var(var);
            }
            Self { _lock: lock }
        }

        fn set(&self, key: &str, value: &str) {
            env::set_var(key, value);
        }
    }

    impl<'a> Drop for EnvGuard<'a> {
        fn drop(&mut self) {
            for var in ENV_VARS {
                env::remove_var(var);
            }
        }
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.batch_max_retries, 2);
        assert_eq!(config.resolve_concurrency, 8);
        assert_eq!(config.log_filter, "info");
        assert!(config.snapshot_path.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let config = EngineConfig {
            batch_size: 10,
            snapshot_path: Some(dir.path().join("snap.json")),
            ..EngineConfig::default()
        };
        config.save_to(&path).unwrap();

        let loaded = EngineConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "sweep_interval_secs": 5 }"#).unwrap();

        let loaded = EngineConfig::load_from(&path).unwrap();
        assert_eq!(loaded.sweep_interval_secs, 5);
        assert_eq!(loaded.batch_size, 25);
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let result = EngineConfig::load_from(dir.path().join("absent.json"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            EngineConfig::load_from(&path),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let guard = EnvGuard::new();
        guard.set("ROSTER_BATCH_SIZE", "7");
        guard.set("ROSTER_LOG_FILTER", "debug");
        guard.set("ROSTER_SNAPSHOT_PATH", "/tmp/roster.json");

        let config = EngineConfig::default().apply_env().unwrap();
        assert_eq!(config.batch_size, 7);
        assert_eq!(config.log_filter, "debug");
        assert_eq!(config.snapshot_path, Some(PathBuf::from("/tmp/roster.json")));
        assert_eq!(config.batch_max_retries, 2);
    }

    #[test]
    fn test_invalid_env_value() {
        let guard = EnvGuard::new();
        guard.set("ROSTER_RESOLVE_CONCURRENCY", "many");

        let result = EngineConfig::default().apply_env();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidEnv {
                var: "ROSTER_RESOLVE_CONCURRENCY",
                ..
            })
        ));
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let config = EngineConfig {
            batch_size: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            resolve_concurrency: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_effective_batch_size_is_clamped() {
        let config = EngineConfig {
            batch_size: 100,
            ..EngineConfig::default()
        };
        assert_eq!(config.effective_batch_size(), MAX_BATCH_SIZE);
    }
}
