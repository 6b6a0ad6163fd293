//! Configuration loading and management
//!
//! File-backed settings are loaded from `~/.config/tracelore/config.toml`.
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/tracelore/` (~/.config/tracelore/)
//! - Data: `$XDG_DATA_HOME/tracelore/` (~/.local/share/tracelore/)
//! - State/Logs: `$XDG_STATE_HOME/tracelore/` (~/.local/state/tracelore/)
//! - Locks: `$XDG_RUNTIME_DIR/tracelore/` (falls back to the temp dir)
//!
//! The ingestion engine itself never reads these files: it receives an
//! immutable [`IngestConfig`] value constructed once at startup. There is no
//! process-wide mutable configuration.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Returns XDG_RUNTIME_DIR or the system temp dir
fn xdg_runtime_dir() -> PathBuf {
    match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => std::env::temp_dir(),
    }
}

// ============================================
// File-backed settings (config.toml)
// ============================================

/// Main configuration struct, deserialized from config.toml.
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Ingestion defaults
    #[serde(default)]
    pub ingest: IngestSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Ingestion defaults from the config file; CLI flags override these.
#[derive(Debug, Deserialize)]
pub struct IngestSettings {
    /// Root directory to scan for session logs
    pub root: Option<PathBuf>,

    /// Glob pattern for log files, relative to the root
    #[serde(default = "default_pattern")]
    pub pattern: String,

    /// Events per batch before a flush is forced
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Milliseconds a partial batch may sit before a flush is forced
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,

    /// Milliseconds between scans for new bytes
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Seconds a missing file is kept before its tracking state is dropped
    #[serde(default = "default_stale_grace_secs")]
    pub stale_grace_secs: u64,

    /// Override the lock file location
    pub lock_path: Option<PathBuf>,

    /// Tag ingested events with this project when the log line has none
    pub project: Option<String>,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            root: None,
            pattern: default_pattern(),
            batch_size: default_batch_size(),
            batch_timeout_ms: default_batch_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            stale_grace_secs: default_stale_grace_secs(),
            lock_path: None,
            project: None,
        }
    }
}

fn default_pattern() -> String {
    "*.jsonl".to_string()
}

fn default_batch_size() -> usize {
    50
}

fn default_batch_timeout_ms() -> u64 {
    500
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_stale_grace_secs() -> u64 {
    60
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Returns the default config file path
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("tracelore").join("config.toml")
    }

    /// Returns the data directory path (for the SQLite database)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("tracelore")
    }

    /// Returns the state directory path (for logs)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("tracelore")
    }

    /// Returns the runtime directory path (for lock files)
    pub fn runtime_dir() -> PathBuf {
        xdg_runtime_dir().join("tracelore")
    }

    /// Returns the database file path
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("data.db")
    }

    /// Returns the log file path
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("tracelore.log")
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// This is mainly for CLI binaries that want explicit, stable path
    /// behavior before invoking other components that read these env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}

// ============================================
// Engine configuration (immutable)
// ============================================

/// How the ingestion engine terminates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestMode {
    /// Drain to quiescence, then stop
    OneShot,
    /// Keep tailing until cancelled
    Watch,
}

/// Quiescence detection policy for one-shot mode.
///
/// The scanner is considered drained once `idle_checks` consecutive polls
/// produce no new bytes while nothing is pending in the pipeline. `max_wait`
/// is a safety bound against a producer that never stops writing; it is not
/// part of the correctness argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainPolicy {
    pub idle_checks: u32,
    pub max_wait: Duration,
}

impl Default for DrainPolicy {
    fn default() -> Self {
        Self {
            idle_checks: 5,
            max_wait: Duration::from_secs(30),
        }
    }
}

/// Immutable engine configuration, constructed once at startup.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Root directory to scan
    pub root: PathBuf,
    /// Glob pattern for log files, relative to the root
    pub pattern: String,
    /// Events per batch before a flush is forced
    pub batch_size: usize,
    /// How long a partial batch may sit before a flush is forced
    pub batch_timeout: Duration,
    /// Delay between scans for new bytes
    pub poll_interval: Duration,
    /// How long a missing file is kept before its state is dropped
    pub stale_grace: Duration,
    /// Bounded capacity of the internal event queue
    pub queue_capacity: usize,
    /// Commit attempts per batch before escalating
    pub flush_retries: u32,
    /// One-shot or watch
    pub mode: IngestMode,
    /// Quiescence policy for one-shot mode
    pub drain: DrainPolicy,
    /// Override the lock file location
    pub lock_path: Option<PathBuf>,
    /// Tag ingested events with this project when the log line has none
    pub project: Option<String>,
}

impl IngestConfig {
    /// Defaults for the given root directory.
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            pattern: default_pattern(),
            batch_size: default_batch_size(),
            batch_timeout: Duration::from_millis(default_batch_timeout_ms()),
            poll_interval: Duration::from_millis(default_poll_interval_ms()),
            stale_grace: Duration::from_secs(default_stale_grace_secs()),
            queue_capacity: 1024,
            flush_retries: 3,
            mode: IngestMode::OneShot,
            drain: DrainPolicy::default(),
            lock_path: None,
            project: None,
        }
    }

    /// Merge file-backed settings under this root.
    pub fn from_settings(root: PathBuf, settings: &IngestSettings) -> Self {
        let mut config = Self::new(root);
        config.pattern = settings.pattern.clone();
        config.batch_size = settings.batch_size;
        config.batch_timeout = Duration::from_millis(settings.batch_timeout_ms);
        config.poll_interval = Duration::from_millis(settings.poll_interval_ms);
        config.stale_grace = Duration::from_secs(settings.stale_grace_secs);
        config.lock_path = settings.lock_path.clone();
        config.project = settings.project.clone();
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.ingest.pattern, "*.jsonl");
        assert_eq!(config.ingest.batch_size, 50);
        assert_eq!(config.ingest.batch_timeout_ms, 500);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[ingest]
root = "/var/log/agents"
pattern = "**/*.jsonl"
batch_size = 100
batch_timeout_ms = 250

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(
            config.ingest.root.as_deref(),
            Some(std::path::Path::new("/var/log/agents"))
        );
        assert_eq!(config.ingest.pattern, "**/*.jsonl");
        assert_eq!(config.ingest.batch_size, 100);
        assert_eq!(config.ingest.batch_timeout_ms, 250);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_ingest_config_defaults() {
        let config = IngestConfig::new(PathBuf::from("/tmp/logs"));
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.batch_timeout, Duration::from_millis(500));
        assert_eq!(config.mode, IngestMode::OneShot);
        assert_eq!(config.drain.idle_checks, 5);
        assert!(config.lock_path.is_none());
    }

    #[test]
    fn test_from_settings() {
        let settings = IngestSettings {
            pattern: "sessions/*.jsonl".to_string(),
            batch_size: 10,
            project: Some("demo".to_string()),
            ..Default::default()
        };
        let config = IngestConfig::from_settings(PathBuf::from("/tmp/logs"), &settings);
        assert_eq!(config.pattern, "sessions/*.jsonl");
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.project.as_deref(), Some("demo"));
    }
}
