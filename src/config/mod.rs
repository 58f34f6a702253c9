//! Configuration management.
//!
//! [`AndamentoConfig`] collects every tunable the engine exposes: storage
//! paths, cache windows, novelty TTL, scheduler deadline and the HTTP bind
//! address. Values come from defaults, environment variables
//! (`ANDAMENTO_*`) or builder-style setters; the binary layers them in
//! that order.

use directories::ProjectDirs;
use std::path::PathBuf;
use std::time::Duration;

/// Default HTTP bind address for `andamento serve`.
pub const DEFAULT_HTTP_ADDR: &str = "127.0.0.1:8420";

/// Main configuration for andamento.
///
/// # Environment Variables
///
/// | Variable | Type | Default | Description |
/// |----------|------|---------|-------------|
/// | `ANDAMENTO_DATA_DIR` | path | platform data dir | Where the SQLite database lives |
/// | `ANDAMENTO_FIXTURES_DIR` | path | unset | Serve fetches from JSON fixtures instead of a live client |
/// | `ANDAMENTO_CACHE_FRESH_TTL_SECS` | u64 | `5` | Coalescing/freshness window of the memory tier |
/// | `ANDAMENTO_CACHE_STALE_TTL_SECS` | u64 | `1800` | Serve-stale window of the memory tier |
/// | `ANDAMENTO_CACHE_PERSISTENT_TTL_SECS` | u64 | `86400` | Persistent cache tier TTL |
/// | `ANDAMENTO_NOVELTY_TTL_SECS` | u64 | `172800` | Novelty visibility window (48 h) |
/// | `ANDAMENTO_REQUEST_TIMEOUT_SECS` | u64 | `300` | Per-request scheduler queue deadline |
/// | `ANDAMENTO_SWEEP_INTERVAL_SECS` | u64 | `3600` | Interval between maintenance sweeps |
/// | `ANDAMENTO_HTTP_ADDR` | addr | `127.0.0.1:8420` | Bind address for the HTTP surface |
#[derive(Debug, Clone)]
pub struct AndamentoConfig {
    /// Directory holding the SQLite database.
    pub data_dir: PathBuf,
    /// Directory of JSON fixtures backing the fetch capability, when set.
    pub fixtures_dir: Option<PathBuf>,
    /// Memory-tier freshness/coalescing window.
    pub cache_fresh_ttl: Duration,
    /// Memory-tier serve-stale window.
    pub cache_stale_ttl: Duration,
    /// Persistent cache tier TTL in seconds.
    pub cache_persistent_ttl_secs: u64,
    /// Novelty visibility window in seconds.
    pub novelty_ttl_secs: u64,
    /// Per-request scheduler queue deadline.
    pub request_timeout: Duration,
    /// Interval between maintenance sweeps.
    pub sweep_interval: Duration,
    /// Bind address for the HTTP surface.
    pub http_addr: String,
}

impl Default for AndamentoConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            fixtures_dir: None,
            cache_fresh_ttl: Duration::from_secs(5),
            cache_stale_ttl: Duration::from_secs(1800),
            cache_persistent_ttl_secs: 86_400,
            novelty_ttl_secs: 48 * 3600,
            request_timeout: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(3600),
            http_addr: DEFAULT_HTTP_ADDR.to_string(),
        }
    }
}

impl AndamentoConfig {
    /// Loads the default configuration with environment overrides applied.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("ANDAMENTO_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("ANDAMENTO_FIXTURES_DIR") {
            config.fixtures_dir = Some(PathBuf::from(dir));
        }
        if let Some(secs) = env_parse::<u64>("ANDAMENTO_CACHE_FRESH_TTL_SECS") {
            config.cache_fresh_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("ANDAMENTO_CACHE_STALE_TTL_SECS") {
            config.cache_stale_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("ANDAMENTO_CACHE_PERSISTENT_TTL_SECS") {
            config.cache_persistent_ttl_secs = secs;
        }
        if let Some(secs) = env_parse::<u64>("ANDAMENTO_NOVELTY_TTL_SECS") {
            config.novelty_ttl_secs = secs.max(1);
        }
        if let Some(secs) = env_parse::<u64>("ANDAMENTO_REQUEST_TIMEOUT_SECS") {
            config.request_timeout = Duration::from_secs(secs.max(1));
        }
        if let Some(secs) = env_parse::<u64>("ANDAMENTO_SWEEP_INTERVAL_SECS") {
            config.sweep_interval = Duration::from_secs(secs.max(60));
        }
        if let Ok(addr) = std::env::var("ANDAMENTO_HTTP_ADDR") {
            config.http_addr = addr;
        }

        config
    }

    /// Sets the data directory.
    #[must_use]
    pub fn with_data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_dir = path.into();
        self
    }

    /// Sets the fixtures directory backing the fetch capability.
    #[must_use]
    pub fn with_fixtures_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.fixtures_dir = Some(path.into());
        self
    }

    /// Sets the novelty visibility window.
    #[must_use]
    pub const fn with_novelty_ttl_secs(mut self, secs: u64) -> Self {
        self.novelty_ttl_secs = secs;
        self
    }

    /// Sets the per-request scheduler deadline.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Path of the SQLite database file.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("andamento.db")
    }
}

/// Platform data directory, falling back to a dot directory in CWD.
fn default_data_dir() -> PathBuf {
    ProjectDirs::from("", "", "andamento")
        .map_or_else(|| PathBuf::from(".andamento"), |dirs| dirs.data_dir().to_path_buf())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AndamentoConfig::default();
        assert_eq!(config.cache_fresh_ttl, Duration::from_secs(5));
        assert_eq!(config.novelty_ttl_secs, 48 * 3600);
        assert_eq!(config.request_timeout, Duration::from_secs(300));
        assert!(config.fixtures_dir.is_none());
        assert_eq!(config.http_addr, DEFAULT_HTTP_ADDR);
    }

    #[test]
    fn test_db_path_under_data_dir() {
        let config = AndamentoConfig::default().with_data_dir("/tmp/andamento-test");
        assert_eq!(config.db_path(), PathBuf::from("/tmp/andamento-test/andamento.db"));
    }

    #[test]
    fn test_builder_setters() {
        let config = AndamentoConfig::default()
            .with_fixtures_dir("/tmp/fixtures")
            .with_novelty_ttl_secs(3600)
            .with_request_timeout(Duration::from_secs(30));
        assert_eq!(config.fixtures_dir, Some(PathBuf::from("/tmp/fixtures")));
        assert_eq!(config.novelty_ttl_secs, 3600);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }
}
