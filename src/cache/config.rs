//! Cache configuration.
//!
//! `CacheConfig` carries the runtime knobs of the cache: the page payload
//! size, the eviction budget, and how often the compactor is consulted.
//! Values come from `Default`, optionally overridden by a toml file and
//! then by `TSCACHE_*` environment variables. The persisted settings row
//! in the index still wins for `page_size` on an existing cache directory
//! (see [`PageIndex::open`](super::PageIndex::open)).

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use super::retry::RetryPolicy;

const MB: u64 = 1024 * 1024;

/// Runtime configuration for a [`Cache`](super::Cache) instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Size in bytes of a page payload. Immutable once any page has been
    /// written to a cache directory; a conflicting value is ignored with a
    /// warning on open.
    pub page_size: u64,
    /// Soft bound on the total on-disk footprint (page files plus index).
    pub max_bytes: u64,
    /// Number of writes between automatic background compaction triggers.
    pub inspect_interval: u64,
    /// Optional periodic compaction tick for the background worker.
    /// `None` means the worker only runs when triggered.
    pub background_interval_secs: Option<u64>,
    /// Backoff strategy for contended index operations.
    pub retry: RetryPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            page_size: 4096,
            max_bytes: 512 * MB,
            inspect_interval: 1000,
            background_interval_secs: None,
            retry: RetryPolicy::default(),
        }
    }
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Path of the offending file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The config file is not valid toml.
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// Path of the offending file.
        path: PathBuf,
        /// Underlying toml error.
        #[source]
        source: toml::de::Error,
    },
    /// An environment override holds an unparsable value.
    #[error("invalid value for {key}: {value}")]
    InvalidValue {
        /// Variable name.
        key: &'static str,
        /// The rejected value.
        value: String,
    },
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    page_size: Option<u64>,
    max_size_mb: Option<u64>,
    inspect_interval: Option<u64>,
    background_interval_secs: Option<u64>,
}

impl CacheConfig {
    /// Loads configuration from an optional toml file, then applies
    /// `TSCACHE_*` environment overrides on top.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(path) = path {
            if path.exists() {
                let raw = read_file(path)?;
                config.merge(raw);
            }
        }
        config.apply_env()?;
        Ok(config)
    }

    fn merge(&mut self, raw: RawConfig) {
        if let Some(page_size) = raw.page_size {
            self.page_size = page_size;
        }
        if let Some(mb) = raw.max_size_mb {
            self.max_bytes = mb * MB;
        }
        if let Some(interval) = raw.inspect_interval {
            self.inspect_interval = interval;
        }
        if raw.background_interval_secs.is_some() {
            self.background_interval_secs = raw.background_interval_secs;
        }
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = env_u64("TSCACHE_PAGE_SIZE")? {
            self.page_size = value;
        }
        if let Some(value) = env_u64("TSCACHE_MAX_SIZE_MB")? {
            self.max_bytes = value * MB;
        }
        if let Some(value) = env_u64("TSCACHE_INSPECT_INTERVAL")? {
            self.inspect_interval = value;
        }
        Ok(())
    }
}

fn env_u64(key: &'static str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        Err(_) => Ok(None),
    }
}

fn read_file(path: &Path) -> Result<RawConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_sane() {
        let config = CacheConfig::default();
        assert_eq!(config.page_size, 4096);
        assert_eq!(config.max_bytes, 512 * MB);
        assert_eq!(config.inspect_interval, 1000);
        assert!(config.background_interval_secs.is_none());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config =
            CacheConfig::load(Some(Path::new("/nonexistent/tscache.toml"))).expect("load");
        assert_eq!(config, CacheConfig::default());
    }

    #[test]
    fn file_values_override_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "page_size = 1024\nmax_size_mb = 64\ninspect_interval = 50")
            .expect("write config");
        let config = CacheConfig::load(Some(file.path())).expect("load");
        assert_eq!(config.page_size, 1024);
        assert_eq!(config.max_bytes, 64 * MB);
        assert_eq!(config.inspect_interval, 50);
    }

    #[test]
    fn rejects_malformed_toml() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "page_size = \"not a number").expect("write config");
        let result = CacheConfig::load(Some(file.path()));
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }
}
