#![forbid(unsafe_code)]

//! Tuning configuration for a consistency check.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::primitives::pager::{PageCacheOptions, DEFAULT_CACHE_PAGES, DEFAULT_PAGE_SIZE};
use crate::storage::DatabaseLayout;

/// Default fraction of host memory the scan may plan to use.
pub const DEFAULT_MEMORY_LEEWAY_FACTOR: f64 = 0.9;
/// Default estimated working-set cost of one node during the scan.
pub const DEFAULT_RECORD_MEMORY_BYTES: u64 = 64;

/// Errors raised while loading or validating a [`CheckConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read check config {path}: {source}")]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The config file is not valid TOML for this schema.
    #[error("failed to parse check config {path}: {source}")]
    Parse {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        source: toml::de::Error,
    },
    /// A value is out of range.
    #[error("invalid check config value for {field}: {reason}")]
    Invalid {
        /// Offending key.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// Settings that shape a check run.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CheckConfig {
    /// Directory for reports when no override is given. `None` means
    /// `<database dir>/logs`.
    pub logs_directory: Option<PathBuf>,
    /// Page size of the page cache owned by the check.
    pub page_size: usize,
    /// Pages held by the page cache owned by the check.
    pub page_cache_pages: usize,
    /// Fraction of total memory the scan may plan for, strictly between 0 and 1.
    pub memory_limit_leeway_factor: f64,
    /// Worker threads for the scan. `None` uses host parallelism.
    pub scan_threads: Option<usize>,
    /// Estimated bytes of scan state per node record.
    pub record_memory_bytes: u64,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            logs_directory: None,
            page_size: DEFAULT_PAGE_SIZE,
            page_cache_pages: DEFAULT_CACHE_PAGES,
            memory_limit_leeway_factor: DEFAULT_MEMORY_LEEWAY_FACTOR,
            scan_threads: None,
            record_memory_bytes: DEFAULT_RECORD_MEMORY_BYTES,
        }
    }
}

impl CheckConfig {
    /// Reads and validates a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: CheckConfig = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `explicit` if given, else the per-user default file if it
    /// exists, else the defaults.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match default_config_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Rejects out-of-range values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let leeway = self.memory_limit_leeway_factor;
        if !(leeway > 0.0 && leeway < 1.0) {
            return Err(ConfigError::Invalid {
                field: "memory_limit_leeway_factor",
                reason: format!("{leeway} is not strictly between 0 and 1"),
            });
        }
        if self.page_size == 0 {
            return Err(ConfigError::Invalid {
                field: "page_size",
                reason: "must be non-zero".into(),
            });
        }
        if self.page_cache_pages == 0 {
            return Err(ConfigError::Invalid {
                field: "page_cache_pages",
                reason: "must be non-zero".into(),
            });
        }
        if self.scan_threads == Some(0) {
            return Err(ConfigError::Invalid {
                field: "scan_threads",
                reason: "must be at least 1".into(),
            });
        }
        if self.record_memory_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "record_memory_bytes",
                reason: "must be non-zero".into(),
            });
        }
        Ok(())
    }

    /// Directory that receives reports for `layout`.
    pub fn logs_directory_for(&self, layout: &DatabaseLayout) -> PathBuf {
        self.logs_directory
            .clone()
            .unwrap_or_else(|| layout.dir().join("logs"))
    }

    /// Options for a page cache owned by the check.
    pub fn page_cache_options(&self) -> PageCacheOptions {
        PageCacheOptions {
            page_size: self.page_size,
            max_pages: self.page_cache_pages,
        }
    }
}

/// Per-user config location, e.g. `~/.config/sombra/check.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("sombra").join("check.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("check.toml");
        fs::write(&path, "scan_threads = 3\nmemory_limit_leeway_factor = 0.5\n").unwrap();
        let config = CheckConfig::load(&path).unwrap();
        assert_eq!(config.scan_threads, Some(3));
        assert_eq!(config.memory_limit_leeway_factor, 0.5);
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn leeway_must_be_a_proper_fraction() {
        for leeway in [0.0, 1.0, 1.5, -0.1, f64::NAN] {
            let config = CheckConfig {
                memory_limit_leeway_factor: leeway,
                ..CheckConfig::default()
            };
            assert!(
                matches!(
                    config.validate(),
                    Err(ConfigError::Invalid {
                        field: "memory_limit_leeway_factor",
                        ..
                    })
                ),
                "{leeway} accepted"
            );
        }
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("check.toml");
        fs::write(&path, "threads = 2\n").unwrap();
        assert!(matches!(
            CheckConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn logs_directory_defaults_under_database() {
        let dir = tempdir().unwrap();
        let layout = DatabaseLayout::new(dir.path());
        let config = CheckConfig::default();
        assert_eq!(config.logs_directory_for(&layout), dir.path().join("logs"));
    }
}
