use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use folio_core::MAX_BATCH_OPERATIONS;

use crate::retry::RetryPolicy;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config YAML {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Retry behaviour for single-document round trips and batch commits.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.base_delay_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Operations per atomic commit. Never above the backend's own ceiling.
    pub max_group_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_group_size: MAX_BATCH_OPERATIONS,
        }
    }
}

/// Top-level configuration of the data layer.
///
/// ```yaml
/// retry:
///   max_attempts: 5
///   base_delay_ms: 100
/// batch:
///   max_group_size: 250
/// ```
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct FolioConfig {
    pub retry: RetryConfig,
    pub batch: BatchConfig,
}

impl FolioConfig {
    /// Load configuration from a YAML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: FolioConfig =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.batch.max_group_size == 0 || self.batch.max_group_size > MAX_BATCH_OPERATIONS {
            return Err(ConfigError::Invalid(format!(
                "batch.max_group_size must be between 1 and {}, got {}",
                MAX_BATCH_OPERATIONS, self.batch.max_group_size
            )));
        }
        Ok(())
    }
}
