//! Indexer configuration
//!
//! Loaded from a JSON file. Every field has a default:
//!
//! ```json
//! {
//!   "database_url": "postgres://indexer@localhost/chain",
//!   "retain_deletions": true,
//!   "commit_retries": 3,
//!   "retry_backoff_ms": 50
//! }
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::observability::Event;

/// Upper bound on `commit_retries`
pub const MAX_COMMIT_RETRIES: u32 = 16;

/// Configuration errors. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::Read { .. } => "CONFIG_READ_FAILED",
            ConfigError::Parse(_) => "CONFIG_PARSE_FAILED",
            ConfigError::Invalid(_) => "CONFIG_INVALID",
        }
    }
}

/// Indexer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Connection target, passed through to backend drivers
    #[serde(default)]
    pub database_url: String,

    /// Keep deleted rows as tombstones (default true). An object type can
    /// opt out, never in.
    #[serde(default = "default_retain_deletions")]
    pub retain_deletions: bool,

    /// Extra apply attempts after a transient failure (default 3)
    #[serde(default = "default_commit_retries")]
    pub commit_retries: u32,

    /// Backoff before the first retry, doubled on each further retry (default 50)
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_retain_deletions() -> bool {
    true
}
fn default_commit_retries() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    50
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            retain_deletions: default_retain_deletions(),
            commit_retries: default_commit_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl IndexerConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        let config = Self::from_json(&content)?;
        info!(
            target: "indexer::schema",
            event = Event::ConfigLoaded.as_str(),
            path = %path.display(),
            retain_deletions = config.retain_deletions,
            commit_retries = config.commit_retries,
        );
        Ok(config)
    }

    /// Parses and validates configuration JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: IndexerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.commit_retries > MAX_COMMIT_RETRIES {
            return Err(ConfigError::Invalid(format!(
                "commit_retries must be <= {}, got {}",
                MAX_COMMIT_RETRIES, self.commit_retries
            )));
        }
        if self.database_url.chars().any(char::is_whitespace) {
            return Err(ConfigError::Invalid("database_url must not contain whitespace".into()));
        }
        Ok(())
    }

    /// Sleep before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor))
    }

    /// Effective retention for an object type with the given override.
    pub fn retains_deletions(&self, object_override: Option<bool>) -> bool {
        self.retain_deletions && object_override.unwrap_or(true)
    }
}
