//! runnerpool.toml configuration parser.
//!
//! Every field is optional; accessors fall back to the built-in defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resource::{is_valid_class_name, ResourceClassTable};
use crate::time::parse_duration;

/// How many times one message may cycle through a pickup manager before the
/// pool is treated as practically empty.
pub const DEFAULT_FREQUENCY_TOLERANCE: u32 = 5;

/// Lease granted by a successful claim.
pub const DEFAULT_CLAIM_LEASE: Duration = Duration::from_secs(5 * 60);

/// Threshold given to instances returned to the idle pool.
pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(60 * 60);

/// Expected heartbeat period of a worker.
pub const DEFAULT_HEARTBEAT_PERIOD: Duration = Duration::from_secs(15);

/// Missed periods tolerated before a worker counts as unhealthy.
pub const DEFAULT_HEALTH_MULTIPLIER: u32 = 3;

pub const DEFAULT_STORE_PATH: &str = "/var/lib/runnerpool/state.redb";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid duration for {field}: {value:?}")]
    InvalidDuration { field: &'static str, value: String },

    #[error("invalid resource class name {0:?}: must be non-empty without '/'")]
    InvalidResourceClass(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolConfig {
    pub store: Option<StoreConfig>,
    pub pool: Option<PoolSettings>,
    pub health: Option<HealthSettings>,
    #[serde(default)]
    pub resource_classes: ResourceClassTable,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolSettings {
    pub frequency_tolerance: Option<u32>,
    /// e.g. "5m"
    pub claim_lease: Option<String>,
    /// e.g. "1h"
    pub idle_ttl: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthSettings {
    /// e.g. "15s"
    pub period: Option<String>,
    pub multiplier: Option<u32>,
}

impl PoolConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: PoolConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject duration strings that would otherwise silently fall back, and
    /// class names that cannot name a queue.
    fn validate(&self) -> Result<(), ConfigError> {
        let pool = self.pool.as_ref();
        let health = self.health.as_ref();
        check_duration("pool.claim_lease", pool.and_then(|p| p.claim_lease.as_deref()))?;
        check_duration("pool.idle_ttl", pool.and_then(|p| p.idle_ttl.as_deref()))?;
        check_duration("health.period", health.and_then(|h| h.period.as_deref()))?;
        if let Some(name) = self
            .resource_classes
            .names()
            .into_iter()
            .find(|name| !is_valid_class_name(name))
        {
            return Err(ConfigError::InvalidResourceClass(name));
        }
        Ok(())
    }

    pub fn store_path(&self) -> PathBuf {
        self.store
            .as_ref()
            .and_then(|s| s.path.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_PATH))
    }

    pub fn frequency_tolerance(&self) -> u32 {
        self.pool
            .as_ref()
            .and_then(|p| p.frequency_tolerance)
            .unwrap_or(DEFAULT_FREQUENCY_TOLERANCE)
    }

    pub fn claim_lease(&self) -> Duration {
        self.pool
            .as_ref()
            .and_then(|p| p.claim_lease.as_deref())
            .and_then(parse_duration)
            .unwrap_or(DEFAULT_CLAIM_LEASE)
    }

    pub fn idle_ttl(&self) -> Duration {
        self.pool
            .as_ref()
            .and_then(|p| p.idle_ttl.as_deref())
            .and_then(parse_duration)
            .unwrap_or(DEFAULT_IDLE_TTL)
    }

    pub fn heartbeat_period(&self) -> Duration {
        self.health
            .as_ref()
            .and_then(|h| h.period.as_deref())
            .and_then(parse_duration)
            .unwrap_or(DEFAULT_HEARTBEAT_PERIOD)
    }

    pub fn health_multiplier(&self) -> u32 {
        self.health
            .as_ref()
            .and_then(|h| h.multiplier)
            .unwrap_or(DEFAULT_HEALTH_MULTIPLIER)
    }
}

fn check_duration(field: &'static str, value: Option<&str>) -> Result<(), ConfigError> {
    match value {
        Some(v) if parse_duration(v).is_none() => Err(ConfigError::InvalidDuration {
            field,
            value: v.to_string(),
        }),
        _ => Ok(()),
    }
}
