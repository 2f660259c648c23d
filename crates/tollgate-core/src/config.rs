//! Configuration for the coordinator and the pool.
//!
//! Both structs deserialize with defaults for missing fields, so a partial
//! JSON document (or `{}`) is a valid config.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigError;

/// Default pause between reaper passes.
pub const DEFAULT_REAPER_INTERVAL: Duration = Duration::from_secs(1);

/// Default time an idle worker waits for work before it may be evicted.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub reaper_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            reaper_interval: DEFAULT_REAPER_INTERVAL,
        }
    }
}

impl CoordinatorConfig {
    pub fn with_reaper_interval(mut self, interval: Duration) -> Self {
        self.reaper_interval = interval;
        self
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reaper_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "reaper_interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Prefix of worker thread names (`{name}-{n}`).
    pub name: String,
    /// Idle workers never evicted by the idle timeout.
    pub min_size: usize,
    /// Most idle workers kept when a task completes. Not a cap on spawning.
    pub max_size: usize,
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            name: "tollgate-pool".to_string(),
            min_size: 0,
            max_size: cpus * 3 / 2 + 1,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

impl PoolConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_sizes(mut self, min_size: usize, max_size: usize) -> Self {
        self.min_size = min_size;
        self.max_size = max_size;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("pool name must not be empty".to_string()));
        }
        if self.max_size == 0 {
            return Err(ConfigError::Invalid("max_size must be at least 1".to_string()));
        }
        if self.min_size > self.max_size {
            return Err(ConfigError::Invalid(format!(
                "min_size ({}) must not exceed max_size ({})",
                self.min_size, self.max_size
            )));
        }
        if self.idle_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "idle_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
