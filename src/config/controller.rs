use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use super::BackoffPolicy;
use crate::Error;
use crate::Result;

/// Defaults for controllers created through the manager
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ControllerConfig {
    /// Number of worker tasks draining each controller's queue
    #[serde(default = "default_max_concurrent_reconciles")]
    pub max_concurrent_reconciles: usize,

    /// Upper bound on the wait for watched caches before start fails (0 disables the bound)
    #[serde(default = "default_cache_sync_timeout_ms")]
    pub cache_sync_timeout_ms: u64,

    /// Per-key failure backoff for `add_rate_limited`
    #[serde(default)]
    pub backoff: BackoffPolicy,

    /// Overall token bucket refill rate (items per second)
    #[serde(default = "default_qps")]
    pub qps: f64,

    /// Overall token bucket size
    #[serde(default = "default_burst")]
    pub burst: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_reconciles: default_max_concurrent_reconciles(),
            cache_sync_timeout_ms: default_cache_sync_timeout_ms(),
            backoff: BackoffPolicy::default(),
            qps: default_qps(),
            burst: default_burst(),
        }
    }
}

impl ControllerConfig {
    pub fn cache_sync_timeout(&self) -> Option<Duration> {
        (self.cache_sync_timeout_ms > 0).then(|| Duration::from_millis(self.cache_sync_timeout_ms))
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_reconciles == 0 {
            return Err(Error::Config(ConfigError::Message(
                "max_concurrent_reconciles must be at least 1".into(),
            )));
        }
        if !(self.qps > 0.0) {
            return Err(Error::Config(ConfigError::Message(format!(
                "qps {} must be > 0",
                self.qps
            ))));
        }
        if self.burst == 0 {
            return Err(Error::Config(ConfigError::Message("burst must be > 0".into())));
        }
        self.backoff.validate("controller.backoff")
    }
}

fn default_max_concurrent_reconciles() -> usize {
    1
}
fn default_cache_sync_timeout_ms() -> u64 {
    120_000
}
fn default_qps() -> f64 {
    10.0
}
fn default_burst() -> u32 {
    100
}
