use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use super::BackoffPolicy;
use crate::Result;

/// Informer behaviour shared by every watched type
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CacheConfig {
    /// Period of the full redelivery tick (0 disables resync)
    #[serde(default)]
    pub resync_period_ms: u64,

    /// Backoff applied when listing or opening a watch fails
    #[serde(default = "default_watch_retry")]
    pub watch_retry: BackoffPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            resync_period_ms: 0,
            watch_retry: default_watch_retry(),
        }
    }
}

impl CacheConfig {
    pub fn resync_period(&self) -> Option<Duration> {
        (self.resync_period_ms > 0).then(|| Duration::from_millis(self.resync_period_ms))
    }

    pub fn validate(&self) -> Result<()> {
        self.watch_retry.validate("cache.watch_retry")
    }
}

fn default_watch_retry() -> BackoffPolicy {
    BackoffPolicy {
        max_retries: 0,
        base_delay_ms: 100,
        max_delay_ms: 30_000,
    }
}
