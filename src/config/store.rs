use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Connection settings for the remote object store.
///
/// This is the `Config` dependency handed to components that declare
/// [`WantsConfig`](crate::WantsConfig).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Address of the store; empty means "not configured"
    #[serde(default)]
    pub endpoint: String,

    /// Deadline for a single client request
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Identifies this process to the store
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            request_timeout_ms: default_request_timeout_ms(),
            user_agent: default_user_agent(),
        }
    }
}

impl StoreConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.endpoint.is_empty()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "store.request_timeout_ms must be > 0".into(),
            )));
        }
        Ok(())
    }
}

fn default_request_timeout_ms() -> u64 {
    30_000
}
fn default_user_agent() -> String {
    format!("reconcile-runtime/{}", env!("CARGO_PKG_VERSION"))
}
