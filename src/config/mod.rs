//! Configuration management for the reconcile runtime.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Configuration file support
//! - Environment variable overrides
//! - Component-wise validation
mod cache;
mod controller;
mod retry;
mod store;
pub use cache::*;
pub use controller::*;
pub use retry::*;
pub use store::*;


use std::env;
use std::fmt::Debug;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

/// Prefix for environment overrides, e.g. `RECONCILE__CONTROLLER__MAX_CONCURRENT_RECONCILES=4`
pub const ENV_PREFIX: &str = "RECONCILE";

/// Main configuration container for the manager and everything it builds
///
/// Combines all subsystem configurations with hierarchical override support:
/// 1. Default values from code implementation
/// 2. Configuration file specified by `CONFIG_PATH`
/// 3. Environment variables (highest priority)
#[derive(Serialize, Deserialize, Clone, Default)]
pub struct RuntimeConfig {
    /// Defaults applied to every controller the manager creates
    #[serde(default)]
    pub controller: ControllerConfig,
    /// Informer and watch behaviour
    #[serde(default)]
    pub cache: CacheConfig,
    /// Connection settings for the remote store; injected as `Config`
    #[serde(default)]
    pub store: StoreConfig,
}

impl Debug for RuntimeConfig {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("RuntimeConfig")
            .field("controller", &self.controller)
            .field("cache", &self.cache)
            .field("store", &self.store.endpoint)
            .finish()
    }
}

impl RuntimeConfig {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// Configuration sources are merged in the following order (later sources override earlier):
    /// 1. Type defaults (lowest priority)
    /// 2. Configuration file from `CONFIG_PATH` environment variable (if set)
    /// 3. Environment variables with `RECONCILE__` prefix (highest priority)
    ///
    /// Callers MUST call `validate()` before handing the result to a manager.
    ///
    /// # Examples
    /// ```ignore
    /// std::env::set_var("RECONCILE__CONTROLLER__MAX_CONCURRENT_RECONCILES", "4");
    /// let cfg = RuntimeConfig::new()?.validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(Self::environment());

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Applies additional configuration overrides from file without validation.
    ///
    /// Merging order (later sources override earlier):
    /// 1. Current configuration values
    /// 2. New configuration file
    /// 3. Latest environment variables (highest priority)
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(Self::environment())
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Validates configuration and returns validated instance.
    pub fn validate(self) -> Result<Self> {
        self.controller.validate()?;
        self.cache.validate()?;
        self.store.validate()?;
        Ok(self)
    }

    fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .ignore_empty(true)
            .try_parsing(true)
    }
}
