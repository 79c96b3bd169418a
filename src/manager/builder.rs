//! A builder for assembling a [`Manager`] and its shared singletons.
//!
//! The [`ManagerBuilder`] collects the store config, runtime settings, scheme
//! and the factories that turn them into a client and cache.
//!
//! ## Example
//! ```ignore
//! let store = Arc::new(MemoryStore::new());
//! let manager = ManagerBuilder::from_settings(RuntimeConfig::new()?.validate()?)
//!     .config(StoreConfig::new("memory://"))
//!     .scheme(scheme)
//!     .backend(store)
//!     .build()?;
//! ```
//!
//! Nothing is started by `build()`; every failure is returned synchronously.

use std::sync::Arc;

use tracing::info;
use tracing::info_span;
use tracing::Span;

use super::Manager;
use crate::Cache;
use crate::CacheConfig;
use crate::Client;
use crate::DefaultRestMapper;
use crate::ObjectStore;
use crate::RestMapper;
use crate::Result;
use crate::RuntimeConfig;
use crate::Scheme;
use crate::SetupError;
use crate::StoreConfig;
use crate::WatchTransport;

pub type MapperProvider = Box<dyn FnOnce(&Scheme) -> Result<Arc<dyn RestMapper>> + Send>;
pub type NewClientFn =
    Box<dyn FnOnce(Arc<Scheme>, Arc<dyn RestMapper>, &StoreConfig) -> Result<Client> + Send>;
pub type NewCacheFn = Box<dyn FnOnce(Client, &CacheConfig, Span) -> Result<Cache> + Send>;

pub struct ManagerBuilder {
    config: Option<StoreConfig>,
    settings: RuntimeConfig,
    scheme: Scheme,
    mapper_provider: Option<MapperProvider>,
    new_client: Option<NewClientFn>,
    new_cache: Option<NewCacheFn>,
    logger: Option<Span>,
}

impl Default for ManagerBuilder {
    fn default() -> Self {
        Self::from_settings(RuntimeConfig::default())
    }
}

impl ManagerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from loaded settings. A configured `settings.store` is used as
    /// the store config unless [`config`](Self::config) overrides it.
    pub fn from_settings(settings: RuntimeConfig) -> Self {
        Self {
            config: None,
            settings,
            scheme: Scheme::new(),
            mapper_provider: None,
            new_client: None,
            new_cache: None,
            logger: None,
        }
    }

    pub fn config(
        mut self,
        config: StoreConfig,
    ) -> Self {
        self.config = Some(config);
        self
    }

    pub fn scheme(
        mut self,
        scheme: Scheme,
    ) -> Self {
        self.scheme = scheme;
        self
    }

    /// Replaces the default scheme-derived mapper.
    pub fn mapper_provider(
        mut self,
        provider: impl FnOnce(&Scheme) -> Result<Arc<dyn RestMapper>> + Send + 'static,
    ) -> Self {
        self.mapper_provider = Some(Box::new(provider));
        self
    }

    pub fn client_factory(
        mut self,
        factory: impl FnOnce(Arc<Scheme>, Arc<dyn RestMapper>, &StoreConfig) -> Result<Client>
            + Send
            + 'static,
    ) -> Self {
        self.new_client = Some(Box::new(factory));
        self
    }

    pub fn cache_factory(
        mut self,
        factory: impl FnOnce(Client, &CacheConfig, Span) -> Result<Cache> + Send + 'static,
    ) -> Self {
        self.new_cache = Some(Box::new(factory));
        self
    }

    /// Sets both factories from one backend serving reads, writes and watches.
    pub fn backend<B>(
        self,
        backend: Arc<B>,
    ) -> Self
    where
        B: ObjectStore + WatchTransport,
    {
        let store: Arc<dyn ObjectStore> = backend.clone();
        let watcher: Arc<dyn WatchTransport> = backend;
        self.client_factory(move |scheme, mapper, config| Ok(Client::new(store, scheme, mapper, config)))
            .cache_factory(move |client, config, span| Ok(Cache::new(client, watcher, config.clone(), span)))
    }

    pub fn logger(
        mut self,
        span: Span,
    ) -> Self {
        self.logger = Some(span);
        self
    }

    pub fn build(self) -> Result<Manager> {
        let Self {
            config,
            settings,
            scheme,
            mapper_provider,
            new_client,
            new_cache,
            logger,
        } = self;

        let config = config
            .or_else(|| settings.store.is_configured().then(|| settings.store.clone()))
            .ok_or(SetupError::MissingField("Config"))?;
        let new_client = new_client.ok_or(SetupError::MissingField("client factory"))?;
        let new_cache = new_cache.ok_or(SetupError::MissingField("cache factory"))?;

        let mapper = match mapper_provider {
            Some(provider) => provider(&scheme)?,
            None => Arc::new(DefaultRestMapper::from_scheme(&scheme)?) as Arc<dyn RestMapper>,
        };
        let scheme = Arc::new(scheme);
        let span = logger.unwrap_or_else(|| info_span!("manager"));

        let client = new_client(scheme.clone(), mapper.clone(), &config)?;
        let cache_span = info_span!(parent: &span, "cache");
        let cache = new_cache(client.clone(), &settings.cache, cache_span)?;
        // Components read through the cache and write to the store
        let client = client.delegating(cache.clone());

        info!("manager built for store {}", config.endpoint);
        Ok(Manager::new(config, settings, scheme, mapper, client, cache, span))
    }
}
