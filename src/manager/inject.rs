use std::sync::Arc;

use crate::Cache;
use crate::Client;
use crate::InjectError;
use crate::Result;
use crate::Scheme;
use crate::StoreConfig;

pub trait WantsScheme {
    fn inject_scheme(
        &mut self,
        scheme: Arc<Scheme>,
    ) -> Result<()>;
}

pub trait WantsConfig {
    fn inject_config(
        &mut self,
        config: StoreConfig,
    ) -> Result<()>;
}

pub trait WantsClient {
    fn inject_client(
        &mut self,
        client: Client,
    ) -> Result<()>;
}

pub trait WantsCache {
    fn inject_cache(
        &mut self,
        cache: Cache,
    ) -> Result<()>;
}

/// Declares which manager singletons a component wants.
///
/// Every accessor defaults to `None`; a component opts into a dependency by
/// implementing the matching `Wants*` trait and returning `Some(self)`.
///
/// ```ignore
/// impl WantsClient for MyReconciler {
///     fn inject_client(&mut self, client: Client) -> Result<()> {
///         self.client = Some(client);
///         Ok(())
///     }
/// }
///
/// impl Inject for MyReconciler {
///     fn wants_client(&mut self) -> Option<&mut dyn WantsClient> {
///         Some(self)
///     }
/// }
/// ```
pub trait Inject {
    fn wants_scheme(&mut self) -> Option<&mut dyn WantsScheme> {
        None
    }

    fn wants_config(&mut self) -> Option<&mut dyn WantsConfig> {
        None
    }

    fn wants_client(&mut self) -> Option<&mut dyn WantsClient> {
        None
    }

    fn wants_cache(&mut self) -> Option<&mut dyn WantsCache> {
        None
    }
}

/// Holds the dependencies handed out by [`Injector::inject`].
#[derive(Clone, Default)]
pub struct Injector {
    scheme: Option<Arc<Scheme>>,
    config: Option<StoreConfig>,
    client: Option<Client>,
    cache: Option<Cache>,
}

impl Injector {
    pub fn new(
        scheme: Arc<Scheme>,
        config: StoreConfig,
        client: Client,
        cache: Cache,
    ) -> Self {
        Self {
            scheme: Some(scheme),
            config: Some(config),
            client: Some(client),
            cache: Some(cache),
        }
    }

    pub(crate) fn set_scheme(
        &mut self,
        scheme: Arc<Scheme>,
    ) {
        self.scheme = Some(scheme);
    }

    pub(crate) fn set_config(
        &mut self,
        config: StoreConfig,
    ) {
        self.config = Some(config);
    }

    pub(crate) fn set_client(
        &mut self,
        client: Client,
    ) {
        self.client = Some(client);
    }

    pub(crate) fn set_cache(
        &mut self,
        cache: Cache,
    ) {
        self.cache = Some(cache);
    }

    /// Hands `target` every dependency it declares.
    ///
    /// Fails on the first dependency that is missing or rejected.
    pub fn inject<T: Inject + ?Sized>(
        &self,
        target: &mut T,
    ) -> Result<()> {
        if let Some(t) = target.wants_scheme() {
            let scheme = self
                .scheme
                .clone()
                .ok_or(InjectError::Unavailable("scheme"))?;
            t.inject_scheme(scheme)?;
        }
        if let Some(t) = target.wants_config() {
            let config = self
                .config
                .clone()
                .ok_or(InjectError::Unavailable("config"))?;
            t.inject_config(config)?;
        }
        if let Some(t) = target.wants_client() {
            let client = self
                .client
                .clone()
                .ok_or(InjectError::Unavailable("client"))?;
            t.inject_client(client)?;
        }
        if let Some(t) = target.wants_cache() {
            let cache = self
                .cache
                .clone()
                .ok_or(InjectError::Unavailable("cache"))?;
            t.inject_cache(cache)?;
        }
        Ok(())
    }
}
