//! Watch-backed local mirror of remote state, one informer per type.
mod informer;
pub use informer::*;


use std::any::type_name;
use std::any::Any;
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info_span;
use tracing::Span;

use crate::CacheConfig;
use crate::Client;
use crate::LifecycleError;
use crate::ListOptions;
use crate::ReconcileKey;
use crate::Resource;
use crate::Result;
use crate::WatchTransport;

/// Type-erased view of a `SharedInformer<K>` for start and sync handling
trait InformerControl: Send + Sync {
    fn start(
        &self,
        stop: CancellationToken,
    );

    fn wait_for_sync<'a>(
        &'a self,
        stop: &'a CancellationToken,
    ) -> BoxFuture<'a, bool>;
}

struct Control<K: Resource>(Arc<SharedInformer<K>>);

impl<K: Resource> InformerControl for Control<K> {
    fn start(
        &self,
        stop: CancellationToken,
    ) {
        self.0.start(stop);
    }

    fn wait_for_sync<'a>(
        &'a self,
        stop: &'a CancellationToken,
    ) -> BoxFuture<'a, bool> {
        self.0.wait_for_sync(stop).boxed()
    }
}

struct InformerEntry {
    typed: Arc<dyn Any + Send + Sync>,
    control: Arc<dyn InformerControl>,
}

struct CacheInner {
    client: Client,
    watcher: Arc<dyn WatchTransport>,
    config: CacheConfig,
    informers: Mutex<HashMap<TypeId, InformerEntry>>,
    /// Set by `start`; informers created afterwards start immediately
    stop: Mutex<Option<CancellationToken>>,
    span: Span,
}

/// Shared, watch-backed object cache.
///
/// Reads are served from memory only and fail with `SyncError::NotSynced`
/// until the type's initial listing has been delivered.
#[derive(Clone)]
pub struct Cache {
    inner: Arc<CacheInner>,
}

impl Debug for Cache {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("informers", &self.inner.informers.lock().len())
            .finish()
    }
}

impl Cache {
    pub fn new(
        client: Client,
        watcher: Arc<dyn WatchTransport>,
        config: CacheConfig,
        span: Span,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                client,
                watcher,
                config,
                informers: Mutex::new(HashMap::new()),
                stop: Mutex::new(None),
                span,
            }),
        }
    }

    pub fn client(&self) -> &Client {
        &self.inner.client
    }

    /// Returns the informer for `K`, creating it on first use.
    ///
    /// Fails when `K` is not registered in the scheme or the mapper cannot
    /// resolve it.
    pub fn informer_for<K: Resource>(&self) -> Result<Arc<SharedInformer<K>>> {
        let mut informers = self.inner.informers.lock();
        if let Some(entry) = informers.get(&TypeId::of::<K>()) {
            if let Ok(informer) = entry.typed.clone().downcast::<SharedInformer<K>>() {
                return Ok(informer);
            }
        }

        let resource = self.inner.client.resource_for::<K>()?;
        let span = info_span!(parent: &self.inner.span, "informer", resource = %resource);
        let informer = Arc::new(SharedInformer::<K>::new(
            resource,
            self.inner.client.clone(),
            self.inner.watcher.clone(),
            self.inner.config.clone(),
            span,
        ));
        debug!("created informer for {}", type_name::<K>());

        if let Some(stop) = self.inner.stop.lock().as_ref() {
            informer.start(stop.clone());
        }
        informers.insert(
            TypeId::of::<K>(),
            InformerEntry {
                typed: informer.clone(),
                control: Arc::new(Control(informer.clone())),
            },
        );
        Ok(informer)
    }

    /// Starts every informer's reflector in the background and returns.
    pub fn start(
        &self,
        stop: CancellationToken,
    ) -> Result<()> {
        let informers = self.inner.informers.lock();
        {
            let mut started = self.inner.stop.lock();
            if started.is_some() {
                return Err(LifecycleError::AlreadyStarted("cache".to_string()).into());
            }
            *started = Some(stop.clone());
        }
        for entry in informers.values() {
            entry.control.start(stop.clone());
        }
        Ok(())
    }

    /// Waits for every informer created so far to sync; false if `stop` fires first.
    pub async fn wait_for_sync(
        &self,
        stop: &CancellationToken,
    ) -> bool {
        let controls: Vec<Arc<dyn InformerControl>> = self
            .inner
            .informers
            .lock()
            .values()
            .map(|e| e.control.clone())
            .collect();
        join_all(controls.iter().map(|c| c.wait_for_sync(stop)))
            .await
            .into_iter()
            .all(|synced| synced)
    }

    /// Informer for `K`, after waiting up to `within` for its initial listing
    /// when the cache is running.
    pub(crate) async fn synced_informer<K: Resource>(
        &self,
        within: Duration,
    ) -> Result<Arc<SharedInformer<K>>> {
        let informer = self.informer_for::<K>()?;
        let running = self.inner.stop.lock().clone();
        if let Some(stop) = running {
            if !informer.has_synced() {
                let _ = tokio::time::timeout(within, informer.wait_for_sync(&stop)).await;
            }
        }
        Ok(informer)
    }

    pub fn get<K: Resource>(
        &self,
        key: &ReconcileKey,
    ) -> Result<Option<Arc<K>>> {
        self.informer_for::<K>()?.get(key)
    }

    pub fn list<K: Resource>(
        &self,
        opts: &ListOptions,
    ) -> Result<Vec<Arc<K>>> {
        self.informer_for::<K>()?.list(opts)
    }

    /// Registers an index over `field` for `K`, maintained by the informer.
    pub fn index_field<K: Resource>(
        &self,
        field: &str,
        extract: impl Fn(&K) -> Vec<String> + Send + Sync + 'static,
    ) -> Result<()> {
        self.informer_for::<K>()?.add_index(field, extract)
    }

    pub fn list_by_field<K: Resource>(
        &self,
        field: &str,
        value: &str,
    ) -> Result<Vec<Arc<K>>> {
        self.informer_for::<K>()?.list_by_index(field, value)
    }
}
