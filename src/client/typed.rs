use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::debug;

use super::ListOptions;
use super::ObjectList;
use super::ObjectStore;
use crate::Cache;
use crate::DynamicObject;
use crate::ReconcileKey;
use crate::Resource;
use crate::ResourceDescriptor;
use crate::RestMapper;
use crate::Result;
use crate::Scheme;
use crate::StoreConfig;
use crate::StoreError;

/// Typed facade over an [`ObjectStore`].
///
/// Every request is bounded by `StoreConfig::request_timeout_ms`. A client
/// built with [`Client::delegating`] serves `get` and `list` from a [`Cache`]
/// and sends writes to the store.
#[derive(Clone)]
pub struct Client {
    store: Arc<dyn ObjectStore>,
    scheme: Arc<Scheme>,
    mapper: Arc<dyn RestMapper>,
    request_timeout: Duration,
    reader: Option<Cache>,
}

impl Debug for Client {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("request_timeout", &self.request_timeout)
            .field("reads_from_cache", &self.reads_from_cache())
            .finish()
    }
}

impl Client {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        scheme: Arc<Scheme>,
        mapper: Arc<dyn RestMapper>,
        config: &StoreConfig,
    ) -> Self {
        Self {
            store,
            scheme,
            mapper,
            request_timeout: config.request_timeout(),
            reader: None,
        }
    }

    /// Same store and scheme, with reads served from `cache`.
    ///
    /// A read waits up to the request timeout for the type's informer to
    /// sync, then fails with `SyncError::NotSynced`.
    pub fn delegating(
        &self,
        cache: Cache,
    ) -> Self {
        Self {
            reader: Some(cache),
            ..self.clone()
        }
    }

    pub fn reads_from_cache(&self) -> bool {
        self.reader.is_some()
    }

    pub fn scheme(&self) -> &Arc<Scheme> {
        &self.scheme
    }

    /// Resolves the store address of `K` through the scheme and mapper.
    pub fn resource_for<K: Resource>(&self) -> Result<ResourceDescriptor> {
        let gvk = self.scheme.kind_for::<K>()?;
        self.mapper.resource_for(&gvk)
    }

    pub async fn get<K: Resource>(
        &self,
        key: &ReconcileKey,
    ) -> Result<K> {
        let resource = self.resource_for::<K>()?;
        if let Some(cache) = &self.reader {
            let informer = cache.synced_informer::<K>(self.request_timeout).await?;
            return match informer.get(key)? {
                Some(obj) => Ok(K::clone(&obj)),
                None => Err(StoreError::NotFound {
                    kind: resource.to_string(),
                    key: key.to_string(),
                }
                .into()),
            };
        }
        let obj = self.bounded(self.store.get(&resource, key)).await?;
        obj.into_typed()
    }

    pub async fn list<K: Resource>(
        &self,
        opts: &ListOptions,
    ) -> Result<ObjectList<K>> {
        let resource = self.resource_for::<K>()?;
        if let Some(cache) = &self.reader {
            let informer = cache.synced_informer::<K>(self.request_timeout).await?;
            let items: Vec<K> = informer.list(opts)?.iter().map(|o| K::clone(o)).collect();
            let resource_version = items
                .iter()
                .map(|o| o.meta().resource_version)
                .max()
                .unwrap_or_default();
            return Ok(ObjectList {
                items,
                resource_version,
            });
        }
        let list = self.bounded(self.store.list(&resource, opts)).await?;
        let items = list
            .items
            .into_iter()
            .map(DynamicObject::into_typed)
            .collect::<Result<Vec<K>>>()?;
        Ok(ObjectList {
            items,
            resource_version: list.resource_version,
        })
    }

    pub async fn create<K: Resource>(
        &self,
        obj: &K,
    ) -> Result<K> {
        let resource = self.resource_for::<K>()?;
        debug!("create {} {}", resource, obj.key());
        let created = self
            .bounded(self.store.create(&resource, DynamicObject::from_typed(obj)?))
            .await?;
        created.into_typed()
    }

    pub async fn update<K: Resource>(
        &self,
        obj: &K,
    ) -> Result<K> {
        let resource = self.resource_for::<K>()?;
        debug!("update {} {}", resource, obj.key());
        let updated = self
            .bounded(self.store.update(&resource, DynamicObject::from_typed(obj)?))
            .await?;
        updated.into_typed()
    }

    pub async fn delete<K: Resource>(
        &self,
        key: &ReconcileKey,
    ) -> Result<()> {
        let resource = self.resource_for::<K>()?;
        debug!("delete {} {}", resource, key);
        self.bounded(self.store.delete(&resource, key)).await
    }

    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match timeout(self.request_timeout, fut).await {
            Ok(r) => r,
            Err(_) => Err(StoreError::Timeout(self.request_timeout).into()),
        }
    }
}
