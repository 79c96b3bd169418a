use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::stream::BoxStream;
#[cfg(test)]
use mockall::automock;

use crate::DynamicObject;
use crate::ObjectMeta;
use crate::ReconcileKey;
use crate::ResourceDescriptor;
use crate::Result;

/// Filters applied to a list request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Restrict to one namespace; `None` lists across all of them
    pub namespace: Option<String>,
    /// Every pair must be present on the object
    pub label_selector: BTreeMap<String, String>,
}

impl ListOptions {
    pub fn in_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            ..Default::default()
        }
    }

    pub fn with_label(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.label_selector.insert(key.into(), value.into());
        self
    }

    pub fn matches(
        &self,
        meta: &ObjectMeta,
    ) -> bool {
        if let Some(ns) = &self.namespace {
            if &meta.namespace != ns {
                return false;
            }
        }
        self.label_selector
            .iter()
            .all(|(k, v)| meta.labels.get(k) == Some(v))
    }
}

/// Result of a list request
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectList<T> {
    pub items: Vec<T>,
    /// Store revision the listing reflects; watches resume from here
    pub resource_version: u64,
}

/// One change delivered by a watch stream
#[derive(Debug, Clone, PartialEq)]
pub enum WatchNotification {
    Added(DynamicObject),
    Modified(DynamicObject),
    /// Carries the last state of the removed object
    Deleted(DynamicObject),
}

impl WatchNotification {
    pub fn object(&self) -> &DynamicObject {
        match self {
            WatchNotification::Added(o)
            | WatchNotification::Modified(o)
            | WatchNotification::Deleted(o) => o,
        }
    }

    pub fn resource_version(&self) -> u64 {
        self.object().metadata.resource_version
    }
}

pub type WatchStream = BoxStream<'static, Result<WatchNotification>>;

/// Read/write access to the remote object store.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    async fn get(
        &self,
        resource: &ResourceDescriptor,
        key: &ReconcileKey,
    ) -> Result<DynamicObject>;

    async fn list(
        &self,
        resource: &ResourceDescriptor,
        opts: &ListOptions,
    ) -> Result<ObjectList<DynamicObject>>;

    async fn create(
        &self,
        resource: &ResourceDescriptor,
        obj: DynamicObject,
    ) -> Result<DynamicObject>;

    /// Fails with `StoreError::Conflict` when `obj` carries a stale non-zero resource version.
    async fn update(
        &self,
        resource: &ResourceDescriptor,
        obj: DynamicObject,
    ) -> Result<DynamicObject>;

    async fn delete(
        &self,
        resource: &ResourceDescriptor,
        key: &ReconcileKey,
    ) -> Result<()>;
}

/// Change stream access to the remote object store.
#[async_trait]
pub trait WatchTransport: Send + Sync + 'static {
    /// Streams every change after `resource_version`.
    ///
    /// Fails with `StoreError::Expired` when that version is no longer
    /// retained; the caller must re-list.
    async fn watch(
        &self,
        resource: &ResourceDescriptor,
        resource_version: u64,
    ) -> Result<WatchStream>;
}
