use std::sync::Arc;

use tracing::trace;

use super::EventHandler;
use crate::GroupKind;
use crate::ReconcileKey;
use crate::Resource;
use crate::Result;
use crate::Scheme;
use crate::WorkQueue;

/// Enqueues the key of the object the event is about.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnqueueRequestForObject;

impl<K: Resource> EventHandler<K> for EnqueueRequestForObject {
    fn on_create(
        &self,
        object: &Arc<K>,
        queue: &WorkQueue,
    ) {
        queue.add(object.key());
    }

    fn on_update(
        &self,
        old: &Arc<K>,
        new: &Arc<K>,
        queue: &WorkQueue,
    ) {
        queue.add(old.key());
        queue.add(new.key());
    }

    fn on_delete(
        &self,
        object: &Arc<K>,
        _final_state_unknown: bool,
        queue: &WorkQueue,
    ) {
        queue.add(object.key());
    }

    fn on_generic(
        &self,
        object: &Arc<K>,
        queue: &WorkQueue,
    ) {
        queue.add(object.key());
    }
}

/// Enqueues the owners of the object instead of the object itself.
///
/// Every owner reference whose group and kind match `owner` yields the key
/// `{object.namespace, owner.name}`.
#[derive(Debug, Clone)]
pub struct EnqueueRequestForOwner {
    owner: GroupKind,
    controlling_only: bool,
}

impl EnqueueRequestForOwner {
    pub fn new(owner: GroupKind) -> Self {
        Self {
            owner,
            controlling_only: false,
        }
    }

    /// Owner kind looked up from the scheme registration of `P`.
    pub fn for_type<P: Resource>(scheme: &Scheme) -> Result<Self> {
        Ok(Self::new(scheme.kind_for::<P>()?.group_kind()))
    }

    /// Only follow the reference marked as the controlling owner.
    pub fn controlling_only(mut self) -> Self {
        self.controlling_only = true;
        self
    }

    fn owner_keys<K: Resource>(
        &self,
        object: &K,
    ) -> Vec<ReconcileKey> {
        let meta = object.meta();
        meta.owner_references
            .iter()
            .filter(|r| !self.controlling_only || r.controller)
            .filter(|r| r.group == self.owner.group && r.kind == self.owner.kind)
            .map(|r| ReconcileKey::new(meta.namespace.clone(), r.name.clone()))
            .collect()
    }

    fn enqueue_owners<K: Resource>(
        &self,
        object: &K,
        queue: &WorkQueue,
    ) {
        for key in self.owner_keys(object) {
            trace!("enqueue owner {} of {}", key, object.key());
            queue.add(key);
        }
    }
}

impl<K: Resource> EventHandler<K> for EnqueueRequestForOwner {
    fn on_create(
        &self,
        object: &Arc<K>,
        queue: &WorkQueue,
    ) {
        self.enqueue_owners(object.as_ref(), queue);
    }

    fn on_update(
        &self,
        old: &Arc<K>,
        new: &Arc<K>,
        queue: &WorkQueue,
    ) {
        self.enqueue_owners(old.as_ref(), queue);
        self.enqueue_owners(new.as_ref(), queue);
    }

    fn on_delete(
        &self,
        object: &Arc<K>,
        _final_state_unknown: bool,
        queue: &WorkQueue,
    ) {
        self.enqueue_owners(object.as_ref(), queue);
    }

    fn on_generic(
        &self,
        object: &Arc<K>,
        queue: &WorkQueue,
    ) {
        self.enqueue_owners(object.as_ref(), queue);
    }
}

type MapFn<K> = Box<dyn Fn(&K) -> Vec<ReconcileKey> + Send + Sync>;

/// Enqueues whatever keys a user closure maps the object to.
///
/// On update both the old and the new object are mapped.
pub struct EnqueueRequestsFromMapFunc<K> {
    map: MapFn<K>,
}

impl<K> EnqueueRequestsFromMapFunc<K> {
    pub fn new(map: impl Fn(&K) -> Vec<ReconcileKey> + Send + Sync + 'static) -> Self {
        Self { map: Box::new(map) }
    }

    fn enqueue(
        &self,
        object: &K,
        queue: &WorkQueue,
    ) {
        for key in (self.map)(object) {
            queue.add(key);
        }
    }
}

impl<K: Send + Sync + 'static> EventHandler<K> for EnqueueRequestsFromMapFunc<K> {
    fn on_create(
        &self,
        object: &Arc<K>,
        queue: &WorkQueue,
    ) {
        self.enqueue(object, queue);
    }

    fn on_update(
        &self,
        old: &Arc<K>,
        new: &Arc<K>,
        queue: &WorkQueue,
    ) {
        self.enqueue(old, queue);
        self.enqueue(new, queue);
    }

    fn on_delete(
        &self,
        object: &Arc<K>,
        _final_state_unknown: bool,
        queue: &WorkQueue,
    ) {
        self.enqueue(object, queue);
    }

    fn on_generic(
        &self,
        object: &Arc<K>,
        queue: &WorkQueue,
    ) {
        self.enqueue(object, queue);
    }
}
