use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::time::interval_at;
use tokio::time::Instant;
use tokio::time::Interval;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;
use tracing::Instrument;
use tracing::Span;

use crate::utils::async_task::retry_with_backoff;
use crate::utils::async_task::spawn_task;
use crate::CacheConfig;
use crate::Client;
use crate::Error;
use crate::Event;
use crate::ListOptions;
use crate::ReconcileKey;
use crate::Resource;
use crate::ResourceDescriptor;
use crate::Result;
use crate::SetupError;
use crate::StoreError;
use crate::SyncError;
use crate::WatchNotification;
use crate::WatchStream;
use crate::WatchTransport;

/// Receives every change an informer applies to its mirror.
///
/// Called synchronously on the informer's delivery path while the delivery
/// lock is held: implementations must not block or call back into the same
/// informer.
pub trait ResourceEventHandler<K>: Send + Sync + 'static {
    fn on_event(
        &self,
        event: &Event<K>,
    );
}

impl<K, F> ResourceEventHandler<K> for F
where
    F: Fn(&Event<K>) + Send + Sync + 'static,
{
    fn on_event(
        &self,
        event: &Event<K>,
    ) {
        self(event)
    }
}

type IndexFn<K> = Box<dyn Fn(&K) -> Vec<String> + Send + Sync>;

struct FieldIndex<K> {
    extract: IndexFn<K>,
    entries: HashMap<String, HashSet<ReconcileKey>>,
}

impl<K> FieldIndex<K> {
    fn insert(
        &mut self,
        key: &ReconcileKey,
        obj: &K,
    ) {
        for value in (self.extract)(obj) {
            self.entries.entry(value).or_default().insert(key.clone());
        }
    }

    fn remove(
        &mut self,
        key: &ReconcileKey,
        obj: &K,
    ) {
        for value in (self.extract)(obj) {
            if let Some(keys) = self.entries.get_mut(&value) {
                keys.remove(key);
                if keys.is_empty() {
                    self.entries.remove(&value);
                }
            }
        }
    }
}

/// Handlers and indexes; holding this lock is what serializes delivery.
struct Delivery<K> {
    handlers: Vec<Arc<dyn ResourceEventHandler<K>>>,
    indexes: HashMap<String, FieldIndex<K>>,
}

/// Watch-backed mirror of one resource type.
///
/// A single reflector task lists and watches the store, applies each change
/// to the mirror and fans it out to the registered handlers in order.
pub struct SharedInformer<K: Resource> {
    resource: ResourceDescriptor,
    client: Client,
    watcher: Arc<dyn WatchTransport>,
    config: CacheConfig,
    objects: RwLock<HashMap<ReconcileKey, Arc<K>>>,
    delivery: Mutex<Delivery<K>>,
    synced: watch::Sender<bool>,
    started: AtomicBool,
    span: Span,
}

impl<K: Resource> std::fmt::Debug for SharedInformer<K> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("SharedInformer").finish_non_exhaustive()
    }
}

impl<K: Resource> SharedInformer<K> {
    pub(crate) fn new(
        resource: ResourceDescriptor,
        client: Client,
        watcher: Arc<dyn WatchTransport>,
        config: CacheConfig,
        span: Span,
    ) -> Self {
        let (synced, _) = watch::channel(false);
        Self {
            resource,
            client,
            watcher,
            config,
            objects: RwLock::new(HashMap::new()),
            delivery: Mutex::new(Delivery {
                handlers: Vec::new(),
                indexes: HashMap::new(),
            }),
            synced,
            started: AtomicBool::new(false),
            span,
        }
    }

    pub fn resource(&self) -> &ResourceDescriptor {
        &self.resource
    }

    /// Registers `handler`. Objects already in the mirror are replayed to it
    /// as `Created` before any later change.
    pub fn add_event_handler(
        &self,
        handler: Arc<dyn ResourceEventHandler<K>>,
    ) {
        let mut delivery = self.delivery.lock();
        let snapshot: Vec<Arc<K>> = self.objects.read().values().cloned().collect();
        for object in snapshot {
            handler.on_event(&Event::Created { object });
        }
        delivery.handlers.push(handler);
    }

    /// Spawns the reflector task once; later calls are no-ops.
    pub fn start(
        self: &Arc<Self>,
        stop: CancellationToken,
    ) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let informer = self.clone();
        let span = self.span.clone();
        spawn_task(
            &format!("informer {}", self.resource),
            move || async move { informer.run(stop).await }.instrument(span),
            None,
        );
    }

    pub fn has_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Waits until the initial listing has been delivered; false if `stop` fires first.
    pub async fn wait_for_sync(
        &self,
        stop: &CancellationToken,
    ) -> bool {
        let mut rx = self.synced.subscribe();
        tokio::select! {
            biased;
            r = rx.wait_for(|synced| *synced) => r.is_ok(),
            _ = stop.cancelled() => false,
        }
    }

    pub fn get(
        &self,
        key: &ReconcileKey,
    ) -> Result<Option<Arc<K>>> {
        self.ensure_synced()?;
        Ok(self.objects.read().get(key).cloned())
    }

    pub fn list(
        &self,
        opts: &ListOptions,
    ) -> Result<Vec<Arc<K>>> {
        self.ensure_synced()?;
        Ok(self
            .objects
            .read()
            .values()
            .filter(|o| opts.matches(o.meta()))
            .cloned()
            .collect())
    }

    /// Registers a field index, back-filling it from the current mirror.
    pub fn add_index(
        &self,
        field: &str,
        extract: impl Fn(&K) -> Vec<String> + Send + Sync + 'static,
    ) -> Result<()> {
        let mut delivery = self.delivery.lock();
        if delivery.indexes.contains_key(field) {
            return Err(SetupError::InvalidOption {
                field: "field index",
                reason: format!("index {field} already registered for {}", self.resource),
            }
            .into());
        }
        let mut index = FieldIndex {
            extract: Box::new(extract),
            entries: HashMap::new(),
        };
        for (key, obj) in self.objects.read().iter() {
            index.insert(key, obj);
        }
        delivery.indexes.insert(field.to_string(), index);
        Ok(())
    }

    pub fn list_by_index(
        &self,
        field: &str,
        value: &str,
    ) -> Result<Vec<Arc<K>>> {
        self.ensure_synced()?;
        let delivery = self.delivery.lock();
        let index = delivery.indexes.get(field).ok_or_else(|| SetupError::InvalidOption {
            field: "field index",
            reason: format!("no index {field} registered for {}", self.resource),
        })?;
        let objects = self.objects.read();
        Ok(index
            .entries
            .get(value)
            .map(|keys| keys.iter().filter_map(|k| objects.get(k).cloned()).collect())
            .unwrap_or_default())
    }

    fn ensure_synced(&self) -> Result<()> {
        if !self.has_synced() {
            return Err(SyncError::NotSynced {
                kind: self.resource.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Reflector: list, then watch from the listing's version until stopped.
    async fn run(
        self: Arc<Self>,
        stop: CancellationToken,
    ) -> Result<()> {
        let policy = self.config.watch_retry;
        let mut resync = self.config.resync_period().map(|period| {
            let mut tick = interval_at(Instant::now() + period, period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tick
        });
        let everything = ListOptions::default();
        let mut resource_version = 0;
        let mut need_list = true;

        loop {
            if need_list {
                let listed = retry_with_backoff(
                    "list",
                    || self.client.list::<K>(&everything),
                    policy,
                    &stop,
                )
                .await?;
                let Some(list) = listed else {
                    return Ok(());
                };
                debug!(
                    "listed {} objects at version {}",
                    list.items.len(),
                    list.resource_version
                );
                self.replace(list.items);
                resource_version = list.resource_version;
                need_list = false;
                if !self.synced.send_replace(true) {
                    info!("cache for {} synced", self.resource);
                }
            }

            let opened = retry_with_backoff(
                "watch",
                || self.open_watch(resource_version),
                policy,
                &stop,
            )
            .await?;
            let mut stream = match opened {
                None => return Ok(()),
                Some(None) => {
                    warn!("watch version {} expired, re-listing", resource_version);
                    need_list = true;
                    continue;
                }
                Some(Some(stream)) => stream,
            };

            loop {
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => return Ok(()),
                    _ = next_tick(&mut resync) => self.resync(),
                    item = stream.next() => match item {
                        None => {
                            debug!("watch closed at version {}, reconnecting", resource_version);
                            break;
                        }
                        Some(Ok(notification)) => {
                            resource_version = resource_version.max(notification.resource_version());
                            self.apply(notification);
                        }
                        Some(Err(Error::Store(StoreError::Expired(v)))) => {
                            warn!("watch version {} expired mid-stream, re-listing", v);
                            need_list = true;
                            break;
                        }
                        Some(Err(e)) => {
                            warn!("watch error, reconnecting: {}", e);
                            break;
                        }
                    }
                }
            }
        }
    }

    /// `None` means the requested version is gone and a re-list is needed.
    async fn open_watch(
        &self,
        resource_version: u64,
    ) -> Result<Option<WatchStream>> {
        match self.watcher.watch(&self.resource, resource_version).await {
            Ok(stream) => Ok(Some(stream)),
            Err(Error::Store(StoreError::Expired(_))) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Diffs a full listing against the mirror and delivers the difference.
    fn replace(
        &self,
        items: Vec<K>,
    ) {
        let mut delivery = self.delivery.lock();
        let mut seen = HashSet::with_capacity(items.len());

        for item in items {
            let key = item.key();
            seen.insert(key.clone());
            self.upsert(&mut delivery, key, Arc::new(item));
        }

        let vanished: Vec<ReconcileKey> = self
            .objects
            .read()
            .keys()
            .filter(|k| !seen.contains(*k))
            .cloned()
            .collect();
        for key in vanished {
            self.remove(&mut delivery, &key, None, true);
        }
    }

    fn apply(
        &self,
        notification: WatchNotification,
    ) {
        let deleted = matches!(notification, WatchNotification::Deleted(_));
        let obj = match notification {
            WatchNotification::Added(o)
            | WatchNotification::Modified(o)
            | WatchNotification::Deleted(o) => o,
        };
        let typed: K = match obj.into_typed() {
            Ok(t) => t,
            Err(e) => {
                warn!("dropping undecodable {} notification: {}", self.resource, e);
                return;
            }
        };

        let key = typed.key();
        let mut delivery = self.delivery.lock();
        if deleted {
            self.remove(&mut delivery, &key, Some(Arc::new(typed)), false);
        } else {
            self.upsert(&mut delivery, key, Arc::new(typed));
        }
    }

    fn upsert(
        &self,
        delivery: &mut Delivery<K>,
        key: ReconcileKey,
        new: Arc<K>,
    ) {
        let old = self.objects.write().insert(key.clone(), new.clone());
        let event = match old {
            Some(old) if old.meta().resource_version == new.meta().resource_version => {
                return;
            }
            Some(old) => {
                for index in delivery.indexes.values_mut() {
                    index.remove(&key, &old);
                    index.insert(&key, &new);
                }
                Event::Updated { old, new }
            }
            None => {
                for index in delivery.indexes.values_mut() {
                    index.insert(&key, &new);
                }
                Event::Created { object: new }
            }
        };
        trace!("{} {}", event.kind(), key);
        fan_out(&delivery.handlers, &event);
    }

    fn remove(
        &self,
        delivery: &mut Delivery<K>,
        key: &ReconcileKey,
        last_state: Option<Arc<K>>,
        final_state_unknown: bool,
    ) {
        let known = self.objects.write().remove(key);
        if let Some(old) = &known {
            for index in delivery.indexes.values_mut() {
                index.remove(key, old);
            }
        }
        let Some(object) = last_state.or(known) else {
            return;
        };
        trace!("delete {} (final state unknown: {})", key, final_state_unknown);
        fan_out(
            &delivery.handlers,
            &Event::Deleted {
                object,
                final_state_unknown,
            },
        );
    }

    /// Redelivers every mirrored object as an update to itself.
    fn resync(&self) {
        let delivery = self.delivery.lock();
        let snapshot: Vec<Arc<K>> = self.objects.read().values().cloned().collect();
        trace!("resync {} objects", snapshot.len());
        for object in snapshot {
            fan_out(
                &delivery.handlers,
                &Event::Updated {
                    old: object.clone(),
                    new: object,
                },
            );
        }
    }
}

fn fan_out<K: 'static>(
    handlers: &[Arc<dyn ResourceEventHandler<K>>],
    event: &Event<K>,
) {
    for handler in handlers {
        handler.on_event(event);
    }
}

async fn next_tick(resync: &mut Option<Interval>) {
    match resync {
        Some(tick) => {
            tick.tick().await;
        }
        None => std::future::pending().await,
    }
}
