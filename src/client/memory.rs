use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::VecDeque;

use async_trait::async_trait;
use futures::stream;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;

use super::ListOptions;
use super::ObjectList;
use super::ObjectStore;
use super::WatchNotification;
use super::WatchStream;
use super::WatchTransport;
use crate::DynamicObject;
use crate::ReconcileKey;
use crate::ResourceDescriptor;
use crate::Result;
use crate::StoreError;

const DEFAULT_HISTORY_LIMIT: usize = 1024;
const BROADCAST_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct StoredEvent {
    resource: String,
    revision: u64,
    notification: WatchNotification,
}

#[derive(Debug, Default)]
struct MemoryState {
    objects: HashMap<String, BTreeMap<ReconcileKey, DynamicObject>>,
    revision: u64,
    history: VecDeque<StoredEvent>,
    /// Highest revision evicted from `history`; watches from below it are expired
    compacted: u64,
    watch_outage: bool,
}

/// In-memory object store implementing both [`ObjectStore`] and [`WatchTransport`].
///
/// Revisions increase by one on every write. A bounded history of changes backs
/// resumable watches.
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    events: broadcast::Sender<StoredEvent>,
    watches: Mutex<CancellationToken>,
    history_limit: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }

    pub fn with_history_limit(history_limit: usize) -> Self {
        let (events, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            state: Mutex::new(MemoryState::default()),
            events,
            watches: Mutex::new(CancellationToken::new()),
            history_limit: history_limit.max(1),
        }
    }

    /// Current store revision
    pub fn revision(&self) -> u64 {
        self.state.lock().revision
    }

    /// Ends every open watch stream. Watchers see a clean end of stream.
    pub fn sever_watches(&self) {
        let mut token = self.watches.lock();
        token.cancel();
        *token = CancellationToken::new();
        debug!("severed all memory store watches");
    }

    /// While set, new watch requests fail with a transport error.
    pub fn set_watch_outage(
        &self,
        outage: bool,
    ) {
        self.state.lock().watch_outage = outage;
    }

    fn commit(
        &self,
        state: &mut MemoryState,
        resource: &ResourceDescriptor,
        notification: WatchNotification,
    ) {
        let event = StoredEvent {
            resource: resource.to_string(),
            revision: state.revision,
            notification,
        };
        state.history.push_back(event.clone());
        while state.history.len() > self.history_limit {
            if let Some(evicted) = state.history.pop_front() {
                state.compacted = evicted.revision;
            }
        }
        // No receivers is fine
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(
        &self,
        resource: &ResourceDescriptor,
        key: &ReconcileKey,
    ) -> Result<DynamicObject> {
        let state = self.state.lock();
        state
            .objects
            .get(&resource.to_string())
            .and_then(|objects| objects.get(key))
            .cloned()
            .ok_or_else(|| not_found(resource, key))
    }

    async fn list(
        &self,
        resource: &ResourceDescriptor,
        opts: &ListOptions,
    ) -> Result<ObjectList<DynamicObject>> {
        let state = self.state.lock();
        let items = state
            .objects
            .get(&resource.to_string())
            .map(|objects| {
                objects
                    .values()
                    .filter(|o| opts.matches(&o.metadata))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(ObjectList {
            items,
            resource_version: state.revision,
        })
    }

    async fn create(
        &self,
        resource: &ResourceDescriptor,
        mut obj: DynamicObject,
    ) -> Result<DynamicObject> {
        let key = ReconcileKey::from(&obj.metadata);
        let mut state = self.state.lock();
        if state
            .objects
            .get(&resource.to_string())
            .is_some_and(|objects| objects.contains_key(&key))
        {
            return Err(StoreError::AlreadyExists {
                kind: resource.to_string(),
                key: key.to_string(),
            }
            .into());
        }

        state.revision += 1;
        obj.metadata.resource_version = state.revision;
        if obj.metadata.uid.is_empty() {
            obj.metadata.uid = format!("uid-{}", state.revision);
        }
        if obj.metadata.generation == 0 {
            obj.metadata.generation = 1;
        }
        state
            .objects
            .entry(resource.to_string())
            .or_default()
            .insert(key.clone(), obj.clone());
        trace!("created {} {} at {}", resource, key, state.revision);
        self.commit(&mut state, resource, WatchNotification::Added(obj.clone()));
        Ok(obj)
    }

    async fn update(
        &self,
        resource: &ResourceDescriptor,
        mut obj: DynamicObject,
    ) -> Result<DynamicObject> {
        let key = ReconcileKey::from(&obj.metadata);
        let mut state = self.state.lock();
        let Some(current) = state
            .objects
            .get(&resource.to_string())
            .and_then(|objects| objects.get(&key))
            .cloned()
        else {
            return Err(not_found(resource, &key));
        };

        let expected = obj.metadata.resource_version;
        if expected != 0 && expected != current.metadata.resource_version {
            return Err(StoreError::Conflict {
                kind: resource.to_string(),
                key: key.to_string(),
                expected,
                actual: current.metadata.resource_version,
            }
            .into());
        }

        state.revision += 1;
        obj.metadata.resource_version = state.revision;
        obj.metadata.uid = current.metadata.uid.clone();
        obj.metadata.generation = if obj.data != current.data {
            current.metadata.generation + 1
        } else {
            current.metadata.generation
        };
        state
            .objects
            .entry(resource.to_string())
            .or_default()
            .insert(key.clone(), obj.clone());
        trace!("updated {} {} at {}", resource, key, state.revision);
        self.commit(&mut state, resource, WatchNotification::Modified(obj.clone()));
        Ok(obj)
    }

    async fn delete(
        &self,
        resource: &ResourceDescriptor,
        key: &ReconcileKey,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let Some(mut removed) = state
            .objects
            .get_mut(&resource.to_string())
            .and_then(|objects| objects.remove(key))
        else {
            return Err(not_found(resource, key));
        };

        state.revision += 1;
        removed.metadata.resource_version = state.revision;
        trace!("deleted {} {} at {}", resource, key, state.revision);
        self.commit(&mut state, resource, WatchNotification::Deleted(removed));
        Ok(())
    }
}

#[async_trait]
impl WatchTransport for MemoryStore {
    async fn watch(
        &self,
        resource: &ResourceDescriptor,
        resource_version: u64,
    ) -> Result<WatchStream> {
        let name = resource.to_string();
        let severed = self.watches.lock().clone();

        // Backlog and subscription are taken under the same lock so no write falls between them.
        let (backlog, rx) = {
            let state = self.state.lock();
            if state.watch_outage {
                return Err(StoreError::Transport("watch endpoint unavailable".to_string()).into());
            }
            if resource_version < state.compacted {
                return Err(StoreError::Expired(resource_version).into());
            }
            let backlog: Vec<WatchNotification> = state
                .history
                .iter()
                .filter(|e| e.resource == name && e.revision > resource_version)
                .map(|e| e.notification.clone())
                .collect();
            (backlog, self.events.subscribe())
        };

        let live = BroadcastStream::new(rx).filter_map(move |r| {
            let item: Option<Result<WatchNotification>> = match r {
                Ok(e) if e.resource == name && e.revision > resource_version => Some(Ok(e.notification)),
                Ok(_) => None,
                Err(BroadcastStreamRecvError::Lagged(n)) => {
                    debug!("memory watch on {} lagged by {} events", name, n);
                    Some(Err(StoreError::Expired(resource_version).into()))
                }
            };
            futures::future::ready(item)
        });

        Ok(stream::iter(backlog.into_iter().map(Ok))
            .chain(live)
            .take_until(severed.cancelled_owned())
            .boxed())
    }
}

fn not_found(
    resource: &ResourceDescriptor,
    key: &ReconcileKey,
) -> crate::Error {
    StoreError::NotFound {
        kind: resource.to_string(),
        key: key.to_string(),
    }
    .into()
}
