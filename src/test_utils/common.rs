use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;

use super::test_scheme;
use crate::BackoffPolicy;
use crate::Cache;
use crate::CacheConfig;
use crate::Client;
use crate::DefaultRestMapper;
use crate::Event;
use crate::MemoryStore;
use crate::ReconcileKey;
use crate::Resource;
use crate::ResourceEventHandler;
use crate::StoreConfig;
use crate::WorkQueue;

/// Takes every key that is ready right now, releasing each one.
pub fn drain_queue(queue: &WorkQueue) -> Vec<ReconcileKey> {
    let mut keys = Vec::new();
    while let Some(Some(key)) = queue.get().now_or_never() {
        queue.done(&key);
        keys.push(key);
    }
    keys
}

/// Next key within `within`, or `None` on timeout or shutdown.
pub async fn next_key(
    queue: &WorkQueue,
    within: Duration,
) -> Option<ReconcileKey> {
    tokio::time::timeout(within, queue.get()).await.ok().flatten()
}

/// Polls `check` until it holds or `within` elapses.
pub async fn eventually(
    within: Duration,
    mut check: impl FnMut() -> bool,
) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Typed client over `store` using the test scheme
pub fn memory_client(store: Arc<MemoryStore>) -> Client {
    let scheme = Arc::new(test_scheme());
    let mapper = Arc::new(DefaultRestMapper::from_scheme(&scheme).expect("mapper"));
    Client::new(store, scheme, mapper, &StoreConfig::default())
}

/// Cache over `store` with fast watch retries
pub fn memory_cache(store: Arc<MemoryStore>) -> Cache {
    memory_cache_with(store, fast_cache_config())
}

pub fn memory_cache_with(
    store: Arc<MemoryStore>,
    config: CacheConfig,
) -> Cache {
    Cache::new(memory_client(store.clone()), store, config, tracing::Span::none())
}

pub fn fast_cache_config() -> CacheConfig {
    CacheConfig {
        resync_period_ms: 0,
        watch_retry: BackoffPolicy {
            max_retries: 0,
            base_delay_ms: 10,
            max_delay_ms: 50,
        },
    }
}

/// Records every event as `"<kind> <key>"`
#[derive(Clone, Default)]
pub struct EventLog {
    entries: Arc<parking_lot::Mutex<Vec<String>>>,
}

impl EventLog {
    pub fn handler<K: Resource>(&self) -> Arc<dyn ResourceEventHandler<K>> {
        let entries = self.entries.clone();
        Arc::new(move |event: &Event<K>| {
            let mut line = format!("{} {}", event.kind(), event.object().key());
            if let Event::Deleted {
                final_state_unknown: true,
                ..
            } = event
            {
                line.push_str(" (unknown)");
            }
            entries.lock().push(line);
        })
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    pub fn contains(
        &self,
        line: &str,
    ) -> bool {
        self.entries.lock().iter().any(|l| l == line)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}
