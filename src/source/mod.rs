//! Event sources feeding a controller's work queue.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::predicate::evaluate_all;
use crate::utils::async_task::spawn_task;
use crate::Cache;
use crate::Event;
use crate::EventHandler;
use crate::Inject;
use crate::InjectError;
use crate::LifecycleError;
use crate::Predicate;
use crate::Resource;
use crate::ResourceEventHandler;
use crate::Result;
use crate::SharedInformer;
use crate::WantsCache;
use crate::WorkQueue;

/// Origin of events for one controller watch.
///
/// `start` registers the pipeline and returns without blocking.
#[async_trait]
pub trait Source<K: Resource>: Inject + Send + Sync + 'static {
    fn start(
        &self,
        handler: Arc<dyn EventHandler<K>>,
        queue: WorkQueue,
        predicates: Vec<Arc<dyn Predicate<K>>>,
    ) -> Result<()>;

    /// True once the source has delivered its initial state
    async fn wait_for_sync(
        &self,
        _stop: &CancellationToken,
    ) -> bool {
        true
    }
}

/// Applies `predicates` and forwards accepted events to `handler`.
fn filtered<K: Resource>(
    handler: Arc<dyn EventHandler<K>>,
    queue: WorkQueue,
    predicates: Vec<Arc<dyn Predicate<K>>>,
) -> impl Fn(&Event<K>) + Send + Sync + 'static {
    move |event: &Event<K>| {
        if evaluate_all(&predicates, event) {
            handler.dispatch(event, &queue);
        }
    }
}

/// Cache-backed source for every change of type `K`.
///
/// The cache is normally injected by the controller's manager.
pub struct Kind<K: Resource> {
    cache: Option<Cache>,
    informer: Mutex<Option<Arc<SharedInformer<K>>>>,
}

impl<K: Resource> Default for Kind<K> {
    fn default() -> Self {
        Self {
            cache: None,
            informer: Mutex::new(None),
        }
    }
}

impl<K: Resource> Kind<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache(cache: Cache) -> Self {
        Self {
            cache: Some(cache),
            informer: Mutex::new(None),
        }
    }
}

impl<K: Resource> WantsCache for Kind<K> {
    fn inject_cache(
        &mut self,
        cache: Cache,
    ) -> Result<()> {
        self.cache = Some(cache);
        Ok(())
    }
}

impl<K: Resource> Inject for Kind<K> {
    /// Only asks for a cache when none was supplied with [`Kind::with_cache`].
    fn wants_cache(&mut self) -> Option<&mut dyn WantsCache> {
        if self.cache.is_some() {
            return None;
        }
        Some(self)
    }
}

#[async_trait]
impl<K: Resource> Source<K> for Kind<K> {
    fn start(
        &self,
        handler: Arc<dyn EventHandler<K>>,
        queue: WorkQueue,
        predicates: Vec<Arc<dyn Predicate<K>>>,
    ) -> Result<()> {
        let cache = self.cache.as_ref().ok_or(InjectError::Unavailable("cache"))?;
        let informer = cache.informer_for::<K>()?;
        informer.add_event_handler(Arc::new(filtered(handler, queue, predicates)));
        *self.informer.lock() = Some(informer);
        Ok(())
    }

    async fn wait_for_sync(
        &self,
        stop: &CancellationToken,
    ) -> bool {
        let informer = self.informer.lock().clone();
        match informer {
            Some(informer) => informer.wait_for_sync(stop).await,
            None => false,
        }
    }
}

/// Relays objects from an external channel as `Generic` events.
///
/// The relay ends when every sender is dropped or the queue shuts down.
pub struct Channel<K: Resource> {
    receiver: Mutex<Option<mpsc::Receiver<Arc<K>>>>,
}

impl<K: Resource> Channel<K> {
    pub fn new(receiver: mpsc::Receiver<Arc<K>>) -> Self {
        Self {
            receiver: Mutex::new(Some(receiver)),
        }
    }
}

impl<K: Resource> Inject for Channel<K> {}

#[async_trait]
impl<K: Resource> Source<K> for Channel<K> {
    fn start(
        &self,
        handler: Arc<dyn EventHandler<K>>,
        queue: WorkQueue,
        predicates: Vec<Arc<dyn Predicate<K>>>,
    ) -> Result<()> {
        let mut receiver = self
            .receiver
            .lock()
            .take()
            .ok_or_else(|| LifecycleError::AlreadyStarted("channel source".to_string()))?;
        let deliver = filtered(handler, queue.clone(), predicates);

        spawn_task(
            &format!("channel source for {}", queue.name()),
            move || async move {
                loop {
                    tokio::select! {
                        biased;
                        _ = queue.closed() => {
                            debug!("queue {} closed, channel relay exiting", queue.name());
                            break;
                        }
                        received = receiver.recv() => match received {
                            Some(object) => deliver.on_event(&Event::Generic { object }),
                            None => {
                                debug!("channel closed, relay for {} exiting", queue.name());
                                break;
                            }
                        },
                    }
                }
                Ok(())
            },
            None,
        );
        Ok(())
    }
}

type StartFn<K> =
    Box<dyn Fn(Arc<dyn EventHandler<K>>, WorkQueue, Vec<Arc<dyn Predicate<K>>>) -> Result<()> + Send + Sync>;

/// Source from a closure; always reports synced.
pub struct SourceFn<K: Resource> {
    start: StartFn<K>,
    _kind: PhantomData<fn(&K)>,
}

impl<K: Resource> SourceFn<K> {
    pub fn new(
        f: impl Fn(Arc<dyn EventHandler<K>>, WorkQueue, Vec<Arc<dyn Predicate<K>>>) -> Result<()>
            + Send
            + Sync
            + 'static
    ) -> Self {
        Self {
            start: Box::new(f),
            _kind: PhantomData,
        }
    }
}

impl<K: Resource> Inject for SourceFn<K> {}

#[async_trait]
impl<K: Resource> Source<K> for SourceFn<K> {
    fn start(
        &self,
        handler: Arc<dyn EventHandler<K>>,
        queue: WorkQueue,
        predicates: Vec<Arc<dyn Predicate<K>>>,
    ) -> Result<()> {
        (self.start)(handler, queue, predicates)
    }
}
