//! Controller: watches feed one work queue drained by a pool of reconcile workers.

use std::fmt::Debug;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use futures::future::try_join_all;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::info_span;
use tracing::trace;
use tracing::Instrument;
use tracing::Span;

use crate::controller_rate_limiter;
use crate::metrics::RECONCILE_ERRORS;
use crate::metrics::RECONCILE_TIME_SECONDS;
use crate::metrics::RECONCILE_TOTAL;
use crate::Cache;
use crate::Client;
use crate::ControllerConfig;
use crate::Error;
use crate::EventHandler;
use crate::Inject;
use crate::Injector;
use crate::Kind;
use crate::LifecycleError;
use crate::Predicate;
use crate::RateLimiter;
use crate::ReconcileKey;
use crate::ReconcileResult;
use crate::Reconciler;
use crate::Resource;
use crate::Result;
use crate::Runnable;
use crate::Scheme;
use crate::SetupError;
use crate::Source;
use crate::StoreConfig;
use crate::SyncError;
use crate::WantsCache;
use crate::WantsClient;
use crate::WantsConfig;
use crate::WantsScheme;
use crate::WorkQueue;

#[derive(Clone)]
pub struct ControllerOptions {
    pub max_concurrent_reconciles: usize,
    /// `None` waits for sources without a bound
    pub cache_sync_timeout: Option<Duration>,
    /// `None` uses the limiter built from the default controller config
    pub rate_limiter: Option<Arc<dyn RateLimiter>>,
    /// Parent span for this controller; `None` creates a root span
    pub logger: Option<Span>,
}

impl Debug for ControllerOptions {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ControllerOptions")
            .field("max_concurrent_reconciles", &self.max_concurrent_reconciles)
            .field("cache_sync_timeout", &self.cache_sync_timeout)
            .field("rate_limiter", &self.rate_limiter.is_some())
            .finish()
    }
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self::from_config(&ControllerConfig::default())
    }
}

impl ControllerOptions {
    pub fn from_config(config: &ControllerConfig) -> Self {
        Self {
            max_concurrent_reconciles: config.max_concurrent_reconciles,
            cache_sync_timeout: config.cache_sync_timeout(),
            rate_limiter: Some(controller_rate_limiter(config)),
            logger: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Created,
    WaitingForSync,
    Running,
    Stopped,
}

/// One registered (source, handler, predicates) triple with its key type erased.
#[async_trait]
trait Watch: Send + Sync {
    fn inject_and_start(
        &mut self,
        injector: &Injector,
        queue: &WorkQueue,
    ) -> Result<()>;

    async fn wait_for_sync(
        &self,
        stop: &CancellationToken,
    ) -> bool;
}

struct Registration<K: Resource, S> {
    source: S,
    handler: Arc<dyn EventHandler<K>>,
    predicates: Vec<Arc<dyn Predicate<K>>>,
}

#[async_trait]
impl<K: Resource, S: Source<K>> Watch for Registration<K, S> {
    fn inject_and_start(
        &mut self,
        injector: &Injector,
        queue: &WorkQueue,
    ) -> Result<()> {
        injector.inject(&mut self.source)?;
        self.source
            .start(self.handler.clone(), queue.clone(), self.predicates.clone())
    }

    async fn wait_for_sync(
        &self,
        stop: &CancellationToken,
    ) -> bool {
        self.source.wait_for_sync(stop).await
    }
}

struct Lifecycle {
    state: ControllerState,
    pending: Vec<Box<dyn Watch>>,
    started: Vec<Arc<dyn Watch>>,
}

struct ControllerInner {
    name: String,
    queue: WorkQueue,
    max_concurrent_reconciles: usize,
    cache_sync_timeout: Option<Duration>,
    reconciler: Mutex<Option<Box<dyn Reconciler>>>,
    deps: Mutex<Injector>,
    lifecycle: Mutex<Lifecycle>,
    span: Span,
}

/// Handle to a controller; clones share the same queue and workers.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

impl Debug for Controller {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish()
    }
}

impl Controller {
    pub fn new<R: Reconciler>(
        name: impl Into<String>,
        reconciler: R,
        options: ControllerOptions,
    ) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(SetupError::MissingField("Name for Controller").into());
        }
        if options.max_concurrent_reconciles == 0 {
            return Err(SetupError::InvalidOption {
                field: "max_concurrent_reconciles",
                reason: "must be at least 1".to_string(),
            }
            .into());
        }

        let rate_limiter = options
            .rate_limiter
            .unwrap_or_else(|| controller_rate_limiter(&ControllerConfig::default()));
        let reconciler: Box<dyn Reconciler> = Box::new(reconciler);
        let span = match options.logger {
            Some(parent) => info_span!(parent: &parent, "controller", name = %name),
            None => info_span!("controller", name = %name),
        };

        Ok(Self {
            inner: Arc::new(ControllerInner {
                queue: WorkQueue::with_rate_limiter(name.clone(), rate_limiter),
                name,
                max_concurrent_reconciles: options.max_concurrent_reconciles,
                cache_sync_timeout: options.cache_sync_timeout,
                reconciler: Mutex::new(Some(reconciler)),
                deps: Mutex::new(Injector::default()),
                lifecycle: Mutex::new(Lifecycle {
                    state: ControllerState::Created,
                    pending: Vec::new(),
                    started: Vec::new(),
                }),
                span,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.inner.queue
    }

    pub fn state(&self) -> ControllerState {
        self.inner.lifecycle.lock().state
    }

    /// Routes events from `source`, filtered by `predicates`, through
    /// `handler` into this controller's queue.
    ///
    /// Before start the registration is deferred; afterwards the source is
    /// injected and started immediately. Until the controller is Running, every
    /// registered source must sync before workers start.
    pub fn watch<K, S, H>(
        &self,
        source: S,
        handler: H,
        predicates: Vec<Arc<dyn Predicate<K>>>,
    ) -> Result<()>
    where
        K: Resource,
        S: Source<K>,
        H: EventHandler<K>,
    {
        let mut registration: Box<dyn Watch> = Box::new(Registration {
            source,
            handler: Arc::new(handler) as Arc<dyn EventHandler<K>>,
            predicates,
        });

        let mut lifecycle = self.inner.lifecycle.lock();
        match lifecycle.state {
            ControllerState::Created => {
                lifecycle.pending.push(registration);
            }
            ControllerState::WaitingForSync | ControllerState::Running => {
                let deps = self.inner.deps.lock().clone();
                registration.inject_and_start(&deps, &self.inner.queue)?;
                lifecycle.started.push(Arc::from(registration));
            }
            ControllerState::Stopped => {
                return Err(LifecycleError::ComponentFailed {
                    name: self.inner.name.clone(),
                    reason: "controller has stopped".to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// `watch` over the cache-backed source for `K`.
    pub fn watch_kind<K, H>(
        &self,
        handler: H,
        predicates: Vec<Arc<dyn Predicate<K>>>,
    ) -> Result<()>
    where
        K: Resource,
        H: EventHandler<K>,
    {
        self.watch(Kind::<K>::new(), handler, predicates)
    }

    async fn run(
        &self,
        stop: CancellationToken,
    ) -> Result<()> {
        let reconciler = {
            let mut lifecycle = self.inner.lifecycle.lock();
            if lifecycle.state != ControllerState::Created {
                return Err(LifecycleError::AlreadyStarted(format!("controller {}", self.inner.name)).into());
            }
            lifecycle.state = ControllerState::WaitingForSync;
            match self.prepare(&mut lifecycle) {
                Ok(reconciler) => reconciler,
                Err(e) => {
                    error!("controller {} failed to start: {}", self.inner.name, e);
                    lifecycle.state = ControllerState::Stopped;
                    drop(lifecycle);
                    self.inner.queue.shut_down();
                    return Err(e);
                }
            }
        };

        info!("Waiting for sources to sync");
        if let Err(e) = self.wait_for_sources(&stop).await {
            error!("{}", e);
            self.inner.lifecycle.lock().state = ControllerState::Stopped;
            self.inner.queue.shut_down();
            return Err(e);
        }

        info!(
            "Starting workers, worker count: {}",
            self.inner.max_concurrent_reconciles
        );
        let mut handles = Vec::with_capacity(self.inner.max_concurrent_reconciles);
        for worker in 0..self.inner.max_concurrent_reconciles {
            let controller = self.clone();
            let reconciler = reconciler.clone();
            handles.push(tokio::spawn(
                async move { controller.run_worker(worker, reconciler).await }
                    .instrument(self.inner.span.clone()),
            ));
        }

        stop.cancelled().await;
        info!("Shutdown signal received, waiting for all workers to finish");
        self.inner.queue.shut_down();
        for result in join_all(handles).await {
            if let Err(e) = result {
                error!("reconcile worker ended abnormally: {:?}", e);
            }
        }
        self.inner.lifecycle.lock().state = ControllerState::Stopped;
        info!("All workers finished");
        Ok(())
    }

    /// Injects dependencies into the reconciler and starts deferred sources.
    fn prepare(
        &self,
        lifecycle: &mut Lifecycle,
    ) -> Result<Arc<dyn Reconciler>> {
        let deps = self.inner.deps.lock().clone();
        let mut reconciler = self
            .inner
            .reconciler
            .lock()
            .take()
            .ok_or_else(|| LifecycleError::AlreadyStarted(format!("controller {}", self.inner.name)))?;
        deps.inject(&mut *reconciler)?;

        for mut registration in lifecycle.pending.drain(..) {
            registration.inject_and_start(&deps, &self.inner.queue)?;
            lifecycle.started.push(Arc::from(registration));
        }
        Ok(Arc::from(reconciler))
    }

    /// Waits for every started source to sync, then enters Running.
    ///
    /// Sources watched while waiting join the wait; the controller only
    /// enters Running once no unsynced source remains.
    async fn wait_for_sources(
        &self,
        stop: &CancellationToken,
    ) -> Result<()> {
        let timeout = self.inner.cache_sync_timeout;
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut waited = 0;
        loop {
            let batch: Vec<Arc<dyn Watch>> = {
                let mut lifecycle = self.inner.lifecycle.lock();
                if lifecycle.started.len() == waited {
                    lifecycle.state = ControllerState::Running;
                    return Ok(());
                }
                let batch = lifecycle.started[waited..].to_vec();
                waited = lifecycle.started.len();
                batch
            };

            let all = try_join_all(batch.iter().map(|w| async move {
                if w.wait_for_sync(stop).await {
                    Ok(())
                } else {
                    Err(())
                }
            }));
            let outcome = match (deadline, timeout) {
                (Some(deadline), Some(timeout)) => match tokio::time::timeout_at(deadline, all).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        return Err(SyncError::Timeout {
                            controller: self.inner.name.clone(),
                            timeout,
                        }
                        .into())
                    }
                },
                _ => all.await,
            };

            if outcome.is_err() {
                return Err(SyncError::NotReached {
                    controller: self.inner.name.clone(),
                }
                .into());
            }
        }
    }

    async fn run_worker(
        &self,
        worker: usize,
        reconciler: Arc<dyn Reconciler>,
    ) {
        debug!("worker {} started", worker);
        while self.process_next(&reconciler).await {}
        debug!("worker {} exited", worker);
    }

    /// Handles one key; false once the queue is shut down and drained.
    async fn process_next(
        &self,
        reconciler: &Arc<dyn Reconciler>,
    ) -> bool {
        let Some(key) = self.inner.queue.get().await else {
            return false;
        };
        let name = self.inner.name.as_str();

        let timer = RECONCILE_TIME_SECONDS.with_label_values(&[name]).start_timer();
        let result = AssertUnwindSafe(reconciler.reconcile(key.clone()))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(Error::Fatal(format!("reconciler panicked on {key}"))));
        timer.observe_duration();

        self.classify(&key, result);
        self.inner.queue.done(&key);
        true
    }

    fn classify(
        &self,
        key: &ReconcileKey,
        result: Result<ReconcileResult>,
    ) {
        let queue = &self.inner.queue;
        let name = self.inner.name.as_str();
        match result {
            Err(e) => {
                error!("Reconciler error for {}: {}", key, e);
                RECONCILE_ERRORS.with_label_values(&[name]).inc();
                RECONCILE_TOTAL.with_label_values(&[name, "error"]).inc();
                queue.add_rate_limited(key.clone());
            }
            Ok(r) if !r.requeue_after.is_zero() => {
                trace!("requeue {} after {:?}", key, r.requeue_after);
                RECONCILE_TOTAL.with_label_values(&[name, "requeue_after"]).inc();
                queue.forget(key);
                queue.add_after(key.clone(), r.requeue_after);
            }
            Ok(r) if r.requeue => {
                trace!("requeue {}", key);
                RECONCILE_TOTAL.with_label_values(&[name, "requeue"]).inc();
                queue.forget(key);
                queue.add(key.clone());
            }
            Ok(_) => {
                trace!("successfully reconciled {}", key);
                RECONCILE_TOTAL.with_label_values(&[name, "success"]).inc();
                queue.forget(key);
            }
        }
    }
}

#[async_trait]
impl Runnable for Controller {
    fn name(&self) -> String {
        format!("controller {}", self.inner.name)
    }

    async fn start(
        &self,
        stop: CancellationToken,
    ) -> Result<()> {
        self.run(stop).instrument(self.inner.span.clone()).await
    }
}

impl WantsScheme for Controller {
    fn inject_scheme(
        &mut self,
        scheme: Arc<Scheme>,
    ) -> Result<()> {
        self.inner.deps.lock().set_scheme(scheme);
        Ok(())
    }
}

impl WantsConfig for Controller {
    fn inject_config(
        &mut self,
        config: StoreConfig,
    ) -> Result<()> {
        self.inner.deps.lock().set_config(config);
        Ok(())
    }
}

impl WantsClient for Controller {
    fn inject_client(
        &mut self,
        client: Client,
    ) -> Result<()> {
        self.inner.deps.lock().set_client(client);
        Ok(())
    }
}

impl WantsCache for Controller {
    fn inject_cache(
        &mut self,
        cache: Cache,
    ) -> Result<()> {
        self.inner.deps.lock().set_cache(cache);
        Ok(())
    }
}

impl Inject for Controller {
    fn wants_scheme(&mut self) -> Option<&mut dyn WantsScheme> {
        Some(self)
    }

    fn wants_config(&mut self) -> Option<&mut dyn WantsConfig> {
        Some(self)
    }

    fn wants_client(&mut self) -> Option<&mut dyn WantsClient> {
        Some(self)
    }

    fn wants_cache(&mut self) -> Option<&mut dyn WantsCache> {
        Some(self)
    }
}
