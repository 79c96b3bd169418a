use std::fmt::Debug;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;
use tracing::Instrument;
use tracing::Span;

use super::Injector;
use super::Runnable;
use crate::Cache;
use crate::Client;
use crate::Controller;
use crate::ControllerOptions;
use crate::Error;
use crate::Inject;
use crate::LifecycleError;
use crate::Reconciler;
use crate::RestMapper;
use crate::Result;
use crate::RuntimeConfig;
use crate::Scheme;
use crate::StoreConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    NotStarted,
    Running,
    Stopped,
}

struct Lifecycle {
    state: ManagerState,
    pending: Vec<Box<dyn Runnable>>,
    handles: Vec<JoinHandle<()>>,
    run_token: Option<CancellationToken>,
}

struct ManagerInner {
    config: StoreConfig,
    settings: RuntimeConfig,
    scheme: Arc<Scheme>,
    mapper: Arc<dyn RestMapper>,
    client: Client,
    cache: Cache,
    injector: Injector,
    lifecycle: Mutex<Lifecycle>,
    errors_tx: mpsc::UnboundedSender<Error>,
    errors_rx: Mutex<Option<mpsc::UnboundedReceiver<Error>>>,
    span: Span,
}

/// Owns the shared client, cache and scheme, and the lifecycle of every
/// registered component.
#[derive(Clone)]
pub struct Manager {
    inner: Arc<ManagerInner>,
}

impl Debug for Manager {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("state", &self.state())
            .field("settings", &self.inner.settings)
            .finish()
    }
}

impl Manager {
    pub(super) fn new(
        config: StoreConfig,
        settings: RuntimeConfig,
        scheme: Arc<Scheme>,
        mapper: Arc<dyn RestMapper>,
        client: Client,
        cache: Cache,
        span: Span,
    ) -> Self {
        let injector = Injector::new(scheme.clone(), config.clone(), client.clone(), cache.clone());
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(ManagerInner {
                config,
                settings,
                scheme,
                mapper,
                client,
                cache,
                injector,
                lifecycle: Mutex::new(Lifecycle {
                    state: ManagerState::NotStarted,
                    pending: Vec::new(),
                    handles: Vec::new(),
                    run_token: None,
                }),
                errors_tx,
                errors_rx: Mutex::new(Some(errors_rx)),
                span,
            }),
        }
    }

    pub fn state(&self) -> ManagerState {
        self.inner.lifecycle.lock().state
    }

    /// Injects the manager's singletons into `runnable` and registers it.
    ///
    /// Before `start` the component is kept; while running it is started
    /// immediately.
    pub fn add(
        &self,
        mut runnable: Box<dyn Runnable>,
    ) -> Result<()> {
        if self.state() == ManagerState::Stopped {
            return Err(LifecycleError::ManagerStopped.into());
        }
        self.inner.injector.inject(&mut *runnable)?;

        let mut lifecycle = self.inner.lifecycle.lock();
        match lifecycle.state {
            ManagerState::NotStarted => {
                debug!("registered {}", runnable.name());
                lifecycle.pending.push(runnable);
            }
            ManagerState::Running => {
                let stop = lifecycle
                    .run_token
                    .clone()
                    .ok_or(LifecycleError::ManagerStopped)?;
                let handle = self.spawn_component(runnable, stop);
                lifecycle.handles.push(handle);
            }
            ManagerState::Stopped => return Err(LifecycleError::ManagerStopped.into()),
        }
        Ok(())
    }

    /// Builds a controller from the manager's settings and registers it.
    pub fn new_controller<R: Reconciler>(
        &self,
        name: impl Into<String>,
        reconciler: R,
    ) -> Result<Controller> {
        let mut options = ControllerOptions::from_config(&self.inner.settings.controller);
        options.logger = Some(self.inner.span.clone());
        let controller = Controller::new(name, reconciler, options)?;
        self.add(Box::new(controller.clone()))?;
        Ok(controller)
    }

    /// Runs dependency injection on any object.
    pub fn set_fields<T: Inject + ?Sized>(
        &self,
        target: &mut T,
    ) -> Result<()> {
        self.inner.injector.inject(target)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn settings(&self) -> &RuntimeConfig {
        &self.inner.settings
    }

    pub fn scheme(&self) -> &Arc<Scheme> {
        &self.inner.scheme
    }

    /// Client handed to components: reads come from the cache, writes go to
    /// the store.
    pub fn client(&self) -> &Client {
        &self.inner.client
    }

    /// Client that reads straight from the store, bypassing the cache.
    pub fn api_reader(&self) -> &Client {
        self.inner.cache.client()
    }

    pub fn cache(&self) -> &Cache {
        &self.inner.cache
    }

    pub fn mapper(&self) -> &Arc<dyn RestMapper> {
        &self.inner.mapper
    }

    /// Registers field indexes on the shared cache
    pub fn field_indexer(&self) -> &Cache {
        &self.inner.cache
    }

    /// Starts the cache and every component, then blocks until `stop` fires
    /// or a component fails.
    ///
    /// Returns the first component error after every component has exited.
    pub async fn start(
        &self,
        stop: CancellationToken,
    ) -> Result<()> {
        let (run_token, pending, mut errors) = {
            let mut lifecycle = self.inner.lifecycle.lock();
            if lifecycle.state != ManagerState::NotStarted {
                return Err(LifecycleError::AlreadyStarted("manager".to_string()).into());
            }
            let errors = self
                .inner
                .errors_rx
                .lock()
                .take()
                .ok_or_else(|| LifecycleError::AlreadyStarted("manager".to_string()))?;
            let run_token = stop.child_token();
            lifecycle.state = ManagerState::Running;
            lifecycle.run_token = Some(run_token.clone());
            (run_token, std::mem::take(&mut lifecycle.pending), errors)
        };

        let span = self.inner.span.clone();
        async move {
            info!("Starting manager with {} components", pending.len());
            if let Err(e) = self.inner.cache.start(run_token.clone()) {
                error!("failed to start cache: {}", e);
                self.shut_down(&run_token).await;
                return Err(e);
            }

            {
                let mut lifecycle = self.inner.lifecycle.lock();
                for runnable in pending {
                    let handle = self.spawn_component(runnable, run_token.clone());
                    lifecycle.handles.push(handle);
                }
            }

            let failure = tokio::select! {
                _ = stop.cancelled() => {
                    info!("Shutdown signal received, stopping components");
                    None
                }
                Some(e) = errors.recv() => {
                    error!("component failed, stopping manager: {}", e);
                    Some(e)
                }
            };

            self.shut_down(&run_token).await;
            info!("Manager stopped");
            match failure {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }
        .instrument(span)
        .await
    }

    /// Cancels every component and waits for their tasks.
    async fn shut_down(
        &self,
        run_token: &CancellationToken,
    ) {
        run_token.cancel();
        let handles = {
            let mut lifecycle = self.inner.lifecycle.lock();
            lifecycle.state = ManagerState::Stopped;
            std::mem::take(&mut lifecycle.handles)
        };
        for result in join_all(handles).await {
            if let Err(e) = result {
                warn!("component task ended abnormally: {:?}", e);
            }
        }
    }

    fn spawn_component(
        &self,
        runnable: Box<dyn Runnable>,
        stop: CancellationToken,
    ) -> JoinHandle<()> {
        let errors = self.inner.errors_tx.clone();
        let name = runnable.name();
        debug!("starting {}", name);
        tokio::spawn(
            async move {
                if let Err(e) = runnable.start(stop).await {
                    error!("{} failed: {}", name, e);
                    let _ = errors.send(e);
                }
            }
            .instrument(self.inner.span.clone()),
        )
    }
}
