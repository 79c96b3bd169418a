use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::Inject;
use crate::ReconcileKey;
use crate::Result;

/// Outcome of one successful reconcile.
///
/// A non-zero `requeue_after` takes precedence over `requeue`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconcileResult {
    pub requeue: bool,
    pub requeue_after: Duration,
}

impl ReconcileResult {
    /// Converged; nothing more to do until the next event
    pub fn done() -> Self {
        Self::default()
    }

    /// Reconcile again right away
    pub fn requeue() -> Self {
        Self {
            requeue: true,
            requeue_after: Duration::ZERO,
        }
    }

    /// Reconcile again after `delay`
    pub fn requeue_after(delay: Duration) -> Self {
        Self {
            requeue: false,
            requeue_after: delay,
        }
    }
}

/// User convergence logic for one key.
///
/// Must be idempotent: the same key may be reconciled any number of times.
#[async_trait]
pub trait Reconciler: Inject + Send + Sync + 'static {
    async fn reconcile(
        &self,
        key: ReconcileKey,
    ) -> Result<ReconcileResult>;
}

/// Reconciler from an async closure; declares no dependencies.
pub struct ReconcilerFn<F> {
    f: F,
}

impl<F, Fut> ReconcilerFn<F>
where
    F: Fn(ReconcileKey) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ReconcileResult>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> Inject for ReconcilerFn<F> {}

#[async_trait]
impl<F, Fut> Reconciler for ReconcilerFn<F>
where
    F: Fn(ReconcileKey) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ReconcileResult>> + Send + 'static,
{
    async fn reconcile(
        &self,
        key: ReconcileKey,
    ) -> Result<ReconcileResult> {
        (self.f)(key).await
    }
}
