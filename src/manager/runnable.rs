use std::any::type_name;
use std::future::Future;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::Inject;
use crate::Result;

/// A long-running component owned by the manager.
///
/// `start` runs until `stop` fires; an error return is fatal for the manager.
#[async_trait]
pub trait Runnable: Inject + Send + Sync + 'static {
    fn name(&self) -> String {
        type_name::<Self>().to_string()
    }

    async fn start(
        &self,
        stop: CancellationToken,
    ) -> Result<()>;
}

/// Runnable from an async closure; declares no dependencies.
pub struct RunnableFn<F> {
    name: String,
    f: F,
}

impl<F, Fut> RunnableFn<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    pub fn new(
        name: impl Into<String>,
        f: F,
    ) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> Inject for RunnableFn<F> {}

#[async_trait]
impl<F, Fut> Runnable for RunnableFn<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn start(
        &self,
        stop: CancellationToken,
    ) -> Result<()> {
        (self.f)(stop).await
    }
}
