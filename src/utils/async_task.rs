use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::warn;

use crate::BackoffPolicy;
use crate::Result;

/// Retries `task` with exponential backoff until it succeeds, the policy's
/// retry budget is spent, or `stop` fires.
///
/// Returns `Ok(None)` when stopped, and the last error once `max_retries`
/// attempts have failed. `max_retries == 0` retries forever.
pub(crate) async fn retry_with_backoff<F, T, P>(
    name: &str,
    task: F,
    policy: BackoffPolicy,
    stop: &CancellationToken,
) -> Result<Option<P>>
where
    F: Fn() -> T,
    T: Future<Output = Result<P>>,
{
    let mut attempt: u32 = 0;
    loop {
        let outcome = tokio::select! {
            biased;
            _ = stop.cancelled() => return Ok(None),
            r = task() => r,
        };

        let e = match outcome {
            Ok(r) => return Ok(Some(r)),
            Err(e) => e,
        };

        attempt = attempt.saturating_add(1);
        if policy.max_retries > 0 && attempt as usize >= policy.max_retries {
            warn!("{} failed after {} attempts: {}", name, attempt, e);
            return Err(e);
        }

        let delay = with_jitter(policy.delay_for(attempt - 1));
        warn!("{} failed (attempt {}), retrying in {:?}: {}", name, attempt, delay, e);

        tokio::select! {
            biased;
            _ = stop.cancelled() => return Ok(None),
            _ = sleep(delay) => {}
        }
    }
}

/// Spreads retries by up to 10% so that many watchers do not reconnect in lockstep.
fn with_jitter(delay: Duration) -> Duration {
    let extra = rand::thread_rng().gen_range(0.0..0.1);
    delay.mul_f64(1.0 + extra)
}

// Helper function to spawn tasks and track their JoinHandles
pub(crate) fn spawn_task<F, Fut>(
    name: &str,
    task_fn: F,
    handles: Option<&mut Vec<JoinHandle<()>>>,
) where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let name = name.to_string();
    let handle = tokio::spawn(async move {
        if let Err(e) = task_fn().await {
            error!("spawned task: {name} stopped or encountered an error: {:?}", e);
        }
    });

    if let Some(h) = handles {
        h.push(handle);
    }
}
