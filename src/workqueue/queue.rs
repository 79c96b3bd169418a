use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::sleep_until;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;

use super::default_controller_rate_limiter;
use super::RateLimiter;
use crate::metrics::WORKQUEUE_ADDS;
use crate::metrics::WORKQUEUE_DEPTH;
use crate::metrics::WORKQUEUE_RETRIES;
use crate::BackoffPolicy;
use crate::ReconcileKey;

/// Membership, checkout and delay bookkeeping. Only ever touched under one lock.
#[derive(Debug, Default)]
struct QueueState {
    /// Keys ready to be handed out, in order
    queue: VecDeque<ReconcileKey>,
    /// Keys that need processing: queued, or re-added while checked out
    dirty: HashSet<ReconcileKey>,
    /// Keys currently checked out by a worker
    processing: HashSet<ReconcileKey>,
    /// Delayed adds; stale entries are skipped against `ready_at`
    waiting: BinaryHeap<Reverse<(Instant, ReconcileKey)>>,
    ready_at: HashMap<ReconcileKey, Instant>,
    shutting_down: bool,
    waiting_loop_started: bool,
}

struct QueueInner {
    name: String,
    state: Mutex<QueueState>,
    item_ready: Notify,
    timer_changed: Notify,
    rate_limiter: Arc<dyn RateLimiter>,
    shutdown: CancellationToken,
}

/// Deduplicating, delay-aware, rate-limited queue of reconcile keys.
///
/// A key is pending at most once. Adding a key while a worker has it checked
/// out marks it dirty, and it is re-queued once when that worker calls
/// [`done`](Self::done).
#[derive(Clone)]
pub struct WorkQueue {
    inner: Arc<QueueInner>,
}

impl Debug for WorkQueue {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("WorkQueue")
            .field("name", &self.inner.name)
            .field("len", &self.len())
            .finish()
    }
}

impl WorkQueue {
    /// Queue with the default controller rate limiter
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_rate_limiter(name, default_controller_rate_limiter(&BackoffPolicy::default()))
    }

    pub fn with_rate_limiter(
        name: impl Into<String>,
        rate_limiter: Arc<dyn RateLimiter>,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                name: name.into(),
                state: Mutex::new(QueueState::default()),
                item_ready: Notify::new(),
                timer_changed: Notify::new(),
                rate_limiter,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Marks `key` as needing processing. Ignored after shutdown.
    pub fn add(
        &self,
        key: ReconcileKey,
    ) {
        let mut state = self.inner.state.lock();
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        WORKQUEUE_ADDS.with_label_values(&[&self.inner.name]).inc();
        if state.processing.contains(&key) {
            trace!("{}: {} is being processed, marked dirty", self.inner.name, key);
            return;
        }
        state.queue.push_back(key);
        self.update_depth(&state);
        drop(state);
        self.inner.item_ready.notify_one();
    }

    /// Waits for the next key and checks it out.
    ///
    /// Returns `None` once the queue is shut down and drained.
    pub async fn get(&self) -> Option<ReconcileKey> {
        loop {
            let notified = self.inner.item_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.inner.state.lock();
                if let Some(key) = state.queue.pop_front() {
                    state.processing.insert(key.clone());
                    state.dirty.remove(&key);
                    self.update_depth(&state);
                    let more = !state.queue.is_empty();
                    drop(state);
                    if more {
                        // A single stored permit may have covered several adds
                        self.inner.item_ready.notify_one();
                    }
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Releases a checked-out key, re-queueing it if it was re-added meanwhile.
    pub fn done(
        &self,
        key: &ReconcileKey,
    ) {
        let mut state = self.inner.state.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.queue.push_back(key.clone());
            self.update_depth(&state);
            drop(state);
            self.inner.item_ready.notify_one();
        }
    }

    /// Adds `key` once `delay` has elapsed. If the key is already waiting, the
    /// earlier ready time wins.
    pub fn add_after(
        &self,
        key: ReconcileKey,
        delay: Duration,
    ) {
        if delay.is_zero() {
            self.add(key);
            return;
        }

        let ready = Instant::now() + delay;
        let mut state = self.inner.state.lock();
        if state.shutting_down {
            return;
        }
        if let Some(existing) = state.ready_at.get(&key) {
            if *existing <= ready {
                return;
            }
        }
        state.ready_at.insert(key.clone(), ready);
        state.waiting.push(Reverse((ready, key)));

        if !state.waiting_loop_started {
            state.waiting_loop_started = true;
            let queue = self.clone();
            tokio::spawn(async move { queue.waiting_loop().await });
        }
        drop(state);
        self.inner.timer_changed.notify_one();
    }

    /// `add_after` with the delay chosen by the rate limiter.
    pub fn add_rate_limited(
        &self,
        key: ReconcileKey,
    ) {
        let delay = self.inner.rate_limiter.when(&key);
        WORKQUEUE_RETRIES.with_label_values(&[&self.inner.name]).inc();
        trace!("{}: rate limited {} for {:?}", self.inner.name, key, delay);
        self.add_after(key, delay);
    }

    /// Clears the backoff history of `key`.
    pub fn forget(
        &self,
        key: &ReconcileKey,
    ) {
        self.inner.rate_limiter.forget(key);
    }

    pub fn num_requeues(
        &self,
        key: &ReconcileKey,
    ) -> u32 {
        self.inner.rate_limiter.num_requeues(key)
    }

    /// Number of keys ready to be handed out
    pub fn len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops accepting adds and wakes every waiting `get`.
    ///
    /// Keys already queued are still handed out; `get` returns `None` once
    /// the queue is empty.
    pub fn shut_down(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.shutting_down {
                return;
            }
            state.shutting_down = true;
        }
        debug!("{}: shutting down work queue", self.inner.name);
        self.inner.shutdown.cancel();
        self.inner.item_ready.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Completes once `shut_down` has been called.
    pub async fn closed(&self) {
        self.inner.shutdown.cancelled().await
    }

    /// Owns the delay heap: moves keys whose time has come into the queue.
    async fn waiting_loop(self) {
        loop {
            let (ready, next) = {
                let mut state = self.inner.state.lock();
                let now = Instant::now();
                let mut ready = Vec::new();
                let mut next = None;
                while let Some(Reverse((at, key))) = state.waiting.peek().cloned() {
                    if state.ready_at.get(&key) != Some(&at) {
                        // Superseded by an earlier add_after for the same key
                        state.waiting.pop();
                        continue;
                    }
                    if at > now {
                        next = Some(at);
                        break;
                    }
                    state.waiting.pop();
                    state.ready_at.remove(&key);
                    ready.push(key);
                }
                (ready, next)
            };

            for key in ready {
                self.add(key);
            }

            tokio::select! {
                biased;
                _ = self.inner.shutdown.cancelled() => break,
                _ = self.inner.timer_changed.notified() => {}
                _ = sleep_until(next.unwrap_or_else(far_future)), if next.is_some() => {}
            }
        }
        trace!("{}: delay loop exited", self.inner.name);
    }

    fn update_depth(
        &self,
        state: &QueueState,
    ) {
        WORKQUEUE_DEPTH
            .with_label_values(&[&self.inner.name])
            .set(state.queue.len() as i64);
    }
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86400 * 365)
}
