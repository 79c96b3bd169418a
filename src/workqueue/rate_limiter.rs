use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::BackoffPolicy;
use crate::ControllerConfig;
use crate::ReconcileKey;

/// Decides how long a key waits before it is re-added after a failure.
pub trait RateLimiter: Send + Sync + 'static {
    /// Delay for the next retry of `key`; records the attempt.
    fn when(
        &self,
        key: &ReconcileKey,
    ) -> Duration;

    /// Clears the retry history of `key`.
    fn forget(
        &self,
        key: &ReconcileKey,
    );

    fn num_requeues(
        &self,
        key: &ReconcileKey,
    ) -> u32;
}

/// Per-key exponential backoff: `base * 2^failures`, capped at `max`.
#[derive(Debug)]
pub struct ItemExponentialFailureRateLimiter {
    failures: DashMap<ReconcileKey, u32>,
    base: Duration,
    max: Duration,
}

impl ItemExponentialFailureRateLimiter {
    pub fn new(
        base: Duration,
        max: Duration,
    ) -> Self {
        Self {
            failures: DashMap::new(),
            base,
            max,
        }
    }

    pub fn from_policy(policy: &BackoffPolicy) -> Self {
        Self::new(policy.base_delay(), policy.max_delay())
    }
}

impl RateLimiter for ItemExponentialFailureRateLimiter {
    fn when(
        &self,
        key: &ReconcileKey,
    ) -> Duration {
        let exp = {
            let mut failures = self.failures.entry(key.clone()).or_insert(0);
            let exp = *failures;
            *failures = failures.saturating_add(1);
            exp
        };

        let factor = 2f64.powi(exp.min(1024) as i32);
        let backoff = self.base.as_secs_f64() * factor;
        if !backoff.is_finite() || backoff > self.max.as_secs_f64() {
            return self.max;
        }
        Duration::from_secs_f64(backoff)
    }

    fn forget(
        &self,
        key: &ReconcileKey,
    ) {
        self.failures.remove(key);
    }

    fn num_requeues(
        &self,
        key: &ReconcileKey,
    ) -> u32 {
        self.failures.get(key).map(|f| *f).unwrap_or(0)
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last: Instant,
}

/// Overall token bucket shared by every key.
///
/// Each call reserves one token; when the bucket is empty the returned delay
/// is the time until that reservation is covered.
#[derive(Debug)]
pub struct BucketRateLimiter {
    qps: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

impl BucketRateLimiter {
    pub fn new(
        qps: f64,
        burst: u32,
    ) -> Self {
        Self {
            qps,
            burst: burst as f64,
            bucket: Mutex::new(Bucket {
                tokens: burst as f64,
                last: Instant::now(),
            }),
        }
    }
}

impl RateLimiter for BucketRateLimiter {
    fn when(
        &self,
        _key: &ReconcileKey,
    ) -> Duration {
        let mut bucket = self.bucket.lock();
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.qps).min(self.burst);
        bucket.last = now;
        bucket.tokens -= 1.0;

        if bucket.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-bucket.tokens / self.qps)
        }
    }

    fn forget(
        &self,
        _key: &ReconcileKey,
    ) {
    }

    fn num_requeues(
        &self,
        _key: &ReconcileKey,
    ) -> u32 {
        0
    }
}

/// Longest delay of several limiters; every limiter records each attempt.
pub struct MaxOfRateLimiter {
    limiters: Vec<Arc<dyn RateLimiter>>,
}

impl MaxOfRateLimiter {
    pub fn new(limiters: Vec<Arc<dyn RateLimiter>>) -> Self {
        Self { limiters }
    }
}

impl RateLimiter for MaxOfRateLimiter {
    fn when(
        &self,
        key: &ReconcileKey,
    ) -> Duration {
        self.limiters
            .iter()
            .map(|l| l.when(key))
            .max()
            .unwrap_or(Duration::ZERO)
    }

    fn forget(
        &self,
        key: &ReconcileKey,
    ) {
        for l in &self.limiters {
            l.forget(key);
        }
    }

    fn num_requeues(
        &self,
        key: &ReconcileKey,
    ) -> u32 {
        self.limiters
            .iter()
            .map(|l| l.num_requeues(key))
            .max()
            .unwrap_or(0)
    }
}

/// Per-key exponential backoff combined with a 10 qps / 100 burst overall bucket.
pub fn default_controller_rate_limiter(backoff: &BackoffPolicy) -> Arc<dyn RateLimiter> {
    Arc::new(MaxOfRateLimiter::new(vec![
        Arc::new(ItemExponentialFailureRateLimiter::from_policy(backoff)),
        Arc::new(BucketRateLimiter::new(10.0, 100)),
    ]))
}

/// Same shape as [`default_controller_rate_limiter`] with the bucket taken from config.
pub fn controller_rate_limiter(config: &ControllerConfig) -> Arc<dyn RateLimiter> {
    Arc::new(MaxOfRateLimiter::new(vec![
        Arc::new(ItemExponentialFailureRateLimiter::from_policy(&config.backoff)),
        Arc::new(BucketRateLimiter::new(config.qps, config.burst)),
    ]))
}
