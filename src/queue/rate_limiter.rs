//! Delays for re-queued work items

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;

fn exponential(base: Duration, max: Duration, exp: u32) -> Duration {
    let factor = 2u32.checked_pow(exp).unwrap_or(u32::MAX);
    base.checked_mul(factor).map_or(max, |d| d.min(max))
}

/// Per-item exponential delay: `base * 2^failures`, capped at `max`.
#[derive(Debug)]
pub struct ItemExponentialFailure<T> {
    base: Duration,
    max: Duration,
    failures: HashMap<T, u32>,
}

impl<T: Eq + Hash + Clone> ItemExponentialFailure<T> {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: HashMap::new(),
        }
    }

    pub fn when(&mut self, item: &T) -> Duration {
        let failures = self.failures.entry(item.clone()).or_insert(0);
        let delay = exponential(self.base, self.max, *failures);
        *failures = failures.saturating_add(1);
        delay
    }

    pub fn num_requeues(&self, item: &T) -> u32 {
        self.failures.get(item).copied().unwrap_or(0)
    }

    pub fn forget(&mut self, item: &T) {
        self.failures.remove(item);
    }
}

/// Token bucket shared by all items: `qps` tokens per second, up to `burst`.
#[derive(Debug)]
pub struct Bucket {
    qps: f64,
    burst: f64,
    tokens: f64,
    last: Instant,
}

impl Bucket {
    pub fn new(qps: f64, burst: u32) -> Self {
        Self {
            qps,
            burst: burst as f64,
            tokens: burst as f64,
            last: Instant::now(),
        }
    }

    /// Reserve one token and return how long to wait before it is available.
    pub fn reserve(&mut self) -> Duration {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last).as_secs_f64();
        self.last = now;
        self.tokens = (self.tokens + elapsed * self.qps).min(self.burst) - 1.0;

        if self.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-self.tokens / self.qps)
        }
    }
}

/// The queue's rate limiter: the larger of a per-item exponential delay and an
/// overall token bucket.
#[derive(Debug)]
pub struct RateLimiter<T> {
    items: ItemExponentialFailure<T>,
    bucket: Bucket,
}

impl<T: Eq + Hash + Clone> RateLimiter<T> {
    pub fn new(items: ItemExponentialFailure<T>, bucket: Bucket) -> Self {
        Self { items, bucket }
    }

    pub fn when(&mut self, item: &T) -> Duration {
        self.items.when(item).max(self.bucket.reserve())
    }

    pub fn num_requeues(&self, item: &T) -> u32 {
        self.items.num_requeues(item)
    }

    pub fn forget(&mut self, item: &T) {
        self.items.forget(item);
    }
}

impl<T: Eq + Hash + Clone> Default for RateLimiter<T> {
    /// 5ms doubling to 1000s per item; 10 qps with a burst of 100 overall.
    fn default() -> Self {
        Self::new(
            ItemExponentialFailure::new(Duration::from_millis(5), Duration::from_secs(1000)),
            Bucket::new(10.0, 100),
        )
    }
}
