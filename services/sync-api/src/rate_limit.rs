//! Sliding-window rate limiting for credential-sensitive endpoints
//!
//! One counting window per composite `caller:target` key. Buckets live in an
//! owned, injected registry — never an ambient global. Stale buckets are
//! reset lazily on the next touch; `prune_stale` additionally runs from a
//! background interval so abandoned keys don't accumulate.
//!
//! Each process instance enforces its own limit. That is acceptable for a
//! defense-in-depth layer; it is not the sole brute-force defense.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

struct RateBucket {
    window_start: Instant,
    count: u64,
}

/// Sliding-window admission control with a fixed threshold per instance.
///
/// Endpoints with different thresholds get their own `RateLimiter`.
pub struct RateLimiter {
    limit: u64,
    window: Duration,
    buckets: Mutex<HashMap<String, RateBucket>>,
}

impl RateLimiter {
    pub fn new(limit: u64, window: Duration) -> Self {
        Self {
            limit,
            window,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Admit or deny one call for the `(caller, target)` pair.
    ///
    /// A missing or expired bucket resets to count 1 and admits. Otherwise
    /// the count is incremented and the call is admitted iff it stays within
    /// the threshold.
    pub fn allow(&self, caller: &str, target: &str) -> bool {
        let key = format!("{caller}:{target}");
        let now = Instant::now();
        let mut buckets = lock_buckets(&self.buckets);

        match buckets.get_mut(&key) {
            Some(bucket) if now.duration_since(bucket.window_start) < self.window => {
                bucket.count += 1;
                let allowed = bucket.count <= self.limit;
                if !allowed {
                    debug!(key, count = bucket.count, limit = self.limit, "rate limited");
                }
                allowed
            }
            _ => {
                buckets.insert(
                    key,
                    RateBucket {
                        window_start: now,
                        count: 1,
                    },
                );
                true
            }
        }
    }

    /// Drop buckets whose window has elapsed. Returns how many were removed.
    pub fn prune_stale(&self) -> usize {
        let now = Instant::now();
        let mut buckets = lock_buckets(&self.buckets);
        let before = buckets.len();
        buckets.retain(|_, bucket| now.duration_since(bucket.window_start) < self.window);
        before - buckets.len()
    }

    /// Number of live buckets (for tests and health reporting).
    pub fn bucket_count(&self) -> usize {
        lock_buckets(&self.buckets).len()
    }
}

/// A poisoned mutex only means another thread panicked mid-update; the
/// bucket map stays usable for admission decisions.
fn lock_buckets(
    buckets: &Mutex<HashMap<String, RateBucket>>,
) -> std::sync::MutexGuard<'_, HashMap<String, RateBucket>> {
    buckets.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
