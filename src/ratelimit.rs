use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::config::Config;

#[cfg(test)]
#[path = "./ratelimit_tests.rs"]
mod tests;

const GC_INTERVAL: Duration = Duration::from_secs(3600);

/// A token bucket refilled lazily on access. Starts full so a new client
/// gets its whole burst immediately.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(burst: f64) -> Self {
        Self {
            tokens: burst,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, rate: f64, burst: f64) {
        let elapsed = self.last_refill.elapsed().as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(burst);
        self.last_refill = Instant::now();
    }

    fn try_take(&mut self) -> bool {
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Token-bucket rate limiter keyed by `ip:username`. Buckets are created on
/// first observation of a key and swept hourly once idle.
pub struct RateLimitManager {
    limiters: RwLock<HashMap<String, Arc<Mutex<TokenBucket>>>>,
    enabled: bool,
    /// Tokens per second: requests / window-seconds.
    rate: f64,
    /// Burst equals the per-window request budget.
    burst: f64,
}

impl RateLimitManager {
    pub fn new(config: &Config) -> Self {
        let window_secs = config.rate_limit_window.as_secs_f64().max(1.0);
        Self {
            limiters: RwLock::new(HashMap::new()),
            enabled: config.rate_limit_enabled,
            rate: f64::from(config.rate_limit_requests) / window_secs,
            burst: f64::from(config.rate_limit_requests),
        }
    }

    /// Account one request against the key's bucket. Unconditionally true
    /// when rate limiting is disabled.
    pub async fn allow(&self, key: &str) -> bool {
        if !self.enabled {
            return true;
        }

        let bucket = self.limiter_for(key).await;
        let mut bucket = bucket.lock().await;
        bucket.refill(self.rate, self.burst);
        bucket.try_take()
    }

    async fn limiter_for(&self, key: &str) -> Arc<Mutex<TokenBucket>> {
        if let Some(bucket) = self.limiters.read().await.get(key) {
            return bucket.clone();
        }

        let mut limiters = self.limiters.write().await;
        limiters
            .entry(key.to_string())
            .or_insert_with(|| {
                info!(
                    "🚦 Created rate limiter for {}: {:.4} req/sec, burst {}",
                    key, self.rate, self.burst
                );
                Arc::new(Mutex::new(TokenBucket::new(self.burst)))
            })
            .clone()
    }

    /// Drop buckets that have refilled completely: a full bucket has been
    /// idle for at least one window.
    pub async fn sweep(&self) {
        let mut limiters = self.limiters.write().await;
        let before = limiters.len();

        let mut idle = Vec::new();
        for (key, bucket) in limiters.iter() {
            let mut bucket = bucket.lock().await;
            bucket.refill(self.rate, self.burst);
            if bucket.tokens >= self.burst {
                idle.push(key.clone());
            }
        }
        for key in idle {
            limiters.remove(&key);
        }

        info!(
            "🧹 Cleaned up unused rate limiters ({} -> {})",
            before,
            limiters.len()
        );
    }

    #[cfg(test)]
    pub(crate) async fn bucket_count(&self) -> usize {
        self.limiters.read().await.len()
    }

    /// Materialize a bucket for a key without spending a token.
    #[cfg(test)]
    pub(crate) async fn touch_without_spending(&self, key: &str) {
        let _ = self.limiter_for(key).await;
    }

    pub fn spawn_gc(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(GC_INTERVAL);
            ticker.tick().await; // the first tick fires immediately
            loop {
                ticker.tick().await;
                self.sweep().await;
            }
        })
    }
}
