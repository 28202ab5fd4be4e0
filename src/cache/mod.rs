//! Request-coalescing cache engine.
//!
//! This module composes the pieces of the read-through proxy:
//! - a fenced, self-renewing distributed lock for leader election
//! - a wait/notify channel that broadcasts a leader's result to followers
//! - a process-local circuit breaker in front of the upstream call
//! - fresh/stale entries in the shared store with TTL-based expiry
//!
//! For each key, concurrent misses elect a single leader that performs one
//! upstream call per validity window; everyone else either reads the fresh
//! entry, waits for the leader's broadcast, or falls back to the stale
//! entry.

pub mod breaker;
pub mod lock;
pub mod waiter;

pub use breaker::{BreakerState, CircuitBreaker};
pub use lock::DistributedLock;
pub use waiter::ResultWaiter;

use crate::config::CacheConfig;
use crate::error::{LockErrorKind, RategateError, TimeoutKind};
use crate::metrics::SharedMetrics;
use crate::store::KvStore;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, warn};
use waiter::waiters_key;

/// First follower backoff; doubles per attempt.
const FOLLOWER_BACKOFF_BASE: Duration = Duration::from_millis(500);

fn stale_key(key: &str) -> String {
    format!("stale:{key}")
}

pub struct CoalescingCache {
    store: Arc<dyn KvStore>,
    lock: DistributedLock,
    breaker: CircuitBreaker,
    config: CacheConfig,
    metrics: SharedMetrics,
}

impl CoalescingCache {
    pub fn new(store: Arc<dyn KvStore>, config: CacheConfig, metrics: SharedMetrics) -> Self {
        let lock = DistributedLock::new(
            store.clone(),
            config.lock_ttl,
            config.lock_extend_interval,
            config.lock_renew_error_tolerance,
        );
        let breaker = CircuitBreaker::new(config.breaker_threshold, config.breaker_timeout);
        Self {
            store,
            lock,
            breaker,
            config,
            metrics,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Return the cached value for `key`, computing it via `compute` when
    /// no fresh entry exists. At most one concurrent upstream call per key
    /// across all processes; losers wait for the winner's broadcast or fall
    /// back to the stale entry.
    pub async fn fetch<F, Fut>(&self, key: &str, compute: F) -> Result<Value, RategateError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Value, RategateError>> + Send,
    {
        match self.read_fresh(key).await {
            Ok(Some(value)) => {
                self.metrics
                    .cache_reads_total
                    .with_label_values(&["fresh_hit"])
                    .inc();
                return Ok(value);
            }
            Ok(None) => {}
            // An unreachable store is recoverable through the same path as
            // everything else: the stale entry, if we can get at it.
            Err(err) => return self.fallback(key, err).await,
        }
        self.metrics
            .cache_reads_total
            .with_label_values(&["miss"])
            .inc();

        if self.breaker.is_open() {
            debug!(key = %key, "Circuit breaker open, skipping election");
            return self.fallback(key, RategateError::BreakerOpen).await;
        }

        match self.lock.with_lock(key, || self.lead(key, compute)).await {
            Ok(value) => Ok(value),
            Err(RategateError::Lock(LockErrorKind::Held)) => {
                self.metrics
                    .elections_total
                    .with_label_values(&["follower"])
                    .inc();
                self.follow(key).await
            }
            Err(err) => {
                // Compute failures were already recorded by the breaker's
                // own bookkeeping; feed it the leader-branch failures that
                // never reached the call (store writes, serialization,
                // lease loss).
                if matches!(
                    err,
                    RategateError::Lock(_)
                        | RategateError::Store(_)
                        | RategateError::Parsing(_)
                        | RategateError::Internal(_)
                ) {
                    self.breaker.record_failure();
                }
                self.fallback(key, err).await
            }
        }
    }

    /// Leader path, inside the lock's critical section.
    async fn lead<F, Fut>(&self, key: &str, compute: F) -> Result<Value, RategateError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Value, RategateError>> + Send,
    {
        self.metrics
            .elections_total
            .with_label_values(&["leader"])
            .inc();

        // Double-checked read: another process may have completed between
        // our miss and our acquisition.
        if let Some(value) = self.read_fresh(key).await? {
            debug!(key = %key, "Fresh entry appeared before compute, skipping upstream");
            return Ok(value);
        }

        let api_timeout = self.config.api_timeout;
        let started = Instant::now();
        let result = self
            .breaker
            .call(|| async {
                match tokio::time::timeout(api_timeout, compute()).await {
                    Ok(res) => res,
                    Err(_) => Err(RategateError::Timeout(TimeoutKind::Upstream)),
                }
            })
            .await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(RategateError::Timeout(TimeoutKind::Upstream)) => "timeout",
            Err(RategateError::BreakerOpen) => "rejected",
            Err(_) => "error",
        };
        self.metrics
            .upstream_calls_total
            .with_label_values(&[outcome])
            .inc();
        if outcome != "rejected" {
            self.metrics
                .upstream_call_duration_seconds
                .observe(started.elapsed().as_secs_f64());
        }

        let value = result?;
        let payload = serde_json::to_vec(&value)?;
        self.store
            .set(key, &payload, self.config.fresh_ttl)
            .await?;
        self.store
            .set(&stale_key(key), &payload, self.config.stale_ttl)
            .await?;

        self.notify_waiters(key, &payload).await;
        Ok(value)
    }

    /// Follower path: wait for the leader's broadcast, retrying with
    /// exponential backoff, then fall back to stale.
    async fn follow(&self, key: &str) -> Result<Value, RategateError> {
        let attempts = self.config.max_follower_retries.max(1);
        for attempt in 1..=attempts {
            let waiter = match ResultWaiter::register(
                self.store.clone(),
                key,
                self.config.follower_timeout,
            )
            .await
            {
                Ok(waiter) => waiter,
                Err(err) => return self.fallback(key, err).await,
            };

            match waiter.wait().await {
                Ok(value) => {
                    self.metrics
                        .follower_waits_total
                        .with_label_values(&["delivered"])
                        .inc();
                    return Ok(value);
                }
                Err(RategateError::Timeout(TimeoutKind::FollowerWait)) => {
                    self.metrics
                        .follower_waits_total
                        .with_label_values(&["timeout"])
                        .inc();
                    if attempt < attempts {
                        let backoff =
                            FOLLOWER_BACKOFF_BASE.mul_f64(f64::from(1 << (attempt - 1)));
                        debug!(
                            key = %key,
                            attempt,
                            backoff_ms = backoff.as_millis() as u64,
                            "Follower wait timed out, retrying"
                        );
                        sleep(backoff).await;
                    }
                }
                Err(err) => return self.fallback(key, err).await,
            }
        }
        self.fallback(key, RategateError::Timeout(TimeoutKind::FollowerWait))
            .await
    }

    /// Serve the stale entry if one exists, otherwise surface
    /// `Unavailable`. `cause` is what pushed us here.
    async fn fallback(&self, key: &str, cause: RategateError) -> Result<Value, RategateError> {
        match self.store.get(&stale_key(key)).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<Value>(&bytes) {
                Ok(value) => {
                    warn!(key = %key, cause = %cause, "Serving stale entry");
                    self.metrics.stale_served_total.inc();
                    Ok(value)
                }
                Err(e) => {
                    error!(key = %key, error = %e, "Stale entry did not decode");
                    Err(RategateError::Unavailable)
                }
            },
            Ok(None) => {
                warn!(key = %key, cause = %cause, "No stale entry to fall back to");
                Err(RategateError::Unavailable)
            }
            Err(e) => {
                error!(key = %key, error = %e, "Stale read failed");
                Err(RategateError::Unavailable)
            }
        }
    }

    async fn read_fresh(&self, key: &str) -> Result<Option<Value>, RategateError> {
        match self.store.get(key).await? {
            Some(bytes) => match serde_json::from_slice(&bytes) {
                Ok(value) => Ok(Some(value)),
                Err(e) => {
                    warn!(key = %key, error = %e, "Fresh entry did not decode, treating as miss");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    /// Broadcast the result to every registered follower, then drop the
    /// waiters list. Notification is best-effort: a follower we fail to
    /// reach times out and recovers through the stale entry.
    async fn notify_waiters(&self, key: &str, payload: &[u8]) {
        let list_key = waiters_key(key);
        let mut notified = 0u64;
        loop {
            match self.store.rpop(&list_key).await {
                Ok(Some(name)) => {
                    let queue = String::from_utf8_lossy(&name).into_owned();
                    if let Err(e) = self.store.lpush(&queue, payload).await {
                        warn!(queue = %queue, error = %e, "Failed to notify follower");
                    }
                    notified += 1;
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(key = %list_key, error = %e, "Waiter drain hit a store error");
                    break;
                }
            }
        }
        if let Err(e) = self.store.del(&list_key).await {
            debug!(key = %list_key, error = %e, "Failed to delete waiters list");
        }
        if notified > 0 {
            debug!(key = %key, notified, "Followers notified");
            self.metrics.followers_notified_total.inc_by(notified as f64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::create_metrics;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_config() -> CacheConfig {
        CacheConfig::default()
    }

    fn cache_over(store: Arc<dyn KvStore>) -> CoalescingCache {
        CoalescingCache::new(store, test_config(), create_metrics())
    }

    #[tokio::test]
    async fn fresh_hit_skips_the_compute() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let cache = cache_over(store.clone());
        store
            .set(
                "pricing:abc",
                br#"{"rates":[{"rate":1}]}"#,
                Duration::from_secs(300),
            )
            .await
            .unwrap();

        let calls = AtomicUsize::new(0);
        let value = cache
            .fetch("pricing:abc", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(json!({"rates": []}))
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(value["rates"][0]["rate"], 1);
    }

    #[tokio::test]
    async fn corrupt_fresh_entry_is_a_miss() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let cache = cache_over(store.clone());
        store
            .set("pricing:abc", b"{truncated", Duration::from_secs(300))
            .await
            .unwrap();

        let value = cache
            .fetch("pricing:abc", || async { Ok(json!({"rates": [7]})) })
            .await
            .unwrap();
        assert_eq!(value["rates"][0], 7);
    }

    #[tokio::test]
    async fn leader_writes_fresh_and_stale_together() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let cache = cache_over(store.clone());

        cache
            .fetch("pricing:abc", || async { Ok(json!({"rates": [1]})) })
            .await
            .unwrap();

        assert!(store.get("pricing:abc").await.unwrap().is_some());
        assert!(store.get("stale:pricing:abc").await.unwrap().is_some());
        assert_eq!(
            store.get("pricing:abc").await.unwrap(),
            store.get("stale:pricing:abc").await.unwrap()
        );
    }

    #[tokio::test]
    async fn leader_drains_and_deletes_the_waiters_list() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let cache = cache_over(store.clone());

        // Two followers registered before the leader finishes.
        store
            .lpush("waiters:pricing:abc", b"waiter:pricing:abc:a")
            .await
            .unwrap();
        store
            .lpush("waiters:pricing:abc", b"waiter:pricing:abc:b")
            .await
            .unwrap();

        cache
            .fetch("pricing:abc", || async { Ok(json!({"rates": [1]})) })
            .await
            .unwrap();

        // Both private queues got the payload; the list itself is gone.
        let a = store.rpop("waiter:pricing:abc:a").await.unwrap().unwrap();
        let b = store.rpop("waiter:pricing:abc:b").await.unwrap().unwrap();
        assert_eq!(a, b);
        assert_eq!(store.rpop("waiters:pricing:abc").await.unwrap(), None);
    }

    #[tokio::test]
    async fn double_checked_read_suppresses_a_second_upstream_call() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let cache = cache_over(store.clone());

        // A racer populated the entry after our miss but before our
        // election; drive the leader branch directly against that state.
        store
            .set(
                "pricing:abc",
                br#"{"rates":["already here"]}"#,
                Duration::from_secs(300),
            )
            .await
            .unwrap();

        let calls = AtomicUsize::new(0);
        let value = cache
            .lead("pricing:abc", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(json!({"rates": ["computed"]}))
            })
            .await
            .unwrap();
        assert_eq!(value["rates"][0], "already here");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
