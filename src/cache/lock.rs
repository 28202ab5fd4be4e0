//! Fenced, self-renewing distributed lock over the shared store.
//!
//! One lock per cache key, stored at `lock:<key>` with a random lease token
//! as the value. Ownership is proven to the store on every mutation via the
//! compare-and-act scripts, so a process that lost its lease cannot extend
//! or release a lock that has been taken over.
//!
//! While the protected body runs, a background renewer re-arms the lease
//! TTL. Loss of the lease (token mismatch, a stale lease, or too many
//! renewal store errors) cancels the body through a watch channel.

use crate::error::{LockErrorKind, RategateError};
use crate::store::KvStore;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

fn lock_key(key: &str) -> String {
    format!("lock:{key}")
}

pub struct DistributedLock {
    store: Arc<dyn KvStore>,
    ttl: Duration,
    extend_interval: Duration,
    renew_error_tolerance: u32,
}

impl DistributedLock {
    pub fn new(
        store: Arc<dyn KvStore>,
        ttl: Duration,
        extend_interval: Duration,
        renew_error_tolerance: u32,
    ) -> Self {
        Self {
            store,
            ttl,
            extend_interval,
            renew_error_tolerance: renew_error_tolerance.max(1),
        }
    }

    /// Run `body` while holding the lock for `key`.
    ///
    /// Fails fast with `Lock(Held)` when another process holds the lock; no
    /// retry at this layer. Fails with `Lock(Lost)` when the lease is lost
    /// mid-body. The body's own error propagates after release. Release
    /// errors are swallowed; the TTL reclaims the key.
    pub async fn with_lock<T, F, Fut>(&self, key: &str, body: F) -> Result<T, RategateError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, RategateError>>,
    {
        let token = Uuid::new_v4().to_string();
        let lock_key = lock_key(key);

        let acquired = self
            .store
            .set_nx(&lock_key, token.as_bytes(), self.ttl)
            .await?;
        if !acquired {
            return Err(RategateError::Lock(LockErrorKind::Held));
        }
        debug!(key = %lock_key, "Lock acquired");

        let (lost_tx, mut lost_rx) = watch::channel(false);
        let renewer = tokio::spawn(renew_loop(
            self.store.clone(),
            lock_key.clone(),
            token.clone(),
            self.ttl,
            self.extend_interval,
            self.renew_error_tolerance,
            lost_tx,
        ));

        let result = tokio::select! {
            res = body() => res,
            _ = lost_rx.wait_for(|lost| *lost) => {
                Err(RategateError::Lock(LockErrorKind::Lost))
            }
        };

        renewer.abort();
        match self.store.compare_and_delete(&lock_key, &token).await {
            Ok(released) => debug!(key = %lock_key, released, "Lock released"),
            Err(e) => debug!(key = %lock_key, error = %e, "Lock release failed, TTL will reclaim"),
        }

        result
    }
}

/// Periodically re-arm the lease TTL, declaring loss when the store reports
/// a token mismatch, when too many consecutive store errors accumulate, or
/// when monotonic time since the last successful extension reaches the TTL
/// (the lease is presumed expired during a store outage).
async fn renew_loop(
    store: Arc<dyn KvStore>,
    lock_key: String,
    token: String,
    ttl: Duration,
    extend_interval: Duration,
    error_tolerance: u32,
    lost_tx: watch::Sender<bool>,
) {
    // Acquisition counts as the first successful extension.
    let mut last_extended = Instant::now();
    let mut consecutive_errors = 0u32;

    loop {
        sleep(extend_interval).await;

        if last_extended.elapsed() >= ttl {
            warn!(key = %lock_key, "Lease outlived its TTL without a successful extension");
            let _ = lost_tx.send(true);
            return;
        }

        match store.compare_and_extend(&lock_key, &token, ttl).await {
            Ok(true) => {
                last_extended = Instant::now();
                consecutive_errors = 0;
            }
            Ok(false) => {
                warn!(key = %lock_key, "Lease no longer ours, signaling loss");
                let _ = lost_tx.send(true);
                return;
            }
            Err(e) => {
                consecutive_errors += 1;
                if consecutive_errors >= error_tolerance {
                    warn!(key = %lock_key, error = %e, "Giving up on lease renewal");
                    let _ = lost_tx.send(true);
                    return;
                }
                warn!(
                    key = %lock_key,
                    error = %e,
                    attempt = consecutive_errors,
                    "Lease renewal hit a store error, will retry"
                );
            }
        }
    }
}
