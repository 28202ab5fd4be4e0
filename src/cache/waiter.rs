//! Follower-side wait/notify channel.
//!
//! A request that loses the leader election registers a private queue under
//! the shared waiters list for its key, then blocks on that queue until the
//! leader pushes the computed result. A follower whose registration lands
//! after the leader's drain misses the broadcast and recovers through the
//! wait timeout and the stale fallback.

use crate::error::{RategateError, TimeoutKind};
use crate::store::KvStore;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

pub(crate) fn waiters_key(key: &str) -> String {
    format!("waiters:{key}")
}

/// A registered follower, waiting on its private queue.
pub struct ResultWaiter {
    store: Arc<dyn KvStore>,
    queue_key: String,
    timeout: Duration,
}

impl ResultWaiter {
    /// Register a private queue on the waiters list for `key`.
    pub async fn register(
        store: Arc<dyn KvStore>,
        key: &str,
        timeout: Duration,
    ) -> Result<Self, RategateError> {
        let queue_key = format!("waiter:{key}:{}", Uuid::new_v4());
        store
            .lpush(&waiters_key(key), queue_key.as_bytes())
            .await?;
        debug!(queue = %queue_key, "Follower registered");
        Ok(Self {
            store,
            queue_key,
            timeout,
        })
    }

    /// Block until the leader pushes the result, or fail with a follower
    /// timeout. The private queue is deleted on every exit path. A payload
    /// that does not parse is a hard error; the queue is never retried.
    pub async fn wait(self) -> Result<Value, RategateError> {
        let popped = self.store.brpop(&self.queue_key, self.timeout).await;
        // Best-effort cleanup; an orphaned queue is reclaimed by nobody,
        // so delete regardless of how the pop went.
        if let Err(e) = self.store.del(&self.queue_key).await {
            debug!(queue = %self.queue_key, error = %e, "Failed to delete follower queue");
        }

        match popped? {
            Some(payload) => serde_json::from_slice(&payload).map_err(|e| {
                RategateError::Parsing(format!("leader payload did not parse: {e}"))
            }),
            None => {
                debug!(queue = %self.queue_key, "Follower wait timed out");
                Err(RategateError::Timeout(TimeoutKind::FollowerWait))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn receives_the_leaders_payload() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let waiter = ResultWaiter::register(store.clone(), "pricing:abc", Duration::from_secs(5))
            .await
            .unwrap();

        // The queue name is discoverable through the waiters list.
        let name = store.rpop("waiters:pricing:abc").await.unwrap().unwrap();
        let queue = String::from_utf8(name).unwrap();
        store
            .lpush(&queue, br#"{"rates":[{"rate":25000}]}"#)
            .await
            .unwrap();

        let value = waiter.wait().await.unwrap();
        assert_eq!(value["rates"][0]["rate"], 25000);
        // Queue cleaned up after delivery.
        assert_eq!(store.rpop(&queue).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_when_nobody_notifies() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let waiter = ResultWaiter::register(store.clone(), "pricing:abc", Duration::from_secs(15))
            .await
            .unwrap();

        let err = waiter.wait().await.unwrap_err();
        assert!(matches!(
            err,
            RategateError::Timeout(TimeoutKind::FollowerWait)
        ));
    }

    #[tokio::test]
    async fn malformed_payload_is_a_hard_error() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let waiter = ResultWaiter::register(store.clone(), "pricing:abc", Duration::from_secs(5))
            .await
            .unwrap();

        let name = store.rpop("waiters:pricing:abc").await.unwrap().unwrap();
        let queue = String::from_utf8(name).unwrap();
        store.lpush(&queue, b"not json").await.unwrap();

        let err = waiter.wait().await.unwrap_err();
        assert!(matches!(err, RategateError::Parsing(_)));
    }

    #[tokio::test]
    async fn each_registration_gets_its_own_queue() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let _a = ResultWaiter::register(store.clone(), "pricing:abc", Duration::from_secs(5))
            .await
            .unwrap();
        let _b = ResultWaiter::register(store.clone(), "pricing:abc", Duration::from_secs(5))
            .await
            .unwrap();

        let first = store.rpop("waiters:pricing:abc").await.unwrap().unwrap();
        let second = store.rpop("waiters:pricing:abc").await.unwrap().unwrap();
        assert_ne!(first, second);
    }
}
