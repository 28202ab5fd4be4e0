//! In-memory store for tests and local runs.
//!
//! Behaves like a single-node Redis for the primitive set the engine uses:
//! lazy TTL expiry, lists with head-push/tail-pop, and a per-key `Notify`
//! so `brpop` blocks without polling. All timing goes through tokio's
//! clock, so paused-clock tests can advance expiry deterministically.

use crate::error::RategateError;
use crate::store::KvStore;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

enum Stored {
    Bytes(Vec<u8>),
    List(VecDeque<Vec<u8>>),
}

struct Entry {
    value: Stored,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    signals: Mutex<HashMap<String, Arc<Notify>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn signal_for(&self, key: &str) -> Arc<Notify> {
        let mut signals = self.signals.lock().expect("signal map poisoned");
        signals
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    /// Read a live value, dropping the entry if its TTL has passed.
    fn with_live_entry<T>(
        &self,
        key: &str,
        f: impl FnOnce(Option<&mut Entry>) -> T,
    ) -> T {
        let mut entries = self.entries.lock().expect("entry map poisoned");
        let now = Instant::now();
        if entries.get(key).is_some_and(|e| e.expired(now)) {
            entries.remove(key);
        }
        f(entries.get_mut(key))
    }

    fn try_rpop(&self, key: &str) -> Option<Vec<u8>> {
        self.with_live_entry(key, |entry| match entry {
            Some(Entry {
                value: Stored::List(items),
                ..
            }) => items.pop_back(),
            _ => None,
        })
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RategateError> {
        Ok(self.with_live_entry(key, |entry| match entry {
            Some(Entry {
                value: Stored::Bytes(bytes),
                ..
            }) => Some(bytes.clone()),
            _ => None,
        }))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), RategateError> {
        let mut entries = self.entries.lock().expect("entry map poisoned");
        entries.insert(
            key.to_string(),
            Entry {
                value: Stored::Bytes(value.to_vec()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn set_nx(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool, RategateError> {
        let mut entries = self.entries.lock().expect("entry map poisoned");
        let now = Instant::now();
        if entries.get(key).is_some_and(|e| e.expired(now)) {
            entries.remove(key);
        }
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: Stored::Bytes(value.to_vec()),
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn del(&self, key: &str) -> Result<(), RategateError> {
        let mut entries = self.entries.lock().expect("entry map poisoned");
        entries.remove(key);
        Ok(())
    }

    async fn lpush(&self, key: &str, value: &[u8]) -> Result<(), RategateError> {
        {
            let mut entries = self.entries.lock().expect("entry map poisoned");
            let now = Instant::now();
            if entries.get(key).is_some_and(|e| e.expired(now)) {
                entries.remove(key);
            }
            match entries.get_mut(key) {
                Some(Entry {
                    value: Stored::List(items),
                    ..
                }) => items.push_front(value.to_vec()),
                Some(_) => {
                    return Err(RategateError::Store(format!(
                        "WRONGTYPE: {key} is not a list"
                    )))
                }
                None => {
                    let mut items = VecDeque::new();
                    items.push_front(value.to_vec());
                    entries.insert(
                        key.to_string(),
                        Entry {
                            value: Stored::List(items),
                            expires_at: None,
                        },
                    );
                }
            }
        }
        self.signal_for(key).notify_one();
        Ok(())
    }

    async fn rpop(&self, key: &str) -> Result<Option<Vec<u8>>, RategateError> {
        Ok(self.try_rpop(key))
    }

    async fn brpop(
        &self,
        key: &str,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, RategateError> {
        let deadline = Instant::now() + timeout;
        let notify = self.signal_for(key);
        loop {
            let notified = notify.notified();
            tokio::pin!(notified);
            // Arm the waiter before checking, so a push racing with the
            // check cannot be missed.
            notified.as_mut().enable();

            if let Some(value) = self.try_rpop(key) {
                return Ok(Some(value));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let _ = tokio::time::timeout_at(deadline, notified).await;
        }
    }

    async fn compare_and_extend(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, RategateError> {
        Ok(self.with_live_entry(key, |entry| match entry {
            Some(entry) => match &entry.value {
                Stored::Bytes(bytes) if bytes.as_slice() == token.as_bytes() => {
                    entry.expires_at = Some(Instant::now() + ttl);
                    true
                }
                _ => false,
            },
            None => false,
        }))
    }

    async fn compare_and_delete(&self, key: &str, token: &str) -> Result<bool, RategateError> {
        let mut entries = self.entries.lock().expect("entry map poisoned");
        let now = Instant::now();
        if entries.get(key).is_some_and(|e| e.expired(now)) {
            entries.remove(key);
            return Ok(false);
        }
        let matches = matches!(
            entries.get(key),
            Some(Entry {
                value: Stored::Bytes(bytes),
                ..
            }) if bytes.as_slice() == token.as_bytes()
        );
        if matches {
            entries.remove(key);
        }
        Ok(matches)
    }
}
