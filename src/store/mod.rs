//! Key-value store abstraction.
//!
//! The cache engine depends only on this small primitive set. Production
//! runs use the Redis implementation; tests use the deterministic in-memory
//! one. Lease-token checks (`compare_and_extend`, `compare_and_delete`) are
//! atomic on the store side, never read-modify-write round-trips.

pub mod memory;
pub mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use crate::error::RategateError;
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Get the value at `key`, or None if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RategateError>;

    /// Set `key` to `value` with an expiry.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), RategateError>;

    /// Set `key` to `value` with an expiry, only if absent.
    /// Returns false when the key already existed.
    async fn set_nx(&self, key: &str, value: &[u8], ttl: Duration)
        -> Result<bool, RategateError>;

    /// Delete `key`. Deleting an absent key is not an error.
    async fn del(&self, key: &str) -> Result<(), RategateError>;

    /// Push `value` onto the head of the list at `key`.
    async fn lpush(&self, key: &str, value: &[u8]) -> Result<(), RategateError>;

    /// Pop from the tail of the list at `key`, or None if empty.
    async fn rpop(&self, key: &str) -> Result<Option<Vec<u8>>, RategateError>;

    /// Pop from the tail of the list at `key`, blocking up to `timeout`.
    /// Returns None on timeout.
    async fn brpop(
        &self,
        key: &str,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, RategateError>;

    /// Reset the expiry of `key` to `ttl` iff its value equals `token`.
    /// Returns false when the value does not match (or the key is gone).
    async fn compare_and_extend(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, RategateError>;

    /// Delete `key` iff its value equals `token`.
    /// Returns false when the value does not match (or the key is gone).
    async fn compare_and_delete(&self, key: &str, token: &str) -> Result<bool, RategateError>;
}
