use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

/// Default validity window for fresh cache entries
const DEFAULT_FRESH_TTL_SECS: u64 = 300;

/// Default fallback window for stale cache entries
const DEFAULT_STALE_TTL_SECS: u64 = 900;

/// Default per-attempt bound on a follower's wait for the leader's result
const DEFAULT_FOLLOWER_TIMEOUT_SECS: u64 = 15;

/// Default number of follower wait attempts before falling back
const DEFAULT_MAX_FOLLOWER_RETRIES: u32 = 2;

/// Default lease duration for the per-key distributed lock
const DEFAULT_LOCK_TTL_SECS: u64 = 60;

/// Default lock renewal period
const DEFAULT_LOCK_EXTEND_INTERVAL_SECS: u64 = 2;

/// Default consecutive renewal store errors tolerated before declaring the lease lost
const DEFAULT_LOCK_RENEW_ERROR_TOLERANCE: u32 = 1;

/// Default watchdog for one upstream call
const DEFAULT_API_TIMEOUT_SECS: u64 = 30;

/// Default consecutive failures before the breaker opens
const DEFAULT_BREAKER_THRESHOLD: u32 = 5;

/// Default wait before an open breaker admits a probe call
const DEFAULT_BREAKER_TIMEOUT_SECS: u64 = 60;

/// Default upstream connect timeout
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub api_url: String,
    pub api_token: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub redis_url: String,
}

/// Tunables for the coalescing cache engine
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Validity window for fresh entries
    pub fresh_ttl: Duration,
    /// Fallback window for stale entries
    pub stale_ttl: Duration,
    /// Per-attempt follower wait bound
    pub follower_timeout: Duration,
    /// Total follower wait attempts
    pub max_follower_retries: u32,
    /// Lease duration for the per-key lock
    pub lock_ttl: Duration,
    /// Lock renewal period
    pub lock_extend_interval: Duration,
    /// Consecutive renewal store errors before the lease is presumed lost
    pub lock_renew_error_tolerance: u32,
    /// Watchdog for one upstream call
    pub api_timeout: Duration,
    /// Consecutive failures before the breaker opens
    pub breaker_threshold: u32,
    /// Wait before an open breaker admits a probe call
    pub breaker_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            fresh_ttl: Duration::from_secs(DEFAULT_FRESH_TTL_SECS),
            stale_ttl: Duration::from_secs(DEFAULT_STALE_TTL_SECS),
            follower_timeout: Duration::from_secs(DEFAULT_FOLLOWER_TIMEOUT_SECS),
            max_follower_retries: DEFAULT_MAX_FOLLOWER_RETRIES,
            lock_ttl: Duration::from_secs(DEFAULT_LOCK_TTL_SECS),
            lock_extend_interval: Duration::from_secs(DEFAULT_LOCK_EXTEND_INTERVAL_SECS),
            lock_renew_error_tolerance: DEFAULT_LOCK_RENEW_ERROR_TOLERANCE,
            api_timeout: Duration::from_secs(DEFAULT_API_TIMEOUT_SECS),
            breaker_threshold: DEFAULT_BREAKER_THRESHOLD,
            breaker_timeout: Duration::from_secs(DEFAULT_BREAKER_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub store: StoreConfig,
    pub cache: CacheConfig,
}

fn env_secs(name: &str, default: u64) -> Duration {
    Duration::from_secs(
        env::var(name)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(default),
    )
}

fn env_u32(name: &str, default: u32) -> u32 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let api_token = env::var("API_TOKEN").context("API_TOKEN is required")?;
        let api_url = env::var("RATE_API_URL").context("RATE_API_URL is required")?;

        let redis_url = env::var("REDIS_URL")
            .unwrap_or_else(|_| "redis://127.0.0.1:6379/".to_string());

        Ok(Self {
            server: ServerConfig {
                port: env::var("PORT")
                    .unwrap_or_else(|_| "3000".to_string())
                    .parse()?,
            },
            upstream: UpstreamConfig {
                api_url,
                api_token,
                connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
                read_timeout: env_secs("API_TIMEOUT_SECS", DEFAULT_API_TIMEOUT_SECS),
            },
            store: StoreConfig { redis_url },
            cache: CacheConfig {
                fresh_ttl: env_secs("FRESH_TTL_SECS", DEFAULT_FRESH_TTL_SECS),
                stale_ttl: env_secs("STALE_TTL_SECS", DEFAULT_STALE_TTL_SECS),
                follower_timeout: env_secs(
                    "FOLLOWER_TIMEOUT_SECS",
                    DEFAULT_FOLLOWER_TIMEOUT_SECS,
                ),
                max_follower_retries: env_u32(
                    "MAX_FOLLOWER_RETRIES",
                    DEFAULT_MAX_FOLLOWER_RETRIES,
                ),
                lock_ttl: env_secs("LOCK_TTL_SECS", DEFAULT_LOCK_TTL_SECS),
                lock_extend_interval: env_secs(
                    "LOCK_EXTEND_INTERVAL_SECS",
                    DEFAULT_LOCK_EXTEND_INTERVAL_SECS,
                ),
                lock_renew_error_tolerance: env_u32(
                    "LOCK_RENEW_ERROR_TOLERANCE",
                    DEFAULT_LOCK_RENEW_ERROR_TOLERANCE,
                ),
                api_timeout: env_secs("API_TIMEOUT_SECS", DEFAULT_API_TIMEOUT_SECS),
                breaker_threshold: env_u32("BREAKER_THRESHOLD", DEFAULT_BREAKER_THRESHOLD),
                breaker_timeout: env_secs("BREAKER_TIMEOUT_SECS", DEFAULT_BREAKER_TIMEOUT_SECS),
            },
        })
    }
}
