//! rategate - read-through caching proxy for the pricing oracle
//!
//! Coalesces concurrent requests for the same (period, hotel, room) tuple
//! so that at most one upstream call is issued per tuple per validity
//! window, across all proxy processes:
//! - Redis-backed fresh/stale cache entries
//! - distributed leader election with a fenced, self-renewing lock
//! - follower wait/notify queues for broadcast of the leader's result
//! - a process-local circuit breaker around the upstream call

pub mod cache;
pub mod config;
pub mod error;
pub mod metrics;
pub mod services;
pub mod store;
pub mod utils;
