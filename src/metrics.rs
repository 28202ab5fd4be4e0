//! Prometheus metrics for monitoring rategate.
//!
//! Covers the request path, cache effectiveness, upstream health, and the
//! coalescing machinery (elections, follower waits, breaker state).

use prometheus::{Counter, CounterVec, Gauge, Histogram, HistogramOpts, Opts, Registry};
use std::sync::Arc;
use tracing::error;

pub struct Metrics {
    pub registry: Registry,

    // Request path
    pub requests_total: CounterVec,

    // Cache effectiveness
    pub cache_reads_total: CounterVec,
    pub stale_served_total: Counter,

    // Coalescing machinery
    pub elections_total: CounterVec,
    pub follower_waits_total: CounterVec,
    pub followers_notified_total: Counter,
    pub breaker_state: Gauge,

    // Upstream health
    pub upstream_calls_total: CounterVec,
    pub upstream_call_duration_seconds: Histogram,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests_total = CounterVec::new(
            Opts::new("rategate_requests_total", "Rate requests by HTTP status"),
            &["status"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let cache_reads_total = CounterVec::new(
            Opts::new(
                "rategate_cache_reads_total",
                "Fresh-entry reads by result (fresh_hit, miss)",
            ),
            &["result"],
        )?;
        registry.register(Box::new(cache_reads_total.clone()))?;

        let stale_served_total = Counter::with_opts(Opts::new(
            "rategate_stale_served_total",
            "Responses served from the stale fallback entry",
        ))?;
        registry.register(Box::new(stale_served_total.clone()))?;

        let elections_total = CounterVec::new(
            Opts::new(
                "rategate_elections_total",
                "Leader elections by role (leader, follower)",
            ),
            &["role"],
        )?;
        registry.register(Box::new(elections_total.clone()))?;

        let follower_waits_total = CounterVec::new(
            Opts::new(
                "rategate_follower_waits_total",
                "Follower wait attempts by outcome (delivered, timeout)",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(follower_waits_total.clone()))?;

        let followers_notified_total = Counter::with_opts(Opts::new(
            "rategate_followers_notified_total",
            "Follower queues a leader pushed a result to",
        ))?;
        registry.register(Box::new(followers_notified_total.clone()))?;

        let breaker_state = Gauge::with_opts(Opts::new(
            "rategate_breaker_state",
            "Circuit breaker state (0=closed, 1=half-open, 2=open)",
        ))?;
        registry.register(Box::new(breaker_state.clone()))?;

        let upstream_calls_total = CounterVec::new(
            Opts::new(
                "rategate_upstream_calls_total",
                "Upstream oracle calls by result (success, error, timeout, rejected)",
            ),
            &["result"],
        )?;
        registry.register(Box::new(upstream_calls_total.clone()))?;

        let upstream_call_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "rategate_upstream_call_duration_seconds",
                "Upstream oracle call duration in seconds",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        )?;
        registry.register(Box::new(upstream_call_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            cache_reads_total,
            stale_served_total,
            elections_total,
            follower_waits_total,
            followers_notified_total,
            breaker_state,
            upstream_calls_total,
            upstream_call_duration_seconds,
        })
    }

    /// Record one handled rate request.
    pub fn record_request(&self, status: u16) {
        self.requests_total
            .with_label_values(&[&status.to_string()])
            .inc();
    }

    /// Mirror the breaker state into the gauge.
    pub fn set_breaker_state(&self, state: crate::cache::BreakerState) {
        let value = match state {
            crate::cache::BreakerState::Closed => 0.0,
            crate::cache::BreakerState::HalfOpen => 1.0,
            crate::cache::BreakerState::Open => 2.0,
        };
        self.breaker_state.set(value);
    }

    /// Render metrics in Prometheus text format.
    pub fn render(&self) -> String {
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();

        match encoder.encode_to_string(&metric_families) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "Failed to encode metrics");
                String::new()
            }
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create metrics")
    }
}

/// Shared metrics instance
pub type SharedMetrics = Arc<Metrics>;

/// Create a shared metrics instance
pub fn create_metrics() -> SharedMetrics {
    Arc::new(Metrics::new().expect("Failed to create metrics"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_render_contains_registered_families() {
        let metrics = Metrics::new().unwrap();
        metrics.record_request(200);
        metrics.stale_served_total.inc();

        let output = metrics.render();
        assert!(output.contains("rategate_requests_total"));
        assert!(output.contains("rategate_stale_served_total"));
    }

    #[test]
    fn breaker_gauge_tracks_states() {
        let metrics = Metrics::new().unwrap();
        metrics.set_breaker_state(crate::cache::BreakerState::Open);
        assert_eq!(metrics.breaker_state.get(), 2.0);
        metrics.set_breaker_state(crate::cache::BreakerState::Closed);
        assert_eq!(metrics.breaker_state.get(), 0.0);
    }
}
