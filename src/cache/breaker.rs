//! Process-local circuit breaker for the upstream oracle.
//!
//! Three states with time-based recovery:
//! - Closed: calls proceed, consecutive failures are counted
//! - Open: calls are rejected until the recovery timeout elapses
//! - HalfOpen: one probe window; success closes, failure reopens
//!
//! Every process keeps its own breaker; there is no shared view across the
//! fleet.

use crate::error::RategateError;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "closed"),
            BreakerState::Open => write!(f, "open"),
            BreakerState::HalfOpen => write!(f, "half-open"),
        }
    }
}

struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    last_failure: Option<Instant>,
}

pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    threshold: u32,
    timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                last_failure: None,
            }),
            threshold,
            timeout,
        }
    }

    /// Run `body` under the breaker. Rejects with `BreakerOpen` while the
    /// circuit is open; otherwise executes the body (in HalfOpen when the
    /// recovery timeout has elapsed) and records its outcome. The internal
    /// mutex is never held across the body.
    pub async fn call<T, F, Fut>(&self, body: F) -> Result<T, RategateError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, RategateError>>,
    {
        {
            let mut inner = self.inner.lock().expect("breaker mutex poisoned");
            if inner.state == BreakerState::Open {
                let ready = inner
                    .last_failure
                    .is_some_and(|at| at.elapsed() >= self.timeout);
                if !ready {
                    return Err(RategateError::BreakerOpen);
                }
                inner.state = BreakerState::HalfOpen;
                debug!("Circuit breaker half-open, probing upstream");
            }
        }

        let result = body().await;
        match &result {
            Ok(_) => self.record_success(),
            Err(_) => self.record_failure(),
        }
        result
    }

    /// True when a call issued right now would be rejected.
    pub fn is_open(&self) -> bool {
        let inner = self.inner.lock().expect("breaker mutex poisoned");
        inner.state == BreakerState::Open
            && !inner
                .last_failure
                .is_some_and(|at| at.elapsed() >= self.timeout)
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().expect("breaker mutex poisoned").state
    }

    /// Record a success observed outside `call`.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => {
                if inner.state == BreakerState::HalfOpen {
                    debug!("Circuit breaker closed after successful probe");
                }
                inner.state = BreakerState::Closed;
                inner.failure_count = 0;
            }
            BreakerState::Open => {}
        }
    }

    /// Record a failure observed outside `call`.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        match inner.state {
            BreakerState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.threshold {
                    inner.state = BreakerState::Open;
                    inner.last_failure = Some(Instant::now());
                    warn!(
                        failures = inner.failure_count,
                        "Circuit breaker opened"
                    );
                }
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.last_failure = Some(Instant::now());
                warn!("Circuit breaker reopened after failed probe");
            }
            BreakerState::Open => {}
        }
    }

    /// Force the breaker closed with a zeroed failure count.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        inner.state = BreakerState::Closed;
        inner.failure_count = 0;
        inner.last_failure = None;
    }
}
