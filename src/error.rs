use thiserror::Error;

/// Where a lock operation went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockErrorKind {
    /// The lock is currently held by another process.
    Held,
    /// The lease was lost while the protected body was running.
    Lost,
}

impl std::fmt::Display for LockErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockErrorKind::Held => write!(f, "lock held elsewhere"),
            LockErrorKind::Lost => write!(f, "lease lost mid-flight"),
        }
    }
}

/// Which deadline expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    /// A follower gave up waiting for the leader's result.
    FollowerWait,
    /// The upstream call outlived its watchdog.
    Upstream,
}

impl std::fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeoutKind::FollowerWait => write!(f, "follower wait"),
            TimeoutKind::Upstream => write!(f, "upstream call"),
        }
    }
}

#[derive(Error, Debug)]
pub enum RategateError {
    /// Upstream returned a non-2xx status.
    #[error("upstream API error: HTTP {code}")]
    Api { code: u16, body: String },

    #[error("circuit breaker is open")]
    BreakerOpen,

    #[error("lock error: {0}")]
    Lock(LockErrorKind),

    #[error("timed out: {0}")]
    Timeout(TimeoutKind),

    /// No fresh entry, no stale entry, recovery exhausted.
    #[error("no rate available")]
    Unavailable,

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("parsing error: {0}")]
    Parsing(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for RategateError {
    fn from(err: reqwest::Error) -> Self {
        RategateError::Internal(format!("upstream request failed: {err}"))
    }
}

impl From<serde_json::Error> for RategateError {
    fn from(err: serde_json::Error) -> Self {
        RategateError::Parsing(err.to_string())
    }
}

impl From<redis::RedisError> for RategateError {
    fn from(err: redis::RedisError) -> Self {
        RategateError::Store(err.to_string())
    }
}
