//! Error types for guarded command execution

use thiserror::Error;

/// Reason a circuit breaker refused to hand out a permit
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// Circuit is open (or forced open); the command must not be invoked
    #[error("circuit '{command}' is open (retry in {retry_after_ms} ms)")]
    Open { command: String, retry_after_ms: u64 },
    /// The concurrency limit for this command is exhausted
    #[error("circuit '{command}' is at its concurrency limit ({limit})")]
    ConcurrencyLimit { command: String, limit: usize },
}

/// Errors returned by [`GuardedExecutor::execute`](crate::GuardedExecutor::execute)
///
/// The command's own error value is carried unchanged in `Command` and
/// `Ignored`, so callers can match on it directly or recover it with
/// [`GuardedError::into_inner`].
#[derive(Debug, Error)]
pub enum GuardedError<E> {
    /// Short-circuited: the breaker is open and the command was not invoked
    #[error("command '{command}' short-circuited, circuit open (retry in {retry_after_ms} ms)")]
    CircuitOpen { command: String, retry_after_ms: u64 },
    /// Too many concurrent executions; the command was not invoked
    #[error("command '{command}' rejected, {limit} executions already in flight")]
    Rejected { command: String, limit: usize },
    /// The command failed and the failure counted toward the error rate
    #[error("{0}")]
    Command(E),
    /// The command failed with an excluded failure category; nothing was recorded
    #[error("{0}")]
    Ignored(E),
}

impl<E> GuardedError<E> {
    /// The original command error, if the command ran and failed
    pub fn into_inner(self) -> Option<E> {
        match self {
            GuardedError::Command(e) | GuardedError::Ignored(e) => Some(e),
            GuardedError::CircuitOpen { .. } | GuardedError::Rejected { .. } => None,
        }
    }

    /// True if the command was never invoked
    pub fn is_short_circuit(&self) -> bool {
        matches!(
            self,
            GuardedError::CircuitOpen { .. } | GuardedError::Rejected { .. }
        )
    }
}

impl<E> From<Rejection> for GuardedError<E> {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::Open {
                command,
                retry_after_ms,
            } => GuardedError::CircuitOpen {
                command,
                retry_after_ms,
            },
            Rejection::ConcurrencyLimit { command, limit } => {
                GuardedError::Rejected { command, limit }
            }
        }
    }
}

/// Errors raised while loading or validating circuit configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("error_threshold_percentage must be within 0..=100, got {0}")]
    InvalidPercentage(u32),
    #[error("rolling_window_buckets must be greater than 0")]
    ZeroBuckets,
    #[error("rolling_window_ms ({window_ms}) must be a positive multiple of rolling_window_buckets ({buckets})")]
    UnevenWindow { window_ms: u64, buckets: u32 },
    #[error("sleep_window_jitter must be within 0.0..=1.0, got {0}")]
    InvalidJitter(f64),
    #[error("max_concurrent_requests must be greater than 0")]
    ZeroConcurrency,
    #[error("force_open and force_closed cannot both be set")]
    ConflictingForce,
    #[error("invalid value '{value}' for property '{key}'")]
    InvalidProperty { key: String, value: String },
    #[error("failed to parse circuit config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to read circuit config: {0}")]
    Io(#[from] std::io::Error),
}
