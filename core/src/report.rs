//! Point-in-time health statistics for a command

use crate::{BreakerState, CircuitBreaker};
use serde::Serialize;
use std::fmt;

/// Health statistics printed after guarded executions
///
/// Serializes with serde for machine consumers; `Display` renders the
/// human-readable block.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatisticsReport {
    pub command: String,
    pub error_count: u64,
    pub error_percentage: f64,
    pub total_requests: u64,
    pub is_open: bool,
    pub state: BreakerState,
}

impl StatisticsReport {
    pub fn capture(breaker: &CircuitBreaker) -> Self {
        let snapshot = breaker.metrics();
        let state = breaker.state();

        Self {
            command: breaker.name().to_string(),
            error_count: snapshot.failure_count,
            error_percentage: snapshot.error_percentage,
            total_requests: snapshot.total_count,
            is_open: state == BreakerState::Open,
            state,
        }
    }

    pub(crate) fn log(&self) {
        tracing::info!(
            command = %self.command,
            error_count = self.error_count,
            error_percentage = self.error_percentage,
            total_requests = self.total_requests,
            is_open = self.is_open,
            "Circuit statistics"
        );
    }
}

impl fmt::Display for StatisticsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} statistics:", self.command)?;
        writeln!(f, "  error count:      {}", self.error_count)?;
        writeln!(f, "  error percentage: {:.2}%", self.error_percentage)?;
        writeln!(f, "  total requests:   {}", self.total_requests)?;
        write!(f, "  circuit open:     {} ({})", self.is_open, self.state)
    }
}
