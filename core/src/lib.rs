//! CommandBreaker - circuit-breaker guarded command execution
//!
//! This crate wraps fallible commands so that a failing dependency is cut off
//! instead of being hammered:
//! - Rolling bucketed window of success/failure outcomes per command key
//! - State machine for circuit breaker lifecycle (Closed → Open → HalfOpen)
//! - Exactly one trial call while half-open, safe under concurrent callers
//! - Failure classification with excludable failure categories
//! - Hot-swappable per-command configuration from static, property or TOML sources
//!
//! # Example
//!
//! ```rust
//! use command_breaker::{CircuitRegistry, GuardedError, GuardedExecutor, PropertyStore, command_fn};
//! use std::sync::Arc;
//!
//! let properties = PropertyStore::new();
//! properties.set_property("command.inventory.request_volume_threshold", 1);
//! properties.set_property("command.inventory.error_threshold_percentage", 50);
//! let registry = Arc::new(CircuitRegistry::new(Arc::new(properties)));
//!
//! let inventory = GuardedExecutor::builder(
//!     "inventory",
//!     command_fn(|_sku: u64| Err::<u32, _>("inventory service unavailable")),
//! )
//! .build(registry);
//!
//! // The failure is recorded and handed back unchanged
//! assert!(matches!(inventory.execute(1001), Err(GuardedError::Command(_))));
//!
//! // Circuit is now open; the command is not invoked
//! assert!(matches!(
//!     inventory.execute(1001),
//!     Err(GuardedError::CircuitOpen { .. })
//! ));
//! assert!(inventory.statistics().is_open);
//! ```

pub mod builder;
pub mod bulkhead;
pub mod circuit;
pub mod classifier;
pub mod config;
pub mod errors;
pub mod executor;
pub mod hooks;
pub mod registry;
pub mod report;
pub mod window;

use serde::Serialize;

pub use builder::CircuitBuilder;
pub use bulkhead::{Bulkhead, BulkheadPermit};
pub use circuit::{BreakerState, CircuitBreaker, Permit};
pub use classifier::{
    Categorized, DefaultClassifier, ExcludedFailures, FailureCategory, FailureClassifier,
    FailureContext, PredicateClassifier,
};
pub use config::{CircuitConfig, ConfigSource, FileConfig, PropertyStore, StaticConfig};
pub use errors::{ConfigError, GuardedError, Rejection};
pub use executor::{Command, FnCommand, GuardedExecutor, GuardedExecutorBuilder, command_fn};
pub use hooks::{TransitionHook, TransitionHooks};
pub use registry::{CircuitRegistry, CommandKey};
pub use report::StatisticsReport;
pub use window::{MetricsSnapshot, MetricsWindow, NullWindow, RollingWindow};

/// Result of one guarded invocation as seen by the metrics window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Outcome {
    Success,
    Failure,
}
