//! Builder API for ergonomic circuit breaker configuration

use crate::{
    MetricsWindow, RollingWindow,
    circuit::{CircuitBreaker, CircuitContext},
    config::CircuitConfig,
    hooks::TransitionHooks,
};
use arc_swap::ArcSwap;
use std::sync::Arc;

/// Builder for creating circuit breakers with fluent API
pub struct CircuitBuilder {
    name: String,
    config: CircuitConfig,
    window: Option<Arc<dyn MetricsWindow>>,
    hooks: TransitionHooks,
}

impl CircuitBuilder {
    /// Create a new builder for a circuit with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: CircuitConfig::default(),
            window: None,
            hooks: TransitionHooks::default(),
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: CircuitConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the minimum number of outcomes before the error rate is evaluated
    pub fn request_volume_threshold(mut self, threshold: u32) -> Self {
        self.config.request_volume_threshold = threshold;
        self
    }

    /// Set the error percentage (0-100) at which the circuit opens
    pub fn error_threshold_percentage(mut self, percentage: u32) -> Self {
        self.config.error_threshold_percentage = percentage.min(100);
        self
    }

    /// Set how long the circuit stays open before admitting a trial
    pub fn sleep_window_ms(mut self, ms: u64) -> Self {
        self.config.sleep_window_ms = ms;
        self
    }

    /// Set the rolling window horizon and bucket count
    pub fn rolling_window(mut self, window_ms: u64, buckets: u32) -> Self {
        self.config.rolling_window_ms = window_ms;
        self.config.rolling_window_buckets = buckets;
        self
    }

    /// Set the jitter factor (0.0 = no jitter, 1.0 = full jitter)
    /// Uses chrono-machines formula: sleep * (1 - jitter + rand * jitter)
    pub fn sleep_window_jitter(mut self, factor: f64) -> Self {
        self.config.sleep_window_jitter = factor.clamp(0.0, 1.0);
        self
    }

    /// Set maximum concurrency limit (bulkheading)
    ///
    /// When set, calls beyond the limit are rejected with
    /// [`Rejection::ConcurrencyLimit`](crate::Rejection::ConcurrencyLimit)
    /// instead of waiting for a slot.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use command_breaker::CircuitBreaker;
    ///
    /// let circuit = CircuitBreaker::builder("api")
    ///     .max_concurrency(10) // Allow max 10 concurrent calls
    ///     .build();
    ///
    /// let result = circuit.call(|| Ok::<_, String>("success"));
    /// assert!(result.is_ok());
    /// ```
    pub fn max_concurrency(mut self, limit: usize) -> Self {
        self.config.max_concurrent_requests = Some(limit.max(1));
        self
    }

    pub fn force_open(mut self, force: bool) -> Self {
        self.config.force_open = force;
        if force {
            self.config.force_closed = false;
        }
        self
    }

    pub fn force_closed(mut self, force: bool) -> Self {
        self.config.force_closed = force;
        if force {
            self.config.force_open = false;
        }
        self
    }

    /// Set custom metrics window
    pub fn window(mut self, window: Arc<dyn MetricsWindow>) -> Self {
        self.window = Some(window);
        self
    }

    /// Replace all transition hooks
    pub fn hooks(mut self, hooks: TransitionHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Set hook for when circuit opens
    pub fn on_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.hooks.on_open = Some(Arc::new(f));
        self
    }

    /// Set hook for when circuit closes
    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.hooks.on_close = Some(Arc::new(f));
        self
    }

    /// Set hook for when circuit enters half-open
    pub fn on_half_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.hooks.on_half_open = Some(Arc::new(f));
        self
    }

    /// Build the circuit breaker
    ///
    /// Window geometry is normalised so every bucket spans at least 1 ms.
    pub fn build(mut self) -> CircuitBreaker {
        let buckets = self.config.rolling_window_buckets.max(1);
        let window_ms = self.config.rolling_window_ms.max(u64::from(buckets));
        self.config.rolling_window_buckets = buckets;
        self.config.rolling_window_ms = window_ms;

        let window = self
            .window
            .unwrap_or_else(|| Arc::new(RollingWindow::with_geometry(window_ms, buckets)));

        let context = CircuitContext {
            name: self.name,
            config: Arc::new(ArcSwap::from_pointee(self.config)),
            window,
        };

        CircuitBreaker::with_context_and_hooks(context, self.hooks)
    }
}
