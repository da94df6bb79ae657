//! Circuit breaker implementation using state machines
//!
//! One [`CircuitBreaker`] guards one command key. Its Closed/Open/HalfOpen
//! lifecycle is a `state_machines` dynamic machine kept behind a mutex, so every
//! permission check and every transition is a single compare-and-set on state.

use crate::{
    MetricsSnapshot, MetricsWindow, Outcome, RollingWindow,
    bulkhead::{Bulkhead, BulkheadPermit},
    config::CircuitConfig,
    errors::{ConfigError, GuardedError, Rejection},
    hooks::{Transition, TransitionHooks},
};
use arc_swap::ArcSwap;
use serde::Serialize;
use state_machines::state_machine;
use std::sync::{Arc, Mutex, MutexGuard};

/// Observable circuit state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    fn from_name(name: &str) -> Self {
        match name {
            "Open" => BreakerState::Open,
            "HalfOpen" => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "Closed",
            BreakerState::Open => "Open",
            BreakerState::HalfOpen => "HalfOpen",
        }
    }
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Circuit breaker context - shared data across all states
///
/// Config and window sit behind `Arc`s so the machine's copy of the context
/// observes hot-swapped configuration and the same outcome counts.
#[derive(Clone)]
pub struct CircuitContext {
    pub name: String,
    pub config: Arc<ArcSwap<CircuitConfig>>,
    pub window: Arc<dyn MetricsWindow>,
}

impl Default for CircuitContext {
    fn default() -> Self {
        Self {
            name: String::new(),
            config: Arc::new(ArcSwap::from_pointee(CircuitConfig::default())),
            window: Arc::new(RollingWindow::new()),
        }
    }
}

impl std::fmt::Debug for CircuitContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitContext")
            .field("name", &self.name)
            .field("config", &self.config.load())
            .field("window", &self.window)
            .finish()
    }
}

/// Data specific to the Open state
#[derive(Debug, Clone, Default)]
pub struct OpenData {
    /// Window-relative millis when the circuit opened
    pub opened_at: u64,
    /// Sleep window drawn for this opening (jitter applied)
    pub sleep_ms: u64,
}

/// Data specific to the HalfOpen state
#[derive(Debug, Clone, Default)]
pub struct HalfOpenData {
    /// A trial permit is out and has not been settled
    pub trial_in_flight: bool,
    /// Outcome reported by the trial, consumed by the trip/close guards
    pub trial_outcome: Option<Outcome>,
}

state_machine! {
    name: Circuit,
    context: CircuitContext,
    dynamic: true,

    initial: Closed,
    states: [
        Closed,
        Open(OpenData),
        HalfOpen(HalfOpenData),
    ],
    events {
        trip {
            guards: [should_trip],
            transition: { from: [Closed, HalfOpen], to: Open }
        }
        attempt_reset {
            guards: [sleep_window_elapsed],
            transition: { from: Open, to: HalfOpen }
        }
        close {
            guards: [trial_succeeded],
            transition: { from: HalfOpen, to: Closed }
        }
    }
}

/// Volume and error-rate test; an empty window never trips
pub(crate) fn exceeds_thresholds(config: &CircuitConfig, snapshot: &MetricsSnapshot) -> bool {
    if snapshot.total_count == 0 {
        return false;
    }
    snapshot.total_count >= u64::from(config.request_volume_threshold)
        && snapshot.error_percentage >= f64::from(config.error_threshold_percentage)
}

/// Sleep window for one opening, with chrono-machines jitter when configured
pub(crate) fn sleep_window_for(config: &CircuitConfig) -> u64 {
    if config.sleep_window_jitter > 0.0 {
        let policy = chrono_machines::Policy {
            max_attempts: 1,
            base_delay_ms: config.sleep_window_ms,
            multiplier: 1.0,
            max_delay_ms: config.sleep_window_ms,
        };
        policy.calculate_delay(1, config.sleep_window_jitter)
    } else {
        config.sleep_window_ms
    }
}

impl Circuit<Closed> {
    fn should_trip(&self, ctx: &CircuitContext) -> bool {
        exceeds_thresholds(&ctx.config.load(), &ctx.window.snapshot())
    }
}

impl Circuit<HalfOpen> {
    /// The trial failed
    fn should_trip(&self, _ctx: &CircuitContext) -> bool {
        self.state_data_half_open()
            .is_some_and(|data| data.trial_outcome == Some(Outcome::Failure))
    }

    fn trial_succeeded(&self, _ctx: &CircuitContext) -> bool {
        self.state_data_half_open()
            .is_some_and(|data| data.trial_outcome == Some(Outcome::Success))
    }
}

impl Circuit<Open> {
    fn sleep_window_elapsed(&self, ctx: &CircuitContext) -> bool {
        self.state_data_open().is_some_and(|data| {
            ctx.window.monotonic_millis().saturating_sub(data.opened_at) >= data.sleep_ms
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PermitKind {
    /// Ordinary call while Closed (or forced closed)
    Tracked,
    /// The single half-open trial
    Trial,
    /// Breaker disabled; nothing is recorded
    Bypass,
}

/// Permission to invoke the guarded command once
///
/// Settle it with [`success`](Permit::success), [`failure`](Permit::failure) or
/// [`ignore`](Permit::ignore). A trial permit dropped unsettled (for example
/// because the command panicked) hands the trial back so the next caller can
/// probe instead.
#[must_use = "settle the permit with success(), failure() or ignore()"]
#[derive(Debug)]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    kind: PermitKind,
    settled: bool,
    _slot: Option<BulkheadPermit>,
}

impl Permit<'_> {
    /// True if this permit is the half-open trial
    pub fn is_trial(&self) -> bool {
        self.kind == PermitKind::Trial
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record_outcome(Outcome::Success, self.kind);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.record_outcome(Outcome::Failure, self.kind);
    }

    /// The call failed in a way that must not affect circuit health
    pub fn ignore(self) {
        // Drop releases an unsettled trial
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.kind == PermitKind::Trial {
            self.breaker.release_trial();
        }
    }
}

/// Circuit breaker public API
pub struct CircuitBreaker {
    machine: Mutex<DynamicCircuit>,
    context: CircuitContext,
    hooks: TransitionHooks,
    bulkhead: Arc<Bulkhead>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker (use builder() for more options)
    pub fn new(name: impl Into<String>, config: CircuitConfig) -> Self {
        crate::builder::CircuitBuilder::new(name).config(config).build()
    }

    /// Create a circuit breaker with custom context and hooks (used by builder)
    pub(crate) fn with_context_and_hooks(context: CircuitContext, hooks: TransitionHooks) -> Self {
        let machine = DynamicCircuit::new(context.clone());

        Self {
            machine: Mutex::new(machine),
            context,
            hooks,
            bulkhead: Arc::new(Bulkhead::new()),
        }
    }

    pub fn builder(name: impl Into<String>) -> crate::builder::CircuitBuilder {
        crate::builder::CircuitBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.context.name
    }

    /// Ask for permission to run the command once
    ///
    /// Never blocks on another invocation: a denied caller gets a
    /// [`Rejection`] straight away.
    pub fn try_acquire(&self) -> Result<Permit<'_>, Rejection> {
        let config = self.context.config.load();

        if !config.enabled {
            return Ok(self.permit(PermitKind::Bypass, None));
        }
        if config.force_open {
            tracing::debug!(command = %self.context.name, "Short-circuited, circuit forced open");
            return Err(self.open_rejection(0));
        }

        let slot = match config.max_concurrent_requests {
            Some(limit) => Some(self.bulkhead.try_acquire(limit).ok_or_else(|| {
                Rejection::ConcurrencyLimit {
                    command: self.context.name.clone(),
                    limit,
                }
            })?),
            None => None,
        };

        if config.force_closed {
            return Ok(self.permit(PermitKind::Tracked, slot));
        }

        let mut machine = self.lock();

        if machine.current_state() == "Open" && machine.handle(CircuitEvent::AttemptReset).is_ok()
        {
            // The caller that moved Open -> HalfOpen owns the trial
            if let Some(data) = machine.half_open_data_mut() {
                data.trial_in_flight = true;
                data.trial_outcome = None;
            }
            drop(machine);
            tracing::debug!(command = %self.context.name, "Circuit half-open, admitting trial");
            self.hooks.fire(Transition::HalfOpened, &self.context.name);
            return Ok(self.permit(PermitKind::Trial, slot));
        }

        match machine.current_state() {
            "Closed" => Ok(self.permit(PermitKind::Tracked, slot)),
            "HalfOpen" => match machine.half_open_data_mut() {
                // A previous trial was handed back unsettled
                Some(data) if !data.trial_in_flight => {
                    data.trial_in_flight = true;
                    data.trial_outcome = None;
                    Ok(self.permit(PermitKind::Trial, slot))
                }
                _ => {
                    tracing::debug!(command = %self.context.name, "Short-circuited, trial in flight");
                    Err(self.open_rejection(0))
                }
            },
            _ => {
                let retry_after_ms = machine
                    .open_data()
                    .map(|data| {
                        data.opened_at
                            .saturating_add(data.sleep_ms)
                            .saturating_sub(self.context.window.monotonic_millis())
                    })
                    .unwrap_or(0);
                tracing::debug!(command = %self.context.name, retry_after_ms, "Short-circuited, circuit open");
                Err(self.open_rejection(retry_after_ms))
            }
        }
    }

    /// Execute a fallible operation with circuit breaker protection
    ///
    /// Every error counts as a failure; use
    /// [`GuardedExecutor`](crate::GuardedExecutor) for classified failures.
    pub fn call<T, E>(&self, f: impl FnOnce() -> Result<T, E>) -> Result<T, GuardedError<E>> {
        let permit = self.try_acquire()?;

        match f() {
            Ok(val) => {
                permit.success();
                Ok(val)
            }
            Err(e) => {
                permit.failure();
                Err(GuardedError::Command(e))
            }
        }
    }

    pub fn state(&self) -> BreakerState {
        BreakerState::from_name(self.lock().current_state())
    }

    pub fn state_name(&self) -> &'static str {
        self.lock().current_state()
    }

    pub fn is_open(&self) -> bool {
        self.state() == BreakerState::Open
    }

    pub fn is_closed(&self) -> bool {
        self.state() == BreakerState::Closed
    }

    pub fn is_half_open(&self) -> bool {
        self.state() == BreakerState::HalfOpen
    }

    /// Current window counts
    pub fn metrics(&self) -> MetricsSnapshot {
        self.context.window.snapshot()
    }

    pub fn config(&self) -> Arc<CircuitConfig> {
        self.context.config.load_full()
    }

    /// Atomically replace the configuration
    ///
    /// Takes effect on the next permission check. Window geometry is fixed
    /// when the breaker is built: `rolling_window_*` values in `config` are
    /// ignored. Returns whether the stored configuration changed.
    pub fn reconfigure(&self, mut config: CircuitConfig) -> Result<bool, ConfigError> {
        let current = self.context.config.load_full();

        if config.rolling_window_ms != current.rolling_window_ms
            || config.rolling_window_buckets != current.rolling_window_buckets
        {
            tracing::warn!(
                command = %self.context.name,
                rolling_window_ms = config.rolling_window_ms,
                rolling_window_buckets = config.rolling_window_buckets,
                "Window geometry cannot change on a live breaker, keeping current"
            );
            config.rolling_window_ms = current.rolling_window_ms;
            config.rolling_window_buckets = current.rolling_window_buckets;
        }
        config.validate()?;

        if *current == config {
            return Ok(false);
        }
        tracing::info!(command = %self.context.name, ?config, "Circuit reconfigured");
        self.context.config.store(Arc::new(config));
        Ok(true)
    }

    /// Clear all outcomes and reset circuit to Closed state
    pub fn reset(&self) {
        let mut machine = self.lock();
        self.context.window.clear();
        *machine = DynamicCircuit::new(self.context.clone());
    }

    fn lock(&self) -> MutexGuard<'_, DynamicCircuit> {
        self.machine
            .lock()
            .expect("circuit state lock poisoned; breaker state is unreliable")
    }

    fn permit(&self, kind: PermitKind, slot: Option<BulkheadPermit>) -> Permit<'_> {
        Permit {
            breaker: self,
            kind,
            settled: false,
            _slot: slot,
        }
    }

    fn open_rejection(&self, retry_after_ms: u64) -> Rejection {
        Rejection::Open {
            command: self.context.name.clone(),
            retry_after_ms,
        }
    }

    fn record_outcome(&self, outcome: Outcome, kind: PermitKind) {
        if kind == PermitKind::Bypass {
            return;
        }
        self.context.window.record(outcome);

        let mut machine = self.lock();
        let transition = match machine.current_state() {
            "Closed" => {
                if !self.context.config.load().force_closed
                    && machine.handle(CircuitEvent::Trip).is_ok()
                {
                    self.mark_open(&mut machine);
                    Some(Transition::Opened)
                } else {
                    None
                }
            }
            "HalfOpen" if kind == PermitKind::Trial => {
                if let Some(data) = machine.half_open_data_mut() {
                    data.trial_in_flight = false;
                    data.trial_outcome = Some(outcome);
                }
                let event = match outcome {
                    Outcome::Success => CircuitEvent::Close,
                    Outcome::Failure => CircuitEvent::Trip,
                };
                if machine.handle(event).is_err() {
                    None
                } else if outcome == Outcome::Success {
                    self.context.window.clear();
                    tracing::info!(command = %self.context.name, "Circuit closed, trial succeeded");
                    Some(Transition::Closed)
                } else {
                    self.mark_open(&mut machine);
                    Some(Transition::Opened)
                }
            }
            // Late outcomes from calls admitted before the circuit opened
            _ => None,
        };

        // Hooks may read this breaker, so they run unlocked
        drop(machine);
        if let Some(transition) = transition {
            self.hooks.fire(transition, &self.context.name);
        }
    }

    fn release_trial(&self) {
        let mut machine = self.lock();
        if machine.current_state() == "HalfOpen"
            && let Some(data) = machine.half_open_data_mut()
        {
            data.trial_in_flight = false;
        }
    }

    /// Apply Open-state bookkeeping (timestamp, sleep window)
    fn mark_open(&self, machine: &mut DynamicCircuit) {
        let sleep_ms = sleep_window_for(&self.context.config.load());
        if let Some(data) = machine.open_data_mut() {
            data.opened_at = self.context.window.monotonic_millis();
            data.sleep_ms = sleep_ms;
        }

        let snapshot = self.context.window.snapshot();
        tracing::warn!(
            command = %self.context.name,
            total = snapshot.total_count,
            failures = snapshot.failure_count,
            error_percentage = snapshot.error_percentage,
            sleep_ms,
            "Circuit opened"
        );
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.context.name)
            .field("state", &self.state())
            .field("metrics", &self.metrics())
            .field("hooks", &self.hooks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NullWindow;
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    fn breaker(volume: u32, percentage: u32) -> CircuitBreaker {
        CircuitBreaker::builder("test")
            .request_volume_threshold(volume)
            .error_threshold_percentage(percentage)
            .build()
    }

    /// Opens a breaker with a short sleep window
    fn opened_breaker(sleep_window_ms: u64) -> CircuitBreaker {
        let circuit = CircuitBreaker::builder("test")
            .request_volume_threshold(1)
            .error_threshold_percentage(50)
            .sleep_window_ms(sleep_window_ms)
            .build();
        let _ = circuit.call(|| Err::<(), _>("error"));
        assert!(circuit.is_open());
        circuit
    }

    #[test]
    fn test_circuit_breaker_creation() {
        let circuit = CircuitBreaker::new("test", CircuitConfig::default());

        assert!(circuit.is_closed());
        assert_eq!(circuit.state_name(), "Closed");
        assert_eq!(circuit.name(), "test");
    }

    #[test]
    fn test_single_failure_opens_at_volume_one() {
        let circuit = breaker(1, 50);

        let _ = circuit.call(|| Err::<(), _>("error"));
        assert!(circuit.is_open());
    }

    #[test]
    fn test_below_percentage_stays_closed() {
        let circuit = breaker(1, 34);

        let _ = circuit.call(|| Ok::<_, &str>(()));
        let _ = circuit.call(|| Ok::<_, &str>(()));
        let _ = circuit.call(|| Err::<(), _>("error"));

        // 1/3 = 33.33% < 34%
        assert!(circuit.is_closed());
    }

    #[test]
    fn test_below_volume_stays_closed() {
        let circuit = breaker(4, 30);

        let _ = circuit.call(|| Ok::<_, &str>(()));
        let _ = circuit.call(|| Ok::<_, &str>(()));
        let _ = circuit.call(|| Err::<(), _>("error"));

        assert_eq!(circuit.metrics().total_count, 3);
        assert!(circuit.is_closed());
    }

    #[test]
    fn test_volume_and_percentage_reached_opens() {
        let circuit = breaker(3, 30);

        let _ = circuit.call(|| Ok::<_, &str>(()));
        let _ = circuit.call(|| Ok::<_, &str>(()));
        assert!(circuit.is_closed());

        let _ = circuit.call(|| Err::<(), _>("error"));
        assert!(circuit.is_open());
    }

    #[test]
    fn test_thresholds_are_inclusive() {
        let circuit = breaker(2, 50);

        let _ = circuit.call(|| Ok::<_, &str>(()));
        let _ = circuit.call(|| Err::<(), _>("error"));

        // 2 >= 2 and 50% >= 50%
        assert!(circuit.is_open());
    }

    #[test]
    fn test_exceeds_thresholds_ignores_empty_window() {
        let config = CircuitConfig {
            request_volume_threshold: 0,
            error_threshold_percentage: 0,
            ..Default::default()
        };

        assert!(!exceeds_thresholds(&config, &MetricsSnapshot::default()));
        assert!(exceeds_thresholds(&config, &MetricsSnapshot::new(1, 0)));
    }

    #[test]
    fn test_state_machine_closed_to_open_transition() {
        let window = Arc::new(RollingWindow::new());
        let config = CircuitConfig {
            request_volume_threshold: 3,
            error_threshold_percentage: 50,
            ..Default::default()
        };

        let ctx = CircuitContext {
            name: "test_circuit".to_string(),
            config: Arc::new(ArcSwap::from_pointee(config)),
            window: window.clone(),
        };

        let mut circuit = DynamicCircuit::new(ctx);

        // Empty window - trip should fail guard
        let result = circuit.handle(CircuitEvent::Trip);
        assert!(result.is_err(), "Should fail guard with empty window");

        window.record(Outcome::Failure);
        window.record(Outcome::Failure);
        assert!(circuit.handle(CircuitEvent::Trip).is_err());

        window.record(Outcome::Failure);
        circuit
            .handle(CircuitEvent::Trip)
            .expect("Should open after reaching threshold");

        assert_eq!(circuit.current_state(), "Open");
    }

    #[test]
    fn test_state_machine_open_to_half_open_transition() {
        let window = Arc::new(RollingWindow::new());
        let config = CircuitConfig {
            request_volume_threshold: 1,
            ..Default::default()
        };

        let ctx = CircuitContext {
            name: "test_circuit".to_string(),
            config: Arc::new(ArcSwap::from_pointee(config)),
            window: window.clone(),
        };

        window.record(Outcome::Failure);
        let mut circuit = DynamicCircuit::new(ctx);
        circuit.handle(CircuitEvent::Trip).expect("Should open");

        if let Some(data) = circuit.open_data_mut() {
            data.opened_at = window.monotonic_millis();
            data.sleep_ms = 5;
        }

        let result = circuit.handle(CircuitEvent::AttemptReset);
        assert!(result.is_err(), "Should fail guard before sleep window");

        thread::sleep(Duration::from_millis(10));

        circuit
            .handle(CircuitEvent::AttemptReset)
            .expect("Should reset after sleep window");
        assert_eq!(circuit.current_state(), "HalfOpen");

        // Without a recorded trial outcome neither close nor trip may fire
        assert!(circuit.handle(CircuitEvent::Close).is_err());
        assert!(circuit.handle(CircuitEvent::Trip).is_err());
    }

    #[test]
    fn test_open_circuit_short_circuits_repeatedly() {
        let circuit = opened_breaker(60_000);
        let invoked = AtomicUsize::new(0);

        for _ in 0..5 {
            let result = circuit.call(|| {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &str>(())
            });
            match result {
                Err(GuardedError::CircuitOpen { retry_after_ms, .. }) => {
                    assert!(retry_after_ms > 0 && retry_after_ms <= 60_000)
                }
                other => panic!("Expected CircuitOpen, got: {:?}", other),
            }
        }

        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        assert!(circuit.is_open());
    }

    #[test]
    fn test_trial_success_closes_circuit() {
        let circuit = opened_breaker(5);
        thread::sleep(Duration::from_millis(10));

        let result = circuit.call(|| Ok::<_, &str>("recovered"));
        assert_eq!(result.unwrap(), "recovered");
        assert!(circuit.is_closed());

        // Window is cleared on close so the old failure cannot re-trip
        assert!(circuit.metrics().is_empty());
        let _ = circuit.call(|| Ok::<_, &str>(()));
        assert!(circuit.is_closed());
    }

    #[test]
    fn test_trial_failure_reopens_with_fresh_timestamp() {
        let circuit = opened_breaker(20);
        let first_opened_at = circuit.lock().open_data().unwrap().opened_at;

        thread::sleep(Duration::from_millis(30));

        let _ = circuit.call(|| Err::<(), _>("still down"));
        assert!(circuit.is_open());

        let reopened_at = circuit.lock().open_data().unwrap().opened_at;
        assert!(reopened_at >= first_opened_at + 20);

        // Sleep window restarted
        let result = circuit.call(|| Ok::<_, &str>(()));
        assert!(matches!(result, Err(GuardedError::CircuitOpen { .. })));
    }

    #[test]
    fn test_only_one_trial_while_in_flight() {
        let circuit = opened_breaker(5);
        thread::sleep(Duration::from_millis(10));

        let trial = circuit.try_acquire().expect("First caller gets the trial");
        assert!(trial.is_trial());
        assert!(circuit.is_half_open());

        assert!(matches!(
            circuit.try_acquire(),
            Err(Rejection::Open { .. })
        ));

        trial.success();
        assert!(circuit.is_closed());
        assert!(circuit.try_acquire().is_ok());
    }

    #[test]
    fn test_concurrent_permission_checks_grant_one_trial() {
        let circuit = Arc::new(opened_breaker(5));
        thread::sleep(Duration::from_millis(10));

        let start = Arc::new(Barrier::new(16));
        let done = Arc::new(Barrier::new(16));
        let mut handles = vec![];

        for _ in 0..16 {
            let circuit = Arc::clone(&circuit);
            let start = Arc::clone(&start);
            let done = Arc::clone(&done);
            handles.push(thread::spawn(move || {
                start.wait();
                let permit = circuit.try_acquire();
                let granted = permit.as_ref().is_ok_and(|p| p.is_trial());
                // Keep the permit alive until every thread has asked
                done.wait();
                granted
            }));
        }

        let granted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&g| g)
            .count();

        assert_eq!(granted, 1);
    }

    #[test]
    fn test_unsettled_trial_is_released() {
        let circuit = opened_breaker(5);
        thread::sleep(Duration::from_millis(10));

        let trial = circuit.try_acquire().unwrap();
        trial.ignore();
        assert!(circuit.is_half_open());

        // Next caller takes over the trial
        let retry = circuit.try_acquire().unwrap();
        assert!(retry.is_trial());
        drop(retry);

        let result = circuit.call(|| Ok::<_, &str>(()));
        assert!(result.is_ok());
        assert!(circuit.is_closed());
    }

    #[test]
    fn test_late_outcome_does_not_settle_trial() {
        let circuit = CircuitBreaker::builder("test")
            .request_volume_threshold(1)
            .error_threshold_percentage(50)
            .sleep_window_ms(5)
            .build();

        // Admitted while closed, finishes after the circuit went half-open
        let straggler = circuit.try_acquire().unwrap();
        let _ = circuit.call(|| Err::<(), _>("error"));
        assert!(circuit.is_open());

        thread::sleep(Duration::from_millis(10));
        let trial = circuit.try_acquire().unwrap();

        straggler.success();
        assert!(circuit.is_half_open());

        trial.success();
        assert!(circuit.is_closed());
    }

    #[test]
    fn test_force_open_rejects_everything() {
        let circuit = CircuitBreaker::builder("test").force_open(true).build();

        let result = circuit.call(|| Ok::<_, &str>(()));
        assert!(matches!(result, Err(GuardedError::CircuitOpen { .. })));
        assert!(circuit.metrics().is_empty());
    }

    #[test]
    fn test_force_closed_admits_and_records() {
        let circuit = CircuitBreaker::builder("test")
            .request_volume_threshold(1)
            .force_closed(true)
            .build();

        for _ in 0..5 {
            let result = circuit.call(|| Err::<(), _>("error"));
            assert!(matches!(result, Err(GuardedError::Command("error"))));
        }

        assert!(circuit.is_closed());
        assert_eq!(circuit.metrics().failure_count, 5);
    }

    #[test]
    fn test_disabled_breaker_bypasses_everything() {
        let circuit = CircuitBreaker::new(
            "test",
            CircuitConfig {
                request_volume_threshold: 1,
                enabled: false,
                ..Default::default()
            },
        );

        for _ in 0..3 {
            let _ = circuit.call(|| Err::<(), _>("error"));
        }

        assert!(circuit.is_closed());
        assert!(circuit.metrics().is_empty());
    }

    #[test]
    fn test_reconfigure_hot_swaps_thresholds() {
        let circuit = breaker(10, 50);

        let _ = circuit.call(|| Err::<(), _>("error"));
        assert!(circuit.is_closed());

        let mut config = (*circuit.config()).clone();
        config.request_volume_threshold = 2;
        assert!(circuit.reconfigure(config).unwrap());
        assert_eq!(circuit.config().request_volume_threshold, 2);

        let _ = circuit.call(|| Err::<(), _>("error"));
        assert!(circuit.is_open());
    }

    #[test]
    fn test_reconfigure_rejects_invalid_config() {
        let circuit = breaker(10, 50);
        let config = CircuitConfig {
            error_threshold_percentage: 120,
            ..Default::default()
        };

        assert!(circuit.reconfigure(config).is_err());
        assert_eq!(circuit.config().error_threshold_percentage, 50);
    }

    #[test]
    fn test_reset_clears_state() {
        let circuit = opened_breaker(60_000);

        circuit.reset();
        assert!(circuit.is_closed());
        assert!(circuit.metrics().is_empty());
    }

    #[test]
    fn test_concurrency_limit_rejects_when_full() {
        let circuit = CircuitBreaker::builder("test").max_concurrency(1).build();

        let held = circuit.try_acquire().expect("First call admitted");
        match circuit.try_acquire() {
            Err(Rejection::ConcurrencyLimit { command, limit }) => {
                assert_eq!(command, "test");
                assert_eq!(limit, 1);
            }
            other => panic!("Expected ConcurrencyLimit, got: {:?}", other),
        }

        held.success();
        assert!(circuit.try_acquire().is_ok());
    }

    #[test]
    fn test_hooks_fire_on_transitions() {
        let opened = Arc::new(AtomicBool::new(false));
        let half_opened = Arc::new(AtomicBool::new(false));
        let closed = Arc::new(AtomicBool::new(false));
        let (o, h, c) = (opened.clone(), half_opened.clone(), closed.clone());

        let circuit = CircuitBreaker::builder("test")
            .request_volume_threshold(1)
            .sleep_window_ms(5)
            .on_open(move |name| {
                assert_eq!(name, "test");
                o.store(true, Ordering::SeqCst);
            })
            .on_half_open(move |_| h.store(true, Ordering::SeqCst))
            .on_close(move |_| c.store(true, Ordering::SeqCst))
            .build();

        let _ = circuit.call(|| Err::<(), _>("error"));
        assert!(opened.load(Ordering::SeqCst));

        thread::sleep(Duration::from_millis(10));
        let _ = circuit.call(|| Ok::<_, &str>(()));

        assert!(half_opened.load(Ordering::SeqCst));
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_hooks_may_read_the_breaker() {
        use crate::StatisticsReport;
        use std::sync::mpsc;
        use std::sync::{OnceLock, Weak};

        let slot: Arc<OnceLock<Weak<CircuitBreaker>>> = Arc::new(OnceLock::new());
        let reports = Arc::new(Mutex::new(Vec::new()));

        let read_back = |slot: Arc<OnceLock<Weak<CircuitBreaker>>>,
                         reports: Arc<Mutex<Vec<StatisticsReport>>>| {
            move |_: &str| {
                if let Some(breaker) = slot.get().and_then(Weak::upgrade) {
                    reports.lock().unwrap().push(StatisticsReport::capture(&breaker));
                }
            }
        };

        let circuit = Arc::new(
            CircuitBreaker::builder("test")
                .request_volume_threshold(1)
                .sleep_window_ms(5)
                .on_open(read_back(slot.clone(), reports.clone()))
                .on_half_open(read_back(slot.clone(), reports.clone()))
                .on_close(read_back(slot.clone(), reports.clone()))
                .build(),
        );
        slot.set(Arc::downgrade(&circuit)).unwrap();

        let (tx, rx) = mpsc::channel();
        let worker = Arc::clone(&circuit);
        thread::spawn(move || {
            let _ = worker.call(|| Err::<(), _>("error"));
            thread::sleep(Duration::from_millis(10));
            let _ = worker.call(|| Ok::<_, &str>(()));
            tx.send(()).unwrap();
        });

        rx.recv_timeout(Duration::from_secs(5))
            .expect("Hook reading the breaker must not block the caller");

        let states: Vec<_> = reports.lock().unwrap().iter().map(|r| r.state).collect();
        assert_eq!(
            states,
            vec![BreakerState::Open, BreakerState::HalfOpen, BreakerState::Closed]
        );
        assert!(circuit.is_closed());
    }

    #[test]
    fn test_huge_sleep_window_keeps_short_circuiting() {
        let circuit = CircuitBreaker::builder("test")
            .request_volume_threshold(1)
            .sleep_window_ms(u64::MAX)
            .build();

        // Let the window clock move past zero before opening
        thread::sleep(Duration::from_millis(5));
        let _ = circuit.call(|| Err::<(), _>("error"));
        assert!(circuit.is_open());

        for _ in 0..3 {
            match circuit.call(|| Ok::<_, &str>(())) {
                Err(GuardedError::CircuitOpen { retry_after_ms, .. }) => {
                    assert!(retry_after_ms > 0)
                }
                other => panic!("Expected CircuitOpen, got: {:?}", other),
            }
        }
        assert!(circuit.is_open());
    }

    #[test]
    fn test_reconfigure_keeps_window_geometry() {
        let circuit = breaker(10, 50);

        let mut config = (*circuit.config()).clone();
        config.rolling_window_ms = 60_000;
        config.rolling_window_buckets = 60;
        assert!(!circuit.reconfigure(config.clone()).unwrap());
        assert_eq!(circuit.config().rolling_window_ms, 10_000);
        assert_eq!(circuit.config().rolling_window_buckets, 10);

        config.sleep_window_ms = 1_000;
        assert!(circuit.reconfigure(config).unwrap());
        assert_eq!(circuit.config().sleep_window_ms, 1_000);
        assert_eq!(circuit.config().rolling_window_ms, 10_000);
    }

    #[test]
    fn test_null_window_never_opens() {
        let circuit = CircuitBreaker::builder("test")
            .request_volume_threshold(1)
            .window(Arc::new(NullWindow::new()))
            .build();

        for _ in 0..5 {
            let _ = circuit.call(|| Err::<(), _>("error"));
        }
        assert!(circuit.is_closed());
    }

    #[test]
    fn test_zero_jitter_produces_constant_sleep_window() {
        let config = CircuitConfig {
            sleep_window_ms: 1_000,
            ..Default::default()
        };

        for _ in 0..10 {
            assert_eq!(sleep_window_for(&config), 1_000);
        }
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let config = CircuitConfig {
            sleep_window_ms: 1_000,
            sleep_window_jitter: 0.25,
            ..Default::default()
        };

        for _ in 0..50 {
            let sleep_ms = sleep_window_for(&config);
            assert!(
                (750..=1_000).contains(&sleep_ms),
                "Jittered sleep window {} outside 750..=1000",
                sleep_ms
            );
        }
    }
}
