//! Guarded command walkthrough
//!
//! Run with `RUST_LOG=command_breaker=debug` to see transition logs.

use command_breaker::{
    CircuitRegistry, Categorized, ExcludedFailures, FailureCategory, GuardedError,
    GuardedExecutor, PropertyStore, TransitionHooks, command_fn,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum PaymentFailure {
    Declined,
    InsufficientFunds,
    GatewayDown,
}

impl FailureCategory for PaymentFailure {
    fn parent(self) -> Option<Self> {
        match self {
            PaymentFailure::InsufficientFunds => Some(PaymentFailure::Declined),
            PaymentFailure::Declined | PaymentFailure::GatewayDown => None,
        }
    }
}

#[derive(Debug)]
struct PaymentError(PaymentFailure);

impl std::fmt::Display for PaymentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "payment failed: {:?}", self.0)
    }
}

impl Categorized for PaymentError {
    type Category = PaymentFailure;

    fn category(&self) -> PaymentFailure {
        self.0
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!("=== Guarded Command Example ===\n");

    let properties = Arc::new(PropertyStore::new());
    properties.set_property("command.payment.request_volume_threshold", 3);
    properties.set_property("command.payment.error_threshold_percentage", 30);
    properties.set_property("command.payment.sleep_window_ms", 500);

    let hooks = TransitionHooks {
        on_open: Some(Arc::new(|name: &str| println!("🔴 Circuit '{}' opened!", name))),
        on_close: Some(Arc::new(|name: &str| println!("🟢 Circuit '{}' closed!", name))),
        on_half_open: Some(Arc::new(|name: &str| {
            println!("🟡 Circuit '{}' half-open, testing...", name)
        })),
    };
    let registry = Arc::new(CircuitRegistry::new(properties.clone()).with_hooks(hooks));

    // Input decides the outcome so the walkthrough is deterministic
    let payment = GuardedExecutor::builder(
        "payment",
        command_fn(|outcome: Option<PaymentFailure>| match outcome {
            None => Ok("charged"),
            Some(kind) => Err(PaymentError(kind)),
        }),
    )
    .exclude(ExcludedFailures::new().with(PaymentFailure::Declined))
    .report_statistics(true)
    .build(registry.clone());

    println!("--- Successful calls ---");
    for _ in 0..2 {
        match payment.execute(None) {
            Ok(result) => println!("✓ {}", result),
            Err(e) => println!("✗ {}", e),
        }
    }

    println!("\n--- Excluded failure (not counted) ---");
    match payment.execute(Some(PaymentFailure::InsufficientFunds)) {
        Err(GuardedError::Ignored(e)) => println!("• ignored: {}", e),
        other => println!("? {:?}", other),
    }
    println!("{}\n", payment.statistics());

    println!("--- Counted failure ---");
    match payment.execute(Some(PaymentFailure::GatewayDown)) {
        Err(GuardedError::Command(e)) => println!("✗ {}", e),
        other => println!("? {:?}", other),
    }
    println!("{}\n", payment.statistics());

    println!("--- Attempting call while open ---");
    match payment.execute(None) {
        Ok(_) => println!("✓ Success"),
        Err(e) => println!("✗ {}", e),
    }

    println!("\n--- Waiting for the sleep window ---");
    thread::sleep(Duration::from_millis(600));
    match payment.execute(None) {
        Ok(result) => println!("✓ trial call: {}", result),
        Err(e) => println!("✗ {}", e),
    }
    println!("{}\n", payment.statistics());

    println!("--- Forcing the circuit open at runtime ---");
    properties.set_property("command.payment.force_open", true);
    println!("reconfigured {} breaker(s)", registry.reload());
    match payment.execute(None) {
        Ok(_) => println!("✓ Success"),
        Err(e) => println!("✗ {}", e),
    }
}
