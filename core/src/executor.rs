//! Guarded execution of commands
//!
//! A [`GuardedExecutor`] wraps one command value under one [`CommandKey`]. Each
//! `execute` asks the key's breaker for a permit, runs the command, classifies
//! any failure and settles the permit. The executor never retries; a denied
//! call fails immediately without invoking the command.

use crate::{
    CircuitBreaker, CircuitRegistry, CommandKey, StatisticsReport,
    classifier::{
        Categorized, DefaultClassifier, ExcludedFailures, FailureClassifier, FailureContext,
        PredicateClassifier,
    },
    errors::GuardedError,
};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;

/// A unit of work guarded by a circuit breaker
pub trait Command: Send + Sync {
    type Input;
    type Output;
    type Error;

    fn execute(&self, input: Self::Input) -> Result<Self::Output, Self::Error>;
}

/// [`Command`] backed by a closure, see [`command_fn`]
pub struct FnCommand<F, I, O, E> {
    f: F,
    _marker: PhantomData<fn(I) -> Result<O, E>>,
}

impl<F, I, O, E> Command for FnCommand<F, I, O, E>
where
    F: Fn(I) -> Result<O, E> + Send + Sync,
{
    type Input = I;
    type Output = O;
    type Error = E;

    fn execute(&self, input: I) -> Result<O, E> {
        (self.f)(input)
    }
}

impl<F, I, O, E> fmt::Debug for FnCommand<F, I, O, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnCommand").finish_non_exhaustive()
    }
}

/// Wrap a closure as a [`Command`]
pub fn command_fn<F, I, O, E>(f: F) -> FnCommand<F, I, O, E>
where
    F: Fn(I) -> Result<O, E> + Send + Sync,
{
    FnCommand {
        f,
        _marker: PhantomData,
    }
}

/// Executes a command under the circuit breaker registered for its key
///
/// # Example
///
/// ```rust
/// use command_breaker::{CircuitRegistry, GuardedError, GuardedExecutor, command_fn};
/// use std::sync::Arc;
///
/// let registry = Arc::new(CircuitRegistry::with_defaults());
/// let lookup = GuardedExecutor::builder(
///     "lookup",
///     command_fn(|id: u32| if id > 0 { Ok(id * 2) } else { Err("invalid id") }),
/// )
/// .build(registry);
///
/// assert_eq!(lookup.execute(21).unwrap(), 42);
/// assert!(matches!(lookup.execute(0), Err(GuardedError::Command("invalid id"))));
/// ```
pub struct GuardedExecutor<C: Command> {
    key: CommandKey,
    command: C,
    registry: Arc<CircuitRegistry>,
    classifier: Arc<dyn FailureClassifier<C::Error>>,
    report_statistics: bool,
}

impl<C: Command> GuardedExecutor<C> {
    pub fn builder(key: impl Into<CommandKey>, command: C) -> GuardedExecutorBuilder<C> {
        GuardedExecutorBuilder {
            key: key.into(),
            command,
            classifier: Arc::new(DefaultClassifier),
            report_statistics: false,
        }
    }

    pub fn key(&self) -> &CommandKey {
        &self.key
    }

    /// The breaker currently registered for this executor's key
    pub fn breaker(&self) -> Arc<CircuitBreaker> {
        self.registry.breaker(&self.key)
    }

    /// Run the command once under circuit protection
    ///
    /// Command errors come back unchanged inside [`GuardedError::Command`]
    /// (counted) or [`GuardedError::Ignored`] (excluded, not counted).
    pub fn execute(&self, input: C::Input) -> Result<C::Output, GuardedError<C::Error>> {
        let breaker = self.breaker();
        let result = self.run(&breaker, input);

        if self.report_statistics {
            StatisticsReport::capture(&breaker).log();
        }
        result
    }

    /// Current health statistics for this executor's key
    pub fn statistics(&self) -> StatisticsReport {
        StatisticsReport::capture(&self.breaker())
    }

    fn run(
        &self,
        breaker: &CircuitBreaker,
        input: C::Input,
    ) -> Result<C::Output, GuardedError<C::Error>> {
        let permit = breaker.try_acquire()?;
        let started = Instant::now();

        match self.command.execute(input) {
            Ok(output) => {
                permit.success();
                Ok(output)
            }
            Err(error) => {
                let reportable = self.classifier.is_reportable(&FailureContext {
                    command: self.key.as_str(),
                    error: &error,
                    duration: started.elapsed(),
                });

                if reportable {
                    permit.failure();
                    Err(GuardedError::Command(error))
                } else {
                    permit.ignore();
                    tracing::debug!(command = %self.key, "Excluded failure, not recorded");
                    Err(GuardedError::Ignored(error))
                }
            }
        }
    }
}

impl<C: Command> fmt::Debug for GuardedExecutor<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardedExecutor")
            .field("key", &self.key)
            .field("classifier", &self.classifier)
            .field("report_statistics", &self.report_statistics)
            .finish_non_exhaustive()
    }
}

/// Builder for [`GuardedExecutor`]
pub struct GuardedExecutorBuilder<C: Command> {
    key: CommandKey,
    command: C,
    classifier: Arc<dyn FailureClassifier<C::Error>>,
    report_statistics: bool,
}

impl<C: Command> GuardedExecutorBuilder<C> {
    /// Set a failure classifier to filter which errors count toward the error rate
    pub fn classifier(mut self, classifier: Arc<dyn FailureClassifier<C::Error>>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Classify failures with a closure; `false` means the failure is ignored
    pub fn classify_with<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&FailureContext<'_, C::Error>) -> bool + Send + Sync + 'static,
    {
        self.classifier = Arc::new(PredicateClassifier::new::<C::Error>(predicate));
        self
    }

    /// Never count failures in these categories (or their subcategories)
    pub fn exclude(
        mut self,
        excluded: ExcludedFailures<<C::Error as Categorized>::Category>,
    ) -> Self
    where
        C::Error: Categorized,
    {
        self.classifier = Arc::new(excluded);
        self
    }

    /// Log a [`StatisticsReport`] after every invocation
    pub fn report_statistics(mut self, enabled: bool) -> Self {
        self.report_statistics = enabled;
        self
    }

    pub fn build(self, registry: Arc<CircuitRegistry>) -> GuardedExecutor<C> {
        GuardedExecutor {
            key: self.key,
            command: self.command,
            registry,
            classifier: self.classifier,
            report_statistics: self.report_statistics,
        }
    }
}
