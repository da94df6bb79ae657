//! Registry mapping command keys to their circuit breakers
//!
//! Breakers are created lazily on first use and live for the lifetime of the
//! registry. Every caller naming the same key shares one breaker, so health is
//! tracked per key rather than per call site.

use crate::{
    CircuitBreaker,
    config::{CircuitConfig, ConfigSource, StaticConfig},
    hooks::TransitionHooks,
};
use dashmap::DashMap;
use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

/// Identifier naming a logical command
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandKey(Arc<str>);

impl CommandKey {
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(Arc::from(key.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommandKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for CommandKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CommandKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for CommandKey {
    fn from(key: String) -> Self {
        Self(Arc::from(key))
    }
}

/// Process-wide set of circuit breakers, one per [`CommandKey`]
///
/// ```rust
/// use command_breaker::{CircuitRegistry, CommandKey};
///
/// let registry = CircuitRegistry::with_defaults();
/// let key = CommandKey::from("payments");
///
/// let a = registry.breaker(&key);
/// let b = registry.breaker(&key);
/// assert!(std::sync::Arc::ptr_eq(&a, &b));
/// ```
pub struct CircuitRegistry {
    breakers: DashMap<CommandKey, Arc<CircuitBreaker>>,
    source: Arc<dyn ConfigSource>,
    hooks: TransitionHooks,
}

impl CircuitRegistry {
    pub fn new(source: Arc<dyn ConfigSource>) -> Self {
        Self {
            breakers: DashMap::new(),
            source,
            hooks: TransitionHooks::default(),
        }
    }

    /// Registry whose breakers all use [`CircuitConfig::default`]
    pub fn with_defaults() -> Self {
        Self::new(Arc::new(StaticConfig::default()))
    }

    /// Hooks attached to every breaker created from now on
    pub fn with_hooks(mut self, hooks: TransitionHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// The breaker for `key`, created on first use
    pub fn breaker(&self, key: &CommandKey) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(key) {
            return Arc::clone(existing.value());
        }

        let entry = self
            .breakers
            .entry(key.clone())
            .or_insert_with(|| Arc::new(self.create(key)));
        Arc::clone(entry.value())
    }

    /// The breaker for `key` if one has been created
    pub fn get(&self, key: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(key).map(|b| Arc::clone(b.value()))
    }

    /// Re-read configuration for every live breaker
    ///
    /// Returns how many breakers received a changed configuration. A command
    /// whose new configuration fails to load keeps its current one.
    pub fn reload(&self) -> usize {
        let mut changed = 0;

        for entry in self.breakers.iter() {
            let breaker = entry.value();
            let config = match self.source.circuit_config(entry.key().as_str()) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(command = %entry.key(), error = %e, "Keeping current circuit config");
                    continue;
                }
            };

            match breaker.reconfigure(config) {
                Ok(true) => changed += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(command = %entry.key(), error = %e, "Keeping current circuit config")
                }
            }
        }

        tracing::debug!(breakers = self.breakers.len(), changed, "Reloaded circuit config");
        changed
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    /// Drop every breaker so the next lookup starts from a fresh Closed circuit
    #[cfg(any(test, feature = "test-util"))]
    pub fn reset(&self) {
        self.breakers.clear();
    }

    fn create(&self, key: &CommandKey) -> CircuitBreaker {
        let config = self
            .source
            .circuit_config(key.as_str())
            .unwrap_or_else(|e| {
                tracing::warn!(command = %key, error = %e, "Invalid circuit config, using defaults");
                CircuitConfig::default()
            });

        tracing::debug!(command = %key, ?config, "Creating circuit breaker");

        CircuitBreaker::builder(key.as_str())
            .config(config)
            .hooks(self.hooks.clone())
            .build()
    }
}

impl Default for CircuitRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for CircuitRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitRegistry")
            .field("breakers", &self.breakers.len())
            .field("source", &self.source)
            .field("hooks", &self.hooks)
            .finish()
    }
}
