//! Per-command circuit configuration and the sources that supply it
//!
//! A [`ConfigSource`] is consulted when a breaker is first created and again on
//! every [`CircuitRegistry::reload`](crate::CircuitRegistry::reload). Three
//! sources ship with the crate:
//! - [`StaticConfig`]: fixed defaults plus per-command overrides
//! - [`PropertyStore`]: runtime key-value properties, updatable from any thread
//! - [`FileConfig`]: a TOML document with `[default]` and `[commands.<key>]` tables

use crate::errors::ConfigError;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

/// Circuit breaker configuration for one command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitConfig {
    /// Minimum number of outcomes in the window before the error rate is evaluated
    pub request_volume_threshold: u32,

    /// Error percentage (0-100) at or above which the circuit opens
    pub error_threshold_percentage: u32,

    /// Time in milliseconds the circuit stays open before a trial is allowed
    pub sleep_window_ms: u64,

    /// Time horizon of the rolling metrics window in milliseconds
    pub rolling_window_ms: u64,

    /// Number of buckets the rolling window is split into
    pub rolling_window_buckets: u32,

    /// Jitter factor for the sleep window (0.0 = no jitter, 1.0 = full jitter)
    /// Uses chrono-machines formula: sleep * (1 - jitter + rand * jitter)
    pub sleep_window_jitter: f64,

    /// Maximum number of concurrent executions; unlimited when `None`
    pub max_concurrent_requests: Option<usize>,

    /// When false the breaker is bypassed: no permission checks, no recording
    pub enabled: bool,

    /// Reject every call regardless of health
    pub force_open: bool,

    /// Admit every call regardless of health (outcomes are still recorded)
    pub force_closed: bool,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            request_volume_threshold: 20,
            error_threshold_percentage: 50,
            sleep_window_ms: 5_000,
            rolling_window_ms: 10_000,
            rolling_window_buckets: 10,
            sleep_window_jitter: 0.0,
            max_concurrent_requests: None,
            enabled: true,
            force_open: false,
            force_closed: false,
        }
    }
}

impl CircuitConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.error_threshold_percentage > 100 {
            return Err(ConfigError::InvalidPercentage(
                self.error_threshold_percentage,
            ));
        }
        if self.rolling_window_buckets == 0 {
            return Err(ConfigError::ZeroBuckets);
        }
        if self.rolling_window_ms == 0
            || self.rolling_window_ms % self.rolling_window_buckets as u64 != 0
        {
            return Err(ConfigError::UnevenWindow {
                window_ms: self.rolling_window_ms,
                buckets: self.rolling_window_buckets,
            });
        }
        if !(0.0..=1.0).contains(&self.sleep_window_jitter) {
            return Err(ConfigError::InvalidJitter(self.sleep_window_jitter));
        }
        if self.max_concurrent_requests == Some(0) {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.force_open && self.force_closed {
            return Err(ConfigError::ConflictingForce);
        }
        Ok(())
    }

    /// Apply a single `field = value` property
    fn set_field(&mut self, field: &str, value: &str) -> Result<(), ConfigError> {
        fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidProperty {
                    key: key.to_string(),
                    value: value.to_string(),
                })
        }

        match field {
            "request_volume_threshold" => self.request_volume_threshold = parse(field, value)?,
            "error_threshold_percentage" => {
                self.error_threshold_percentage = parse(field, value)?
            }
            "sleep_window_ms" => self.sleep_window_ms = parse(field, value)?,
            "rolling_window_ms" => self.rolling_window_ms = parse(field, value)?,
            "rolling_window_buckets" => self.rolling_window_buckets = parse(field, value)?,
            "sleep_window_jitter" => self.sleep_window_jitter = parse(field, value)?,
            "max_concurrent_requests" => {
                self.max_concurrent_requests = match value.trim() {
                    "" | "none" => None,
                    v => Some(parse(field, v)?),
                }
            }
            "enabled" => self.enabled = parse(field, value)?,
            "force_open" => self.force_open = parse(field, value)?,
            "force_closed" => self.force_closed = parse(field, value)?,
            // Unknown fields are left to other consumers of the store
            _ => {}
        }
        Ok(())
    }
}

/// Supplies circuit configuration per command
pub trait ConfigSource: Send + Sync + std::fmt::Debug {
    fn circuit_config(&self, command: &str) -> Result<CircuitConfig, ConfigError>;
}

/// Fixed configuration with optional per-command overrides
#[derive(Debug, Clone, Default)]
pub struct StaticConfig {
    default: CircuitConfig,
    overrides: HashMap<String, CircuitConfig>,
}

impl StaticConfig {
    pub fn new(default: CircuitConfig) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    pub fn with_override(mut self, command: impl Into<String>, config: CircuitConfig) -> Self {
        self.overrides.insert(command.into(), config);
        self
    }
}

impl ConfigSource for StaticConfig {
    fn circuit_config(&self, command: &str) -> Result<CircuitConfig, ConfigError> {
        let config = self
            .overrides
            .get(command)
            .unwrap_or(&self.default)
            .clone();
        config.validate()?;
        Ok(config)
    }
}

/// Runtime key-value property store
///
/// Keys have the form `command.<key>.<field>`. Lookups fall back to
/// `command.default.<field>` and then to [`CircuitConfig::default`].
/// Properties may be changed at any time; running breakers pick them up on the
/// next registry reload.
///
/// ```rust
/// use command_breaker::{ConfigSource, PropertyStore};
///
/// let store = PropertyStore::new();
/// store.set_property("command.payments.request_volume_threshold", "4");
/// store.set_property("command.default.error_threshold_percentage", "30");
///
/// let config = store.circuit_config("payments").unwrap();
/// assert_eq!(config.request_volume_threshold, 4);
/// assert_eq!(config.error_threshold_percentage, 30);
/// ```
#[derive(Debug, Default)]
pub struct PropertyStore {
    properties: DashMap<String, String>,
}

impl PropertyStore {
    const PREFIX: &'static str = "command";
    const DEFAULT_SCOPE: &'static str = "default";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_property(&self, key: impl Into<String>, value: impl ToString) {
        self.properties.insert(key.into(), value.to_string());
    }

    pub fn clear_property(&self, key: &str) -> Option<String> {
        self.properties.remove(key).map(|(_, v)| v)
    }

    pub fn property(&self, key: &str) -> Option<String> {
        self.properties.get(key).map(|v| v.value().clone())
    }

    pub fn clear(&self) {
        self.properties.clear();
    }

    fn apply_scope(&self, config: &mut CircuitConfig, scope: &str) -> Result<(), ConfigError> {
        let prefix = format!("{}.{}.", Self::PREFIX, scope);
        for entry in self.properties.iter() {
            if let Some(field) = entry.key().strip_prefix(&prefix) {
                config
                    .set_field(field, entry.value())
                    .map_err(|_| ConfigError::InvalidProperty {
                        key: entry.key().clone(),
                        value: entry.value().clone(),
                    })?;
            }
        }
        Ok(())
    }
}

impl ConfigSource for PropertyStore {
    fn circuit_config(&self, command: &str) -> Result<CircuitConfig, ConfigError> {
        let mut config = CircuitConfig::default();
        self.apply_scope(&mut config, Self::DEFAULT_SCOPE)?;
        self.apply_scope(&mut config, command)?;
        config.validate()?;
        Ok(config)
    }
}

/// Partial config used for `[commands.<key>]` tables; unset fields inherit `[default]`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct CommandOverride {
    request_volume_threshold: Option<u32>,
    error_threshold_percentage: Option<u32>,
    sleep_window_ms: Option<u64>,
    rolling_window_ms: Option<u64>,
    rolling_window_buckets: Option<u32>,
    sleep_window_jitter: Option<f64>,
    max_concurrent_requests: Option<usize>,
    enabled: Option<bool>,
    force_open: Option<bool>,
    force_closed: Option<bool>,
}

impl CommandOverride {
    fn apply(&self, base: &CircuitConfig) -> CircuitConfig {
        CircuitConfig {
            request_volume_threshold: self
                .request_volume_threshold
                .unwrap_or(base.request_volume_threshold),
            error_threshold_percentage: self
                .error_threshold_percentage
                .unwrap_or(base.error_threshold_percentage),
            sleep_window_ms: self.sleep_window_ms.unwrap_or(base.sleep_window_ms),
            rolling_window_ms: self.rolling_window_ms.unwrap_or(base.rolling_window_ms),
            rolling_window_buckets: self
                .rolling_window_buckets
                .unwrap_or(base.rolling_window_buckets),
            sleep_window_jitter: self.sleep_window_jitter.unwrap_or(base.sleep_window_jitter),
            max_concurrent_requests: self
                .max_concurrent_requests
                .or(base.max_concurrent_requests),
            enabled: self.enabled.unwrap_or(base.enabled),
            force_open: self.force_open.unwrap_or(base.force_open),
            force_closed: self.force_closed.unwrap_or(base.force_closed),
        }
    }
}

/// TOML-backed configuration
///
/// ```toml
/// [default]
/// request_volume_threshold = 10
/// error_threshold_percentage = 50
///
/// [commands.payments]
/// sleep_window_ms = 2000
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    default: CircuitConfig,
    commands: HashMap<String, CommandOverride>,
}

impl FileConfig {
    /// Read and validate a TOML config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: FileConfig = contents.parse()?;
        tracing::debug!(path = ?path.as_ref(), commands = config.commands.len(), "Loaded circuit config");
        Ok(config)
    }

    /// Commands with an explicit `[commands.<key>]` table
    pub fn commands(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(String::as_str)
    }
}

impl FromStr for FileConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: FileConfig = toml::from_str(s)?;
        config.default.validate()?;
        for over in config.commands.values() {
            over.apply(&config.default).validate()?;
        }
        Ok(config)
    }
}

impl ConfigSource for FileConfig {
    fn circuit_config(&self, command: &str) -> Result<CircuitConfig, ConfigError> {
        Ok(self
            .commands
            .get(command)
            .map(|over| over.apply(&self.default))
            .unwrap_or_else(|| self.default.clone()))
    }
}
