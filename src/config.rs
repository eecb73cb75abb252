//! Runtime configuration.
//!
//! [`RuntimeConfig`] selects the clock and tuning knobs of an
//! [`IoContext`](crate::runtime::IoContext).
//!
//! # Configuration Precedence
//!
//! 1. **Programmatic**: values set through [`RuntimeConfigBuilder`]
//! 2. **Environment variables**: `WEFT_*` values applied by [`RuntimeConfig::from_env`]
//! 3. **Defaults**: [`RuntimeConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `WEFT_CLOCK` | `wall` / `virtual` | `clock` |
//! | `WEFT_START_TIME_MS` | `u64` | `start_time` |
//! | `WEFT_RUN_BATCH_LIMIT` | `usize` (non-zero) | `run_batch_limit` |
//! | `WEFT_THREAD_NAME` | `String` | `thread_name` |
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `clock` | `ClockMode::Wall` |
//! | `start_time` | `Time::ZERO` |
//! | `run_batch_limit` | 64 |
//! | `thread_name` | `"weft-io"` |

use crate::types::Time;

/// Environment variable name for the clock mode.
pub const ENV_CLOCK: &str = "WEFT_CLOCK";
/// Environment variable name for the starting time in milliseconds.
pub const ENV_START_TIME_MS: &str = "WEFT_START_TIME_MS";
/// Environment variable name for the run batch limit.
pub const ENV_RUN_BATCH_LIMIT: &str = "WEFT_RUN_BATCH_LIMIT";
/// Environment variable name for the runner thread name.
pub const ENV_THREAD_NAME: &str = "WEFT_THREAD_NAME";

const DEFAULT_RUN_BATCH_LIMIT: usize = 64;
const DEFAULT_THREAD_NAME: &str = "weft-io";

/// Error returned when configuration cannot be built.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A variable was set to a value that does not parse.
    #[error("invalid value for {var}: expected {expected}, got {value:?}")]
    InvalidValue {
        /// The offending variable.
        var: &'static str,
        /// Description of the accepted values.
        expected: &'static str,
        /// The raw value.
        value: String,
    },
    /// A programmatic value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<ConfigError> for crate::error::Error {
    fn from(err: ConfigError) -> Self {
        Self::new(crate::error::ErrorKind::Config)
            .with_message(err.to_string())
            .with_source(err)
    }
}

/// Which clock drives timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClockMode {
    /// Monotonic wall clock.
    #[default]
    Wall,
    /// Virtual clock advanced by the run loop when it would otherwise wait.
    Virtual,
}

/// Configuration for an [`IoContext`](crate::runtime::IoContext).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Clock used by the context's timers.
    pub clock: ClockMode,
    /// Reading of the clock when the context is created.
    pub start_time: Time,
    /// Maximum handlers dequeued per lock acquisition.
    pub run_batch_limit: usize,
    /// Name of threads started by `IoContext::run_in_thread`.
    pub thread_name: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            clock: ClockMode::Wall,
            start_time: Time::ZERO,
            run_batch_limit: DEFAULT_RUN_BATCH_LIMIT,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Returns a builder starting from defaults.
    #[must_use]
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::default()
    }

    /// Defaults overridden by any `WEFT_*` variables that are set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        apply_env_overrides(&mut config)?;
        Ok(config)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.run_batch_limit == 0 {
            return Err(ConfigError::Invalid(
                "run_batch_limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`RuntimeConfig`].
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfigBuilder {
    config: RuntimeConfig,
}

impl RuntimeConfigBuilder {
    /// Selects the clock.
    #[must_use]
    pub fn clock(mut self, clock: ClockMode) -> Self {
        self.config.clock = clock;
        self
    }

    /// Sets the starting time.
    #[must_use]
    pub fn start_time(mut self, start: Time) -> Self {
        self.config.start_time = start;
        self
    }

    /// Sets the run batch limit.
    #[must_use]
    pub fn run_batch_limit(mut self, limit: usize) -> Self {
        self.config.run_batch_limit = limit;
        self
    }

    /// Sets the runner thread name.
    #[must_use]
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.config.thread_name = name.into();
        self
    }

    /// Applies `WEFT_*` overrides on top of the values set so far.
    pub fn with_env(mut self) -> Result<Self, ConfigError> {
        apply_env_overrides(&mut self.config)?;
        Ok(self)
    }

    /// Validates and returns the configuration.
    pub fn build(self) -> Result<RuntimeConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Apply environment variable overrides to a [`RuntimeConfig`].
///
/// Only variables that are set in the environment are applied.
pub fn apply_env_overrides(config: &mut RuntimeConfig) -> Result<(), ConfigError> {
    if let Some(val) = read_env(ENV_CLOCK) {
        config.clock = parse_clock(ENV_CLOCK, &val)?;
    }
    if let Some(val) = read_env(ENV_START_TIME_MS) {
        config.start_time = Time::from_millis(parse_u64(ENV_START_TIME_MS, &val)?);
    }
    if let Some(val) = read_env(ENV_RUN_BATCH_LIMIT) {
        config.run_batch_limit = parse_nonzero_usize(ENV_RUN_BATCH_LIMIT, &val)?;
    }
    if let Some(val) = read_env(ENV_THREAD_NAME) {
        config.thread_name = val;
    }
    Ok(())
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn invalid(var: &'static str, expected: &'static str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        var,
        expected,
        value: value.to_string(),
    }
}

fn parse_clock(var: &'static str, val: &str) -> Result<ClockMode, ConfigError> {
    match val.trim().to_lowercase().as_str() {
        "wall" | "steady" => Ok(ClockMode::Wall),
        "virtual" | "lab" => Ok(ClockMode::Virtual),
        _ => Err(invalid(var, "clock mode (wall/virtual)", val)),
    }
}

fn parse_u64(var: &'static str, val: &str) -> Result<u64, ConfigError> {
    val.trim()
        .parse::<u64>()
        .map_err(|_| invalid(var, "unsigned integer", val))
}

fn parse_nonzero_usize(var: &'static str, val: &str) -> Result<usize, ConfigError> {
    match val.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(invalid(var, "positive integer", val)),
    }
}
