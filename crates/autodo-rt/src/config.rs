// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Runtime configuration.
//!
//! Settings resolve in this order, highest priority first:
//!
//! 1. values set through the `with_*` methods
//! 2. `AUTODO_*` environment variables, via [`apply_env_overrides`]
//! 3. [`RuntimeConfig::default`]
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `AUTODO_THREAD_NAME_PREFIX` | `String` | `thread_name_prefix` |
//! | `AUTODO_FRAME_RATE` | `u32` | `frame_rate` |
//! | `AUTODO_PARK_TIMEOUT_MS` | `u64` | `park_timeout` |
//! | `AUTODO_MAX_TICK_BATCH` | `usize` | `max_tick_batch` |

use std::time::Duration;

use thiserror::Error;

pub const ENV_THREAD_NAME_PREFIX: &str = "AUTODO_THREAD_NAME_PREFIX";
pub const ENV_FRAME_RATE: &str = "AUTODO_FRAME_RATE";
pub const ENV_PARK_TIMEOUT_MS: &str = "AUTODO_PARK_TIMEOUT_MS";
pub const ENV_MAX_TICK_BATCH: &str = "AUTODO_MAX_TICK_BATCH";

/// A configuration value that could not be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: expected {expected}, got {value:?}")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },
    #[error("{0} must not be empty")]
    Empty(&'static str),
}

/// Scheduler and bridge settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Prefix for threads spawned through the scheduler.
    pub thread_name_prefix: String,
    /// Frames per second for `FrameLoop` pacing. `0` disables pacing.
    pub frame_rate: u32,
    /// Longest single park in `run_once` when nothing is due.
    pub park_timeout: Duration,
    /// Coroutines resumed per tick. `0` means the whole ready queue.
    pub max_tick_batch: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            thread_name_prefix: "autodo".to_string(),
            frame_rate: 30,
            park_timeout: Duration::from_millis(100),
            max_tick_batch: 0,
        }
    }
}

impl RuntimeConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        apply_env_overrides(&mut config)?;
        Ok(config)
    }

    #[must_use]
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn with_frame_rate(mut self, fps: u32) -> Self {
        self.frame_rate = fps;
        self
    }

    #[must_use]
    pub fn with_park_timeout(mut self, timeout: Duration) -> Self {
        self.park_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_max_tick_batch(mut self, max: usize) -> Self {
        self.max_tick_batch = max;
        self
    }

    /// Target interval between frames, if pacing is enabled.
    pub fn frame_interval(&self) -> Option<Duration> {
        (self.frame_rate != 0).then(|| Duration::from_secs(1) / self.frame_rate)
    }

    /// Full name for a thread spawned by the runtime.
    pub fn thread_name(&self, role: &str) -> String {
        format!("{}-{role}", self.thread_name_prefix)
    }
}

/// Applies any `AUTODO_*` variables that are set.
///
/// Returns an error if a variable is set but cannot be parsed.
pub fn apply_env_overrides(config: &mut RuntimeConfig) -> Result<(), ConfigError> {
    apply_overrides(config, |name| std::env::var(name).ok())
}

fn apply_overrides(
    config: &mut RuntimeConfig,
    read: impl Fn(&'static str) -> Option<String>,
) -> Result<(), ConfigError> {
    if let Some(val) = read(ENV_THREAD_NAME_PREFIX) {
        let val = val.trim();
        if val.is_empty() {
            return Err(ConfigError::Empty(ENV_THREAD_NAME_PREFIX));
        }
        config.thread_name_prefix = val.to_string();
    }
    if let Some(val) = read(ENV_FRAME_RATE) {
        config.frame_rate = parse(ENV_FRAME_RATE, "u32", &val)?;
    }
    if let Some(val) = read(ENV_PARK_TIMEOUT_MS) {
        config.park_timeout = Duration::from_millis(parse(ENV_PARK_TIMEOUT_MS, "milliseconds", &val)?);
    }
    if let Some(val) = read(ENV_MAX_TICK_BATCH) {
        config.max_tick_batch = parse(ENV_MAX_TICK_BATCH, "unsigned integer", &val)?;
    }
    Ok(())
}

fn parse<T: std::str::FromStr>(var: &'static str, expected: &'static str, val: &str) -> Result<T, ConfigError> {
    val.trim().parse().map_err(|_| ConfigError::Invalid {
        var,
        expected,
        value: val.to_string(),
    })
}
