//! Configuration schema for the refresh engine.
//!
//! This module defines the configuration structure and validation logic for all
//! tunable settings: breaker thresholds, retry backoff, and timeouts.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A setting holds a value outside its allowed range.
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// The settings file could not be read.
    #[error("failed to read settings file: {0}")]
    Io(String),
}

/// Main configuration structure for the refresh engine.
///
/// All settings can be supplied as JSON under the `"source-refresh"` key.
/// Missing settings fall back to the defaults below.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Hard wall-clock ceiling for interactive test runs, in milliseconds.
    ///
    /// Defaults to 30000ms (30 seconds). Must be greater than 0.
    #[serde(default = "default_test_timeout_ms")]
    pub test_timeout_ms: u64,

    /// Consecutive counted failures that open a source's circuit.
    ///
    /// Defaults to 5. Must be greater than 0.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// How long an open circuit waits before allowing a trial call, in milliseconds.
    ///
    /// Defaults to 60000ms.
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,

    /// Maximum transport attempts per execution, including the first one.
    ///
    /// Defaults to 3. Must be greater than 0.
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,

    /// Base delay of the exponential backoff, in milliseconds.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Upper bound on a single backoff delay, in milliseconds.
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    /// Upper bound of the random jitter added to each backoff delay, in milliseconds.
    #[serde(default = "default_retry_jitter_ms")]
    pub retry_jitter_ms: u64,

    /// Delay before the first "immediate" refresh fires, in milliseconds.
    ///
    /// Keeps a freshly set up source from racing its caller's initialization.
    #[serde(default = "default_startup_delay_ms")]
    pub startup_delay_ms: u64,

    /// How long to wait for the template store to become ready, in milliseconds.
    #[serde(default = "default_environment_ready_timeout_ms")]
    pub environment_ready_timeout_ms: u64,

    /// Whether interactive test runs go through (and count against) the breaker.
    ///
    /// Defaults to false: test runs bypass the breaker entirely.
    #[serde(default)]
    pub count_test_runs_in_breaker: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            test_timeout_ms: default_test_timeout_ms(),
            failure_threshold: default_failure_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            retry_jitter_ms: default_retry_jitter_ms(),
            startup_delay_ms: default_startup_delay_ms(),
            environment_ready_timeout_ms: default_environment_ready_timeout_ms(),
            count_test_runs_in_breaker: false,
        }
    }
}

impl EngineConfig {
    /// Validates the configuration and returns an error if any setting is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.test_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "testTimeoutMs must be greater than 0".to_string(),
            ));
        }

        if self.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "failureThreshold must be greater than 0".to_string(),
            ));
        }

        if self.reset_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "resetTimeoutMs must be greater than 0".to_string(),
            ));
        }

        if self.retry_max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retryMaxAttempts must be greater than 0".to_string(),
            ));
        }

        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(ConfigError::Invalid(
                "retryBaseDelayMs must not exceed retryMaxDelayMs".to_string(),
            ));
        }

        Ok(())
    }

    pub fn test_timeout(&self) -> Duration {
        Duration::from_millis(self.test_timeout_ms)
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }

    pub fn environment_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.environment_ready_timeout_ms)
    }
}

// Default value functions for serde

fn default_test_timeout_ms() -> u64 {
    30_000
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_timeout_ms() -> u64 {
    60_000
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1_000
}

fn default_retry_max_delay_ms() -> u64 {
    10_000
}

fn default_retry_jitter_ms() -> u64 {
    250
}

fn default_startup_delay_ms() -> u64 {
    1_000
}

fn default_environment_ready_timeout_ms() -> u64 {
    5_000
}
