//! Configuration management for the refresh engine.
//!
//! This module provides configuration loading, validation, and access through a singleton pattern.
//! Configuration is read from a JSON settings document under the `"source-refresh"` key and
//! merged with defaults. Engines built without an explicit config snapshot the global one.

pub mod schema;

pub use schema::{ConfigError, EngineConfig};

use once_cell::sync::Lazy;
use serde_json::Value;
use std::path::Path;
use std::sync::RwLock;

/// Key under which engine settings live in a settings document.
pub const SETTINGS_KEY: &str = "source-refresh";

/// Global configuration instance.
///
/// This is lazily initialized on first access and can be updated when settings change.
static CONFIG: Lazy<RwLock<EngineConfig>> = Lazy::new(|| RwLock::new(EngineConfig::default()));

/// Loads configuration from a settings JSON value.
///
/// Reads the `"source-refresh"` settings, merges them over the defaults,
/// validates the result, and updates the global configuration.
///
/// # Arguments
///
/// * `settings_json` - Optional JSON value containing settings under `"source-refresh"`
///
/// # Returns
///
/// `Ok(EngineConfig)` with the loaded configuration, or `Err` if validation fails.
///
/// # Example
///
/// ```no_run
/// use source_refresh::config::load_config;
/// use serde_json::json;
///
/// let settings = json!({
///     "source-refresh": {
///         "failureThreshold": 3,
///         "resetTimeoutMs": 30000
///     }
/// });
///
/// let config = load_config(Some(settings)).unwrap();
/// assert_eq!(config.failure_threshold, 3);
/// ```
pub fn load_config(settings_json: Option<Value>) -> Result<EngineConfig, ConfigError> {
    let mut config = EngineConfig::default();

    if let Some(settings) = settings_json {
        if let Some(engine_settings) = settings.get(SETTINGS_KEY) {
            match serde_json::from_value::<EngineConfig>(engine_settings.clone()) {
                Ok(user_config) => config = user_config,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to parse source-refresh settings, using defaults");
                }
            }
        }
    }

    config.validate()?;

    let mut global_config = CONFIG.write().unwrap_or_else(|e| e.into_inner());
    *global_config = config.clone();

    Ok(config)
}

/// Loads configuration from a JSON settings file.
///
/// The file holds the same document accepted by [`load_config`].
pub fn load_config_file(path: &Path) -> Result<EngineConfig, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;

    let settings = match serde_json::from_str::<Value>(&content) {
        Ok(settings) => Some(settings),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "settings file is not valid JSON, using defaults");
            None
        }
    };

    load_config(settings)
}

/// Gets the current global configuration.
///
/// Returns a clone of the current configuration, or the defaults if nothing was loaded.
pub fn get_config() -> EngineConfig {
    CONFIG
        .read()
        .map(|c| c.clone())
        .unwrap_or_else(|_| EngineConfig::default())
}

/// Updates the global configuration in place.
///
/// If the update produces an invalid configuration the defaults are restored.
///
/// # Example
///
/// ```no_run
/// use source_refresh::config::update_config;
///
/// update_config(|config| {
///     config.failure_threshold = 10;
/// });
/// ```
pub fn update_config<F>(updater: F)
where
    F: FnOnce(&mut EngineConfig),
{
    let mut config = CONFIG.write().unwrap_or_else(|e| e.into_inner());
    updater(&mut config);

    if let Err(e) = config.validate() {
        tracing::warn!(error = %e, "configuration invalid after update, reverting to defaults");
        *config = EngineConfig::default();
    }
}

/// Resets the configuration to defaults.
pub fn reset_config() {
    let mut config = CONFIG.write().unwrap_or_else(|e| e.into_inner());
    *config = EngineConfig::default();
}
