//! Environment template stores
//!
//! The engine resolves `{{name}}` placeholders against a caller-supplied [`TemplateStore`]
//! before applying per-source local variables. [`EnvironmentStore`] is the bundled
//! implementation over named environments plus shared variables.
//!
//! # Example
//!
//! ```
//! use source_refresh::environment::{Environment, Environments, EnvironmentStore, TemplateStore};
//!
//! let mut envs = Environments::new();
//! let mut dev = Environment::new("dev");
//! dev.set("baseUrl", "http://localhost:3000");
//! envs.add_environment(dev);
//!
//! let store = EnvironmentStore::new(envs);
//! store.set_active_environment("dev").unwrap();
//!
//! let url = store.resolve_template("{{baseUrl}}/health").unwrap();
//! assert_eq!(url, "http://localhost:3000/health");
//! ```

pub mod models;
pub mod store;

pub use models::{EnvError, Environment, Environments};
pub use store::EnvironmentStore;

use crate::variables::VarError;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// Environment-scoped template resolution.
///
/// Implementations replace the placeholders they know and leave every other
/// placeholder in place; the caller decides whether leftovers are an error.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    /// Resolves known placeholders in `text`.
    fn resolve_template(&self, text: &str) -> Result<String, VarError>;

    /// Resolves known placeholders in every string leaf of `value`.
    fn resolve_object_template(&self, value: &Value) -> Result<Value, VarError> {
        Ok(match value {
            Value::String(s) => Value::String(self.resolve_template(s)?),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.resolve_object_template(item))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| self.resolve_object_template(v).map(|v| (k.clone(), v)))
                    .collect::<Result<_, _>>()?,
            ),
            other => other.clone(),
        })
    }

    /// Whether the store has finished loading its variables.
    fn is_ready(&self) -> bool {
        true
    }

    /// Waits up to `timeout` for the store to become ready.
    ///
    /// Returns `true` if the store is ready when this returns.
    async fn wait_until_ready(&self, _timeout: Duration) -> bool {
        self.is_ready()
    }
}
