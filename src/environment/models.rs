//! Environment data models
//!
//! Named environments each hold a flat set of variables; shared variables are visible
//! from every environment. At most one environment is active at a time.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Errors raised while loading or switching environments.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnvError {
    /// The environment document is not valid JSON.
    #[error("failed to parse environment document: {0}")]
    Parse(String),

    /// The document is valid JSON but not a valid environment layout.
    #[error("invalid environment format: {0}")]
    InvalidFormat(String),

    /// No environment with the given name exists.
    #[error("environment '{0}' not found")]
    UnknownEnvironment(String),
}

/// One named set of variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    pub name: String,

    #[serde(default)]
    pub variables: HashMap<String, String>,
}

impl Environment {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            variables: HashMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&String> {
        self.variables.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(key.into(), value.into());
    }
}

/// Every environment a session knows about.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Environments {
    #[serde(default)]
    pub environments: HashMap<String, Environment>,

    /// Visible from every environment; environment variables win on conflict.
    #[serde(default)]
    pub shared: HashMap<String, String>,

    /// Name of the active environment, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<String>,
}

impl Environments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses an environment document.
    ///
    /// The root object maps environment names to variable objects. The reserved keys
    /// `shared` (or `$shared`) and `active` (or `$active`) hold the shared variables and
    /// the initially active environment. Variable values may be strings, numbers,
    /// booleans or null; numbers and booleans are stored in their JSON text form.
    ///
    /// # Examples
    ///
    /// ```
    /// use source_refresh::environment::Environments;
    ///
    /// let envs = Environments::from_json_str(r#"{
    ///     "$shared": {"version": "v1"},
    ///     "dev": {"host": "localhost:8080"},
    ///     "$active": "dev"
    /// }"#).unwrap();
    ///
    /// assert_eq!(envs.get_variable("host"), Some("localhost:8080".to_string()));
    /// assert_eq!(envs.get_variable("version"), Some("v1".to_string()));
    /// ```
    pub fn from_json_str(json: &str) -> Result<Self, EnvError> {
        let raw: Value = serde_json::from_str(json).map_err(|e| EnvError::Parse(e.to_string()))?;
        Self::from_json_value(&raw)
    }

    /// Same as [`Environments::from_json_str`] for an already parsed document.
    pub fn from_json_value(raw: &Value) -> Result<Self, EnvError> {
        let obj = raw
            .as_object()
            .ok_or_else(|| EnvError::InvalidFormat("root must be a JSON object".to_string()))?;

        let mut envs = Environments::new();
        let mut active = None;

        for (key, value) in obj {
            match key.as_str() {
                "shared" | "$shared" => {
                    envs.shared = parse_variable_map(value, "shared")?;
                }
                "active" | "$active" => {
                    active = value.as_str().map(str::to_string);
                }
                env_name => {
                    if !is_valid_identifier(env_name) {
                        return Err(EnvError::InvalidFormat(format!(
                            "invalid environment name '{}'",
                            env_name
                        )));
                    }

                    let variables = parse_variable_map(value, env_name)?;
                    envs.add_environment(Environment {
                        name: env_name.to_string(),
                        variables,
                    });
                }
            }
        }

        if let Some(name) = active {
            if !envs.set_active(name.as_str()) {
                return Err(EnvError::UnknownEnvironment(name));
            }
        }

        Ok(envs)
    }

    /// Adds an environment, replacing any existing one with the same name
    pub fn add_environment(&mut self, env: Environment) {
        self.environments.insert(env.name.clone(), env);
    }

    pub fn get_environment(&self, name: &str) -> Option<&Environment> {
        self.environments.get(name)
    }

    /// Sets the active environment. Returns `false` if no such environment exists.
    pub fn set_active(&mut self, name: impl Into<String>) -> bool {
        let name = name.into();
        if self.environments.contains_key(&name) {
            self.active = Some(name);
            true
        } else {
            false
        }
    }

    /// Gets the currently active environment
    pub fn get_active(&self) -> Option<&Environment> {
        self.active
            .as_ref()
            .and_then(|name| self.environments.get(name))
    }

    /// Gets a variable value, checking the active environment first, then shared
    pub fn get_variable(&self, key: &str) -> Option<String> {
        if let Some(value) = self.get_active().and_then(|env| env.get(key)) {
            return Some(value.clone());
        }

        self.shared.get(key).cloned()
    }

    pub fn set_shared(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.shared.insert(key.into(), value.into());
    }

    /// Lists all environment names, sorted
    pub fn list_environments(&self) -> Vec<String> {
        let mut names: Vec<String> = self.environments.keys().cloned().collect();
        names.sort();
        names
    }
}

fn parse_variable_map(value: &Value, context: &str) -> Result<HashMap<String, String>, EnvError> {
    let obj = value
        .as_object()
        .ok_or_else(|| EnvError::InvalidFormat(format!("'{}' must be a JSON object", context)))?;

    let mut map = HashMap::with_capacity(obj.len());

    for (key, val) in obj {
        let value_str = match val {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Null => String::new(),
            _ => {
                return Err(EnvError::InvalidFormat(format!(
                    "variable '{}' in '{}' must be a string, number, or boolean",
                    key, context
                )));
            }
        };

        map.insert(key.clone(), value_str);
    }

    Ok(map)
}

/// Environment names start with a letter or underscore and continue with
/// letters, digits, underscores or hyphens.
fn is_valid_identifier(name: &str) -> bool {
    if name.starts_with('$') {
        return false;
    }

    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }

    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
