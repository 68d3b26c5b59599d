//! Shared, switchable environment store.

use super::models::{EnvError, Environment, Environments};
use super::TemplateStore;
use crate::variables::{VarError, PLACEHOLDER_REGEX};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Notify;

/// Maximum depth for nested variable resolution
const MAX_NESTING_DEPTH: usize = 10;

/// Thread-safe environment store.
///
/// Clones share the same environments and readiness state, so the active
/// environment can be switched from anywhere without mutable access.
#[derive(Debug, Clone)]
pub struct EnvironmentStore {
    environments: Arc<RwLock<Environments>>,
    ready: Arc<AtomicBool>,
    ready_notify: Arc<Notify>,
}

impl EnvironmentStore {
    /// Creates a store that is ready immediately.
    pub fn new(environments: Environments) -> Self {
        Self {
            environments: Arc::new(RwLock::new(environments)),
            ready: Arc::new(AtomicBool::new(true)),
            ready_notify: Arc::new(Notify::new()),
        }
    }

    /// Creates an empty store that reports not-ready until [`EnvironmentStore::load`] is called.
    pub fn pending() -> Self {
        Self {
            environments: Arc::new(RwLock::new(Environments::new())),
            ready: Arc::new(AtomicBool::new(false)),
            ready_notify: Arc::new(Notify::new()),
        }
    }

    /// Replaces all environments and marks the store ready.
    pub fn load(&self, environments: Environments) {
        {
            let mut envs = self.environments.write().unwrap_or_else(|e| e.into_inner());
            *envs = environments;
        }
        self.ready.store(true, Ordering::SeqCst);
        self.ready_notify.notify_waiters();
        tracing::debug!("environment store loaded");
    }

    /// Sets the active environment by name
    pub fn set_active_environment(&self, name: &str) -> Result<(), EnvError> {
        let mut envs = self.environments.write().unwrap_or_else(|e| e.into_inner());

        if envs.set_active(name) {
            Ok(())
        } else {
            Err(EnvError::UnknownEnvironment(name.to_string()))
        }
    }

    /// Gets a raw (unresolved) variable from the active environment or shared variables
    pub fn get_variable(&self, name: &str) -> Option<String> {
        self.environments
            .read()
            .ok()
            .and_then(|envs| envs.get_variable(name))
    }

    pub fn active_environment(&self) -> Option<Environment> {
        self.environments
            .read()
            .ok()
            .and_then(|envs| envs.get_active().cloned())
    }

    pub fn list_environment_names(&self) -> Vec<String> {
        self.environments
            .read()
            .map(|envs| envs.list_environments())
            .unwrap_or_default()
    }

    /// Expands every known placeholder in `text`, following nested references.
    fn expand(&self, envs: &Environments, text: &str, chain: &mut Vec<String>) -> Result<String, VarError> {
        if !text.contains("{{") {
            return Ok(text.to_string());
        }

        let mut out = String::with_capacity(text.len());
        let mut last = 0;

        for caps in PLACEHOLDER_REGEX.captures_iter(text) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };

            out.push_str(&text[last..whole.start()]);
            match self.lookup(envs, name.as_str().trim(), chain)? {
                Some(value) => out.push_str(&value),
                None => out.push_str(whole.as_str()),
            }
            last = whole.end();
        }

        out.push_str(&text[last..]);
        Ok(out)
    }

    fn lookup(&self, envs: &Environments, name: &str, chain: &mut Vec<String>) -> Result<Option<String>, VarError> {
        if chain.iter().any(|seen| seen == name) {
            chain.push(name.to_string());
            return Err(VarError::CircularReference(chain.join(" -> ")));
        }

        if chain.len() >= MAX_NESTING_DEPTH {
            return Err(VarError::Store(format!(
                "maximum nesting depth of {} exceeded at '{}'",
                MAX_NESTING_DEPTH, name
            )));
        }

        let Some(raw) = envs.get_variable(name) else {
            return Ok(None);
        };

        chain.push(name.to_string());
        let expanded = self.expand(envs, &raw, chain)?;
        chain.pop();

        Ok(Some(expanded))
    }
}

impl Default for EnvironmentStore {
    fn default() -> Self {
        Self::new(Environments::new())
    }
}

#[async_trait]
impl TemplateStore for EnvironmentStore {
    fn resolve_template(&self, text: &str) -> Result<String, VarError> {
        let envs = self
            .environments
            .read()
            .map_err(|_| VarError::Store("environment lock poisoned".to_string()))?;

        self.expand(&envs, text, &mut Vec::new())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn wait_until_ready(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                // Register before checking so a concurrent load cannot be missed
                let notified = self.ready_notify.notified();
                if self.is_ready() {
                    return;
                }
                notified.await;
            }
        };

        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}
