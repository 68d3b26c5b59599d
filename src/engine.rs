//! The public engine facade.
//!
//! [`RefreshEngine`] wires the executor, circuit breakers, TOTP generator and
//! refresh scheduler together. Callers own their sources; the engine only ever
//! sees immutable snapshots passed to [`RefreshEngine::execute`] or
//! [`RefreshEngine::setup_refresh`].

use crate::breaker::{BreakerSnapshot, CircuitBreakerRegistry};
use crate::clock::{SharedClock, SystemClock};
use crate::config::{get_config, ConfigError, EngineConfig};
use crate::environment::{EnvironmentStore, TemplateStore};
use crate::executor::{ExecutionError, RequestExecutor, RunOptions};
use crate::filter;
use crate::models::{ExecutionResult, JsonFilter, SourceDescriptor};
use crate::scheduler::{
    InFlightRegistry, RefreshHandle, RefreshScheduler, RefreshStatus, RefreshUpdate, SourceRunner,
};
use crate::totp::{HmacSha1Totp, TotpGenerator, TotpPrimitive};
use crate::transport::Transport;
use async_trait::async_trait;
use std::sync::Arc;

/// Runs scheduled executions through the breaker.
struct ScheduledRunner {
    executor: Arc<RequestExecutor>,
    breakers: Arc<CircuitBreakerRegistry>,
}

#[async_trait]
impl SourceRunner for ScheduledRunner {
    async fn run_scheduled(&self, source: &SourceDescriptor) -> Result<ExecutionResult, ExecutionError> {
        let opts = RunOptions::scheduled();
        self.breakers
            .execute(&source.source_id, self.executor.run(source, &opts))
            .await
    }
}

/// Builder for [`RefreshEngine`].
///
/// Every collaborator is optional. Missing ones default to the global config,
/// the reqwest transport, an empty ready [`EnvironmentStore`], HMAC-SHA1 TOTP
/// and the system clock.
#[derive(Default)]
pub struct RefreshEngineBuilder {
    config: Option<EngineConfig>,
    transport: Option<Arc<dyn Transport>>,
    templates: Option<Arc<dyn TemplateStore>>,
    totp_primitive: Option<Arc<dyn TotpPrimitive>>,
    clock: Option<SharedClock>,
}

impl RefreshEngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn templates(mut self, templates: Arc<dyn TemplateStore>) -> Self {
        self.templates = Some(templates);
        self
    }

    pub fn totp_primitive(mut self, primitive: Arc<dyn TotpPrimitive>) -> Self {
        self.totp_primitive = Some(primitive);
        self
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Builds the engine.
    ///
    /// # Errors
    ///
    /// `ConfigError::Invalid` if the config fails validation, or if no
    /// transport was supplied and the `native` feature is disabled.
    pub fn build(self) -> Result<RefreshEngine, ConfigError> {
        let config = self.config.unwrap_or_else(get_config);
        config.validate()?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => default_transport(&config)?,
        };
        let templates = self
            .templates
            .unwrap_or_else(|| Arc::new(EnvironmentStore::default()));
        let primitive = self
            .totp_primitive
            .unwrap_or_else(|| Arc::new(HmacSha1Totp));
        let clock: SharedClock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let totp = Arc::new(TotpGenerator::new(primitive, Arc::clone(&clock)));
        let executor = Arc::new(RequestExecutor::new(
            transport,
            templates,
            Arc::clone(&totp),
            config.clone(),
        ));
        let breakers = Arc::new(CircuitBreakerRegistry::from_config(&config, Arc::clone(&clock)));
        let in_flight = InFlightRegistry::new();

        let runner = Arc::new(ScheduledRunner {
            executor: Arc::clone(&executor),
            breakers: Arc::clone(&breakers),
        });
        let scheduler = RefreshScheduler::new(runner, in_flight.clone(), clock, config.startup_delay());

        tracing::debug!(
            failure_threshold = config.failure_threshold,
            retry_max_attempts = config.retry_max_attempts,
            "refresh engine built"
        );

        Ok(RefreshEngine {
            config,
            executor,
            breakers,
            totp,
            scheduler,
            in_flight,
        })
    }
}

#[cfg(feature = "native")]
fn default_transport(config: &EngineConfig) -> Result<Arc<dyn Transport>, ConfigError> {
    let transport = crate::transport::ReqwestTransport::new(Some(config.test_timeout()))
        .map_err(|e| ConfigError::Invalid(format!("failed to create HTTP client: {}", e)))?;
    Ok(Arc::new(transport))
}

#[cfg(not(feature = "native"))]
fn default_transport(_config: &EngineConfig) -> Result<Arc<dyn Transport>, ConfigError> {
    Err(ConfigError::Invalid(
        "no transport supplied and the `native` feature is disabled".to_string(),
    ))
}

/// Source refresh engine.
pub struct RefreshEngine {
    config: EngineConfig,
    executor: Arc<RequestExecutor>,
    breakers: Arc<CircuitBreakerRegistry>,
    totp: Arc<TotpGenerator>,
    scheduler: RefreshScheduler,
    in_flight: InFlightRegistry,
}

impl RefreshEngine {
    pub fn builder() -> RefreshEngineBuilder {
        RefreshEngineBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Executes `source` once, outside the schedule.
    ///
    /// Fails with [`ExecutionError::AlreadyRunning`] if a run for the same
    /// source is in flight. Test runs bypass the breaker unless
    /// `count_test_runs_in_breaker` is set.
    pub async fn execute(
        &self,
        source: &SourceDescriptor,
        opts: &RunOptions,
    ) -> Result<ExecutionResult, ExecutionError> {
        let Some(_guard) = self.in_flight.try_begin(&source.source_id) else {
            tracing::debug!(source_id = %source.source_id, "execution rejected, run in flight");
            return Err(ExecutionError::AlreadyRunning(source.source_id.clone()));
        };

        if opts.is_test && !self.config.count_test_runs_in_breaker {
            return self.executor.run(source, opts).await;
        }

        self.breakers
            .execute(&source.source_id, self.executor.run(source, opts))
            .await
    }

    /// Schedules periodic refresh; see [`RefreshScheduler::setup`].
    pub fn setup_refresh<F>(&self, source: SourceDescriptor, on_update: F) -> RefreshHandle
    where
        F: Fn(RefreshUpdate) + Send + Sync + 'static,
    {
        self.scheduler.setup(source, on_update)
    }

    pub fn cancel_refresh(&self, source_id: &str) -> bool {
        self.scheduler.cancel(source_id)
    }

    pub fn cancel_all_refreshes(&self) -> usize {
        self.scheduler.cancel_all()
    }

    /// Runs a scheduled source immediately; see [`RefreshScheduler::refresh_now`].
    pub fn refresh_now(&self, source_id: &str) -> bool {
        self.scheduler.refresh_now(source_id)
    }

    pub fn refresh_status(&self, source_id: &str) -> RefreshStatus {
        self.scheduler.status(source_id)
    }

    pub fn scheduled_count(&self) -> usize {
        self.scheduler.scheduled_count()
    }

    /// Applies a filter to an already fetched body, e.g. to preview a path edit.
    pub fn apply_json_filter(&self, body: &str, json_filter: &JsonFilter) -> String {
        filter::apply_json_filter(body, json_filter)
    }

    pub fn breaker_snapshot(&self, source_id: &str) -> BreakerSnapshot {
        self.breakers.snapshot(source_id)
    }

    pub fn reset_breaker(&self, source_id: &str) -> bool {
        self.breakers.reset(source_id)
    }

    /// Forgets everything the engine holds for a deleted source.
    pub fn remove_source(&self, source_id: &str) {
        self.scheduler.cancel(source_id);
        self.totp.clear(source_id);
        self.breakers.reset(source_id);
        tracing::debug!(source_id, "source removed");
    }

    /// Cancels all timers and clears TOTP state. Breaker state is kept.
    pub fn end_session(&self) {
        let cancelled = self.scheduler.cancel_all();
        self.totp.clear_all();
        tracing::info!(cancelled, "session ended");
    }
}
