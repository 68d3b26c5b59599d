//! Per-source circuit breaker.
//!
//! # States
//! - Closed: calls pass through, counted failures accumulate
//! - Open: calls fail fast until the reset timeout elapses
//! - HalfOpen: a single trial call is in flight
//!
//! # State Transitions
//! ```text
//! Closed   -> Open:     consecutive counted failures reach the threshold
//! Open     -> HalfOpen: first call after openedAt + resetTimeout
//! HalfOpen -> Closed:   trial succeeds (failure counter reset)
//! HalfOpen -> Open:     trial fails (timeout restarts)
//! ```
//!
//! Whether a failure is counted is decided by
//! [`ExecutionError::counts_against_breaker`]. Uncounted failures leave the
//! state untouched and release a held trial slot.

use crate::clock::SharedClock;
use crate::config::EngineConfig;
use crate::executor::ExecutionError;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::future::Future;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

/// Point-in-time view of one source's breaker.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub trial_in_flight: bool,
}

#[derive(Debug, Default)]
struct BreakerEntry {
    state: CircuitState,
    failures: u32,
    last_failure_at: Option<DateTime<Utc>>,
    opened_at: Option<DateTime<Utc>>,
    trial_in_flight: bool,
}

impl BreakerEntry {
    fn snapshot(&self) -> BreakerSnapshot {
        BreakerSnapshot {
            state: self.state,
            consecutive_failures: self.failures,
            last_failure_at: self.last_failure_at,
            opened_at: self.opened_at,
            trial_in_flight: self.trial_in_flight,
        }
    }
}

/// Breakers for every source, keyed by source id.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    entries: DashMap<String, BreakerEntry>,
    failure_threshold: u32,
    reset_timeout: Duration,
    clock: SharedClock,
}

/// Releases a trial slot if the wrapped call never reported back (e.g. the
/// future was dropped).
struct TrialGuard<'a> {
    registry: &'a CircuitBreakerRegistry,
    source_id: &'a str,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Some(mut entry) = self.registry.entries.get_mut(self.source_id) {
                entry.trial_in_flight = false;
            }
        }
    }
}

impl CircuitBreakerRegistry {
    pub fn new(failure_threshold: u32, reset_timeout: std::time::Duration, clock: SharedClock) -> Self {
        Self {
            entries: DashMap::new(),
            failure_threshold: failure_threshold.max(1),
            reset_timeout: Duration::from_std(reset_timeout).unwrap_or_else(|_| Duration::seconds(60)),
            clock,
        }
    }

    pub fn from_config(config: &EngineConfig, clock: SharedClock) -> Self {
        Self::new(config.failure_threshold, config.reset_timeout(), clock)
    }

    /// Runs `call` under the breaker for `source_id`.
    ///
    /// # Returns
    ///
    /// `ExecutionError::CircuitOpen` without polling `call` when the circuit is
    /// open, otherwise the call's own result after recording it.
    pub async fn execute<T, F>(&self, source_id: &str, call: F) -> Result<T, ExecutionError>
    where
        F: Future<Output = Result<T, ExecutionError>>,
    {
        let is_trial = self.try_acquire(source_id)?;
        let mut guard = TrialGuard {
            registry: self,
            source_id,
            armed: is_trial,
        };

        let result = call.await;

        guard.armed = false;
        self.record(source_id, is_trial, result.as_ref().err());
        result
    }

    fn try_acquire(&self, source_id: &str) -> Result<bool, ExecutionError> {
        let now = self.clock.now();
        let mut entry = self.entries.entry(source_id.to_string()).or_default();

        match entry.state {
            CircuitState::Closed => Ok(false),
            CircuitState::Open => {
                let opened_at = entry.opened_at.unwrap_or(now);
                let reopen_at = opened_at + self.reset_timeout;

                if now >= reopen_at {
                    entry.state = CircuitState::HalfOpen;
                    entry.trial_in_flight = true;
                    tracing::info!(source_id, "circuit half-open, allowing trial call");
                    Ok(true)
                } else {
                    let remaining_ms = (reopen_at - now).num_milliseconds().max(1) as u64;
                    Err(ExecutionError::CircuitOpen {
                        source_id: source_id.to_string(),
                        retry_after_secs: remaining_ms.div_ceil(1000),
                    })
                }
            }
            CircuitState::HalfOpen => {
                if entry.trial_in_flight {
                    Err(ExecutionError::CircuitOpen {
                        source_id: source_id.to_string(),
                        retry_after_secs: 1,
                    })
                } else {
                    entry.trial_in_flight = true;
                    Ok(true)
                }
            }
        }
    }

    fn record(&self, source_id: &str, is_trial: bool, error: Option<&ExecutionError>) {
        let now = self.clock.now();
        let mut entry = self.entries.entry(source_id.to_string()).or_default();

        if is_trial {
            entry.trial_in_flight = false;
        }

        match error {
            None => {
                if entry.state == CircuitState::Open && !is_trial {
                    return;
                }
                if entry.state != CircuitState::Closed {
                    tracing::info!(source_id, "circuit closed");
                }
                entry.state = CircuitState::Closed;
                entry.failures = 0;
                entry.opened_at = None;
            }
            Some(err) if err.counts_against_breaker() => {
                entry.failures = entry.failures.saturating_add(1);
                entry.last_failure_at = Some(now);

                match entry.state {
                    CircuitState::HalfOpen => {
                        entry.state = CircuitState::Open;
                        entry.opened_at = Some(now);
                        tracing::warn!(source_id, error = %err, "trial call failed, circuit re-opened");
                    }
                    CircuitState::Closed if entry.failures >= self.failure_threshold => {
                        entry.state = CircuitState::Open;
                        entry.opened_at = Some(now);
                        tracing::warn!(
                            source_id,
                            failures = entry.failures,
                            error = %err,
                            "failure threshold reached, circuit opened"
                        );
                    }
                    _ => {
                        tracing::debug!(source_id, failures = entry.failures, "counted failure");
                    }
                }
            }
            Some(_) => {}
        }
    }

    /// Current state of a source's breaker. Unknown sources report Closed.
    pub fn snapshot(&self, source_id: &str) -> BreakerSnapshot {
        self.entries
            .get(source_id)
            .map(|entry| entry.snapshot())
            .unwrap_or_default()
    }

    /// Forgets a source's breaker, returning it to Closed.
    pub fn reset(&self, source_id: &str) -> bool {
        self.entries.remove(source_id).is_some()
    }
}
