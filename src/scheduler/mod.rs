//! Refresh scheduling.
//!
//! Each scheduled source owns one timer task. A source moves between three states:
//!
//! ```text
//! Idle --setup--> Scheduled --timer fires--> Running --completes--> Scheduled
//!   ^                 |                         |
//!   +----cancel-------+------cancel (result discarded)
//! ```
//!
//! The next timer is only armed once the previous run has completed, so runs for
//! one source never overlap. Manual and test runs share the same
//! [`InFlightRegistry`]; a timer that fires while one of them is in flight skips
//! that cycle and re-arms one interval later.
//!
//! Every timer carries a generation number. Cancelling or re-running `setup`
//! bumps the generation, so a late-finishing run from an older setup is
//! recognised and discarded instead of reporting or re-arming.

pub mod in_flight;

pub use in_flight::{InFlightGuard, InFlightRegistry};

use crate::clock::SharedClock;
use crate::executor::ExecutionError;
use crate::models::{ExecutionResult, RefreshOptions, SourceDescriptor};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Executes one scheduled run of a source.
#[async_trait]
pub trait SourceRunner: Send + Sync {
    async fn run_scheduled(&self, source: &SourceDescriptor) -> Result<ExecutionResult, ExecutionError>;
}

/// Result of one refresh cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    Success(ExecutionResult),
    Failure(String),
}

impl RefreshOutcome {
    /// The display text: content on success, the error message on failure.
    pub fn content(&self) -> &str {
        match self {
            RefreshOutcome::Success(result) => &result.content,
            RefreshOutcome::Failure(message) => message,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RefreshOutcome::Success(_))
    }
}

/// Delivered to the caller after every completed cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshUpdate {
    pub source_id: String,
    pub outcome: RefreshOutcome,
    /// Refresh options with `last_refresh_at` and `next_refresh_at` updated,
    /// for the caller to persist.
    pub refresh_options: RefreshOptions,
}

/// Callback receiving [`RefreshUpdate`]s.
pub type UpdateCallback = Arc<dyn Fn(RefreshUpdate) + Send + Sync>;

/// Observable state of one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "state")]
pub enum RefreshStatus {
    Idle,
    Scheduled { next_fire_at: DateTime<Utc> },
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Scheduled,
    Running,
}

struct TimerEntry {
    generation: u64,
    source: SourceDescriptor,
    on_update: UpdateCallback,
    next_fire_at: DateTime<Utc>,
    phase: Phase,
    handle: Option<JoinHandle<()>>,
}

impl TimerEntry {
    fn abort_timer(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

struct SchedulerInner {
    runner: Arc<dyn SourceRunner>,
    in_flight: InFlightRegistry,
    clock: SharedClock,
    startup_delay: Duration,
    timers: Mutex<HashMap<String, TimerEntry>>,
    next_generation: AtomicU64,
}

/// Owns every source timer.
///
/// Must be used from within a tokio runtime: arming a timer spawns a task.
pub struct RefreshScheduler {
    inner: Arc<SchedulerInner>,
}

/// Returned by [`RefreshScheduler::setup`].
///
/// Cancelling through a handle only affects the setup that created it; a newer
/// setup for the same source is left alone.
#[derive(Clone)]
pub struct RefreshHandle {
    source_id: String,
    generation: u64,
    scheduler: Weak<SchedulerInner>,
}

impl RefreshHandle {
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Cancels the timer this handle was created for.
    ///
    /// Returns `false` if it already fired for the last time, was cancelled, or
    /// was replaced by a newer setup.
    pub fn cancel(&self) -> bool {
        match self.scheduler.upgrade() {
            Some(inner) => inner.cancel_generation(&self.source_id, Some(self.generation)),
            None => false,
        }
    }
}

impl fmt::Debug for RefreshHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshHandle")
            .field("source_id", &self.source_id)
            .field("generation", &self.generation)
            .finish()
    }
}

impl RefreshScheduler {
    pub fn new(
        runner: Arc<dyn SourceRunner>,
        in_flight: InFlightRegistry,
        clock: SharedClock,
        startup_delay: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                runner,
                in_flight,
                clock,
                startup_delay,
                timers: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    /// Schedules periodic refresh of `source`, replacing any existing schedule.
    ///
    /// The first fire time is, in order of preference:
    /// - a stored `next_refresh_at` that is still in the future
    /// - `last_refresh_at + interval` when `preserve_timing` is set and that is still in the future
    /// - `now + interval` when `skip_immediate_refresh` is set
    /// - `now + startup delay`
    ///
    /// An interval of zero disables refresh: any existing schedule is cancelled
    /// and the source stays Idle.
    #[tracing::instrument(level = "debug", skip_all, fields(source_id = %source.source_id))]
    pub fn setup<F>(&self, source: SourceDescriptor, on_update: F) -> RefreshHandle
    where
        F: Fn(RefreshUpdate) + Send + Sync + 'static,
    {
        let source_id = source.source_id.clone();
        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
        let handle = RefreshHandle {
            source_id: source_id.clone(),
            generation,
            scheduler: Arc::downgrade(&self.inner),
        };

        let mut timers = self.inner.timers();
        if let Some(mut previous) = timers.remove(&source_id) {
            if previous.phase == Phase::Scheduled {
                previous.abort_timer();
            }
        }

        let options = &source.refresh_options;
        if !options.is_enabled() {
            tracing::debug!(source_id = %source_id, "refresh disabled");
            return handle;
        }

        let now = self.inner.clock.now();
        let next_fire_at = self.first_fire_at(options, now);
        let delay = (next_fire_at - now).to_std().unwrap_or(Duration::ZERO);

        tracing::debug!(
            source_id = %source_id,
            next_fire_at = %next_fire_at,
            delay_ms = delay.as_millis() as u64,
            "refresh scheduled"
        );

        let task = self.inner.spawn_timer(source_id.clone(), generation, delay);
        timers.insert(
            source_id,
            TimerEntry {
                generation,
                source,
                on_update: Arc::new(on_update),
                next_fire_at,
                phase: Phase::Scheduled,
                handle: Some(task),
            },
        );

        handle
    }

    fn first_fire_at(&self, options: &RefreshOptions, now: DateTime<Utc>) -> DateTime<Utc> {
        let interval = options.interval();

        if let Some(next) = options.next_refresh_at.filter(|next| *next > now) {
            return next;
        }

        if options.preserve_timing {
            if let Some(next) = options
                .last_refresh_at
                .map(|last| last + interval)
                .filter(|next| *next > now)
            {
                return next;
            }
        }

        if options.skip_immediate_refresh {
            return now + interval;
        }

        now + chrono::Duration::from_std(self.inner.startup_delay).unwrap_or_else(|_| chrono::Duration::zero())
    }

    /// Cancels the schedule for `source_id`. Returns `false` if none existed.
    ///
    /// A run already in flight is not interrupted; its result is discarded.
    pub fn cancel(&self, source_id: &str) -> bool {
        self.inner.cancel_generation(source_id, None)
    }

    /// Cancels every schedule and returns how many there were.
    pub fn cancel_all(&self) -> usize {
        let mut timers = self.inner.timers();
        let count = timers.len();
        for (_, mut entry) in timers.drain() {
            if entry.phase == Phase::Scheduled {
                entry.abort_timer();
            }
        }
        if count > 0 {
            tracing::debug!(count, "all refreshes cancelled");
        }
        count
    }

    /// Runs a scheduled source now instead of waiting for its timer.
    ///
    /// Reports through the source's update callback and re-arms one interval
    /// later, exactly like a timer fire. Returns `false` if the source is not
    /// scheduled or a run for it is already in flight; in that case nothing
    /// happens, since the in-flight run is about to deliver a fresh update.
    pub fn refresh_now(&self, source_id: &str) -> bool {
        let (generation, source, guard) = {
            let mut timers = self.inner.timers();
            let Some(entry) = timers.get_mut(source_id) else {
                return false;
            };

            let Some(guard) = self.inner.in_flight.try_begin(source_id) else {
                tracing::debug!(source_id, "run already in flight, manual refresh dropped");
                return false;
            };

            entry.abort_timer();
            entry.phase = Phase::Running;
            (entry.generation, entry.source.clone(), guard)
        };

        let inner = Arc::clone(&self.inner);
        let source_id = source_id.to_string();
        tokio::spawn(async move {
            inner.execute(source_id, generation, source, guard).await;
        });

        true
    }

    pub fn status(&self, source_id: &str) -> RefreshStatus {
        match self.inner.timers().get(source_id) {
            None => RefreshStatus::Idle,
            Some(entry) if entry.phase == Phase::Running => RefreshStatus::Running,
            Some(entry) => RefreshStatus::Scheduled {
                next_fire_at: entry.next_fire_at,
            },
        }
    }

    /// Number of sources with a schedule (pending or running).
    pub fn scheduled_count(&self) -> usize {
        self.inner.timers().len()
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

impl SchedulerInner {
    fn timers(&self) -> MutexGuard<'_, HashMap<String, TimerEntry>> {
        self.timers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn spawn_timer(self: &Arc<Self>, source_id: String, generation: u64, delay: Duration) -> JoinHandle<()> {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.fire(source_id, generation).await;
        })
    }

    fn cancel_generation(&self, source_id: &str, generation: Option<u64>) -> bool {
        let mut timers = self.timers();

        let matches = match (timers.get(source_id), generation) {
            (Some(entry), Some(generation)) => entry.generation == generation,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if !matches {
            return false;
        }

        if let Some(mut entry) = timers.remove(source_id) {
            if entry.phase == Phase::Scheduled {
                entry.abort_timer();
            }
            tracing::debug!(source_id, running = entry.phase == Phase::Running, "refresh cancelled");
        }
        true
    }

    async fn fire(self: Arc<Self>, source_id: String, generation: u64) {
        let (source, guard) = {
            let mut timers = self.timers();
            let Some(entry) = timers.get_mut(&source_id) else {
                return;
            };
            if entry.generation != generation || entry.phase == Phase::Running {
                return;
            }

            match self.in_flight.try_begin(&source_id) {
                Some(guard) => {
                    // This task is the timer; clear it so cancel cannot abort the run
                    entry.handle = None;
                    entry.phase = Phase::Running;
                    (entry.source.clone(), guard)
                }
                None => {
                    let interval = entry.source.refresh_options.interval();
                    entry.next_fire_at = self.clock.now() + interval;
                    entry.handle = Some(self.spawn_timer(
                        source_id.clone(),
                        generation,
                        interval.to_std().unwrap_or(Duration::ZERO),
                    ));
                    tracing::debug!(source_id = %source_id, "run in flight, scheduled fire skipped");
                    return;
                }
            }
        };

        self.execute(source_id, generation, source, guard).await;
    }

    async fn execute(
        self: Arc<Self>,
        source_id: String,
        generation: u64,
        source: SourceDescriptor,
        guard: InFlightGuard,
    ) {
        tracing::debug!(source_id = %source_id, "refresh started");
        let result = self.runner.run_scheduled(&source).await;
        drop(guard);

        self.complete(source_id, generation, result);
    }

    fn complete(
        self: &Arc<Self>,
        source_id: String,
        generation: u64,
        result: Result<ExecutionResult, ExecutionError>,
    ) {
        let now = self.clock.now();

        let (on_update, update) = {
            let mut timers = self.timers();
            let Some(entry) = timers.get_mut(&source_id).filter(|e| e.generation == generation) else {
                tracing::debug!(source_id = %source_id, "source cancelled during run, result discarded");
                return;
            };

            let interval = entry.source.refresh_options.interval();
            let next = now + interval;

            entry.source.refresh_options.last_refresh_at = Some(now);
            entry.source.refresh_options.next_refresh_at = Some(next);
            entry.next_fire_at = next;
            entry.phase = Phase::Scheduled;
            entry.abort_timer();
            entry.handle = Some(self.spawn_timer(
                source_id.clone(),
                generation,
                interval.to_std().unwrap_or(Duration::ZERO),
            ));

            let outcome = match result {
                Ok(result) => {
                    tracing::info!(source_id = %source_id, duration_ms = result.duration_ms, "refresh succeeded");
                    RefreshOutcome::Success(result)
                }
                Err(err) => {
                    tracing::warn!(source_id = %source_id, error = %err, "refresh failed");
                    RefreshOutcome::Failure(err.to_string())
                }
            };

            (
                Arc::clone(&entry.on_update),
                RefreshUpdate {
                    source_id: source_id.clone(),
                    outcome,
                    refresh_options: entry.source.refresh_options.clone(),
                },
            )
        };

        on_update(update);
    }
}
