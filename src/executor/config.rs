//! Per-run execution options.
//!
//! [`RunOptions`] distinguish scheduled background runs from interactive test runs
//! and carry an optional progress callback.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Stage notifications emitted while a source executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Variables and the TOTP code are being resolved.
    Resolving,

    /// Transport attempt `n` (1-based) is starting.
    Attempt { n: u32 },

    /// Attempt `attempt` failed transiently; the next one starts after `delay`.
    Retrying { attempt: u32, delay: Duration },

    /// The JSON filter is being applied.
    Filtering,

    /// The run finished successfully.
    Completed,
}

/// Callback receiving [`ProgressEvent`]s.
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Options for a single execution.
#[derive(Clone, Default)]
pub struct RunOptions {
    /// Interactive test run: enforces the test timeout and passes error
    /// statuses through as data instead of failing.
    pub is_test: bool,

    /// Optional progress callback.
    pub progress: Option<ProgressCallback>,
}

impl RunOptions {
    /// Options for a scheduled background run.
    pub fn scheduled() -> Self {
        Self::default()
    }

    /// Options for an interactive test run.
    pub fn test() -> Self {
        Self {
            is_test: true,
            progress: None,
        }
    }

    /// Attaches a progress callback.
    ///
    /// # Examples
    ///
    /// ```
    /// use source_refresh::executor::{ProgressEvent, RunOptions};
    /// use std::sync::{Arc, Mutex};
    ///
    /// let seen = Arc::new(Mutex::new(Vec::new()));
    /// let sink = seen.clone();
    /// let opts = RunOptions::test().with_progress(move |event| sink.lock().unwrap().push(event));
    ///
    /// opts.emit(ProgressEvent::Resolving);
    /// assert_eq!(seen.lock().unwrap().as_slice(), &[ProgressEvent::Resolving]);
    /// ```
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressEvent) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(callback));
        self
    }

    /// Sends `event` to the progress callback, if any.
    pub fn emit(&self, event: ProgressEvent) {
        if let Some(progress) = &self.progress {
            progress(event);
        }
    }
}

impl fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOptions")
            .field("is_test", &self.is_test)
            .field("progress", &self.progress.as_ref().map(|_| "<callback>"))
            .finish()
    }
}
