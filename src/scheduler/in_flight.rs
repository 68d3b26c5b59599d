//! Non-overlap guard shared by scheduled, manual and test runs.

use dashmap::DashSet;
use std::sync::Arc;

/// Set of source ids with a run in flight.
#[derive(Debug, Clone, Default)]
pub struct InFlightRegistry {
    running: Arc<DashSet<String>>,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `source_id` as running.
    ///
    /// Returns `None` if a run for that source is already in flight. The
    /// returned guard clears the mark when dropped.
    pub fn try_begin(&self, source_id: &str) -> Option<InFlightGuard> {
        if self.running.insert(source_id.to_string()) {
            Some(InFlightGuard {
                running: Arc::clone(&self.running),
                source_id: source_id.to_string(),
            })
        } else {
            None
        }
    }

    pub fn is_running(&self, source_id: &str) -> bool {
        self.running.contains(source_id)
    }

    pub fn len(&self) -> usize {
        self.running.len()
    }

    pub fn is_empty(&self) -> bool {
        self.running.is_empty()
    }
}

/// Held for the duration of one run.
#[derive(Debug)]
pub struct InFlightGuard {
    running: Arc<DashSet<String>>,
    source_id: String,
}

impl InFlightGuard {
    pub fn source_id(&self) -> &str {
        &self.source_id
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.running.remove(&self.source_id);
    }
}
