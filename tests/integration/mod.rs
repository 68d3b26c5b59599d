//! Shared infrastructure for engine integration tests.

pub mod end_to_end_test;
pub mod scheduler_test;

use async_trait::async_trait;
use source_refresh::models::{TransportRequest, TransportResponse};
use source_refresh::transport::{Transport, TransportError};
use std::collections::VecDeque;
use std::sync::{Mutex, Once};
use std::time::Duration;

static INIT: Once = Once::new();

/// Initialize test environment (run once)
///
/// Installs a tracing subscriber honouring `RUST_LOG`, writing through the
/// test harness capture.
pub fn init_test_env() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Transport replaying a fixed script of results, then repeating the last one.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<String, TransportError>>>,
    last: Mutex<Option<Result<String, TransportError>>>,
    requests: Mutex<Vec<TransportRequest>>,
    delay: Mutex<Option<Duration>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Result<String, TransportError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    pub fn ok(status_code: u16, body: &str) -> Result<String, TransportError> {
        Ok(TransportResponse::new(status_code, body).to_envelope())
    }

    /// Makes every call wait `delay` (virtual time under paused tests).
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn make_http_request(&self, request: &TransportRequest) -> Result<String, TransportError> {
        self.requests.lock().unwrap().push(request.clone());

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.script.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        match next {
            Some(result) => {
                *last = Some(result.clone());
                result
            }
            None => last
                .clone()
                .unwrap_or_else(|| Err(TransportError::other("script exhausted"))),
        }
    }
}
