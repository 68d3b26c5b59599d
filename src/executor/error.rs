//! Source execution error types.
//!
//! [`ExecutionError`] is the single taxonomy the engine surfaces. Each variant
//! knows whether it counts against the source's circuit breaker.

use crate::totp::TotpError;
use crate::transport::TransportError;
use crate::variables::VarError;
use thiserror::Error;

/// Errors that can occur while executing a source.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// The transport result was not a valid `{statusCode, body, headers}` envelope.
    #[error("invalid response format: {0}")]
    InvalidResponseFormat(String),

    /// A TOTP code was already issued for this source in the current window.
    #[error("TOTP code already used for this window, retry in {remaining_seconds}s")]
    Cooldown { remaining_seconds: u64 },

    /// The TOTP secret could not produce a code.
    #[error("TOTP generation failed: {0}")]
    TotpGeneration(String),

    /// A placeholder could not be resolved by any pass.
    #[error("unresolved variable: {{{{{0}}}}}")]
    UnresolvedVariable(String),

    /// Template resolution failed for a reason other than a missing name,
    /// e.g. a circular reference in the environment.
    #[error("template error: {0}")]
    Template(String),

    /// The resolved URL is empty, a bare scheme, or otherwise unusable.
    #[error("invalid URL '{url}': {hint}")]
    InvalidUrl { url: String, hint: String },

    /// The server answered with a status of 400 or above.
    #[error("HTTP {status_code}: {body}")]
    HttpStatus { status_code: u16, body: String },

    /// A network-level failure that persisted through every retry.
    #[error("network error after {attempts} attempt(s): {error}")]
    NetworkTransient { attempts: u32, error: TransportError },

    /// A test run exceeded its wall-clock ceiling.
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    /// A non-network transport failure.
    #[error("transport failed: {0}")]
    Transport(TransportError),

    /// The source's circuit is open; the call was not attempted.
    #[error("circuit open for '{source_id}', retry in {retry_after_secs}s")]
    CircuitOpen {
        source_id: String,
        retry_after_secs: u64,
    },

    /// Another run for the same source is still in flight.
    #[error("a run for '{0}' is already in progress")]
    AlreadyRunning(String),
}

impl ExecutionError {
    /// Whether this failure counts toward opening the circuit.
    ///
    /// Configuration problems, TOTP guards, fast fails and rejected overlapping
    /// runs say nothing about the health of the endpoint and are not counted.
    pub fn counts_against_breaker(&self) -> bool {
        matches!(
            self,
            ExecutionError::InvalidResponseFormat(_)
                | ExecutionError::HttpStatus { .. }
                | ExecutionError::NetworkTransient { .. }
                | ExecutionError::Timeout(_)
                | ExecutionError::Transport(_)
        )
    }
}

impl From<VarError> for ExecutionError {
    fn from(err: VarError) -> Self {
        match err {
            VarError::UnresolvedVariable(name) => ExecutionError::UnresolvedVariable(name),
            other => ExecutionError::Template(other.to_string()),
        }
    }
}

impl From<TotpError> for ExecutionError {
    fn from(err: TotpError) -> Self {
        match err {
            TotpError::Cooldown { remaining_seconds } => ExecutionError::Cooldown { remaining_seconds },
            TotpError::Generation(msg) => ExecutionError::TotpGeneration(msg),
        }
    }
}

/// A single failed attempt; transient failures become `NetworkTransient`.
impl From<TransportError> for ExecutionError {
    fn from(err: TransportError) -> Self {
        if err.is_transient() {
            ExecutionError::NetworkTransient {
                attempts: 1,
                error: err,
            }
        } else {
            ExecutionError::Transport(err)
        }
    }
}
