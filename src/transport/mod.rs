//! Transport boundary.
//!
//! The engine hands a fully resolved [`TransportRequest`] to a [`Transport`] and gets
//! back the raw `{statusCode, body, headers}` envelope as a JSON string. Transports
//! must not retry or interpret status codes; retries, classification and circuit
//! breaking all happen in the engine.

#[cfg(feature = "native")]
pub mod native;

#[cfg(feature = "native")]
pub use native::ReqwestTransport;

use crate::models::TransportRequest;
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

/// Performs one HTTP exchange.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `request` and returns the response envelope as a JSON string.
    async fn make_http_request(&self, request: &TransportRequest) -> Result<String, TransportError>;
}

/// Failure category reported by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    ConnectionReset,
    Timeout,
    ConnectionRefused,
    Dns,
    Other,
}

impl TransportErrorKind {
    /// Network-level failures worth retrying.
    pub fn is_transient(&self) -> bool {
        !matches!(self, TransportErrorKind::Other)
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportErrorKind::ConnectionReset => write!(f, "connection reset"),
            TransportErrorKind::Timeout => write!(f, "timed out"),
            TransportErrorKind::ConnectionRefused => write!(f, "connection refused"),
            TransportErrorKind::Dns => write!(f, "DNS lookup failed"),
            TransportErrorKind::Other => write!(f, "transport error"),
        }
    }
}

/// Error returned by a [`Transport`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Other, message)
    }

    /// Builds an error from a free-form message, inferring the kind from the
    /// usual OS and resolver wording.
    ///
    /// # Examples
    ///
    /// ```
    /// use source_refresh::transport::{TransportError, TransportErrorKind};
    ///
    /// let err = TransportError::classify("read ECONNRESET");
    /// assert_eq!(err.kind, TransportErrorKind::ConnectionReset);
    /// assert!(err.is_transient());
    ///
    /// let err = TransportError::classify("certificate has expired");
    /// assert!(!err.is_transient());
    /// ```
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();

        let kind = if lower.contains("econnreset")
            || lower.contains("connection reset")
            || lower.contains("connection closed before message completed")
            || lower.contains("broken pipe")
        {
            TransportErrorKind::ConnectionReset
        } else if lower.contains("econnrefused") || lower.contains("connection refused") {
            TransportErrorKind::ConnectionRefused
        } else if lower.contains("etimedout")
            || lower.contains("timed out")
            || lower.contains("timeout")
        {
            TransportErrorKind::Timeout
        } else if lower.contains("enotfound")
            || lower.contains("eai_again")
            || lower.contains("dns")
            || lower.contains("failed to lookup address")
            || lower.contains("name resolution")
        {
            TransportErrorKind::Dns
        } else {
            TransportErrorKind::Other
        };

        Self { kind, message }
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}
