//! Native transport using reqwest.

use super::{Transport, TransportError, TransportErrorKind};
use crate::models::{HttpMethod, TransportRequest, TransportResponse};
use async_trait::async_trait;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::time::Duration;

/// [`Transport`] backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Builds a transport whose client enforces `timeout` per request.
    pub fn new(timeout: Option<Duration>) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        let client = builder
            .build()
            .map_err(|e| TransportError::other(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Wraps an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    #[tracing::instrument(level = "debug", skip_all, fields(method = %request.method))]
    async fn make_http_request(&self, request: &TransportRequest) -> Result<String, TransportError> {
        let method = match request.method {
            HttpMethod::GET => reqwest::Method::GET,
            HttpMethod::POST => reqwest::Method::POST,
            HttpMethod::PUT => reqwest::Method::PUT,
            HttpMethod::DELETE => reqwest::Method::DELETE,
            HttpMethod::PATCH => reqwest::Method::PATCH,
            HttpMethod::HEAD => reqwest::Method::HEAD,
            HttpMethod::OPTIONS => reqwest::Method::OPTIONS,
        };

        let mut req_builder = self.client.request(method, &request.url);

        if !request.query_params.is_empty() {
            req_builder = req_builder.query(&request.query_params);
        }

        for (name, value) in &request.headers {
            req_builder = req_builder.header(name, value);
        }

        if let Some(body) = &request.body {
            if let (Some(content_type), None) = (&request.content_type, request.header("content-type")) {
                req_builder = req_builder.header(reqwest::header::CONTENT_TYPE, content_type);
            }
            req_builder = req_builder.body(body.clone());
        }

        let response = req_builder.send().await.map_err(classify_reqwest_error)?;

        let status_code = response.status().as_u16();

        let mut headers: HashMap<String, String> = HashMap::new();
        for (name, value) in response.headers() {
            let Ok(value_str) = value.to_str() else {
                continue;
            };
            headers
                .entry(name.as_str().to_string())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(value_str);
                })
                .or_insert_with(|| value_str.to_string());
        }

        let body = response.text().await.map_err(classify_reqwest_error)?;

        tracing::debug!(status_code, body_len = body.len(), "transport response received");

        Ok(TransportResponse {
            status_code,
            body,
            headers,
        }
        .to_envelope())
    }
}

/// Maps a reqwest error onto a transport error kind.
///
/// reqwest only flags timeouts and connect failures directly, so the error's
/// source chain is searched for the underlying OS or resolver message.
fn classify_reqwest_error(err: reqwest::Error) -> TransportError {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }

    if err.is_timeout() {
        return TransportError::new(TransportErrorKind::Timeout, message);
    }

    if err.is_builder() {
        return TransportError::other(message);
    }

    let classified = TransportError::classify(message);
    if classified.kind == TransportErrorKind::Other && err.is_connect() {
        return TransportError::new(TransportErrorKind::ConnectionRefused, classified.message);
    }
    classified
}
