//! Outgoing request data models.
//!
//! This module defines the HTTP method enum shared by source descriptors and the
//! fully resolved request handed to the transport.

use serde::{Deserialize, Serialize};

/// Method a source is fetched with. Serialized in upper case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    GET,
    POST,
    PUT,
    DELETE,
    PATCH,
    OPTIONS,
    HEAD,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::GET => "GET",
            HttpMethod::POST => "POST",
            HttpMethod::PUT => "PUT",
            HttpMethod::DELETE => "DELETE",
            HttpMethod::PATCH => "PATCH",
            HttpMethod::OPTIONS => "OPTIONS",
            HttpMethod::HEAD => "HEAD",
        }
    }

    /// Case-insensitive lookup; `None` for methods sources cannot use.
    pub fn parse(method: &str) -> Option<Self> {
        const ALL: [HttpMethod; 7] = [
            HttpMethod::GET,
            HttpMethod::POST,
            HttpMethod::PUT,
            HttpMethod::DELETE,
            HttpMethod::PATCH,
            HttpMethod::OPTIONS,
            HttpMethod::HEAD,
        ];
        let method = method.trim();
        ALL.into_iter().find(|m| m.as_str().eq_ignore_ascii_case(method))
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully resolved request, ready for the transport.
///
/// Every template has been substituted. Carries no TOTP secret, only the
/// generated code wherever the caller placed the code token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportRequest {
    /// Resolved target URL.
    pub url: String,

    /// HTTP method.
    pub method: HttpMethod,

    /// Resolved headers, in declaration order.
    pub headers: Vec<(String, String)>,

    /// Resolved query parameters, in declaration order.
    pub query_params: Vec<(String, String)>,

    /// Serialized request body, if any.
    pub body: Option<String>,

    /// Content type of the body, if declared.
    pub content_type: Option<String>,
}

impl TransportRequest {
    /// Creates a bodiless request for `url`.
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method,
            headers: Vec::new(),
            query_params: Vec::new(),
            body: None,
            content_type: None,
        }
    }

    /// Looks up a header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}
