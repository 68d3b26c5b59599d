//! Source descriptor data models.
//!
//! A source is a caller-owned description of a periodically refreshed HTTP
//! request. The engine only ever receives immutable snapshots of it.

use super::request::HttpMethod;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single ordered key/value pair (header, query parameter or local variable).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Request body as configured on a source.
///
/// String bodies are substituted as text. JSON bodies are resolved per string
/// leaf and serialized afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestBody {
    /// Raw text body (JSON text, form drafts, plain text).
    Text(String),
    /// Structured JSON body.
    Json(Value),
}

impl RequestBody {
    /// Returns `true` for an empty text body or a JSON `null`.
    pub fn is_empty(&self) -> bool {
        match self {
            RequestBody::Text(text) => text.is_empty(),
            RequestBody::Json(value) => value.is_null(),
        }
    }
}

/// Everything needed to build the outgoing request besides URL and method.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestOptions {
    /// Request headers, in declaration order.
    #[serde(default)]
    pub headers: Vec<KeyValue>,

    /// Query parameters, in declaration order.
    #[serde(default)]
    pub query_params: Vec<KeyValue>,

    /// Optional request body.
    #[serde(default)]
    pub body: Option<RequestBody>,

    /// Declared body content type, e.g. `application/json`.
    #[serde(default)]
    pub content_type: Option<String>,

    /// Base32 TOTP secret. Never forwarded to the transport.
    #[serde(default)]
    pub totp_secret: Option<String>,

    /// Per-source variables substituted as `{{key}}` tokens.
    #[serde(default)]
    pub local_variables: Vec<KeyValue>,
}

impl std::fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestOptions")
            .field("headers", &self.headers)
            .field("query_params", &self.query_params)
            .field("body", &self.body)
            .field("content_type", &self.content_type)
            .field(
                "totp_secret",
                &self.totp_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("local_variables", &self.local_variables)
            .finish()
    }
}

impl RequestOptions {
    /// Returns `true` if a non-blank TOTP secret is configured.
    pub fn has_totp_secret(&self) -> bool {
        self.totp_secret
            .as_deref()
            .map_or(false, |secret| !secret.trim().is_empty())
    }
}

/// JSON filter configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonFilter {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub path: String,
}

impl JsonFilter {
    /// Creates an enabled filter for `path`.
    pub fn enabled(path: impl Into<String>) -> Self {
        Self {
            enabled: true,
            path: path.into(),
        }
    }

    /// Creates a disabled filter.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Returns a copy whose path is empty unless the filter is enabled.
    pub fn normalized(&self) -> Self {
        if self.enabled {
            self.clone()
        } else {
            Self {
                enabled: false,
                path: String::new(),
            }
        }
    }

    /// Whether the filter would actually transform a body.
    pub fn is_active(&self) -> bool {
        self.enabled && !self.path.trim().is_empty()
    }
}

/// Refresh scheduling options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshOptions {
    /// Refresh interval in minutes. Zero disables scheduled refresh.
    #[serde(default)]
    pub interval_minutes: u32,

    /// When the last refresh completed.
    #[serde(default)]
    pub last_refresh_at: Option<DateTime<Utc>>,

    /// When the next refresh is due.
    #[serde(default)]
    pub next_refresh_at: Option<DateTime<Utc>>,

    /// Wait one full interval before the first refresh.
    #[serde(default)]
    pub skip_immediate_refresh: bool,

    /// Derive the first fire time from `last_refresh_at` when no future
    /// `next_refresh_at` is stored.
    #[serde(default)]
    pub preserve_timing: bool,
}

impl RefreshOptions {
    /// Creates options refreshing every `interval_minutes`.
    pub fn every(interval_minutes: u32) -> Self {
        Self {
            interval_minutes,
            ..Self::default()
        }
    }

    /// The refresh interval as a duration.
    pub fn interval(&self) -> Duration {
        Duration::minutes(i64::from(self.interval_minutes))
    }

    /// Whether scheduled refreshing is turned on.
    pub fn is_enabled(&self) -> bool {
        self.interval_minutes > 0
    }
}

/// A configured, periodically refreshed HTTP-derived data item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDescriptor {
    /// Unique, stable identity.
    pub source_id: String,

    /// Target URL template.
    pub url: String,

    #[serde(default)]
    pub method: HttpMethod,

    #[serde(default)]
    pub request_options: RequestOptions,

    #[serde(default)]
    pub json_filter: JsonFilter,

    #[serde(default)]
    pub refresh_options: RefreshOptions,
}

impl SourceDescriptor {
    /// Creates a GET source with default options.
    pub fn new(source_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            url: url.into(),
            method: HttpMethod::GET,
            request_options: RequestOptions::default(),
            json_filter: JsonFilter::default(),
            refresh_options: RefreshOptions::default(),
        }
    }

    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.request_options.headers.push(KeyValue::new(key, value));
        self
    }

    pub fn with_query_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.request_options
            .query_params
            .push(KeyValue::new(key, value));
        self
    }

    pub fn with_local_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.request_options
            .local_variables
            .push(KeyValue::new(key, value));
        self
    }

    pub fn with_body(mut self, body: RequestBody, content_type: Option<&str>) -> Self {
        self.request_options.body = Some(body);
        self.request_options.content_type = content_type.map(str::to_string);
        self
    }

    pub fn with_totp_secret(mut self, secret: impl Into<String>) -> Self {
        self.request_options.totp_secret = Some(secret.into());
        self
    }

    pub fn with_json_filter(mut self, filter: JsonFilter) -> Self {
        self.json_filter = filter;
        self
    }

    pub fn with_refresh(mut self, refresh_options: RefreshOptions) -> Self {
        self.refresh_options = refresh_options;
        self
    }
}
