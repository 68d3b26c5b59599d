//! Response data models.
//!
//! This module defines the envelope returned by the transport and the
//! [`ExecutionResult`] the engine hands back to callers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// The `{statusCode, body, headers}` envelope produced by a transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportResponse {
    /// HTTP status code (e.g., 200, 404, 500).
    pub status_code: u16,

    /// Response body as text.
    #[serde(default, deserialize_with = "deserialize_body")]
    pub body: String,

    /// Response headers.
    #[serde(default, deserialize_with = "deserialize_headers")]
    pub headers: HashMap<String, String>,
}

impl TransportResponse {
    /// Creates a response with no headers.
    pub fn new(status_code: u16, body: impl Into<String>) -> Self {
        Self {
            status_code,
            body: body.into(),
            headers: HashMap::new(),
        }
    }

    /// Parses the raw envelope string returned by a transport.
    ///
    /// # Examples
    ///
    /// ```
    /// use source_refresh::models::TransportResponse;
    ///
    /// let raw = r#"{"statusCode":200,"body":"{\"ok\":true}","headers":{}}"#;
    /// let response = TransportResponse::from_envelope(raw).unwrap();
    /// assert_eq!(response.status_code, 200);
    /// assert_eq!(response.body, r#"{"ok":true}"#);
    /// ```
    pub fn from_envelope(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Serializes this response into the envelope string form.
    pub fn to_envelope(&self) -> String {
        serde_json::json!({
            "statusCode": self.status_code,
            "body": self.body,
            "headers": self.headers,
        })
        .to_string()
    }

    /// Checks if the response status indicates success (2xx).
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Checks if the status is an error status (4xx or 5xx).
    pub fn is_error_status(&self) -> bool {
        self.status_code >= 400
    }
}

/// Transports sometimes hand back an already-decoded JSON body.
fn deserialize_body<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    })
}

/// Header values may arrive as strings, numbers or lists of strings.
fn deserialize_headers<'de, D>(deserializer: D) -> Result<HashMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let mut headers = HashMap::new();
    if let Value::Object(map) = value {
        for (name, value) in map {
            let text = match value {
                Value::String(s) => s,
                Value::Array(items) => items
                    .iter()
                    .map(|item| match item {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(", "),
                Value::Null => continue,
                other => other.to_string(),
            };
            headers.insert(name, text);
        }
    }
    Ok(headers)
}

/// Outcome of one source execution.
///
/// Never carries the TOTP secret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// Display content: the filtered value, or the body when unfiltered.
    pub content: String,

    /// Unfiltered response body.
    pub original_response: String,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Raw envelope string as returned by the transport.
    pub raw_response: String,

    /// The resolved filter path, when a filter was applied.
    pub filtered_with_path: Option<String>,

    /// Whether `content` is the output of the JSON filter.
    pub is_filtered: bool,

    /// Wall-clock duration of the execution in milliseconds.
    pub duration_ms: u64,

    /// HTTP status code of the final attempt.
    pub status_code: u16,
}
