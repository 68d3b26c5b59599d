//! JSON path filtering for source responses.
//!
//! Paths are dotted property names with optional array indices, optionally prefixed
//! with `root.`: `root.data.items[0].name`. Filtering never fails: a bad path, a
//! missing property or an unparseable body all produce a descriptive string, so a
//! misconfigured filter shows up as content instead of breaking the refresh cycle.

use crate::models::JsonFilter;
use serde_json::Value;

/// Applies `filter` to a response body.
///
/// Returns `body` unchanged when the filter is disabled or its path is empty.
///
/// # Examples
///
/// ```
/// use source_refresh::filter::apply_json_filter;
/// use source_refresh::models::JsonFilter;
///
/// let body = r#"{"data":{"items":[{"name":"x"}]}}"#;
/// let filter = JsonFilter::enabled("root.data.items[0].name");
/// assert_eq!(apply_json_filter(body, &filter), "x");
///
/// assert_eq!(apply_json_filter(body, &JsonFilter::disabled()), body);
/// ```
pub fn apply_json_filter(body: &str, filter: &JsonFilter) -> String {
    if !filter.is_active() {
        return body.to_string();
    }
    filter_json(body, &filter.path)
}

/// Evaluates `path` against `body` and renders the selected value.
///
/// Strings and other scalars render as their plain text form; objects and arrays
/// are pretty-printed JSON.
pub fn filter_json(body: &str, path: &str) -> String {
    let path = path.trim();
    if path.is_empty() {
        return body.to_string();
    }

    let json: Value = match serde_json::from_str(body) {
        Ok(json) => json,
        Err(e) => return format!("Invalid JSON response, cannot apply filter '{}': {}", path, e),
    };

    if let Some(message) = error_envelope_message(&json) {
        return message;
    }

    match evaluate_path(&json, path) {
        Ok(value) => render_value(value),
        Err(message) => message,
    }
}

/// Composes a readable message when the body is a service error envelope.
///
/// An `error` field that is null or `false` does not count as an error.
fn error_envelope_message(json: &Value) -> Option<String> {
    let error = json.as_object()?.get("error")?;

    let error_text = match error {
        Value::Null | Value::Bool(false) => return None,
        Value::String(s) => s.clone(),
        Value::Object(obj) => obj
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
        other => other.to_string(),
    };

    let mut message = format!("Error: {}", error_text);

    if let Some(detail) = json.get("message").and_then(Value::as_str) {
        if detail != error_text {
            message.push_str(" - ");
            message.push_str(detail);
        }
    }

    if let Some(status) = json.get("status").or_else(|| json.get("code")) {
        if status.is_number() || status.is_string() {
            message.push_str(&format!(" (status {})", render_value(status)));
        }
    }

    Some(message)
}

/// Represents a segment in a filter path.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PathSegment {
    /// Object field access (e.g., "user", "name")
    Field(String),

    /// Array index access (e.g., [0], [5])
    Index(usize),
}

fn evaluate_path<'a>(json: &'a Value, path: &str) -> Result<&'a Value, String> {
    let relative = path
        .strip_prefix("root")
        .filter(|rest| rest.is_empty() || rest.starts_with('.') || rest.starts_with('['))
        .map(|rest| rest.strip_prefix('.').unwrap_or(rest))
        .unwrap_or(path);

    let segments = parse_segments(relative)?;

    let mut current = json;
    let mut walked = String::from("root");

    for segment in segments {
        current = match segment {
            PathSegment::Field(name) => {
                let next = current
                    .as_object()
                    .and_then(|obj| obj.get(&name))
                    .ok_or_else(|| format!("Property '{}' not found at '{}'", name, walked))?;
                walked.push('.');
                walked.push_str(&name);
                next
            }
            PathSegment::Index(index) => {
                let items = current.as_array().ok_or_else(|| {
                    format!(
                        "Cannot index [{}] into non-array value at '{}'",
                        index, walked
                    )
                })?;
                let next = items.get(index).ok_or_else(|| {
                    format!(
                        "Index {} out of bounds at '{}' (length {})",
                        index,
                        walked,
                        items.len()
                    )
                })?;
                walked.push_str(&format!("[{}]", index));
                next
            }
        };
    }

    Ok(current)
}

/// Splits a path into segments.
///
/// - "user.name" -> [Field("user"), Field("name")]
/// - "items[0][1].id" -> [Field("items"), Index(0), Index(1), Field("id")]
fn parse_segments(path: &str) -> Result<Vec<PathSegment>, String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = path.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '.' => {
                if !current.is_empty() {
                    segments.push(PathSegment::Field(std::mem::take(&mut current)));
                }
            }
            '[' => {
                if !current.is_empty() {
                    segments.push(PathSegment::Field(std::mem::take(&mut current)));
                }

                let mut index_str = String::new();
                let mut closed = false;
                for next_ch in chars.by_ref() {
                    if next_ch == ']' {
                        closed = true;
                        break;
                    }
                    index_str.push(next_ch);
                }

                if !closed {
                    return Err(format!("Unclosed '[' in filter path '{}'", path));
                }

                let index = index_str
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| format!("Invalid array index '{}' in filter path '{}'", index_str, path))?;
                segments.push(PathSegment::Index(index));
            }
            _ => current.push(ch),
        }
    }

    if !current.is_empty() {
        segments.push(PathSegment::Field(current));
    }

    Ok(segments)
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        Value::Array(_) | Value::Object(_) => {
            serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
        }
    }
}
