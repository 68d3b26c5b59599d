//! Form-encoded body helpers.
//!
//! Sources are often written with a form body in a draft, one-pair-per-line
//! layout (`key: value`). Before sending, such drafts are converted to
//! `key=value&key=value` with percent-encoding.

use url::form_urlencoded;

pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Checks whether a content type denotes a form-encoded body (parameters ignored).
pub fn is_form_content_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(|media| media.trim().eq_ignore_ascii_case(FORM_CONTENT_TYPE))
        .unwrap_or(false)
}

/// Returns `true` if every non-blank line is a `key: value` pair.
pub fn is_draft_form(body: &str) -> bool {
    let mut saw_pair = false;

    for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match line.split_once(':') {
            Some((key, _)) => {
                let key = key.trim();
                if key.is_empty() || key.contains('=') || key.contains('&') {
                    return false;
                }
                saw_pair = true;
            }
            None => return false,
        }
    }

    saw_pair
}

/// Converts a draft body into `key=value&...`.
///
/// # Examples
///
/// ```
/// use source_refresh::executor::form::draft_to_urlencoded;
///
/// let body = "grant_type: client_credentials\nscope: read write";
/// assert_eq!(draft_to_urlencoded(body), "grant_type=client_credentials&scope=read+write");
/// ```
pub fn draft_to_urlencoded(body: &str) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());

    for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some((key, value)) = line.split_once(':') {
            serializer.append_pair(key.trim(), value.trim());
        }
    }

    serializer.finish()
}
