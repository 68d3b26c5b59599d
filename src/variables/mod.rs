//! Variables module for the refresh engine
//!
//! This module resolves `{{name}}` placeholders in source requests: first against the
//! environment template store, then against per-source local variables, and finally the
//! reserved TOTP code token.

pub mod error;
pub mod substitution;

pub use error::VarError;
pub use substitution::{resolve, resolve_value, ResolveContext, TOTP_TOKEN_NAME};

use once_cell::sync::Lazy;
use regex::Regex;

/// Cached regex pattern for matching {{variableName}} with optional whitespace.
pub(crate) static PLACEHOLDER_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{([^{}]+)\}\}").expect("Failed to compile placeholder regex"));

/// Returns the trimmed names of every placeholder in `text`, in order of appearance.
///
/// # Examples
///
/// ```
/// use source_refresh::variables::placeholder_names;
///
/// let names = placeholder_names("{{ host }}/api/{{version}}");
/// assert_eq!(names, vec!["host", "version"]);
/// ```
pub fn placeholder_names(text: &str) -> Vec<&str> {
    PLACEHOLDER_REGEX
        .captures_iter(text)
        .filter_map(|cap| cap.get(1))
        .map(|m| m.as_str().trim())
        .collect()
}
