//! Variable substitution engine
//!
//! This module replaces `{{variable}}` placeholders in source requests. Resolution runs
//! in three passes, each operating on the output of the previous one:
//!
//! 1. Environment templates from the caller's [`TemplateStore`]. Any placeholder left
//!    over that is neither a local variable nor the TOTP token is a hard error.
//! 2. Per-source local variables, matched by exact (case-sensitive) name.
//! 3. The reserved `{{TOTP_CODE}}` token, replaced with the freshly generated code.

use super::{placeholder_names, VarError, PLACEHOLDER_REGEX};
use crate::environment::TemplateStore;
use crate::models::KeyValue;
use regex::Captures;
use serde_json::Value;

/// Name of the reserved placeholder replaced with the generated TOTP code.
pub const TOTP_TOKEN_NAME: &str = "TOTP_CODE";

/// Everything a single resolution needs: the store snapshot, the source's local
/// variables, and the TOTP code generated for this execution (if any).
#[derive(Clone, Copy)]
pub struct ResolveContext<'a> {
    store: &'a dyn TemplateStore,
    local_variables: &'a [KeyValue],
    totp_code: Option<&'a str>,
}

impl<'a> ResolveContext<'a> {
    /// Creates a context without a TOTP code.
    pub fn new(store: &'a dyn TemplateStore, local_variables: &'a [KeyValue]) -> Self {
        Self {
            store,
            local_variables,
            totp_code: None,
        }
    }

    /// Attaches the TOTP code substituted for `{{TOTP_CODE}}`.
    pub fn with_totp_code(mut self, code: Option<&'a str>) -> Self {
        self.totp_code = code;
        self
    }

    /// Later declarations of the same name win.
    fn local_value(&self, name: &str) -> Option<&'a str> {
        self.local_variables
            .iter()
            .rev()
            .find(|kv| kv.key == name)
            .map(|kv| kv.value.as_str())
    }
}

/// Resolves every placeholder in `text`.
///
/// # Arguments
///
/// * `text` - The template text
/// * `ctx` - Store snapshot, local variables and TOTP code
///
/// # Returns
///
/// The fully substituted text, or `VarError::UnresolvedVariable` naming the first
/// placeholder nothing could resolve.
///
/// # Examples
///
/// ```
/// use source_refresh::environment::{Environments, EnvironmentStore};
/// use source_refresh::models::KeyValue;
/// use source_refresh::variables::{resolve, ResolveContext};
///
/// let mut envs = Environments::new();
/// envs.set_shared("host", "api.example.com");
/// let store = EnvironmentStore::new(envs);
///
/// let locals = vec![KeyValue::new("BASE", "v1")];
/// let ctx = ResolveContext::new(&store, &locals).with_totp_code(Some("123456"));
///
/// let url = resolve("https://{{host}}/{{BASE}}?otp={{TOTP_CODE}}", &ctx).unwrap();
/// assert_eq!(url, "https://api.example.com/v1?otp=123456");
/// ```
pub fn resolve(text: &str, ctx: &ResolveContext<'_>) -> Result<String, VarError> {
    // Fast path: if there are no variable markers at all, return original text
    if !text.contains("{{") {
        return Ok(text.to_string());
    }

    let env_resolved = ctx.store.resolve_template(text)?;
    resolve_local_and_totp(&env_resolved, ctx)
}

/// Resolves every string leaf of a JSON value.
///
/// The store resolves the object as a whole first; local variables and the TOTP
/// token are then applied per leaf. Object keys are left untouched.
pub fn resolve_value(value: &Value, ctx: &ResolveContext<'_>) -> Result<Value, VarError> {
    let env_resolved = ctx.store.resolve_object_template(value)?;
    map_string_leaves(env_resolved, &|leaf| resolve_local_and_totp(&leaf, ctx))
}

fn map_string_leaves<F>(value: Value, f: &F) -> Result<Value, VarError>
where
    F: Fn(String) -> Result<String, VarError>,
{
    Ok(match value {
        Value::String(s) => Value::String(f(s)?),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| map_string_leaves(item, f))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| map_string_leaves(v, f).map(|v| (k, v)))
                .collect::<Result<_, _>>()?,
        ),
        other => other,
    })
}

/// Runs passes two and three over text the store has already resolved.
fn resolve_local_and_totp(text: &str, ctx: &ResolveContext<'_>) -> Result<String, VarError> {
    if !text.contains("{{") {
        return Ok(text.to_string());
    }

    ensure_resolvable(text, ctx)?;

    let with_locals = replace_placeholders(text, |name| ctx.local_value(name));

    let resolved = replace_placeholders(&with_locals, |name| {
        if name == TOTP_TOKEN_NAME {
            ctx.totp_code
        } else {
            None
        }
    });

    // Local values are not expanded recursively; anything they introduced is unresolved
    match placeholder_names(&resolved).first() {
        Some(name) => Err(VarError::UnresolvedVariable(name.to_string())),
        None => Ok(resolved),
    }
}

/// Every placeholder left after the store pass must be claimed by a later pass.
fn ensure_resolvable(text: &str, ctx: &ResolveContext<'_>) -> Result<(), VarError> {
    for name in placeholder_names(text) {
        let claimed = if name == TOTP_TOKEN_NAME {
            ctx.totp_code.is_some()
        } else {
            ctx.local_value(name).is_some()
        };

        if !claimed {
            return Err(VarError::UnresolvedVariable(name.to_string()));
        }
    }
    Ok(())
}

fn replace_placeholders<'v, F>(text: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<&'v str>,
{
    PLACEHOLDER_REGEX
        .replace_all(text, |caps: &Captures<'_>| {
            let name = caps.get(1).map_or("", |m| m.as_str().trim());
            match lookup(name) {
                Some(value) => value.to_string(),
                None => caps
                    .get(0)
                    .map_or_else(String::new, |m| m.as_str().to_string()),
            }
        })
        .into_owned()
}
