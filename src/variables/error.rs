//! Variable resolution errors.

use thiserror::Error;

/// Errors that can occur during variable resolution
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VarError {
    /// A placeholder survived every resolution pass.
    #[error("unresolved variable: {{{{{0}}}}}")]
    UnresolvedVariable(String),

    /// Circular reference detected during nested substitution.
    #[error("circular reference: {0}")]
    CircularReference(String),

    /// The template store failed for a reason other than a missing name.
    #[error("template store error: {0}")]
    Store(String),
}

impl VarError {
    /// Name of the missing variable, if this is an unresolved-variable error.
    pub fn variable_name(&self) -> Option<&str> {
        match self {
            VarError::UnresolvedVariable(name) => Some(name),
            _ => None,
        }
    }
}
