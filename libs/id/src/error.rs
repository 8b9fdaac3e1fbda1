//! Error types for name parsing and validation.

use thiserror::Error;

/// Errors that can occur when parsing or validating names.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The name is empty.
    #[error("{kind} cannot be empty")]
    Empty { kind: &'static str },

    /// The name exceeds the maximum length.
    #[error("{kind} '{value}' is too long: {len} > {max}")]
    TooLong {
        kind: &'static str,
        value: String,
        len: usize,
        max: usize,
    },

    /// The name contains a character outside the allowed set.
    #[error("{kind} '{value}' contains invalid character {ch:?}")]
    InvalidCharacter {
        kind: &'static str,
        value: String,
        ch: char,
    },

    /// The name starts or ends with a character that is not allowed there.
    #[error("{kind} '{value}' must start and end with an alphanumeric character")]
    InvalidEdge { kind: &'static str, value: String },

    /// A pool reference is not of the form `namespace/pool`.
    #[error("invalid pool reference '{0}': expected '<namespace>/<pool>'")]
    InvalidPoolRef(String),
}

impl IdError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, IdError::Empty { .. })
    }

    /// Returns true if this error came from a malformed pool reference.
    pub fn is_pool_ref_error(&self) -> bool {
        matches!(self, IdError::InvalidPoolRef(_))
    }
}
