//! Errors raised while parsing scheduler primitives.

use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// Failure to build an id, window or similar value from raw input.
///
/// Storage and transport failures have their own error types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("validation failed: {0}")]
    Validation(String),

    /// Empty or malformed identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
