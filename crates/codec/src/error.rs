//! Codec error model.

use thiserror::Error;

pub type CodecResult<T> = Result<T, CodecError>;

/// Failure while encoding or decoding a value.
///
/// Errors abort the enclosing call; a partially decoded sequence is never
/// returned as a success.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("invalid encoded key: {0}")]
    InvalidKey(&'static str),

    #[error("invalid encoded key flag {0}")]
    InvalidFlag(u8),

    #[error("invalid encoded key, expected length: {expected}, actual length: {actual}")]
    Insufficient { expected: usize, actual: usize },

    #[error("insufficient bytes to decode value")]
    InsufficientBytes,

    #[error("value larger than 64 bits")]
    VarintOverflow,

    #[error("invalid marker byte {0:#04x}")]
    InvalidMarker(u8),

    #[error("invalid padding byte in group")]
    InvalidPadding,

    #[error("unsupported type: {0}")]
    Unsupported(String),

    #[error("decimal overflow: {0}")]
    DecimalOverflow(String),

    #[error("decimal truncated: {0}")]
    DecimalTruncated(String),

    #[error("invalid decimal: {0}")]
    InvalidDecimal(String),

    #[error("invalid time: {0}")]
    InvalidTime(String),

    #[error("invalid utf-8 in string value")]
    InvalidUtf8,

    #[error("invalid json: {0}")]
    InvalidJson(String),

    #[error("binary literal does not fit in 64 bits")]
    BinaryLiteralOverflow,

    #[error("invalid enum or set value: {0}")]
    InvalidElement(String),

    #[error("invalid length of index's columns")]
    ColumnCountMismatch,
}

impl CodecError {
    pub(crate) fn need(expected: usize, actual: usize) -> Self {
        Self::Insufficient { expected, actual }
    }
}
