use std::io;

use thiserror::Error;

use crate::types::ComponentState;

/// Unified error type for the index layer.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error from disk operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Data corruption detected (CRC mismatch, bad magic, truncated tuple).
    #[error("Corruption: {0}")]
    Corruption(String),

    /// A configuration property is missing or malformed. Fatal at construction.
    #[error("invalid configuration `{key}`: {reason}")]
    Config { key: String, reason: String },

    /// The operation is not supported by this codec or policy.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// Submitting a merge job failed. Not retried by the policy.
    #[error("merge scheduling failed: {0}")]
    Schedule(String),

    /// Destination buffer cannot hold the encoded tuple.
    #[error("buffer too small: need {needed} bytes, {available} available")]
    BufferTooSmall { needed: usize, available: usize },

    /// Requested field range lies outside the tuple.
    #[error("field range {start}+{count} out of bounds for {field_count} fields")]
    FieldRange {
        start: usize,
        count: usize,
        field_count: usize,
    },

    /// A fixed-length field does not match its type trait.
    #[error("field {field} is {actual} bytes, type trait expects {expected}")]
    FieldLength {
        field: usize,
        expected: usize,
        actual: usize,
    },

    /// A component state change that the lifecycle does not allow.
    #[error("illegal component state transition {from:?} -> {to:?}")]
    StateTransition {
        from: ComponentState,
        to: ComponentState,
    },
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
