//! Error types for the wire protocol.
//!
//! Everything here is recoverable at record granularity: the session
//! drops the offending record, logs, and keeps the batch going.
//! Corrupt compressed input is not an error at all; the decompressor
//! signals it through its return value.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, WireError>;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("unrecognized event kind: {0}")]
    UnknownEventKind(u64),

    #[error("unrecognized mutation op: {0}")]
    UnknownMutationOp(u64),

    #[error("malformed token at stream position {0}")]
    MalformedToken(usize),

    #[error("record too short: expected at least {expected} fields, got {got}")]
    TruncatedRecord { expected: usize, got: usize },

    #[error("type mismatch at field position {0}")]
    TypeMismatch(usize),

    #[error("record of {size} bytes exceeds the {limit} byte ceiling")]
    OversizedRecord { size: usize, limit: usize },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
