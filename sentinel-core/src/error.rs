//! Error types for SENTINEL operations

use crate::BlockId;
use std::time::Duration;
use thiserror::Error;

/// Transcript append errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AppendError {
    #[error("Non-monotonic block id: last appended {last:?}, got {got}")]
    NonMonotonicId { last: Option<BlockId>, got: BlockId },
}

/// LLM call errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallError {
    #[error("Call timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("Call was cancelled")]
    Cancelled,

    #[error("Call failed: {reason}")]
    Failed { reason: String },

    #[error("Backend returned an empty response")]
    EmptyResponse,
}

/// Digest update errors. All variants are recovered locally by falling
/// through to the template path; they surface only as trace warnings.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DigestUpdateError {
    #[error("Generated digest failed schema validation: {reason}")]
    SchemaInvalid { reason: String },

    #[error("Digest LLM call failed: {reason}")]
    CallFailed { reason: String },

    #[error("Digest LLM call timed out")]
    Timeout,
}

impl From<CallError> for DigestUpdateError {
    fn from(err: CallError) -> Self {
        match err {
            CallError::Timeout { .. } => Self::Timeout,
            other => Self::CallFailed {
                reason: other.to_string(),
            },
        }
    }
}

/// Persistence errors for the digest store and transcript archive.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("I/O error on {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Stored data at {path} is not valid UTF-8 text")]
    NotUtf8 { path: String },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all SENTINEL errors.
#[derive(Debug, Clone, Error)]
pub enum SentinelError {
    #[error("Append error: {0}")]
    Append(#[from] AppendError),

    #[error("LLM error: {0}")]
    Call(#[from] CallError),

    #[error("Digest error: {0}")]
    Digest(#[from] DigestUpdateError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for SENTINEL operations.
pub type SentinelResult<T> = Result<T, SentinelError>;
