//! Error types for Replica Core.

use thiserror::Error;

/// Errors raised while converting or encoding core values.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unknown sent sync state: {0}")]
    UnknownSentSyncState(i64),

    #[error("unknown ack sync state: {0}")]
    UnknownAckSyncState(i64),

    #[error("unknown session state: {0}")]
    UnknownSessionState(String),

    #[error("unknown field type: {0}")]
    UnknownFieldType(String),

    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),
}
