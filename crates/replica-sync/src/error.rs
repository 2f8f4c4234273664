//! Error types for the sync module.

use thiserror::Error;

use replica_core::{ChangeType, PairId};

/// Errors that can occur during a sync round.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Store operation failed.
    #[error("store error: {0}")]
    StoreError(#[from] replica_store::StoreError),

    /// Codec or wire error.
    #[error("core error: {0}")]
    CoreError(#[from] replica_core::CoreError),

    /// The pair's session could not be opened or advanced.
    #[error("session rejected on pair {pair}: {reason}")]
    SessionRejected { pair: PairId, reason: String },

    /// The peer failed to take a batch.
    #[error("peer error: {0}")]
    PeerError(String),

    /// Building a batch failed.
    #[error("fetch failed for {change_type:?}: {message}")]
    FetchFailed {
        change_type: ChangeType,
        message: String,
    },

    /// Timeout waiting for peer.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The round sent more batches than configured.
    #[error("batch limit of {0} exceeded")]
    BatchLimitExceeded(usize),
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
