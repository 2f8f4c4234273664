//! Error types for the coordinator.

use replica_core::CoreError;
use replica_store::StoreError;
use replica_sync::SyncError;
use thiserror::Error;

/// Errors that can occur during coordinator operations.
#[derive(Debug, Error)]
pub enum ReplicaError {
    /// Codec error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Sync error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Configuration could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

/// Result type for coordinator operations.
pub type Result<T> = std::result::Result<T, ReplicaError>;
