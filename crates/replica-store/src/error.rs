//! Error types for the store module.

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Conversion or codec error from core types.
    #[error("core error: {0}")]
    Core(#[from] replica_core::CoreError),

    /// A lookup that must find data found none.
    #[error("no data found: {0}")]
    NoDataFound(String),

    /// Stored or submitted data is inconsistent with what the operation expects.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// A guarded update touched more rows than the schema allows.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// A record arrived in a sync state the processor has no path for.
    #[error("unsupported sent sync state {state:?} for record {record_id}")]
    UnsupportedSyncState { state: String, record_id: String },

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
