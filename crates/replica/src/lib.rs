//! # Replica
//!
//! Bidirectional replication of a shared record set between named nodes,
//! coordinated through the nodes' own relational stores.
//!
//! ## Overview
//!
//! Every node keeps a canonical copy of each record plus, per peer, a row
//! of replication bookkeeping. A sync round from one node to another:
//!
//! - **Queues** the records whose hash moved since the peer last saw them
//! - **Fetches** them in pages bounded by a byte budget, reserving each row
//!   with a token so concurrent fetchers never share a record
//! - **Processes** each page on the peer under a hash gate: a change applies
//!   only if the peer still holds the version the sender last saw
//! - **Acknowledges** the outcome, clearing delivered rows and flagging
//!   conflicts for resolution
//!
//! ## Key Concepts
//!
//! - **Pair**: Two nodes that replicate with each other; holds at most one
//!   active session at a time.
//! - **Fast batch**: A record the peer applied uncontested.
//! - **Conflict**: A record the peer changed independently; it stays dirty
//!   and is flagged, the peer's version travels back in the ack.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use replica::{Coordinator, CoordinatorConfig};
//! use replica::core::NodeId;
//! use replica::store::SqliteStore;
//! use replica::sync::LocalPeer;
//!
//! async fn example() -> replica::Result<()> {
//!     let config = CoordinatorConfig::from_json_str(r#"{"sync": {"delivery_timeout_ms": 5000}}"#)?;
//!
//!     let hub = Coordinator::new(SqliteStore::open("hub.db")?, NodeId::from("*node-hub"), config);
//!     let spoke = LocalPeer::new(SqliteStore::open("spoke.db")?, NodeId::from("*node-spoke1"));
//!
//!     let report = hub.sync_with_named("hub", "spoke1", &spoke).await?;
//!     println!("sent {} records in {} batches", report.records_sent, report.batches);
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `replica::core` - Identifiers, sync states, record codec, envelopes
//! - `replica::store` - Capability traits and SQLite
//! - `replica::sync` - Sync rounds and convergence

pub mod coordinator;
pub mod error;

// Re-export component crates
pub use replica_core as core;
pub use replica_store as store;
pub use replica_sync as sync;

// Re-export main types for convenience
pub use coordinator::{Coordinator, CoordinatorConfig};
pub use error::{ReplicaError, Result};

// Re-export commonly used types
pub use replica_core::{
    AckSyncState, ChangeType, EncodedRecord, FieldValue, NodeId, PairId, Record, RecordHash,
    RecordId, SentSyncState, SessionId, SessionState,
};
pub use replica_store::{Repository, SqliteStore};
pub use replica_sync::{ConvergenceResult, LocalPeer, Peer, SyncConfig, SyncReport};
