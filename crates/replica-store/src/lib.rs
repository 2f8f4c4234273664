//! # Replica Store
//!
//! Replication bookkeeping for Replica: capability traits and their SQLite
//! implementation.
//!
//! ## Overview
//!
//! A sync round between two nodes is Queue → Fetch (until exhausted) →
//! deliver → the peer's Process → Acknowledge, bracketed by session
//! transitions on the pair. Each step is a capability trait; [`SqliteStore`]
//! implements all of them against one database.
//!
//! ## Key Types
//!
//! - [`Repository`] - A store offering every capability, and the factory for
//!   context-bound fetchers, processors and acknowledgers
//! - [`SqliteStore`] - SQLite-backed repository
//! - [`SqliteMessageFetcher`] - Budget-bounded batches under reservation tokens
//! - [`SqliteMessageProcessor`] - Hash-gated apply with fast-batch read-back
//! - [`SqliteMessageAcknowledger`] - Folds peer acks into peer tracking rows
//!
//! ## Usage
//!
//! ```rust,no_run
//! use replica_core::{NodeId, SessionId};
//! use replica_store::{FetchContext, MessageQueuing, Repository, SqliteStore};
//!
//! async fn example() -> replica_store::Result<()> {
//!     let store = SqliteStore::open("replica.db")?;
//!     let session = SessionId::generate();
//!     let peer = NodeId::from("*node-spoke1");
//!
//!     let queued = store.queue(&session, &peer).await?;
//!     let fetcher = store.message_fetcher(FetchContext::new(session, peer));
//!     # let _ = (queued, fetcher);
//!     Ok(())
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Guarded updates**: Reservations and session transitions are single
//!   `UPDATE ... WHERE` statements; affected-row counts decide the outcome
//! - **Hash gate**: An inbound update applies only if the receiver still holds
//!   the version the sender last saw
//! - **Embedded errors**: Fetch and process report failures inside their
//!   response envelopes so the peer always gets an answer

pub mod error;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use sqlite::{
    SqliteMessageAcknowledger, SqliteMessageFetcher, SqliteMessageProcessor, SqliteStore,
};
pub use traits::{
    AckContext, AckReport, CanonicalRecord, EntityFetching, FetchContext, MessageAcknowledging,
    MessageFetching, MessageProcessing, MessageQueuing, PeerRecordState, ProcessContext,
    RecordInventory, Repository, SessionManaging,
};
