//! # Replica Sync
//!
//! Sync rounds that push one node's changes to a peer.
//!
//! ## Overview
//!
//! A [`SyncRound`] drives the store's capabilities in the order replication
//! needs them: it opens the pair's session, queues the local changes for the
//! peer node, pages them out through the fetch engine, hands each batch to a
//! [`Peer`] and applies the peer's acks. Running a round in each direction
//! makes the two nodes converge; [`verify_convergence`] checks that they did.
//!
//! ## Key Properties
//!
//! - **Exclusive**: One session per pair; a second round is rejected
//! - **Ordered**: Add/update batches go out before deletes, entity groups in
//!   catalog order
//! - **Resumable**: A failed round releases its reservations, so the next
//!   round picks the same records up again
//! - **Transport-agnostic**: [`Peer`] is the only seam to the other node
//!
//! ## Usage
//!
//! ```rust,no_run
//! use replica_core::{NodeId, PairId};
//! use replica_store::SqliteStore;
//! use replica_sync::{LocalPeer, SyncConfig, SyncRound};
//!
//! async fn example() -> replica_sync::Result<()> {
//!     let hub = SqliteStore::open("hub.db")?;
//!     let spoke = SqliteStore::open("spoke.db")?;
//!
//!     let round = SyncRound::new(hub, NodeId::from("*node-hub"), SyncConfig::default());
//!     let peer = LocalPeer::new(spoke, NodeId::from("*node-spoke1"));
//!
//!     let report = round.run(&PairId::from("*pair-hub-spoke1"), &peer).await?;
//!     println!("{} applied, {} in conflict", report.fast_batch, report.conflicts);
//!     Ok(())
//! }
//! ```
//!
//! ## Message Flow
//!
//! ```text
//! Sender                                Peer
//!   | queue, fetch page                  |
//!   |-------- SyncEntityMessageRequest ->|  apply under hash gate
//!   |<------- SyncEntityMessageResponse -|  read back, classify
//!   | acknowledge                        |
//!   |          ... until NoMsgs ...      |
//! ```

pub mod config;
pub mod convergence;
pub mod error;
pub mod peer;
pub mod round;

pub use config::{FetchLimits, SyncConfig};
pub use convergence::{compute_state_hash, verify_convergence, ConvergenceResult, RecordKey};
pub use error::{Result, SyncError};
pub use peer::{LocalPeer, Peer};
pub use round::{BatchRejection, SyncReport, SyncRound};
