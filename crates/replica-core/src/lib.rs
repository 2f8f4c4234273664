//! # Replica Core
//!
//! Pure primitives for Replica: identifiers, sync states, the record codec,
//! catalog metadata, and the wire envelopes exchanged between peers.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`Record`] / [`EncodedRecord`] - Field map, its CBOR bytes and content hash
//! - [`SentSyncState`] / [`AckSyncState`] - What a sender believes, what a receiver did
//! - [`SyncEntityMessageRequest`] / [`SyncEntityMessageResponse`] - Batch and ack envelopes
//! - [`EntityFields`] - Field definitions driving per-entity SQL
//!
//! ## Hash Stability
//!
//! Record fields are kept in name order, so the same field values always
//! encode to the same bytes and hash to the same [`RecordHash`].

pub mod catalog;
pub mod error;
pub mod messages;
pub mod record;
pub mod session;
pub mod state;
pub mod types;

pub use catalog::{
    quote_identifier, validate_identifier, EntityDefinition, EntityFields, EntityNameItem,
    FieldDefinition, FieldType,
};
pub use error::CoreError;
pub use messages::{
    from_wire, to_wire, FetchResponse, FetchResult, ProcessResult, SyncDataMessageRequest,
    SyncDataMessageResponse, SyncDataMessagesRequest, SyncDataMessagesResponse,
    SyncEntityMessageRequest, SyncEntityMessageResponse,
};
pub use record::{EncodedRecord, FieldValue, Record};
pub use session::{
    CloseSessionResult, CreateSessionResult, SessionInfo, SyncPair, UpdateSessionResult,
};
pub use state::{AckSyncState, ChangeType, SentSyncState, SessionState};
pub use types::{BindId, NodeId, PairId, RecordHash, RecordId, SessionId};
