//! Wire envelopes exchanged between peers.
//!
//! A fetch produces a [`SyncEntityMessageRequest`]: per-entity groups of
//! changed records. The receiving peer answers with a
//! [`SyncEntityMessageResponse`] carrying one ack per record.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::state::{AckSyncState, SentSyncState};
use crate::types::{BindId, RecordHash, RecordId};

/// One changed record offered to a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncDataMessageRequest {
    pub record_id: RecordId,
    pub record_hash: RecordHash,
    /// The hash the sender believes the peer holds; absent on first sends.
    pub last_known_peer_hash: Option<RecordHash>,
    pub sent_sync_state: SentSyncState,
    pub record_bytes_size: u64,
    pub record_data: Bytes,
}

/// All offered records of one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncDataMessagesRequest {
    pub entity_plural_name: String,
    pub msgs: Vec<SyncDataMessageRequest>,
}

/// A batch of changed records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncEntityMessageRequest {
    pub is_delete: bool,
    pub transaction_bind_id: BindId,
    pub items: Vec<SyncDataMessagesRequest>,
}

impl SyncEntityMessageRequest {
    pub fn new(is_delete: bool, transaction_bind_id: BindId) -> Self {
        Self {
            is_delete,
            transaction_bind_id,
            items: Vec::new(),
        }
    }

    /// Total record messages across all groups.
    pub fn msg_count(&self) -> usize {
        self.items.iter().map(|g| g.msgs.len()).sum()
    }

    /// Sum of `record_bytes_size` across all messages.
    pub fn total_bytes(&self) -> u64 {
        self.items
            .iter()
            .flat_map(|g| g.msgs.iter())
            .map(|m| m.record_bytes_size)
            .sum()
    }
}

/// Outcome classification of a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchResult {
    HasMsgs,
    NoMsgs,
    ErrorCreatingMsgs,
}

/// Result of one fetch call.
///
/// On `ErrorCreatingMsgs` the partially built request is still returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchResponse {
    pub result: FetchResult,
    pub result_msg: String,
    pub request: SyncEntityMessageRequest,
    /// Entities with nothing pending for this session; later pages may skip them.
    pub completed_singular_entities: Vec<String>,
}

/// Per-record acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncDataMessageResponse {
    pub record_id: RecordId,
    pub request_hash: Option<RecordHash>,
    /// The receiver's canonical hash after apply; `None` if it holds no copy.
    pub response_hash: Option<RecordHash>,
    pub sync_state: AckSyncState,
    pub record_bytes_size: u64,
    /// The receiver's canonical payload, included on conflicts.
    pub record_data: Option<Bytes>,
}

/// All acks of one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncDataMessagesResponse {
    pub entity_plural_name: String,
    pub msgs: Vec<SyncDataMessageResponse>,
}

/// Outcome of processing a whole batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessResult {
    Ok,
    Error,
}

/// The receiver's answer to a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncEntityMessageResponse {
    pub transaction_bind_id: BindId,
    pub result: ProcessResult,
    pub result_msg: String,
    pub items: Vec<SyncDataMessagesResponse>,
}

impl SyncEntityMessageResponse {
    /// A response that rejects the whole batch.
    pub fn error(transaction_bind_id: BindId, msg: impl Into<String>) -> Self {
        Self {
            transaction_bind_id,
            result: ProcessResult::Error,
            result_msg: msg.into(),
            items: Vec::new(),
        }
    }

    /// Iterate every ack with its entity plural name.
    pub fn acks(&self) -> impl Iterator<Item = (&str, &SyncDataMessageResponse)> {
        self.items
            .iter()
            .flat_map(|g| g.msgs.iter().map(move |m| (g.entity_plural_name.as_str(), m)))
    }
}

/// Encode an envelope for the wire.
pub fn to_wire<T: Serialize>(value: &T) -> Result<Vec<u8>, CoreError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| CoreError::EncodingError(e.to_string()))?;
    Ok(buf)
}

/// Decode an envelope from the wire.
pub fn from_wire<T: DeserializeOwned>(data: &[u8]) -> Result<T, CoreError> {
    ciborium::from_reader(data).map_err(|e| CoreError::DecodingError(e.to_string()))
}
