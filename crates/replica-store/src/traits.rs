//! Capability traits: the swappable seams of the replication core.
//!
//! Each capability has exactly one production implementation (SQLite). The
//! [`Repository`] trait replaces a process-wide factory: callers hold a
//! repository and ask it for context-bound fetchers, processors and
//! acknowledgers.

use std::collections::HashMap;

use async_trait::async_trait;
use replica_core::{
    ChangeType, CloseSessionResult, CreateSessionResult, EntityNameItem, FetchResponse, NodeId,
    PairId, RecordHash, RecordId, SessionId, SessionInfo, SessionState, SyncEntityMessageRequest,
    SyncEntityMessageResponse, SyncPair, UpdateSessionResult,
};

use crate::error::{Result, StoreError};

/// Everything a fetcher is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchContext {
    pub session_id: SessionId,
    /// The node the batch is destined for.
    pub node_id: NodeId,
    /// Stop reading further records once this many bytes are accumulated.
    pub max_group_bytes_size: u64,
    /// Rows claimed per reservation round.
    pub max_msgs: u32,
}

impl FetchContext {
    pub fn new(session_id: SessionId, node_id: NodeId) -> Self {
        Self {
            session_id,
            node_id,
            max_group_bytes_size: 50,
            max_msgs: 1,
        }
    }

    /// Override the paging limits. A round must be able to claim at least
    /// one row, so `max_msgs` may not be zero.
    pub fn with_limits(mut self, max_group_bytes_size: u64, max_msgs: u32) -> Result<Self> {
        if max_msgs == 0 {
            return Err(StoreError::InvalidData(
                "max_msgs must be at least 1".to_string(),
            ));
        }
        self.max_group_bytes_size = max_group_bytes_size;
        self.max_msgs = max_msgs;
        Ok(self)
    }
}

/// Everything a processor is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessContext {
    pub session_id: SessionId,
    /// The node that sent the batch.
    pub node_id: NodeId,
    pub entities_by_plural_name: HashMap<String, EntityNameItem>,
}

/// Everything an acknowledger is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckContext {
    pub session_id: SessionId,
    /// The node that processed the batch.
    pub node_id: NodeId,
    pub entities_by_plural_name: HashMap<String, EntityNameItem>,
}

/// Tally of an applied acknowledgement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AckReport {
    /// Rows marked delivered.
    pub fast_batch: usize,
    /// Rows flagged for conflict resolution.
    pub conflicts: usize,
    /// Acks that matched no row of this batch.
    pub skipped: usize,
}

/// A canonical record row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalRecord {
    pub entity_singular_name: String,
    pub record_id: RecordId,
    pub data_version_name: String,
    pub record_hash: RecordHash,
    pub record_data: Vec<u8>,
    pub record_bytes_size: u64,
    pub is_delete: bool,
}

/// A peer-tracking row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecordState {
    pub node_id: NodeId,
    pub entity_singular_name: String,
    pub record_id: RecordId,
    pub session_bind_id: Option<String>,
    pub queue_bind_send_id: Option<String>,
    pub transaction_bind_send_id: Option<String>,
    pub transaction_bind_receive_id: Option<String>,
    pub sent_last_known_hash: Option<RecordHash>,
    pub peer_last_known_hash: Option<RecordHash>,
    pub is_conflict: bool,
    pub is_delete: bool,
    pub sent_sync_state: i64,
    pub changed_by_client: bool,
    pub record_bytes_size: u64,
}

/// Entity catalog lookups used to drive fetch and process.
#[async_trait]
pub trait EntityFetching: Send + Sync {
    /// Entities of the node's data version at `order_num` in the sequence
    /// for `change_type`.
    async fn find_entities_for_fetch(
        &self,
        order_num: i64,
        session_id: &SessionId,
        node_id: &NodeId,
        change_type: ChangeType,
    ) -> Result<Vec<EntityNameItem>>;

    /// All entities of the node's data version, keyed by plural name.
    async fn find_plural_entity_names_by_id(
        &self,
        session_id: &SessionId,
        node_id: &NodeId,
    ) -> Result<HashMap<String, EntityNameItem>>;

    /// Distinct order numbers of the node's data version, ascending.
    async fn find_fetch_order_numbers(
        &self,
        node_id: &NodeId,
        change_type: ChangeType,
    ) -> Result<Vec<i64>>;
}

/// Marks changed records dirty for a node and binds them to a session.
#[async_trait]
pub trait MessageQueuing: Send + Sync {
    /// Returns the number of dirty rows bound to the session for the node.
    async fn queue(&self, session_id: &SessionId, node_id: &NodeId) -> Result<usize>;
}

/// Builds budget-bounded, reservation-protected outbound batches.
#[async_trait]
pub trait MessageFetching: Send + Sync {
    /// Errors are embedded as `FetchResult::ErrorCreatingMsgs`.
    async fn fetch(&self, entities: &[EntityNameItem], change_type: ChangeType) -> FetchResponse;
}

/// Applies an inbound batch.
#[async_trait]
pub trait MessageProcessing: Send + Sync {
    /// Errors are embedded as `ProcessResult::Error`.
    async fn process(&self, request: &SyncEntityMessageRequest) -> SyncEntityMessageResponse;
}

/// Applies a peer's answer to the sender-side bookkeeping.
#[async_trait]
pub trait MessageAcknowledging: Send + Sync {
    async fn acknowledge(&self, response: &SyncEntityMessageResponse) -> Result<AckReport>;

    /// Free reservations of the session's dirty, non-conflicted rows so the
    /// next fetch can claim them again. Returns the number released.
    async fn release_reservations(&self) -> Result<usize>;
}

/// Guarded compare-and-swap transitions of a pair's session.
#[async_trait]
pub trait SessionManaging: Send + Sync {
    async fn create_session(
        &self,
        pair_id: &PairId,
        session_id: &SessionId,
    ) -> Result<CreateSessionResult>;

    async fn update_session_state(
        &self,
        pair_id: &PairId,
        session_id: &SessionId,
        new_state: SessionState,
    ) -> Result<UpdateSessionResult>;

    async fn close_session(
        &self,
        pair_id: &PairId,
        session_id: &SessionId,
    ) -> Result<CloseSessionResult>;

    async fn query_session(&self, pair_id: &PairId) -> Result<SessionInfo>;

    /// The pair joining two nodes, looked up by node name in either direction.
    async fn find_pair_by_names(
        &self,
        requesting_node_name: &str,
        target_node_name: &str,
    ) -> Result<SyncPair>;
}

/// Read access to the canonical record set.
#[async_trait]
pub trait RecordInventory: Send + Sync {
    /// `(entity, record id, hash)` for every canonical record, sorted.
    async fn record_hashes(&self) -> Result<Vec<(String, RecordId, RecordHash)>>;
}

/// A store that offers every capability.
pub trait Repository:
    EntityFetching + MessageQueuing + SessionManaging + RecordInventory + Send + Sync
{
    type Fetcher: MessageFetching;
    type Processor: MessageProcessing;
    type Acknowledger: MessageAcknowledging;

    fn message_fetcher(&self, ctx: FetchContext) -> Self::Fetcher;

    fn message_processor(&self, ctx: ProcessContext) -> Self::Processor;

    fn message_acknowledger(&self, ctx: AckContext) -> Self::Acknowledger;
}
