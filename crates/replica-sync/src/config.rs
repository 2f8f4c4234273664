//! Sync round configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use replica_core::{NodeId, SessionId};
use replica_store::{FetchContext, Result};

/// Paging limits of the fetch engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchLimits {
    /// A batch stops taking records once this many bytes are in it.
    pub max_group_bytes_size: u64,
    /// Rows reserved per round trip to the store.
    pub max_msgs: u32,
}

impl Default for FetchLimits {
    fn default() -> Self {
        Self {
            max_group_bytes_size: 256 * 1024,
            max_msgs: 100,
        }
    }
}

impl FetchLimits {
    /// The fetch context for one session and destination node. Fails on a
    /// zero `max_msgs`.
    pub fn context(&self, session_id: SessionId, node_id: NodeId) -> Result<FetchContext> {
        FetchContext::new(session_id, node_id).with_limits(self.max_group_bytes_size, self.max_msgs)
    }
}

/// Configuration for sync behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub fetch: FetchLimits,
    /// How long a peer may take to answer one batch.
    pub delivery_timeout_ms: u64,
    /// Upper bound on batches per round, across both change types.
    pub max_batches_per_round: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fetch: FetchLimits::default(),
            delivery_timeout_ms: 30_000,
            max_batches_per_round: 10_000,
        }
    }
}

impl SyncConfig {
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }
}
