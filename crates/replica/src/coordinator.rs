//! The Coordinator: one node's replication entry point.
//!
//! Bundles the node's repository with its configuration and runs sync
//! rounds against peers.

use serde::{Deserialize, Serialize};

use replica_core::{NodeId, PairId, SessionInfo, SyncPair};
use replica_store::{RecordInventory, Repository};
use replica_sync::{verify_convergence, ConvergenceResult, Peer, SyncConfig, SyncReport, SyncRound};

use crate::error::Result;

/// Configuration for the Coordinator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Sync configuration.
    pub sync: SyncConfig,
}

impl CoordinatorConfig {
    /// Parse a JSON document; absent keys keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Replication coordinator for one local node.
pub struct Coordinator<R: Repository> {
    round: SyncRound<R>,
}

impl<R: Repository> Coordinator<R> {
    /// Create a coordinator for `local` over `repo`.
    pub fn new(repo: R, local: NodeId, config: CoordinatorConfig) -> Self {
        Self {
            round: SyncRound::new(repo, local, config.sync),
        }
    }

    /// Get the repository.
    pub fn repository(&self) -> &R {
        self.round.repository()
    }

    pub fn sync_config(&self) -> &SyncConfig {
        self.round.config()
    }

    /// Run one round on `pair_id`, pushing local changes to `peer`.
    pub async fn sync_with<P: Peer>(&self, pair_id: &PairId, peer: &P) -> Result<SyncReport> {
        Ok(self.round.run(pair_id, peer).await?)
    }

    /// Resolve the pair joining two nodes by name, then sync with `peer`.
    pub async fn sync_with_named<P: Peer>(
        &self,
        local_name: &str,
        remote_name: &str,
        peer: &P,
    ) -> Result<SyncReport> {
        let pair = self.pair(local_name, remote_name).await?;
        tracing::debug!(pair = %pair.pair_id, local_name, remote_name, "resolved pair");
        self.sync_with(&pair.pair_id, peer).await
    }

    /// The pair joining two nodes, looked up by name in either direction.
    pub async fn pair(&self, local_name: &str, remote_name: &str) -> Result<SyncPair> {
        Ok(self
            .repository()
            .find_pair_by_names(local_name, remote_name)
            .await?)
    }

    /// Current session of a pair.
    pub async fn session(&self, pair_id: &PairId) -> Result<SessionInfo> {
        Ok(self.repository().query_session(pair_id).await?)
    }

    /// Compare this node's canonical records with another node's.
    pub async fn verify_with<O: RecordInventory>(&self, other: &O) -> Result<ConvergenceResult> {
        Ok(verify_convergence(self.repository(), other).await?)
    }
}
