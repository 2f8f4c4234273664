//! The seam between a sync round and the node it replicates to.
//!
//! A round hands each batch to a [`Peer`] and acknowledges whatever comes
//! back. How the batch travels is the peer's business: [`LocalPeer`] applies
//! it to another repository in the same process, other implementations may
//! put it on a network.

use async_trait::async_trait;

use replica_core::{
    from_wire, to_wire, NodeId, SessionId, SyncEntityMessageRequest, SyncEntityMessageResponse,
};
use replica_store::{MessageProcessing, ProcessContext, Repository};

use crate::error::Result;

/// A node that accepts batches.
#[async_trait]
pub trait Peer: Send + Sync {
    /// The node batches are delivered to.
    fn node_id(&self) -> &NodeId;

    /// Apply `request` from `sender` and return the per-record acks.
    ///
    /// A batch the peer refuses comes back as a `ProcessResult::Error`
    /// response; `Err` means the exchange itself failed.
    async fn deliver(
        &self,
        session_id: &SessionId,
        sender: &NodeId,
        request: &SyncEntityMessageRequest,
    ) -> Result<SyncEntityMessageResponse>;
}

/// A peer backed by a repository in this process.
///
/// Both envelopes go through the wire codec, so a local round exercises the
/// same encoding a remote one would.
pub struct LocalPeer<R: Repository> {
    repo: R,
    node_id: NodeId,
}

impl<R: Repository> LocalPeer<R> {
    pub fn new(repo: R, node_id: NodeId) -> Self {
        Self { repo, node_id }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }
}

#[async_trait]
impl<R: Repository> Peer for LocalPeer<R> {
    fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    async fn deliver(
        &self,
        session_id: &SessionId,
        sender: &NodeId,
        request: &SyncEntityMessageRequest,
    ) -> Result<SyncEntityMessageResponse> {
        let request: SyncEntityMessageRequest = from_wire(&to_wire(request)?)?;

        let entities_by_plural_name = self
            .repo
            .find_plural_entity_names_by_id(session_id, sender)
            .await?;
        let processor = self.repo.message_processor(ProcessContext {
            session_id: session_id.clone(),
            node_id: sender.clone(),
            entities_by_plural_name,
        });
        let response = processor.process(&request).await;

        tracing::debug!(
            peer = %self.node_id,
            sender = %sender,
            bind = %request.transaction_bind_id,
            result = ?response.result,
            "batch delivered"
        );

        Ok(from_wire(&to_wire(&response)?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replica_core::{AckSyncState, BindId, ChangeType, ProcessResult};
    use replica_store::{EntityFetching, FetchContext, MessageFetching, MessageQueuing};
    use replica_testkit::fixtures::{TestFixture, HUB_NODE, SPOKE_NODE};

    #[tokio::test]
    async fn test_local_peer_applies_batch() {
        let hub = TestFixture::new(HUB_NODE, SPOKE_NODE).await.unwrap();
        let spoke = TestFixture::new(SPOKE_NODE, HUB_NODE).await.unwrap();
        hub.put_contact("c1", "Smith", 6).await.unwrap();

        let session = SessionId::from("session-1");
        hub.store.queue(&session, &hub.remote).await.unwrap();
        let entities = hub
            .store
            .find_entities_for_fetch(1, &session, &hub.remote, ChangeType::AddOrUpdate)
            .await
            .unwrap();
        let fetch = hub
            .store
            .message_fetcher(FetchContext::new(session.clone(), hub.remote.clone()))
            .fetch(&entities, ChangeType::AddOrUpdate)
            .await;

        let peer = LocalPeer::new(spoke.store.clone(), spoke.local.clone());
        let response = peer
            .deliver(&session, &hub.local, &fetch.request)
            .await
            .unwrap();

        assert_eq!(response.result, ProcessResult::Ok);
        let acks: Vec<_> = response.acks().collect();
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].0, "Contacts");
        assert_eq!(acks[0].1.sync_state, AckSyncState::AckFastBatch);
    }

    #[tokio::test]
    async fn test_local_peer_rejects_delete_batch() {
        let spoke = TestFixture::new(SPOKE_NODE, HUB_NODE).await.unwrap();
        let peer = LocalPeer::new(spoke.store.clone(), spoke.local.clone());

        let request = SyncEntityMessageRequest::new(true, BindId::generate());
        let response = peer
            .deliver(&SessionId::from("s"), &spoke.remote, &request)
            .await
            .unwrap();
        assert_eq!(response.result, ProcessResult::Error);
    }
}
