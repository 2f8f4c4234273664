//! One sync round against one peer.
//!
//! A round owns the pair's session from creation to close:
//!
//! ```text
//! create_session ─► Queuing ─► queue ─► Syncing
//!     ─► for AddOrUpdate, then Delete:
//!          for each order number:
//!            fetch ─► deliver ─► acknowledge   (until NoMsgs)
//!     ─► release unacknowledged reservations ─► close_session
//! ```
//!
//! Rows the peer never acknowledged are released before closing so the next
//! round offers them again.
//!
//! Any failure releases the session's outstanding reservations, moves the
//! session to `Canceling`, closes it and surfaces the error.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use replica_core::{
    BindId, ChangeType, CloseSessionResult, CreateSessionResult, FetchResult, NodeId, PairId,
    ProcessResult, SessionId, SessionState, SyncEntityMessageRequest, SyncEntityMessageResponse,
    UpdateSessionResult,
};
use replica_store::{AckContext, MessageAcknowledging, MessageFetching, Repository};

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::peer::Peer;

/// A batch the peer refused as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRejection {
    pub change_type: ChangeType,
    pub transaction_bind_id: BindId,
    pub message: String,
}

/// Result of a sync round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub session_id: SessionId,
    /// Dirty rows bound to the session by the queuer.
    pub queued: usize,
    /// Batches delivered to the peer.
    pub batches: usize,
    /// Records offered across all batches.
    pub records_sent: usize,
    /// Records the peer applied uncontested.
    pub fast_batch: usize,
    /// Records left flagged for conflict resolution.
    pub conflicts: usize,
    /// Acks that matched no row of their batch.
    pub skipped: usize,
    /// Reserved rows left without an ack, released for the next round.
    pub unacknowledged: usize,
    /// Batches the peer refused; each stops its change type.
    pub rejected: Vec<BatchRejection>,
}

impl SyncReport {
    fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            queued: 0,
            batches: 0,
            records_sent: 0,
            fast_batch: 0,
            conflicts: 0,
            skipped: 0,
            unacknowledged: 0,
            rejected: Vec::new(),
        }
    }
}

/// Drives sync rounds from one local node.
pub struct SyncRound<R: Repository> {
    repo: R,
    local: NodeId,
    config: SyncConfig,
}

impl<R: Repository> SyncRound<R> {
    /// Create a round driver for the `local` node's repository.
    pub fn new(repo: R, local: NodeId, config: SyncConfig) -> Self {
        Self {
            repo,
            local,
            config,
        }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Run one round on `pair_id`, sending local changes to `peer`.
    pub async fn run<P: Peer>(&self, pair_id: &PairId, peer: &P) -> Result<SyncReport> {
        let session_id = SessionId::generate();

        match self.repo.create_session(pair_id, &session_id).await? {
            CreateSessionResult::Ok => {}
            other => {
                return Err(SyncError::SessionRejected {
                    pair: pair_id.clone(),
                    reason: format!("{:?}", other),
                })
            }
        }
        tracing::info!(
            pair = %pair_id,
            session = %session_id,
            peer = %peer.node_id(),
            "sync round started"
        );

        let mut report = SyncReport::new(session_id.clone());
        match self.drive(pair_id, &session_id, peer, &mut report).await {
            Ok(()) => {
                self.close(pair_id, &session_id).await?;
                tracing::info!(
                    pair = %pair_id,
                    session = %session_id,
                    queued = report.queued,
                    batches = report.batches,
                    fast_batch = report.fast_batch,
                    conflicts = report.conflicts,
                    unacknowledged = report.unacknowledged,
                    rejected = report.rejected.len(),
                    "sync round finished"
                );
                Ok(report)
            }
            Err(e) => {
                tracing::error!(
                    pair = %pair_id,
                    session = %session_id,
                    error = %e,
                    "sync round failed"
                );
                self.cancel(pair_id, &session_id, peer.node_id()).await;
                Err(e)
            }
        }
    }

    async fn drive<P: Peer>(
        &self,
        pair_id: &PairId,
        session_id: &SessionId,
        peer: &P,
        report: &mut SyncReport,
    ) -> Result<()> {
        let remote = peer.node_id();

        self.advance(pair_id, session_id, SessionState::Queuing)
            .await?;
        report.queued = self.repo.queue(session_id, remote).await?;
        self.advance(pair_id, session_id, SessionState::Syncing)
            .await?;

        let fetcher = self
            .repo
            .message_fetcher(self.config.fetch.context(session_id.clone(), remote.clone())?);
        let acknowledger = self.repo.message_acknowledger(AckContext {
            session_id: session_id.clone(),
            node_id: remote.clone(),
            entities_by_plural_name: self
                .repo
                .find_plural_entity_names_by_id(session_id, remote)
                .await?,
        });

        for change_type in [ChangeType::AddOrUpdate, ChangeType::Delete] {
            self.sync_change_type(change_type, session_id, peer, &fetcher, &acknowledger, report)
                .await?;
        }

        report.unacknowledged = acknowledger.release_reservations().await?;
        if report.unacknowledged > 0 {
            tracing::warn!(
                session = %session_id,
                peer = %remote,
                unacknowledged = report.unacknowledged,
                "peer left records unacknowledged"
            );
        }
        Ok(())
    }

    async fn sync_change_type<P: Peer>(
        &self,
        change_type: ChangeType,
        session_id: &SessionId,
        peer: &P,
        fetcher: &R::Fetcher,
        acknowledger: &R::Acknowledger,
        report: &mut SyncReport,
    ) -> Result<()> {
        let remote = peer.node_id();
        let order_numbers = self
            .repo
            .find_fetch_order_numbers(remote, change_type)
            .await?;

        for order_num in order_numbers {
            let mut entities = self
                .repo
                .find_entities_for_fetch(order_num, session_id, remote, change_type)
                .await?;

            while !entities.is_empty() {
                let fetched = fetcher.fetch(&entities, change_type).await;
                match fetched.result {
                    FetchResult::NoMsgs => break,
                    FetchResult::ErrorCreatingMsgs => {
                        return Err(SyncError::FetchFailed {
                            change_type,
                            message: fetched.result_msg,
                        })
                    }
                    FetchResult::HasMsgs => {}
                }
                if report.batches >= self.config.max_batches_per_round {
                    return Err(SyncError::BatchLimitExceeded(
                        self.config.max_batches_per_round,
                    ));
                }

                entities.retain(|e| {
                    !fetched
                        .completed_singular_entities
                        .contains(&e.singular_name)
                });
                report.batches += 1;
                report.records_sent += fetched.request.msg_count();

                let answer = self.deliver(session_id, peer, &fetched.request).await?;
                if answer.result == ProcessResult::Error {
                    tracing::warn!(
                        session = %session_id,
                        peer = %remote,
                        bind = %answer.transaction_bind_id,
                        change_type = ?change_type,
                        message = %answer.result_msg,
                        "peer rejected batch"
                    );
                    report.rejected.push(BatchRejection {
                        change_type,
                        transaction_bind_id: answer.transaction_bind_id,
                        message: answer.result_msg,
                    });
                    acknowledger.release_reservations().await?;
                    return Ok(());
                }

                let ack = acknowledger.acknowledge(&answer).await?;
                report.fast_batch += ack.fast_batch;
                report.conflicts += ack.conflicts;
                report.skipped += ack.skipped;
            }
        }
        Ok(())
    }

    /// Hand a batch to the peer under the delivery timeout.
    async fn deliver<P: Peer>(
        &self,
        session_id: &SessionId,
        peer: &P,
        request: &SyncEntityMessageRequest,
    ) -> Result<SyncEntityMessageResponse> {
        let timeout = self.config.delivery_timeout();
        let answer = tokio::time::timeout(timeout, peer.deliver(session_id, &self.local, request))
            .await
            .map_err(|_| {
                SyncError::Timeout(format!(
                    "peer {} did not answer batch {} within {:?}",
                    peer.node_id(),
                    request.transaction_bind_id,
                    timeout
                ))
            })??;

        if answer.transaction_bind_id != request.transaction_bind_id {
            return Err(SyncError::PeerError(format!(
                "answer for batch {} carries bind {}",
                request.transaction_bind_id, answer.transaction_bind_id
            )));
        }
        Ok(answer)
    }

    async fn advance(
        &self,
        pair_id: &PairId,
        session_id: &SessionId,
        state: SessionState,
    ) -> Result<()> {
        match self
            .repo
            .update_session_state(pair_id, session_id, state)
            .await?
        {
            UpdateSessionResult::Ok => {
                tracing::debug!(pair = %pair_id, session = %session_id, state = %state, "session advanced");
                Ok(())
            }
            other => Err(SyncError::SessionRejected {
                pair: pair_id.clone(),
                reason: format!("cannot move to {}: {:?}", state, other),
            }),
        }
    }

    async fn close(&self, pair_id: &PairId, session_id: &SessionId) -> Result<()> {
        match self.repo.close_session(pair_id, session_id).await? {
            CloseSessionResult::Ok => Ok(()),
            other => Err(SyncError::SessionRejected {
                pair: pair_id.clone(),
                reason: format!("cannot close: {:?}", other),
            }),
        }
    }

    /// Unwind a failed round. Each step is attempted even if an earlier one
    /// fails; the round's own error is what the caller sees.
    async fn cancel(&self, pair_id: &PairId, session_id: &SessionId, remote: &NodeId) {
        let acknowledger = self.repo.message_acknowledger(AckContext {
            session_id: session_id.clone(),
            node_id: remote.clone(),
            entities_by_plural_name: HashMap::new(),
        });
        if let Err(e) = acknowledger.release_reservations().await {
            tracing::error!(session = %session_id, error = %e, "failed to release reservations");
        }
        if let Err(e) = self
            .advance(pair_id, session_id, SessionState::Canceling)
            .await
        {
            tracing::warn!(session = %session_id, error = %e, "failed to mark session canceling");
        }
        if let Err(e) = self.close(pair_id, session_id).await {
            tracing::error!(session = %session_id, error = %e, "failed to close session");
        }
    }
}
