//! Acknowledger: folds a peer's answer back into the sender's peer rows.

use async_trait::async_trait;
use rusqlite::{params, TransactionBehavior};

use replica_core::{ProcessResult, SentSyncState, SyncEntityMessageResponse};

use super::{expect_at_most_one, now_millis, Db};
use crate::error::{Result, StoreError};
use crate::traits::{AckContext, AckReport, MessageAcknowledging};

/// The peer now holds `?1`. The row stays dirty only if the canonical
/// record moved on while the batch was in flight.
const SQL_ACK_DELIVERED: &str = "
UPDATE sync_peer_state SET
    SentLastKnownHash = ?1,
    PeerLastKnownHash = ?1,
    SentSyncState = ?2,
    QueueBindSendId = NULL,
    SessionBindId = NULL,
    IsConflict = 0,
    ChangedByClient = CASE WHEN (
        SELECT s.RecordHash FROM sync_state s
        WHERE s.EntitySingularName = sync_peer_state.EntitySingularName
          AND s.RecordId = sync_peer_state.RecordId
    ) = ?1 THEN 0 ELSE 1 END,
    LastUpdated = ?3
WHERE NodeId = ?4 AND EntitySingularName = ?5 AND RecordId = ?6
  AND TransactionBindSendId = ?7";

const SQL_ACK_CONFLICT: &str = "
UPDATE sync_peer_state SET IsConflict = 1, LastUpdated = ?1
WHERE NodeId = ?2 AND EntitySingularName = ?3 AND RecordId = ?4
  AND TransactionBindSendId = ?5";

const SQL_RELEASE: &str = "
UPDATE sync_peer_state SET QueueBindSendId = NULL
WHERE NodeId = ?1 AND SessionBindId = ?2 AND ChangedByClient = 1 AND IsConflict = 0
  AND QueueBindSendId IS NOT NULL";

/// Acknowledger bound to one session and receiving node.
pub struct SqliteMessageAcknowledger {
    db: Db,
    ctx: AckContext,
}

impl SqliteMessageAcknowledger {
    pub(crate) fn new(db: Db, ctx: AckContext) -> Self {
        Self { db, ctx }
    }
}

#[async_trait]
impl MessageAcknowledging for SqliteMessageAcknowledger {
    async fn acknowledge(&self, response: &SyncEntityMessageResponse) -> Result<AckReport> {
        if response.result == ProcessResult::Error {
            return Err(StoreError::InvalidData(format!(
                "batch {} was rejected by the peer: {}",
                response.transaction_bind_id, response.result_msg
            )));
        }

        let ctx = self.ctx.clone();
        let response = response.clone();
        self.db
            .call(move |conn| {
                let now = now_millis();
                let bind = response.transaction_bind_id.as_str();
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let mut report = AckReport::default();

                for (plural, ack) in response.acks() {
                    let Some(entity) = ctx.entities_by_plural_name.get(plural) else {
                        tracing::warn!(
                            node = %ctx.node_id,
                            entity = plural,
                            record = %ack.record_id,
                            "ack for unknown entity skipped"
                        );
                        report.skipped += 1;
                        continue;
                    };

                    let (affected, is_conflict) = if ack.sync_state.needs_resolution() {
                        let affected = tx.execute(
                            SQL_ACK_CONFLICT,
                            params![
                                now,
                                ctx.node_id.as_str(),
                                entity.singular_name,
                                ack.record_id.as_str(),
                                bind
                            ],
                        )?;
                        (affected, true)
                    } else {
                        let affected = tx.execute(
                            SQL_ACK_DELIVERED,
                            params![
                                ack.response_hash.as_ref().map(|h| h.as_str()),
                                SentSyncState::StandardSentToPeer.to_i64(),
                                now,
                                ctx.node_id.as_str(),
                                entity.singular_name,
                                ack.record_id.as_str(),
                                bind
                            ],
                        )?;
                        (affected, false)
                    };

                    if !expect_at_most_one(affected, "acknowledge record")? {
                        tracing::warn!(
                            node = %ctx.node_id,
                            entity = %entity.singular_name,
                            record = %ack.record_id,
                            bind,
                            "ack matched no record of this batch"
                        );
                        report.skipped += 1;
                    } else if is_conflict {
                        report.conflicts += 1;
                    } else {
                        report.fast_batch += 1;
                    }
                }

                tx.commit()?;
                tracing::debug!(
                    session = %ctx.session_id,
                    node = %ctx.node_id,
                    bind,
                    fast_batch = report.fast_batch,
                    conflicts = report.conflicts,
                    skipped = report.skipped,
                    "acknowledged batch"
                );
                Ok(report)
            })
            .await
    }

    async fn release_reservations(&self) -> Result<usize> {
        let ctx = self.ctx.clone();
        self.db
            .call(move |conn| {
                let released = conn.execute(
                    SQL_RELEASE,
                    params![ctx.node_id.as_str(), ctx.session_id.as_str()],
                )?;
                if released > 0 {
                    tracing::info!(
                        session = %ctx.session_id,
                        node = %ctx.node_id,
                        released,
                        "released unacknowledged reservations"
                    );
                }
                Ok(released)
            })
            .await
    }
}
