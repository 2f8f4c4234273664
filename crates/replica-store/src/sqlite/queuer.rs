//! Change Queuer: marks records dirty for a node and binds them to a session.

use async_trait::async_trait;
use rusqlite::{params, TransactionBehavior};

use replica_core::{NodeId, SentSyncState, SessionId};

use super::{now_millis, SqliteStore};
use crate::error::Result;
use crate::traits::MessageQueuing;

/// Track every canonical record the node has never been offered.
const SQL_TRACK_NEW_RECORDS: &str = "
INSERT INTO sync_peer_state (NodeId, EntitySingularName, RecordId, SentLastKnownHash,
    ChangedByClient, SentSyncState, RecordBytesSize, IsDelete, LastUpdated, RecordCreated)
SELECT ?1, s.EntitySingularName, s.RecordId, s.RecordHash, 1, ?2, s.RecordBytesSize,
    s.IsDelete, ?3, ?3
FROM sync_state s
WHERE NOT EXISTS (
    SELECT 1 FROM sync_peer_state p
    WHERE p.NodeId = ?1
      AND p.EntitySingularName = s.EntitySingularName
      AND p.RecordId = s.RecordId
)";

/// Re-dirty clean rows whose canonical record moved on since it was last
/// sent, or was deleted after sending.
const SQL_REDIRTY_CHANGED_RECORDS: &str = "
UPDATE sync_peer_state SET
    ChangedByClient = 1,
    RecordBytesSize = (SELECT s.RecordBytesSize FROM sync_state s
        WHERE s.EntitySingularName = sync_peer_state.EntitySingularName
          AND s.RecordId = sync_peer_state.RecordId),
    IsDelete = (SELECT s.IsDelete FROM sync_state s
        WHERE s.EntitySingularName = sync_peer_state.EntitySingularName
          AND s.RecordId = sync_peer_state.RecordId),
    LastUpdated = ?2
WHERE NodeId = ?1
  AND ChangedByClient = 0
  AND EXISTS (
    SELECT 1 FROM sync_state s
    WHERE s.EntitySingularName = sync_peer_state.EntitySingularName
      AND s.RecordId = sync_peer_state.RecordId
      AND (sync_peer_state.SentLastKnownHash IS NULL
           OR s.RecordHash <> sync_peer_state.SentLastKnownHash
           OR s.IsDelete <> sync_peer_state.IsDelete)
  )";

/// Dirty rows not yet reserved follow the canonical delete flag and size,
/// so a record deleted after queuing leaves through the delete pass.
const SQL_REFRESH_PENDING_ROWS: &str = "
UPDATE sync_peer_state SET
    RecordBytesSize = (SELECT s.RecordBytesSize FROM sync_state s
        WHERE s.EntitySingularName = sync_peer_state.EntitySingularName
          AND s.RecordId = sync_peer_state.RecordId),
    IsDelete = (SELECT s.IsDelete FROM sync_state s
        WHERE s.EntitySingularName = sync_peer_state.EntitySingularName
          AND s.RecordId = sync_peer_state.RecordId),
    LastUpdated = ?2
WHERE NodeId = ?1
  AND ChangedByClient = 1
  AND QueueBindSendId IS NULL
  AND EXISTS (
    SELECT 1 FROM sync_state s
    WHERE s.EntitySingularName = sync_peer_state.EntitySingularName
      AND s.RecordId = sync_peer_state.RecordId
      AND (s.IsDelete <> sync_peer_state.IsDelete
           OR s.RecordBytesSize <> sync_peer_state.RecordBytesSize)
  )";

const SQL_BIND_SESSION: &str = "
UPDATE sync_peer_state SET SessionBindId = ?1
WHERE NodeId = ?2 AND ChangedByClient = 1
  AND (SessionBindId IS NULL OR SessionBindId <> ?1)";

const SQL_COUNT_BOUND: &str = "
SELECT count(*) FROM sync_peer_state
WHERE NodeId = ?1 AND ChangedByClient = 1 AND SessionBindId = ?2";

#[async_trait]
impl MessageQueuing for SqliteStore {
    async fn queue(&self, session_id: &SessionId, node_id: &NodeId) -> Result<usize> {
        let session_id = session_id.clone();
        let node_id = node_id.clone();

        self.db
            .call(move |conn| {
                let now = now_millis();
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

                let tracked = tx.execute(
                    SQL_TRACK_NEW_RECORDS,
                    params![
                        node_id.as_str(),
                        SentSyncState::NeverSentToPeer.to_i64(),
                        now
                    ],
                )?;
                let refreshed =
                    tx.execute(SQL_REFRESH_PENDING_ROWS, params![node_id.as_str(), now])?;
                let redirtied =
                    tx.execute(SQL_REDIRTY_CHANGED_RECORDS, params![node_id.as_str(), now])?;
                let bound = tx.execute(
                    SQL_BIND_SESSION,
                    params![session_id.as_str(), node_id.as_str()],
                )?;
                let queued: i64 = tx.query_row(
                    SQL_COUNT_BOUND,
                    params![node_id.as_str(), session_id.as_str()],
                    |row| row.get(0),
                )?;

                tx.commit()?;

                tracing::debug!(
                    node = %node_id,
                    session = %session_id,
                    tracked,
                    refreshed,
                    redirtied,
                    bound,
                    queued,
                    "queued changes"
                );
                Ok(queued as usize)
            })
            .await
    }
}
