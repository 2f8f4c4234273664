//! Session state machine over guarded compare-and-swap updates.
//!
//! Every transition is a single `UPDATE ... WHERE` whose guard encodes the
//! expected current state. The affected-row count decides the outcome; on a
//! miss the current row is read back only to explain why.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use replica_core::{
    CloseSessionResult, CreateSessionResult, PairId, SessionId, SessionInfo, SessionState,
    SyncPair, UpdateSessionResult,
};

use super::{expect_at_most_one, now_millis, SqliteStore};
use crate::error::{Result, StoreError};
use crate::traits::SessionManaging;

fn read_session(conn: &Connection, pair_id: &PairId) -> Result<SessionInfo> {
    let row = conn
        .query_row(
            "SELECT SyncSessionState, SyncSessionId, SyncSessionStart
             FROM sync_pair WHERE PairId = ?1",
            params![pair_id.as_str()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                ))
            },
        )
        .optional()?
        .ok_or_else(|| StoreError::NoDataFound(format!("pair {}", pair_id)))?;

    Ok(SessionInfo {
        state: row.0.parse()?,
        session_id: row.1.map(SessionId),
        start: row.2,
    })
}

const SQL_FIND_PAIR_BY_NAMES: &str = "
SELECT p.PairId, p.PairName, p.MaxSesDurValue, p.MaxSesDurUnit, p.SyncDataTransForm,
       p.SyncMsgTransForm, p.SyncMsgSecPol, p.SyncConflictUri
FROM sync_pair_nodes pn
JOIN sync_node n ON n.NodeId = pn.NodeId
JOIN sync_node t ON t.NodeId = pn.TargetNodeId
JOIN sync_pair p ON p.PairId = pn.PairId
WHERE (n.NodeName = ?1 AND t.NodeName = ?2) OR (n.NodeName = ?2 AND t.NodeName = ?1)
LIMIT 3";

#[async_trait]
impl SessionManaging for SqliteStore {
    async fn create_session(
        &self,
        pair_id: &PairId,
        session_id: &SessionId,
    ) -> Result<CreateSessionResult> {
        let pair_id = pair_id.clone();
        let session_id = session_id.clone();
        self.db
            .call(move |conn| {
                let affected = conn.execute(
                    "UPDATE sync_pair
                     SET SyncSessionId = ?1, SyncSessionState = ?2, SyncSessionStart = ?3
                     WHERE PairId = ?4 AND SyncSessionState = ?5",
                    params![
                        session_id.as_str(),
                        SessionState::Initializing.as_str(),
                        now_millis(),
                        pair_id.as_str(),
                        SessionState::Inactive.as_str(),
                    ],
                )?;
                if expect_at_most_one(affected, "create session")? {
                    tracing::info!(pair = %pair_id, session = %session_id, "session created");
                    return Ok(CreateSessionResult::Ok);
                }

                let current = read_session(conn, &pair_id)?;
                if current.session_id.as_ref() == Some(&session_id) {
                    Ok(CreateSessionResult::ThisSessionIdAlreadyActive)
                } else {
                    tracing::debug!(
                        pair = %pair_id,
                        session = %session_id,
                        active = ?current.session_id,
                        "pair held by another session"
                    );
                    Ok(CreateSessionResult::DifferentSessionIdAlreadyActive {
                        active: current.session_id,
                    })
                }
            })
            .await
    }

    async fn update_session_state(
        &self,
        pair_id: &PairId,
        session_id: &SessionId,
        new_state: SessionState,
    ) -> Result<UpdateSessionResult> {
        if !new_state.is_active() {
            return Err(StoreError::InvalidData(
                "sessions are closed with close_session, not moved to Inactive".to_string(),
            ));
        }
        let pair_id = pair_id.clone();
        let session_id = session_id.clone();
        self.db
            .call(move |conn| {
                let affected = conn.execute(
                    "UPDATE sync_pair SET SyncSessionState = ?1
                     WHERE PairId = ?2 AND SyncSessionId = ?3 AND SyncSessionState <> ?4",
                    params![
                        new_state.as_str(),
                        pair_id.as_str(),
                        session_id.as_str(),
                        SessionState::Inactive.as_str(),
                    ],
                )?;
                if expect_at_most_one(affected, "update session state")? {
                    tracing::info!(
                        pair = %pair_id,
                        session = %session_id,
                        state = %new_state,
                        "session state changed"
                    );
                    return Ok(UpdateSessionResult::Ok);
                }

                let current = read_session(conn, &pair_id)?;
                Ok(UpdateSessionResult::CouldNotFindActiveSessionToUpdate {
                    actual_session_id: current.session_id,
                    actual_state: current.state,
                })
            })
            .await
    }

    async fn close_session(
        &self,
        pair_id: &PairId,
        session_id: &SessionId,
    ) -> Result<CloseSessionResult> {
        let pair_id = pair_id.clone();
        let session_id = session_id.clone();
        self.db
            .call(move |conn| {
                let affected = conn.execute(
                    "UPDATE sync_pair
                     SET SyncSessionId = NULL, SyncSessionStart = NULL, SyncSessionState = ?1
                     WHERE PairId = ?2 AND SyncSessionId = ?3 AND SyncSessionState <> ?1",
                    params![
                        SessionState::Inactive.as_str(),
                        pair_id.as_str(),
                        session_id.as_str(),
                    ],
                )?;
                if expect_at_most_one(affected, "close session")? {
                    tracing::info!(pair = %pair_id, session = %session_id, "session closed");
                    return Ok(CloseSessionResult::Ok);
                }

                let current = read_session(conn, &pair_id)?;
                match current.session_id {
                    Some(active) if current.state.is_active() => {
                        Ok(CloseSessionResult::DifferentSessionIdAlreadyActive { active })
                    }
                    _ => Ok(CloseSessionResult::ThisSessionIdAlreadyInactive),
                }
            })
            .await
    }

    async fn query_session(&self, pair_id: &PairId) -> Result<SessionInfo> {
        let pair_id = pair_id.clone();
        self.db.call(move |conn| read_session(conn, &pair_id)).await
    }

    async fn find_pair_by_names(
        &self,
        requesting_node_name: &str,
        target_node_name: &str,
    ) -> Result<SyncPair> {
        let requesting = requesting_node_name.to_string();
        let target = target_node_name.to_string();
        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(SQL_FIND_PAIR_BY_NAMES)?;
                let rows = stmt
                    .query_map(params![requesting, target], |row| {
                        Ok((
                            PairId(row.get(0)?),
                            row.get::<_, String>(1)?,
                            row.get::<_, i64>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, Option<String>>(4)?,
                            row.get::<_, Option<String>>(5)?,
                            row.get::<_, Option<String>>(6)?,
                            row.get::<_, Option<String>>(7)?,
                        ))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;

                let pair_id = match rows.as_slice() {
                    [] => {
                        return Err(StoreError::NoDataFound(format!(
                            "pair between {} and {}",
                            requesting, target
                        )))
                    }
                    [a, b] if a.0 == b.0 => a.0.clone(),
                    _ => {
                        return Err(StoreError::InvalidData(format!(
                            "expected 2 pair node rows between {} and {}, found {}",
                            requesting,
                            target,
                            rows.len()
                        )))
                    }
                };

                let session = read_session(conn, &pair_id)?;
                let first = rows.into_iter().next().ok_or_else(|| {
                    StoreError::NoDataFound(format!("pair {}", pair_id))
                })?;
                Ok(SyncPair {
                    pair_id,
                    pair_name: first.1,
                    max_session_duration_value: first.2,
                    max_session_duration_unit: first.3,
                    data_transform: first.4,
                    message_transform: first.5,
                    message_security_policy: first.6,
                    conflict_uri: first.7,
                    session,
                })
            })
            .await
    }
}
