//! Change Processor: applies an inbound batch under a hash gate and reads
//! back which records landed.
//!
//! A record is fast-batch when its peer row ends up bound to this batch's
//! transaction id. Anything else lost the race against a local change and is
//! acknowledged as a conflict together with the receiver's current version.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::{params, params_from_iter, Connection, TransactionBehavior};

use replica_core::{
    AckSyncState, ProcessResult, RecordHash, RecordId, SyncDataMessageResponse,
    SyncDataMessagesResponse, SyncEntityMessageRequest, SyncEntityMessageResponse,
};

use super::catalog::{node_data_version, node_entity_fields};
use super::plan::{ChangePlan, EntitySchema, ReadBack};
use super::{now_millis, Db};
use crate::error::{Result, StoreError};
use crate::traits::{MessageProcessing, ProcessContext};

const SQL_MARK_CONFLICT: &str = "
UPDATE sync_peer_state SET IsConflict = 1, LastUpdated = ?1
WHERE NodeId = ?2 AND EntitySingularName = ?3 AND RecordId = ?4";

/// Processor bound to one session and sending node.
pub struct SqliteMessageProcessor {
    db: Db,
    ctx: ProcessContext,
}

impl SqliteMessageProcessor {
    pub(crate) fn new(db: Db, ctx: ProcessContext) -> Self {
        Self { db, ctx }
    }

    pub fn context(&self) -> &ProcessContext {
        &self.ctx
    }
}

/// Post-apply state of one submitted record.
struct ReadBackRow {
    ord: usize,
    entity_plural_name: String,
    transaction_bind_receive_id: Option<String>,
    record_hash: Option<String>,
    record_data: Option<Vec<u8>>,
    record_bytes_size: Option<i64>,
    is_delete: Option<bool>,
}

fn load_schemas(
    conn: &Connection,
    ctx: &ProcessContext,
    request: &SyncEntityMessageRequest,
) -> Result<HashMap<String, EntitySchema>> {
    let data_version = node_data_version(conn, &ctx.node_id)?;
    let mut schemas = HashMap::new();
    for group in &request.items {
        if schemas.contains_key(&group.entity_plural_name) {
            continue;
        }
        let names = ctx
            .entities_by_plural_name
            .get(&group.entity_plural_name)
            .ok_or_else(|| {
                StoreError::NoDataFound(format!("entity {}", group.entity_plural_name))
            })?;
        let fields = node_entity_fields(conn, &ctx.node_id, &names.singular_name)?;
        schemas.insert(
            group.entity_plural_name.clone(),
            EntitySchema {
                names: names.clone(),
                data_version: data_version.clone(),
                fields,
            },
        );
    }
    Ok(schemas)
}

fn classify(row: &ReadBackRow, bind: &str) -> AckSyncState {
    if row.transaction_bind_receive_id.as_deref() == Some(bind) {
        AckSyncState::AckFastBatch
    } else if row.record_hash.is_none() || row.is_delete == Some(true) {
        AckSyncState::AckDeleteAndUpdateConflictWithNoAutoResolverAvailable
    } else {
        AckSyncState::AckFieldLevelConflictWithNoAutoResolverAvailable
    }
}

fn process_batch(
    conn: &mut Connection,
    ctx: &ProcessContext,
    request: &SyncEntityMessageRequest,
) -> Result<SyncEntityMessageResponse> {
    let now = now_millis();
    let bind = request.transaction_bind_id.as_str();
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let schemas = load_schemas(&tx, ctx, request)?;
    let plan = ChangePlan::build(request, &ctx.node_id, &schemas, now)?;
    let read_back = ReadBack::build(request, &ctx.node_id, &schemas)?;

    for statement in &plan.statements {
        tx.execute(&statement.sql, params_from_iter(statement.params.iter()))?;
    }

    let mut items: Vec<SyncDataMessagesResponse> = Vec::new();
    let mut conflicts = 0usize;

    if let Some(read_back) = read_back {
        let rows = {
            let mut stmt = tx.prepare(&read_back.statement.sql)?;
            let rows = stmt
                .query_map(params_from_iter(read_back.statement.params.iter()), |row| {
                    Ok(ReadBackRow {
                        ord: row.get::<_, i64>(0)? as usize,
                        entity_plural_name: row.get(1)?,
                        transaction_bind_receive_id: row.get(2)?,
                        record_hash: row.get(3)?,
                        record_data: row.get(4)?,
                        record_bytes_size: row.get(5)?,
                        is_delete: row.get(6)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        if rows.len() != read_back.submitted.len() {
            return Err(StoreError::InvariantViolation(format!(
                "read back {} of {} submitted records",
                rows.len(),
                read_back.submitted.len()
            )));
        }

        for row in rows {
            let submitted = read_back.submitted.get(row.ord).ok_or_else(|| {
                StoreError::InvariantViolation(format!("read back unknown ordinal {}", row.ord))
            })?;
            let sync_state = classify(&row, bind);

            let ack = if sync_state.is_fast_batch() {
                SyncDataMessageResponse {
                    record_id: RecordId::new(submitted.record_id.clone()),
                    request_hash: Some(RecordHash::new(submitted.request_hash.clone())),
                    response_hash: row.record_hash.map(RecordHash),
                    sync_state,
                    record_bytes_size: row.record_bytes_size.unwrap_or_default() as u64,
                    record_data: None,
                }
            } else {
                conflicts += 1;
                tx.execute(
                    SQL_MARK_CONFLICT,
                    params![
                        now,
                        ctx.node_id.as_str(),
                        submitted.entity_singular_name,
                        submitted.record_id
                    ],
                )?;
                tracing::warn!(
                    session = %ctx.session_id,
                    sender = %ctx.node_id,
                    entity = %submitted.entity_singular_name,
                    record = %submitted.record_id,
                    ?sync_state,
                    "record requires conflict resolution"
                );
                SyncDataMessageResponse {
                    record_id: RecordId::new(submitted.record_id.clone()),
                    request_hash: Some(RecordHash::new(submitted.request_hash.clone())),
                    response_hash: row.record_hash.map(RecordHash),
                    sync_state,
                    record_bytes_size: row.record_bytes_size.unwrap_or_default() as u64,
                    record_data: row.record_data.map(Bytes::from),
                }
            };

            match items
                .iter_mut()
                .find(|g| g.entity_plural_name == row.entity_plural_name)
            {
                Some(group) => group.msgs.push(ack),
                None => items.push(SyncDataMessagesResponse {
                    entity_plural_name: row.entity_plural_name,
                    msgs: vec![ack],
                }),
            }
        }
    }

    tx.commit()?;

    let total = request.msg_count();
    let result_msg = if conflicts == 0 {
        "All records are fast batch".to_string()
    } else {
        format!(
            "{} of {} records require conflict resolution",
            conflicts, total
        )
    };
    tracing::debug!(
        session = %ctx.session_id,
        sender = %ctx.node_id,
        bind,
        statements = plan.statements.len(),
        "{}",
        result_msg
    );

    Ok(SyncEntityMessageResponse {
        transaction_bind_id: request.transaction_bind_id.clone(),
        result: ProcessResult::Ok,
        result_msg,
        items,
    })
}

#[async_trait]
impl MessageProcessing for SqliteMessageProcessor {
    async fn process(&self, request: &SyncEntityMessageRequest) -> SyncEntityMessageResponse {
        let ctx = self.ctx.clone();
        let owned = request.clone();

        match self
            .db
            .call(move |conn| process_batch(conn, &ctx, &owned))
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(
                    session = %self.ctx.session_id,
                    sender = %self.ctx.node_id,
                    bind = %request.transaction_bind_id,
                    error = %e,
                    "batch rejected"
                );
                SyncEntityMessageResponse::error(request.transaction_bind_id.clone(), e.to_string())
            }
        }
    }
}
