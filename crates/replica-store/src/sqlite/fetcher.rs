//! Fetch Engine: budget-bounded, reservation-protected outbound batches.
//!
//! Each round claims a handful of dirty rows under a fresh queue token with a
//! single guarded `UPDATE`. A row whose `QueueBindSendId` is already set is
//! invisible to every other fetcher, so two concurrent fetches over the same
//! session never emit the same record twice.

use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::{params, Connection, TransactionBehavior};

use replica_core::{
    BindId, ChangeType, EntityNameItem, FetchResponse, FetchResult, RecordHash, RecordId,
    SentSyncState, SyncDataMessageRequest, SyncDataMessagesRequest, SyncEntityMessageRequest,
};

use super::Db;
use crate::error::{Result, StoreError};
use crate::traits::{FetchContext, MessageFetching};

const SQL_RESERVE: &str = "
UPDATE sync_peer_state SET QueueBindSendId = ?1
WHERE rowid IN (
    SELECT rowid FROM sync_peer_state
    WHERE NodeId = ?2
      AND EntitySingularName = ?3
      AND SessionBindId = ?4
      AND ChangedByClient = 1
      AND QueueBindSendId IS NULL
      AND IsDelete = ?5
    ORDER BY RecordId
    LIMIT ?6
)";

const SQL_MATERIALIZE: &str = "
SELECT p.RecordId, s.RecordHash, p.PeerLastKnownHash, p.SentSyncState,
       s.RecordBytesSize, s.RecordData
FROM sync_peer_state p
JOIN sync_state s
  ON s.EntitySingularName = p.EntitySingularName AND s.RecordId = p.RecordId
WHERE p.QueueBindSendId = ?1 AND p.NodeId = ?2
ORDER BY p.EntitySingularName, p.RecordId";

const SQL_STAMP_TRANSACTION: &str = "
UPDATE sync_peer_state SET TransactionBindSendId = ?1
WHERE QueueBindSendId = ?2 AND NodeId = ?3";

/// Fetcher bound to one session and destination node.
pub struct SqliteMessageFetcher {
    db: Db,
    ctx: FetchContext,
}

impl SqliteMessageFetcher {
    pub(crate) fn new(db: Db, ctx: FetchContext) -> Self {
        Self { db, ctx }
    }

    pub fn context(&self) -> &FetchContext {
        &self.ctx
    }
}

/// What a fetch produced, including the partial batch when it failed midway.
struct FetchOutcome {
    request: SyncEntityMessageRequest,
    completed: Vec<String>,
    error: Option<StoreError>,
}

/// Mutable state threaded through the entity loop.
struct Batch {
    request: SyncEntityMessageRequest,
    completed: Vec<String>,
    queue_tokens: Vec<BindId>,
    total_bytes: u64,
}

impl Batch {
    fn push(&mut self, plural_name: &str, msg: SyncDataMessageRequest) {
        self.total_bytes += msg.record_bytes_size;
        match self
            .request
            .items
            .iter_mut()
            .find(|g| g.entity_plural_name == plural_name)
        {
            Some(group) => group.msgs.push(msg),
            None => self.request.items.push(SyncDataMessagesRequest {
                entity_plural_name: plural_name.to_string(),
                msgs: vec![msg],
            }),
        }
    }
}

/// Claim up to `max_msgs` rows under `token` and read them back.
fn reserve_round(
    conn: &mut Connection,
    ctx: &FetchContext,
    entity: &EntityNameItem,
    change_type: ChangeType,
    token: &BindId,
) -> Result<Vec<SyncDataMessageRequest>> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    tx.execute(
        SQL_RESERVE,
        params![
            token.as_str(),
            ctx.node_id.as_str(),
            entity.singular_name,
            ctx.session_id.as_str(),
            change_type.is_delete(),
            ctx.max_msgs,
        ],
    )?;

    let rows = {
        let mut stmt = tx.prepare(SQL_MATERIALIZE)?;
        let rows = stmt
            .query_map(params![token.as_str(), ctx.node_id.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, Vec<u8>>(5)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows
    };

    tx.commit()?;

    let mut msgs = Vec::with_capacity(rows.len());
    for (record_id, hash, peer_hash, state, size, data) in rows {
        msgs.push(SyncDataMessageRequest {
            record_id: RecordId(record_id),
            record_hash: RecordHash(hash),
            last_known_peer_hash: peer_hash.map(RecordHash),
            sent_sync_state: SentSyncState::from_i64(state)?.outgoing(),
            record_bytes_size: size as u64,
            record_data: Bytes::from(data),
        });
    }
    Ok(msgs)
}

fn fill_batch(
    conn: &mut Connection,
    ctx: &FetchContext,
    entities: &[EntityNameItem],
    change_type: ChangeType,
    batch: &mut Batch,
) -> Result<()> {
    'entities: for entity in entities {
        let mut first_round = true;
        loop {
            let token = BindId::generate();
            let msgs = reserve_round(conn, ctx, entity, change_type, &token)?;

            if msgs.is_empty() {
                if first_round {
                    batch.completed.push(entity.singular_name.clone());
                }
                break;
            }

            batch.queue_tokens.push(token);
            for msg in msgs {
                batch.push(&entity.plural_name, msg);
            }
            first_round = false;

            if batch.total_bytes >= ctx.max_group_bytes_size {
                break 'entities;
            }
        }
    }

    if batch.queue_tokens.is_empty() {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for token in &batch.queue_tokens {
        tx.execute(
            SQL_STAMP_TRANSACTION,
            params![
                batch.request.transaction_bind_id.as_str(),
                token.as_str(),
                ctx.node_id.as_str()
            ],
        )?;
    }
    tx.commit()?;
    Ok(())
}

fn run_fetch(
    conn: &mut Connection,
    ctx: &FetchContext,
    entities: &[EntityNameItem],
    change_type: ChangeType,
) -> FetchOutcome {
    let mut batch = Batch {
        request: SyncEntityMessageRequest::new(change_type.is_delete(), BindId::generate()),
        completed: Vec::new(),
        queue_tokens: Vec::new(),
        total_bytes: 0,
    };
    let error = fill_batch(conn, ctx, entities, change_type, &mut batch).err();
    FetchOutcome {
        request: batch.request,
        completed: batch.completed,
        error,
    }
}

#[async_trait]
impl MessageFetching for SqliteMessageFetcher {
    async fn fetch(&self, entities: &[EntityNameItem], change_type: ChangeType) -> FetchResponse {
        let ctx = self.ctx.clone();
        let entity_list = entities.to_vec();

        let outcome = self
            .db
            .call(move |conn| Ok(run_fetch(conn, &ctx, &entity_list, change_type)))
            .await;

        match outcome {
            Ok(FetchOutcome {
                request,
                completed,
                error: Some(e),
            }) => {
                tracing::error!(
                    session = %self.ctx.session_id,
                    node = %self.ctx.node_id,
                    error = %e,
                    "fetch failed after {} messages",
                    request.msg_count()
                );
                FetchResponse {
                    result: FetchResult::ErrorCreatingMsgs,
                    result_msg: e.to_string(),
                    request,
                    completed_singular_entities: completed,
                }
            }
            Ok(FetchOutcome {
                request,
                completed,
                error: None,
            }) => {
                let count = request.msg_count();
                let (result, result_msg) = if count == 0 {
                    (FetchResult::NoMsgs, "no pending changes".to_string())
                } else {
                    (
                        FetchResult::HasMsgs,
                        format!(
                            "{} messages in {} entities, {} bytes",
                            count,
                            request.items.len(),
                            request.total_bytes()
                        ),
                    )
                };
                tracing::debug!(
                    session = %self.ctx.session_id,
                    node = %self.ctx.node_id,
                    bind = %request.transaction_bind_id,
                    ?change_type,
                    "{}",
                    result_msg
                );
                FetchResponse {
                    result,
                    result_msg,
                    request,
                    completed_singular_entities: completed,
                }
            }
            Err(e) => {
                tracing::error!(
                    session = %self.ctx.session_id,
                    node = %self.ctx.node_id,
                    error = %e,
                    "fetch failed"
                );
                FetchResponse {
                    result: FetchResult::ErrorCreatingMsgs,
                    result_msg: e.to_string(),
                    request: SyncEntityMessageRequest::new(
                        change_type.is_delete(),
                        BindId::generate(),
                    ),
                    completed_singular_entities: Vec::new(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::SqliteStore;
    use crate::traits::{MessageQueuing, Repository};
    use replica_core::{EncodedRecord, NodeId, SessionId};

    const HUB: &str = "*node-hub";
    const SPOKE: &str = "*node-spoke2";

    fn entities() -> Vec<EntityNameItem> {
        vec![
            EntityNameItem::new("A", "As"),
            EntityNameItem::new("B", "Bs"),
            EntityNameItem::new("C", "Cs"),
        ]
    }

    /// Records of known sizes in two entities, plus two deletes.
    async fn scenario_store() -> (SqliteStore, SessionId) {
        let store = SqliteStore::open_memory().unwrap();
        store.register_data_version("v1").await.unwrap();
        let records: [(&str, &str, usize, bool); 9] = [
            ("A", "r01", 50, false),
            ("A", "r02", 10, false),
            ("A", "r03", 10, false),
            ("A", "r04", 29, false),
            ("B", "r05", 2, false),
            ("B", "r06", 20, false),
            ("B", "r07", 30, false),
            ("A", "r08", 50, true),
            ("B", "r09", 20, true),
        ];
        for (entity, id, size, is_delete) in records {
            let mut body = id.as_bytes().to_vec();
            body.resize(size, b'.');
            let encoded = EncodedRecord::from_bytes(body);
            store
                .put_record("v1", entity, &RecordId::from(id), &encoded, is_delete)
                .await
                .unwrap();
        }

        let session = SessionId::from("session-1");
        store.queue(&session, &NodeId::from(HUB)).await.unwrap();
        store
            .queue(&SessionId::from("session-2"), &NodeId::from(SPOKE))
            .await
            .unwrap();
        (store, session)
    }

    fn fetcher(store: &SqliteStore, session: &SessionId) -> SqliteMessageFetcher {
        store.message_fetcher(FetchContext::new(session.clone(), NodeId::from(HUB)))
    }

    fn shape(response: &FetchResponse) -> (usize, usize) {
        (response.request.items.len(), response.request.msg_count())
    }

    #[tokio::test]
    async fn test_add_update_pages_respect_budget() {
        let (store, session) = scenario_store().await;
        let fetcher = fetcher(&store, &session);
        let all = entities();

        let first = fetcher.fetch(&all, ChangeType::AddOrUpdate).await;
        assert_eq!(first.result, FetchResult::HasMsgs);
        assert_eq!(shape(&first), (1, 1));
        assert_eq!(first.request.items[0].msgs[0].record_id.as_str(), "r01");
        assert!(first.completed_singular_entities.is_empty());

        let second = fetcher.fetch(&all, ChangeType::AddOrUpdate).await;
        assert_eq!(shape(&second), (2, 4));
        assert_eq!(second.request.items[0].entity_plural_name, "As");
        assert_eq!(second.request.items[0].msgs.len(), 3);
        assert_eq!(second.request.items[1].msgs[0].record_id.as_str(), "r05");

        let third = fetcher.fetch(&all, ChangeType::AddOrUpdate).await;
        assert_eq!(shape(&third), (1, 2));
        assert_eq!(third.completed_singular_entities, vec!["A".to_string()]);

        let remaining: Vec<_> = all
            .into_iter()
            .filter(|e| !third.completed_singular_entities.contains(&e.singular_name))
            .collect();
        let fourth = fetcher.fetch(&remaining, ChangeType::AddOrUpdate).await;
        assert_eq!(fourth.result, FetchResult::NoMsgs);
        assert_eq!(shape(&fourth), (0, 0));
        assert_eq!(
            fourth.completed_singular_entities,
            vec!["B".to_string(), "C".to_string()]
        );
    }

    #[tokio::test]
    async fn test_delete_pages() {
        let (store, session) = scenario_store().await;
        let fetcher = fetcher(&store, &session);
        let all = entities();

        let first = fetcher.fetch(&all, ChangeType::Delete).await;
        assert!(first.request.is_delete);
        assert_eq!(shape(&first), (1, 1));
        assert_eq!(first.request.items[0].msgs[0].record_id.as_str(), "r08");

        let second = fetcher.fetch(&all, ChangeType::Delete).await;
        assert_eq!(shape(&second), (1, 1));
        assert_eq!(second.request.items[0].entity_plural_name, "Bs");

        let third = fetcher.fetch(&all, ChangeType::Delete).await;
        assert_eq!(third.result, FetchResult::NoMsgs);
    }

    #[tokio::test]
    async fn test_first_send_presented_as_first_time() {
        let (store, session) = scenario_store().await;
        let response = fetcher(&store, &session)
            .fetch(&entities(), ChangeType::AddOrUpdate)
            .await;
        let msg = &response.request.items[0].msgs[0];
        assert_eq!(msg.sent_sync_state, SentSyncState::FirstTimeSentToPeer);
        assert!(msg.last_known_peer_hash.is_none());
        assert_eq!(msg.record_hash, RecordHash::of(&msg.record_data));
    }

    #[tokio::test]
    async fn test_materialized_rows_carry_transaction_bind() {
        let (store, session) = scenario_store().await;
        let response = fetcher(&store, &session)
            .fetch(&entities(), ChangeType::AddOrUpdate)
            .await;
        let row = store
            .peer_state(&NodeId::from(HUB), "A", &RecordId::from("r01"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            row.transaction_bind_send_id.as_deref(),
            Some(response.request.transaction_bind_id.as_str())
        );
        assert!(row.queue_bind_send_id.is_some());

        let untouched = store
            .peer_state(&NodeId::from(SPOKE), "A", &RecordId::from("r01"))
            .await
            .unwrap()
            .unwrap();
        assert!(untouched.queue_bind_send_id.is_none());
        assert!(untouched.transaction_bind_send_id.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_fetchers_never_share_records() {
        let (store, session) = scenario_store().await;
        let ctx = FetchContext::new(session.clone(), NodeId::from(HUB)).with_limits(1_000, 2)
            .unwrap();
        let a = store.message_fetcher(ctx.clone());
        let b = store.message_fetcher(ctx);
        let all = entities();

        let (ra, rb) = tokio::join!(
            a.fetch(&all, ChangeType::AddOrUpdate),
            b.fetch(&all, ChangeType::AddOrUpdate)
        );

        let mut ids: Vec<String> = [ra, rb]
            .iter()
            .flat_map(|r| r.request.items.iter())
            .flat_map(|g| g.msgs.iter())
            .map(|m| m.record_id.as_str().to_string())
            .collect();
        let total = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), total);
        assert_eq!(total, 7);
    }

    #[tokio::test]
    async fn test_store_error_returns_partial_batch() {
        let (store, session) = scenario_store().await;
        store
            .execute_batch(&format!(
                "UPDATE sync_peer_state SET SentSyncState = 99
                 WHERE NodeId = '{}' AND EntitySingularName = 'B';",
                HUB
            ))
            .await
            .unwrap();
        let fetcher = store.message_fetcher(
            FetchContext::new(session, NodeId::from(HUB))
                .with_limits(1_000, 10)
                .unwrap(),
        );

        let response = fetcher.fetch(&entities(), ChangeType::AddOrUpdate).await;

        assert_eq!(response.result, FetchResult::ErrorCreatingMsgs);
        assert!(response.result_msg.contains("unknown sent sync state: 99"));
        assert_eq!(shape(&response), (1, 4));
        assert_eq!(response.request.items[0].entity_plural_name, "As");
    }

    #[tokio::test]
    async fn test_record_deleted_after_queuing_leaves_as_delete() {
        let store = SqliteStore::open_memory().unwrap();
        store.register_data_version("v1").await.unwrap();
        let id = RecordId::from("r1");
        let body = EncodedRecord::from_bytes(b"short-lived".to_vec());
        store.put_record("v1", "A", &id, &body, false).await.unwrap();

        let session = SessionId::from("s1");
        let node = NodeId::from(HUB);
        store.queue(&session, &node).await.unwrap();
        store.put_record("v1", "A", &id, &body, true).await.unwrap();
        store.queue(&session, &node).await.unwrap();

        let fetcher = store.message_fetcher(
            FetchContext::new(session, node.clone())
                .with_limits(1_000, 10)
                .unwrap(),
        );
        let entity = [EntityNameItem::new("A", "As")];

        let updates = fetcher.fetch(&entity, ChangeType::AddOrUpdate).await;
        assert_eq!(updates.result, FetchResult::NoMsgs);

        let deletes = fetcher.fetch(&entity, ChangeType::Delete).await;
        assert_eq!(deletes.result, FetchResult::HasMsgs);
        assert!(deletes.request.is_delete);
        assert_eq!(deletes.request.items[0].msgs[0].record_id, id);
        let row = store.peer_state(&node, "A", &id).await.unwrap().unwrap();
        assert!(row.is_delete);
    }

    #[tokio::test]
    async fn test_unknown_session_has_nothing() {
        let (store, _) = scenario_store().await;
        let response = fetcher(&store, &SessionId::from("other"))
            .fetch(&entities(), ChangeType::AddOrUpdate)
            .await;
        assert_eq!(response.result, FetchResult::NoMsgs);
        assert_eq!(response.completed_singular_entities.len(), 3);
    }

    proptest::proptest! {
        #![proptest_config(proptest::prelude::ProptestConfig::with_cases(24))]

        #[test]
        fn prop_pages_cover_every_record_once(
            sizes in proptest::collection::vec(1usize..80, 1..20),
            budget in 1u64..120,
            max_msgs in 1u32..4,
        ) {
            let runtime = tokio::runtime::Runtime::new().unwrap();
            let (pages, expected) = runtime.block_on(async {
                let store = SqliteStore::open_memory().unwrap();
                store.register_data_version("v1").await.unwrap();
                for (i, size) in sizes.iter().enumerate() {
                    let mut body = format!("r{:03}", i).into_bytes();
                    body.resize(*size, b'.');
                    store
                        .put_record("v1", "A", &RecordId::new(format!("r{:03}", i)),
                            &EncodedRecord::from_bytes(body), false)
                        .await
                        .unwrap();
                }
                let session = SessionId::from("s");
                store.queue(&session, &NodeId::from(HUB)).await.unwrap();
                let fetcher = store.message_fetcher(
                    FetchContext::new(session, NodeId::from(HUB))
                        .with_limits(budget, max_msgs)
                        .unwrap(),
                );
                let entity = [EntityNameItem::new("A", "As")];
                let mut pages = Vec::new();
                loop {
                    let response = fetcher.fetch(&entity, ChangeType::AddOrUpdate).await;
                    if response.result != FetchResult::HasMsgs {
                        break;
                    }
                    pages.push(response.request);
                }
                (pages, sizes.len())
            });

            let mut seen: Vec<String> = Vec::new();
            for page in &pages {
                let msgs: Vec<_> = page.items.iter().flat_map(|g| g.msgs.iter()).collect();
                let before_last_round: u64 = msgs
                    .iter()
                    .take(msgs.len().saturating_sub(max_msgs as usize))
                    .map(|m| m.record_bytes_size)
                    .sum();
                proptest::prop_assert!(before_last_round < budget);
                seen.extend(msgs.iter().map(|m| m.record_id.as_str().to_string()));
            }
            let total = seen.len();
            seen.sort();
            seen.dedup();
            proptest::prop_assert_eq!(seen.len(), total);
            proptest::prop_assert_eq!(total, expected);
        }
    }
}
