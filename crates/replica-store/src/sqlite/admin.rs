//! Administrative writes and inspection reads.
//!
//! Nodes, pairs and the entity catalog are created administratively, and
//! local application writes land in the canonical record table. None of these
//! run during a sync round.

use rusqlite::{params, OptionalExtension};

use replica_core::{
    EncodedRecord, EntityDefinition, FieldDefinition, NodeId, PairId, RecordHash, RecordId,
};

use super::{now_millis, SqliteStore};
use crate::error::Result;
use crate::traits::{CanonicalRecord, PeerRecordState};

impl SqliteStore {
    /// Register a data version. Existing versions are left alone.
    pub async fn register_data_version(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.db
            .call(move |conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO sync_data_version (DataVersionName, RecordCreated)
                     VALUES (?1, ?2)",
                    params![name, now_millis()],
                )?;
                Ok(())
            })
            .await
    }

    /// Register a node under a data version.
    pub async fn register_node(
        &self,
        node_id: &NodeId,
        node_name: &str,
        data_version: &str,
    ) -> Result<()> {
        let node_id = node_id.clone();
        let node_name = node_name.to_string();
        let data_version = data_version.to_string();
        self.db
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO sync_node (NodeId, NodeName, DataVersionName, RecordCreated)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![node_id.as_str(), node_name, data_version, now_millis()],
                )?;
                Ok(())
            })
            .await
    }

    /// Register a pair joining two nodes. The session starts `Inactive`.
    pub async fn register_pair(
        &self,
        pair_id: &PairId,
        pair_name: &str,
        node_a: &NodeId,
        node_b: &NodeId,
    ) -> Result<()> {
        let pair_id = pair_id.clone();
        let pair_name = pair_name.to_string();
        let node_a = node_a.clone();
        let node_b = node_b.clone();
        self.db
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO sync_pair (PairId, PairName, RecordCreated) VALUES (?1, ?2, ?3)",
                    params![pair_id.as_str(), pair_name, now_millis()],
                )?;
                for (node, target) in [(&node_a, &node_b), (&node_b, &node_a)] {
                    tx.execute(
                        "INSERT INTO sync_pair_nodes (PairId, NodeId, TargetNodeId)
                         VALUES (?1, ?2, ?3)",
                        params![pair_id.as_str(), node.as_str(), target.as_str()],
                    )?;
                }
                tx.commit()?;
                Ok(())
            })
            .await
    }

    /// Register an entity in a data version's catalog.
    pub async fn register_entity(
        &self,
        data_version: &str,
        definition: &EntityDefinition,
    ) -> Result<()> {
        let data_version = data_version.to_string();
        let definition = definition.clone();
        self.db
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO sync_data_entity (DataVersionName, EntitySingularName,
                        EntityPluralName, ProcOrderAddUpdate, ProcOrderDelete, EntityHandlerUri)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        data_version,
                        definition.names.singular_name,
                        definition.names.plural_name,
                        definition.process_order_add_update,
                        definition.process_order_delete,
                        definition.handler_uri,
                    ],
                )?;
                Ok(())
            })
            .await
    }

    /// Register a field of an entity.
    pub async fn register_field(
        &self,
        data_version: &str,
        entity_singular_name: &str,
        field: &FieldDefinition,
    ) -> Result<()> {
        let data_version = data_version.to_string();
        let entity = entity_singular_name.to_string();
        let field = field.clone();
        self.db
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO sync_data_field (DataVersionName, EntitySingularName, FieldName,
                        DataTypeName, IsPrimaryKey)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        data_version,
                        entity,
                        field.name,
                        field.field_type.as_str(),
                        field.is_primary_key,
                    ],
                )?;
                Ok(())
            })
            .await
    }

    /// Write a local change to the canonical record table.
    ///
    /// The next queue run for each peer notices the new hash.
    pub async fn put_record(
        &self,
        data_version: &str,
        entity_singular_name: &str,
        record_id: &RecordId,
        encoded: &EncodedRecord,
        is_delete: bool,
    ) -> Result<()> {
        let data_version = data_version.to_string();
        let entity = entity_singular_name.to_string();
        let record_id = record_id.clone();
        let encoded = encoded.clone();
        self.db
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO sync_state (EntitySingularName, RecordId, DataVersionName,
                        RecordHash, RecordData, RecordBytesSize, IsDelete, RecordCreated)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                     ON CONFLICT (EntitySingularName, RecordId) DO UPDATE SET
                        RecordHash = excluded.RecordHash,
                        RecordData = excluded.RecordData,
                        RecordBytesSize = excluded.RecordBytesSize,
                        IsDelete = excluded.IsDelete",
                    params![
                        entity,
                        record_id.as_str(),
                        data_version,
                        encoded.hash.as_str(),
                        encoded.data.as_ref(),
                        encoded.bytes_size as i64,
                        is_delete,
                        now_millis(),
                    ],
                )?;
                Ok(())
            })
            .await
    }

    /// Read one canonical record.
    pub async fn canonical_record(
        &self,
        entity_singular_name: &str,
        record_id: &RecordId,
    ) -> Result<Option<CanonicalRecord>> {
        let entity = entity_singular_name.to_string();
        let record_id = record_id.clone();
        self.db
            .call(move |conn| {
                conn.query_row(
                    "SELECT EntitySingularName, RecordId, DataVersionName, RecordHash, RecordData,
                            RecordBytesSize, IsDelete
                     FROM sync_state WHERE EntitySingularName = ?1 AND RecordId = ?2",
                    params![entity, record_id.as_str()],
                    |row| {
                        Ok(CanonicalRecord {
                            entity_singular_name: row.get(0)?,
                            record_id: RecordId(row.get(1)?),
                            data_version_name: row.get(2)?,
                            record_hash: RecordHash(row.get(3)?),
                            record_data: row.get(4)?,
                            record_bytes_size: row.get::<_, i64>(5)? as u64,
                            is_delete: row.get(6)?,
                        })
                    },
                )
                .optional()
                .map_err(Into::into)
            })
            .await
    }

    /// Read one peer-tracking row.
    pub async fn peer_state(
        &self,
        node_id: &NodeId,
        entity_singular_name: &str,
        record_id: &RecordId,
    ) -> Result<Option<PeerRecordState>> {
        let node_id = node_id.clone();
        let entity = entity_singular_name.to_string();
        let record_id = record_id.clone();
        self.db
            .call(move |conn| {
                conn.query_row(
                    "SELECT NodeId, EntitySingularName, RecordId, SessionBindId, QueueBindSendId,
                            TransactionBindSendId, TransactionBindReceiveId, SentLastKnownHash,
                            PeerLastKnownHash, IsConflict, IsDelete, SentSyncState,
                            ChangedByClient, RecordBytesSize
                     FROM sync_peer_state
                     WHERE NodeId = ?1 AND EntitySingularName = ?2 AND RecordId = ?3",
                    params![node_id.as_str(), entity, record_id.as_str()],
                    |row| {
                        Ok(PeerRecordState {
                            node_id: NodeId(row.get(0)?),
                            entity_singular_name: row.get(1)?,
                            record_id: RecordId(row.get(2)?),
                            session_bind_id: row.get(3)?,
                            queue_bind_send_id: row.get(4)?,
                            transaction_bind_send_id: row.get(5)?,
                            transaction_bind_receive_id: row.get(6)?,
                            sent_last_known_hash: row.get::<_, Option<String>>(7)?.map(RecordHash),
                            peer_last_known_hash: row.get::<_, Option<String>>(8)?.map(RecordHash),
                            is_conflict: row.get(9)?,
                            is_delete: row.get(10)?,
                            sent_sync_state: row.get(11)?,
                            changed_by_client: row.get(12)?,
                            record_bytes_size: row.get::<_, i64>(13)? as u64,
                        })
                    },
                )
                .optional()
                .map_err(Into::into)
            })
            .await
    }
}
