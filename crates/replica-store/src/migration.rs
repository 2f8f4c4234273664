//! Database schema migrations for SQLite.
//!
//! Versioned migrations: each one transforms the schema from version N to
//! N+1 and is recorded in `schema_migrations`.

use rusqlite::Connection;

use crate::error::{Result, StoreError};
use crate::sqlite::now_millis;

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// Idempotent: safe to call on every open.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
        }

        tx.commit()?;
        tracing::debug!(version = CURRENT_VERSION, "schema migrated");
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: catalog, pair/session, canonical records, peer tracking.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE sync_data_version (
            DataVersionName TEXT PRIMARY KEY,
            RecordCreated INTEGER NOT NULL
        );

        CREATE TABLE sync_node (
            NodeId TEXT PRIMARY KEY,
            NodeName TEXT NOT NULL UNIQUE,
            DataVersionName TEXT NOT NULL REFERENCES sync_data_version(DataVersionName),
            RecordCreated INTEGER NOT NULL
        );

        -- Session columns are mutated only through guarded updates.
        CREATE TABLE sync_pair (
            PairId TEXT PRIMARY KEY,
            PairName TEXT NOT NULL,
            MaxSesDurValue INTEGER NOT NULL DEFAULT 0,
            MaxSesDurUnit TEXT NOT NULL DEFAULT 'min',
            SyncDataTransForm TEXT,
            SyncMsgTransForm TEXT,
            SyncMsgSecPol TEXT,
            SyncSessionId TEXT,
            SyncSessionState TEXT NOT NULL DEFAULT 'Inactive',
            SyncSessionStart INTEGER,
            SyncConflictUri TEXT,
            RecordCreated INTEGER NOT NULL
        );

        -- Two rows per pair, one per direction.
        CREATE TABLE sync_pair_nodes (
            PairId TEXT NOT NULL REFERENCES sync_pair(PairId),
            NodeId TEXT NOT NULL REFERENCES sync_node(NodeId),
            TargetNodeId TEXT NOT NULL REFERENCES sync_node(NodeId),
            PRIMARY KEY (PairId, NodeId)
        );

        CREATE TABLE sync_data_entity (
            DataVersionName TEXT NOT NULL REFERENCES sync_data_version(DataVersionName),
            EntitySingularName TEXT NOT NULL,
            EntityPluralName TEXT NOT NULL,
            ProcOrderAddUpdate INTEGER NOT NULL,
            ProcOrderDelete INTEGER NOT NULL,
            EntityHandlerUri TEXT,
            PRIMARY KEY (DataVersionName, EntitySingularName),
            UNIQUE (DataVersionName, EntityPluralName)
        );

        CREATE TABLE sync_data_field (
            DataVersionName TEXT NOT NULL,
            EntitySingularName TEXT NOT NULL,
            FieldName TEXT NOT NULL,
            DataTypeName TEXT NOT NULL,
            IsPrimaryKey INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (DataVersionName, EntitySingularName, FieldName)
        );

        -- Canonical record state: RecordHash is the digest of RecordData.
        CREATE TABLE sync_state (
            EntitySingularName TEXT NOT NULL,
            RecordId TEXT NOT NULL,
            DataVersionName TEXT NOT NULL,
            RecordHash TEXT NOT NULL,
            RecordData BLOB NOT NULL,
            RecordBytesSize INTEGER NOT NULL,
            IsDelete INTEGER NOT NULL DEFAULT 0,
            RecordCreated INTEGER NOT NULL,
            PRIMARY KEY (EntitySingularName, RecordId)
        );

        -- Replication bookkeeping per (node, entity, record).
        CREATE TABLE sync_peer_state (
            NodeId TEXT NOT NULL,
            EntitySingularName TEXT NOT NULL,
            RecordId TEXT NOT NULL,
            SessionBindId TEXT,
            QueueBindSendId TEXT,
            TransactionBindSendId TEXT,
            TransactionBindReceiveId TEXT,
            SentLastKnownHash TEXT,
            PeerLastKnownHash TEXT,
            IsConflict INTEGER NOT NULL DEFAULT 0,
            IsDelete INTEGER NOT NULL DEFAULT 0,
            SentSyncState INTEGER NOT NULL DEFAULT 1,   -- SentSyncState as i64
            ChangedByClient INTEGER NOT NULL DEFAULT 0,
            RecordBytesSize INTEGER NOT NULL DEFAULT 0,
            LastUpdated INTEGER,
            RecordCreated INTEGER NOT NULL,
            PRIMARY KEY (NodeId, EntitySingularName, RecordId)
        );

        CREATE INDEX idx_peer_state_dirty
            ON sync_peer_state(NodeId, SessionBindId, ChangedByClient, IsDelete);
        CREATE INDEX idx_peer_state_queue_bind ON sync_peer_state(QueueBindSendId);
        CREATE INDEX idx_peer_state_transaction_send ON sync_peer_state(TransactionBindSendId);
        CREATE INDEX idx_data_entity_add_update
            ON sync_data_entity(DataVersionName, ProcOrderAddUpdate);
        CREATE INDEX idx_data_entity_delete ON sync_data_entity(DataVersionName, ProcOrderDelete);
        "#,
    )?;

    Ok(())
}
