//! Statement planning for inbound batches.
//!
//! [`ChangePlan`] and [`ReadBack`] are independent pure passes over the same
//! request. Neither touches the database; the processor executes what they
//! produce inside one transaction.

use std::collections::HashMap;

use rusqlite::types::Value;

use replica_core::{
    quote_identifier, EntityFields, EntityNameItem, FieldValue, NodeId, Record,
    SentSyncState, SyncDataMessageRequest, SyncEntityMessageRequest,
};

use crate::error::{Result, StoreError};

/// Catalog view of one entity as seen by the processor.
#[derive(Debug, Clone)]
pub(crate) struct EntitySchema {
    pub names: EntityNameItem,
    pub data_version: String,
    pub fields: EntityFields,
}

/// One SQL statement with bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

fn opt_text(s: Option<&str>) -> Value {
    s.map(text).unwrap_or(Value::Null)
}

/// Peer-supplied sizes must fit a SQLite integer.
fn byte_size(msg: &SyncDataMessageRequest) -> Result<Value> {
    i64::try_from(msg.record_bytes_size)
        .map(Value::Integer)
        .map_err(|_| {
            StoreError::InvalidData(format!(
                "record {} claims {} bytes",
                msg.record_id, msg.record_bytes_size
            ))
        })
}

fn sql_value(value: &FieldValue) -> Value {
    match value {
        FieldValue::Null => Value::Null,
        FieldValue::String(s) => Value::Text(s.clone()),
        FieldValue::Int(i) | FieldValue::Date(i) => Value::Integer(*i),
        FieldValue::Float(f) => Value::Real(*f),
        FieldValue::Bool(b) => Value::Integer(i64::from(*b)),
        FieldValue::Binary(b) => Value::Blob(b.clone()),
    }
}

const SQL_INSERT_CANONICAL: &str = "
INSERT OR IGNORE INTO sync_state (EntitySingularName, RecordId, DataVersionName, RecordHash,
    RecordData, RecordBytesSize, IsDelete, RecordCreated)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)";

/// Track the sender's copy, but only while the canonical row is live and
/// holds either the gate hash (`?7`) or the incoming hash (`?3`). An existing
/// row is rebound to the new transaction, so redelivering a record the
/// receiver already holds lands as fast-batch.
const SQL_UPSERT_PEER: &str = "
INSERT INTO sync_peer_state (NodeId, EntitySingularName, RecordId, TransactionBindReceiveId,
    SentLastKnownHash, PeerLastKnownHash, IsConflict, IsDelete, SentSyncState,
    ChangedByClient, RecordBytesSize, LastUpdated, RecordCreated)
SELECT ?1, s.EntitySingularName, s.RecordId, ?2, ?3, ?3, 0, 0, ?4, 0, ?5, ?6, ?6
FROM sync_state s
WHERE s.EntitySingularName = ?8 AND s.RecordId = ?9 AND s.IsDelete = 0
  AND (s.RecordHash = ?7 OR s.RecordHash = ?3)
ON CONFLICT (NodeId, EntitySingularName, RecordId) DO UPDATE SET
    TransactionBindReceiveId = excluded.TransactionBindReceiveId,
    SentLastKnownHash = excluded.SentLastKnownHash,
    PeerLastKnownHash = excluded.PeerLastKnownHash,
    SentSyncState = excluded.SentSyncState,
    RecordBytesSize = excluded.RecordBytesSize,
    ChangedByClient = 0,
    IsConflict = 0,
    LastUpdated = excluded.LastUpdated";

const SQL_UPDATE_CANONICAL: &str = "
UPDATE sync_state SET RecordHash = ?1, RecordData = ?2, RecordBytesSize = ?3, IsDelete = 0
WHERE EntitySingularName = ?4 AND RecordId = ?5 AND RecordHash = ?6 AND IsDelete = 0";

/// True while the canonical row is live and still holds the bound hash.
const HASH_GATE: &str = "EXISTS (SELECT 1 FROM sync_state
    WHERE EntitySingularName = ? AND RecordId = ? AND RecordHash = ? AND IsDelete = 0)";

/// Statements that apply one inbound batch, in execution order.
#[derive(Debug, Clone, Default)]
pub(crate) struct ChangePlan {
    pub statements: Vec<Statement>,
}

impl ChangePlan {
    /// Plan every record of `request`.
    ///
    /// `schemas` is keyed by plural entity name. Rejects delete batches,
    /// unknown entities and fields, and states with no apply path.
    pub(crate) fn build(
        request: &SyncEntityMessageRequest,
        sender: &NodeId,
        schemas: &HashMap<String, EntitySchema>,
        now: i64,
    ) -> Result<Self> {
        if request.is_delete {
            return Err(StoreError::InvalidData(
                "delete batches are not supported".to_string(),
            ));
        }

        let mut plan = Self::default();
        let bind = request.transaction_bind_id.as_str();

        for group in &request.items {
            let schema = schemas.get(&group.entity_plural_name).ok_or_else(|| {
                StoreError::NoDataFound(format!("entity {}", group.entity_plural_name))
            })?;

            for msg in &group.msgs {
                let row = EntityRow::build(schema, msg)?;
                match msg.sent_sync_state {
                    SentSyncState::FirstTimeSentToPeer => {
                        plan.first_time(schema, msg, row.as_ref(), sender, bind, now)?
                    }
                    SentSyncState::StandardSentToPeer => {
                        plan.standard(schema, msg, row.as_ref(), sender, bind, now)?
                    }
                    SentSyncState::FastDeleted => {
                        return Err(StoreError::InvalidData(format!(
                            "record {} is fast-deleted; deletes are not supported",
                            msg.record_id
                        )))
                    }
                    other => {
                        return Err(StoreError::UnsupportedSyncState {
                            state: format!("{:?}", other),
                            record_id: msg.record_id.to_string(),
                        })
                    }
                }
            }
        }

        Ok(plan)
    }

    fn first_time(
        &mut self,
        schema: &EntitySchema,
        msg: &SyncDataMessageRequest,
        row: Option<&EntityRow>,
        sender: &NodeId,
        bind: &str,
        now: i64,
    ) -> Result<()> {
        let entity = schema.names.singular_name.as_str();
        let hash = msg.record_hash.as_str();

        self.statements.push(Statement::new(
            SQL_INSERT_CANONICAL,
            vec![
                text(entity),
                text(msg.record_id.as_str()),
                text(&schema.data_version),
                text(hash),
                Value::Blob(msg.record_data.to_vec()),
                byte_size(msg)?,
                Value::Integer(now),
            ],
        ));
        self.push_peer_upsert(entity, msg, Some(hash), sender, bind, now)?;

        if let Some(row) = row {
            let table = quote_identifier(&schema.names.plural_name)?;
            let placeholders = vec!["?"; row.columns.len()].join(", ");
            let mut params = row.values.clone();
            params.extend([text(entity), text(msg.record_id.as_str()), text(hash)]);
            self.statements.push(Statement::new(
                format!(
                    "INSERT OR IGNORE INTO {} ({}) SELECT {} WHERE {}",
                    table,
                    row.columns.join(", "),
                    placeholders,
                    HASH_GATE
                ),
                params,
            ));
        }
        Ok(())
    }

    fn standard(
        &mut self,
        schema: &EntitySchema,
        msg: &SyncDataMessageRequest,
        row: Option<&EntityRow>,
        sender: &NodeId,
        bind: &str,
        now: i64,
    ) -> Result<()> {
        let entity = schema.names.singular_name.as_str();
        let gate_hash = msg.last_known_peer_hash.as_ref().map(|h| h.as_str());

        // Entity table and peer row first: both gates read the canonical hash
        // before the canonical update moves it.
        if let Some(row) = row {
            if let Some(update) = row.update_statement(&schema.names.plural_name)? {
                let mut params = update.params;
                params.extend([
                    text(entity),
                    text(msg.record_id.as_str()),
                    opt_text(gate_hash),
                ]);
                self.statements.push(Statement::new(
                    format!("{} AND {}", update.sql, HASH_GATE),
                    params,
                ));
            }
        }

        self.push_peer_upsert(entity, msg, gate_hash, sender, bind, now)?;

        self.statements.push(Statement::new(
            SQL_UPDATE_CANONICAL,
            vec![
                text(msg.record_hash.as_str()),
                Value::Blob(msg.record_data.to_vec()),
                byte_size(msg)?,
                text(entity),
                text(msg.record_id.as_str()),
                opt_text(gate_hash),
            ],
        ));
        Ok(())
    }

    fn push_peer_upsert(
        &mut self,
        entity: &str,
        msg: &SyncDataMessageRequest,
        gate_hash: Option<&str>,
        sender: &NodeId,
        bind: &str,
        now: i64,
    ) -> Result<()> {
        self.statements.push(Statement::new(
            SQL_UPSERT_PEER,
            vec![
                text(sender.as_str()),
                text(bind),
                text(msg.record_hash.as_str()),
                Value::Integer(SentSyncState::StandardSentToPeer.to_i64()),
                byte_size(msg)?,
                Value::Integer(now),
                opt_text(gate_hash),
                text(entity),
                text(msg.record_id.as_str()),
            ],
        ));
        Ok(())
    }
}

/// A decoded record laid out as entity-table columns.
#[derive(Debug, Clone)]
struct EntityRow {
    /// Quoted column names, sorted by field name.
    columns: Vec<String>,
    values: Vec<Value>,
    /// Quoted primary key columns with their values.
    keys: Vec<(String, Value)>,
    /// Quoted non-key columns with their values.
    others: Vec<(String, Value)>,
}

impl EntityRow {
    /// `None` when the entity declares no fields and has no table to write.
    fn build(schema: &EntitySchema, msg: &SyncDataMessageRequest) -> Result<Option<Self>> {
        if schema.fields.is_empty() {
            return Ok(None);
        }
        let primary_keys = schema.fields.primary_keys();
        if primary_keys.is_empty() {
            return Err(StoreError::InvalidData(format!(
                "entity {} declares fields but no primary key",
                schema.names.singular_name
            )));
        }

        let record = Record::decode(&msg.record_data)?;
        let mut row = Self {
            columns: Vec::with_capacity(record.len()),
            values: Vec::with_capacity(record.len()),
            keys: Vec::new(),
            others: Vec::new(),
        };

        for (name, value) in record.fields() {
            let definition = schema.fields.get(name).ok_or_else(|| {
                StoreError::InvalidData(format!(
                    "unknown field {} for entity {}",
                    name, schema.names.singular_name
                ))
            })?;
            if !definition.field_type.accepts(value) {
                return Err(StoreError::InvalidData(format!(
                    "field {}.{} expects {}, got {}",
                    schema.names.singular_name,
                    name,
                    definition.field_type,
                    value.type_name()
                )));
            }
            let column = quote_identifier(name)?;
            let sql = sql_value(value);
            row.columns.push(column.clone());
            row.values.push(sql.clone());
            if definition.is_primary_key {
                row.keys.push((column, sql));
            } else {
                row.others.push((column, sql));
            }
        }

        if row.keys.len() != primary_keys.len() {
            return Err(StoreError::InvalidData(format!(
                "record {} is missing primary key fields of {}",
                msg.record_id, schema.names.singular_name
            )));
        }
        Ok(Some(row))
    }

    /// `UPDATE <table> SET <others> WHERE <keys>`; `None` when every
    /// field is a key.
    fn update_statement(&self, table: &str) -> Result<Option<Statement>> {
        if self.others.is_empty() {
            return Ok(None);
        }
        let table = quote_identifier(table)?;
        let assignments: Vec<String> = self.others.iter().map(|(c, _)| format!("{} = ?", c)).collect();
        let predicate: Vec<String> = self.keys.iter().map(|(c, _)| format!("{} = ?", c)).collect();
        let params = self
            .others
            .iter()
            .chain(self.keys.iter())
            .map(|(_, v)| v.clone())
            .collect();
        Ok(Some(Statement::new(
            format!(
                "UPDATE {} SET {} WHERE {}",
                table,
                assignments.join(", "),
                predicate.join(" AND ")
            ),
            params,
        )))
    }
}

/// Key of one submitted record, in request order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SubmittedRecord {
    pub entity_plural_name: String,
    pub entity_singular_name: String,
    pub record_id: String,
    pub request_hash: String,
}

/// The single query that reads back the post-apply state of a batch.
#[derive(Debug, Clone)]
pub(crate) struct ReadBack {
    pub statement: Statement,
    pub submitted: Vec<SubmittedRecord>,
}

impl ReadBack {
    /// Columns, one row per submitted record in request order:
    /// `Ord, EntityPluralName, TransactionBindReceiveId, RecordHash,
    /// RecordData, RecordBytesSize, IsDelete`. Canonical and peer columns
    /// are NULL when the row is missing.
    pub(crate) fn build(
        request: &SyncEntityMessageRequest,
        sender: &NodeId,
        schemas: &HashMap<String, EntitySchema>,
    ) -> Result<Option<Self>> {
        let mut submitted = Vec::new();
        let mut rows = Vec::new();
        let mut params = Vec::new();

        for group in &request.items {
            let schema = schemas.get(&group.entity_plural_name).ok_or_else(|| {
                StoreError::NoDataFound(format!("entity {}", group.entity_plural_name))
            })?;
            for msg in &group.msgs {
                rows.push("(?, ?, ?, ?)");
                params.extend([
                    Value::Integer(submitted.len() as i64),
                    text(&schema.data_version),
                    text(&schema.names.singular_name),
                    text(msg.record_id.as_str()),
                ]);
                submitted.push(SubmittedRecord {
                    entity_plural_name: group.entity_plural_name.clone(),
                    entity_singular_name: schema.names.singular_name.clone(),
                    record_id: msg.record_id.to_string(),
                    request_hash: msg.record_hash.to_string(),
                });
            }
        }

        if submitted.is_empty() {
            return Ok(None);
        }

        params.push(text(sender.as_str()));
        let sql = format!(
            "WITH submitted (Ord, DataVersionName, EntitySingularName, RecordId) AS (VALUES {})
             SELECT k.Ord, e.EntityPluralName, p.TransactionBindReceiveId, s.RecordHash,
                    s.RecordData, s.RecordBytesSize, s.IsDelete
             FROM submitted k
             JOIN sync_data_entity e
               ON e.DataVersionName = k.DataVersionName
              AND e.EntitySingularName = k.EntitySingularName
             LEFT JOIN sync_state s
               ON s.EntitySingularName = k.EntitySingularName AND s.RecordId = k.RecordId
             LEFT JOIN sync_peer_state p
               ON p.NodeId = ? AND p.EntitySingularName = k.EntitySingularName
              AND p.RecordId = k.RecordId
             ORDER BY k.Ord",
            rows.join(", ")
        );

        Ok(Some(Self {
            statement: Statement::new(sql, params),
            submitted,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use replica_core::{
        BindId, EncodedRecord, FieldDefinition, FieldType, RecordHash, RecordId,
        SyncDataMessagesRequest,
    };

    fn contact_schema() -> EntitySchema {
        EntitySchema {
            names: EntityNameItem::new("Contact", "Contacts"),
            data_version: "v1".into(),
            fields: EntityFields::new([
                FieldDefinition::new("ContactId", FieldType::String, true),
                FieldDefinition::new("LastName", FieldType::String, false),
                FieldDefinition::new("HeightFt", FieldType::Int, false),
            ]),
        }
    }

    fn schemas() -> HashMap<String, EntitySchema> {
        let mut map = HashMap::new();
        map.insert("Contacts".to_string(), contact_schema());
        map
    }

    fn request_with(record: Record, state: SentSyncState, last_known: Option<&str>) -> SyncEntityMessageRequest {
        let encoded = EncodedRecord::from_record(&record).unwrap();
        let mut request = SyncEntityMessageRequest::new(false, BindId::from("bind-1"));
        request.items.push(SyncDataMessagesRequest {
            entity_plural_name: "Contacts".into(),
            msgs: vec![SyncDataMessageRequest {
                record_id: RecordId::from("c1"),
                record_hash: encoded.hash.clone(),
                last_known_peer_hash: last_known.map(RecordHash::from),
                sent_sync_state: state,
                record_bytes_size: encoded.bytes_size,
                record_data: encoded.data.clone(),
            }],
        });
        request
    }

    fn contact() -> Record {
        Record::new()
            .with("ContactId", "c1")
            .with("LastName", "Smith")
            .with("HeightFt", 6i64)
    }

    #[test]
    fn test_first_time_plans_three_statements() {
        let request = request_with(contact(), SentSyncState::FirstTimeSentToPeer, None);
        let plan = ChangePlan::build(&request, &NodeId::from("n1"), &schemas(), 0).unwrap();
        assert_eq!(plan.statements.len(), 3);
        assert!(plan.statements[0].sql.contains("INSERT OR IGNORE INTO sync_state"));
        assert!(plan.statements[1].sql.contains("INTO sync_peer_state"));
        assert!(plan.statements[2]
            .sql
            .starts_with("INSERT OR IGNORE INTO \"Contacts\" (\"ContactId\", \"HeightFt\", \"LastName\")"));
    }

    #[test]
    fn test_standard_update_gates_on_last_known_hash() {
        let request = request_with(contact(), SentSyncState::StandardSentToPeer, Some("h0"));
        let plan = ChangePlan::build(&request, &NodeId::from("n1"), &schemas(), 0).unwrap();
        assert_eq!(plan.statements.len(), 3);

        let table = &plan.statements[0];
        assert!(table.sql.starts_with(
            "UPDATE \"Contacts\" SET \"HeightFt\" = ?, \"LastName\" = ? WHERE \"ContactId\" = ?"
        ));
        assert_eq!(table.params.last(), Some(&Value::Text("h0".into())));

        let canonical = &plan.statements[2];
        assert!(canonical.sql.contains("UPDATE sync_state"));
        assert_eq!(canonical.params.last(), Some(&Value::Text("h0".into())));
    }

    #[test]
    fn test_standard_without_last_known_binds_null_gate() {
        let request = request_with(contact(), SentSyncState::StandardSentToPeer, None);
        let plan = ChangePlan::build(&request, &NodeId::from("n1"), &schemas(), 0).unwrap();
        assert_eq!(plan.statements[2].params.last(), Some(&Value::Null));
    }

    #[test]
    fn test_rejects_unknown_field() {
        let record = contact().with("Nickname", "Smitty");
        let request = request_with(record, SentSyncState::FirstTimeSentToPeer, None);
        assert!(matches!(
            ChangePlan::build(&request, &NodeId::from("n1"), &schemas(), 0),
            Err(StoreError::InvalidData(msg)) if msg.contains("Nickname")
        ));
    }

    #[test]
    fn test_rejects_type_mismatch() {
        let record = contact().with("HeightFt", "tall");
        let request = request_with(record, SentSyncState::FirstTimeSentToPeer, None);
        assert!(matches!(
            ChangePlan::build(&request, &NodeId::from("n1"), &schemas(), 0),
            Err(StoreError::InvalidData(_))
        ));
    }

    #[test]
    fn test_rejects_missing_primary_key_value() {
        let record = Record::new().with("LastName", "Smith");
        let request = request_with(record, SentSyncState::FirstTimeSentToPeer, None);
        assert!(ChangePlan::build(&request, &NodeId::from("n1"), &schemas(), 0).is_err());
    }

    #[test]
    fn test_rejects_fields_without_primary_key() {
        let mut map = schemas();
        if let Some(schema) = map.get_mut("Contacts") {
            schema.fields = EntityFields::new([FieldDefinition::new(
                "LastName",
                FieldType::String,
                false,
            )]);
        }
        let request = request_with(
            Record::new().with("LastName", "Smith"),
            SentSyncState::FirstTimeSentToPeer,
            None,
        );
        assert!(matches!(
            ChangePlan::build(&request, &NodeId::from("n1"), &map, 0),
            Err(StoreError::InvalidData(msg)) if msg.contains("primary key")
        ));
    }

    #[test]
    fn test_rejects_deletes_and_unsupported_states() {
        let mut request = request_with(contact(), SentSyncState::FirstTimeSentToPeer, None);
        request.is_delete = true;
        assert!(ChangePlan::build(&request, &NodeId::from("n1"), &schemas(), 0).is_err());

        let request = request_with(contact(), SentSyncState::FastDeleted, None);
        assert!(ChangePlan::build(&request, &NodeId::from("n1"), &schemas(), 0).is_err());

        let request = request_with(contact(), SentSyncState::NeverSentToPeer, None);
        assert!(matches!(
            ChangePlan::build(&request, &NodeId::from("n1"), &schemas(), 0),
            Err(StoreError::UnsupportedSyncState { .. })
        ));
    }

    #[test]
    fn test_rejects_oversized_byte_count() {
        for state in [SentSyncState::FirstTimeSentToPeer, SentSyncState::StandardSentToPeer] {
            let mut request = request_with(contact(), state, Some("h0"));
            request.items[0].msgs[0].record_bytes_size = u64::MAX;
            assert!(matches!(
                ChangePlan::build(&request, &NodeId::from("n1"), &schemas(), 0),
                Err(StoreError::InvalidData(msg)) if msg.contains("c1")
            ));
        }
    }

    #[test]
    fn test_entity_without_fields_skips_table() {
        let mut map = HashMap::new();
        map.insert(
            "Notes".to_string(),
            EntitySchema {
                names: EntityNameItem::new("Note", "Notes"),
                data_version: "v1".into(),
                fields: EntityFields::default(),
            },
        );
        let mut request = SyncEntityMessageRequest::new(false, BindId::from("b"));
        request.items.push(SyncDataMessagesRequest {
            entity_plural_name: "Notes".into(),
            msgs: vec![SyncDataMessageRequest {
                record_id: RecordId::from("n1"),
                record_hash: RecordHash::of(b"opaque"),
                last_known_peer_hash: None,
                sent_sync_state: SentSyncState::FirstTimeSentToPeer,
                record_bytes_size: 6,
                record_data: Bytes::from_static(b"opaque"),
            }],
        });
        let plan = ChangePlan::build(&request, &NodeId::from("n1"), &map, 0).unwrap();
        assert_eq!(plan.statements.len(), 2);
    }

    #[test]
    fn test_read_back_covers_submitted_ids_in_order() {
        let request = request_with(contact(), SentSyncState::FirstTimeSentToPeer, None);
        let read_back = ReadBack::build(&request, &NodeId::from("n1"), &schemas())
            .unwrap()
            .unwrap();
        assert_eq!(read_back.submitted.len(), 1);
        assert_eq!(read_back.submitted[0].entity_singular_name, "Contact");
        assert_eq!(read_back.statement.params.len(), 5);
        assert!(read_back.statement.sql.contains("ORDER BY k.Ord"));

        let empty = SyncEntityMessageRequest::new(false, BindId::from("b"));
        assert!(ReadBack::build(&empty, &NodeId::from("n1"), &schemas())
            .unwrap()
            .is_none());
    }
}
