//! Test fixtures and reference datasets.
//!
//! Common setup code for store, round and end-to-end tests.

use replica_core::{
    EncodedRecord, EntityDefinition, EntityNameItem, FieldDefinition, FieldType, NodeId, PairId,
    Record, RecordId, SessionId,
};
use replica_store::{MessageQueuing, Result, SqliteStore};

pub const HUB_NODE: &str = "*node-hub";
pub const SPOKE_NODE: &str = "*node-spoke1";
pub const DATA_VERSION: &str = "v1";

/// DDL of the application-owned contacts table.
pub const CONTACTS_DDL: &str = "CREATE TABLE IF NOT EXISTS \"Contacts\" (
    \"ContactId\" TEXT PRIMARY KEY,
    \"LastName\" TEXT,
    \"HeightFt\" INTEGER
);";

fn node_name(node_id: &str) -> &str {
    node_id.trim_start_matches("*node-")
}

/// The pair id both sides of a fixture pair agree on.
pub fn pair_id(a: &str, b: &str) -> PairId {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    PairId::new(format!("*pair-{}-{}", node_name(first), node_name(second)))
}

/// The entity catalog every fixture registers: contacts with typed fields
/// and opaque notes.
pub fn catalog() -> Vec<(EntityDefinition, Vec<FieldDefinition>)> {
    vec![
        (
            EntityDefinition {
                names: EntityNameItem::new("Contact", "Contacts"),
                process_order_add_update: 1,
                process_order_delete: 2,
                handler_uri: None,
            },
            vec![
                FieldDefinition::new("ContactId", FieldType::String, true),
                FieldDefinition::new("LastName", FieldType::String, false),
                FieldDefinition::new("HeightFt", FieldType::Int, false),
            ],
        ),
        (
            EntityDefinition {
                names: EntityNameItem::new("Note", "Notes"),
                process_order_add_update: 2,
                process_order_delete: 1,
                handler_uri: None,
            },
            Vec::new(),
        ),
    ]
}

/// A contact record as the application writes it.
pub fn contact_record(contact_id: &str, last_name: &str, height_ft: i64) -> Record {
    Record::new()
        .with("ContactId", contact_id)
        .with("LastName", last_name)
        .with("HeightFt", height_ft)
}

/// One node's store, seeded with both nodes, their pair and the catalog.
pub struct TestFixture {
    pub store: SqliteStore,
    pub local: NodeId,
    pub remote: NodeId,
    pub pair: PairId,
}

impl TestFixture {
    /// An in-memory store for `local` paired with `remote`.
    pub async fn new(local: &str, remote: &str) -> Result<Self> {
        Self::with_store(SqliteStore::open_memory()?, local, remote).await
    }

    /// Seed an existing store.
    pub async fn with_store(store: SqliteStore, local: &str, remote: &str) -> Result<Self> {
        let local_id = NodeId::from(local);
        let remote_id = NodeId::from(remote);
        let pair = pair_id(local, remote);

        store.register_data_version(DATA_VERSION).await?;
        store
            .register_node(&local_id, node_name(local), DATA_VERSION)
            .await?;
        store
            .register_node(&remote_id, node_name(remote), DATA_VERSION)
            .await?;
        store
            .register_pair(
                &pair,
                &format!("{}-{}", node_name(local), node_name(remote)),
                &local_id,
                &remote_id,
            )
            .await?;
        for (definition, fields) in catalog() {
            store.register_entity(DATA_VERSION, &definition).await?;
            for field in &fields {
                store
                    .register_field(DATA_VERSION, &definition.names.singular_name, field)
                    .await?;
            }
        }
        store.execute_batch(CONTACTS_DDL).await?;

        Ok(Self {
            store,
            local: local_id,
            remote: remote_id,
            pair,
        })
    }

    /// Write a contact locally: canonical record plus the contacts table.
    pub async fn put_contact(
        &self,
        contact_id: &str,
        last_name: &str,
        height_ft: i64,
    ) -> Result<EncodedRecord> {
        let encoded = EncodedRecord::from_record(&contact_record(contact_id, last_name, height_ft))?;
        self.store
            .put_record(
                DATA_VERSION,
                "Contact",
                &RecordId::from(contact_id),
                &encoded,
                false,
            )
            .await?;
        self.store
            .execute_batch(&format!(
                "INSERT INTO \"Contacts\" (\"ContactId\", \"LastName\", \"HeightFt\")
                 VALUES ('{id}', '{name}', {height})
                 ON CONFLICT (\"ContactId\") DO UPDATE SET
                    \"LastName\" = excluded.\"LastName\",
                    \"HeightFt\" = excluded.\"HeightFt\";",
                id = contact_id.replace('\'', "''"),
                name = last_name.replace('\'', "''"),
                height = height_ft
            ))
            .await?;
        Ok(encoded)
    }

    /// Write an opaque note locally.
    pub async fn put_note(&self, note_id: &str, body: &[u8]) -> Result<EncodedRecord> {
        let encoded = EncodedRecord::from_bytes(body.to_vec());
        self.store
            .put_record(DATA_VERSION, "Note", &RecordId::from(note_id), &encoded, false)
            .await?;
        Ok(encoded)
    }
}

/// The reference paging dataset.
///
/// Entity `A` holds records of 50, 10, 10 and 29 bytes, `B` holds 2, 20 and
/// 30 bytes, and each has one delete-flagged record (50 and 20 bytes). All
/// are queued for [`HUB_NODE`] under `session`; a second node is queued too
/// so tests can check that its rows stay untouched.
pub struct FetchScenario {
    pub store: SqliteStore,
    pub session: SessionId,
    pub node: NodeId,
    pub entities: Vec<EntityNameItem>,
}

pub const SCENARIO_OTHER_NODE: &str = "*node-spoke2";

/// Build the reference paging dataset.
pub async fn fetch_scenario() -> Result<FetchScenario> {
    let store = SqliteStore::open_memory()?;
    store.register_data_version(DATA_VERSION).await?;

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
        store
            .put_record(
                DATA_VERSION,
                entity,
                &RecordId::from(id),
                &EncodedRecord::from_bytes(body),
                is_delete,
            )
            .await?;
    }

    let session = SessionId::from("my-session-id-1");
    let node = NodeId::from(HUB_NODE);
    store.queue(&session, &node).await?;
    store
        .queue(
            &SessionId::from("my-session-id-2"),
            &NodeId::from(SCENARIO_OTHER_NODE),
        )
        .await?;

    Ok(FetchScenario {
        store,
        session,
        node,
        entities: vec![
            EntityNameItem::new("A", "As"),
            EntityNameItem::new("B", "Bs"),
            EntityNameItem::new("C", "Cs"),
        ],
    })
}
