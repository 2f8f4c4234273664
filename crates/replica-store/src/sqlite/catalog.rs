//! Entity catalog lookups scoped to a node's data version.

use std::collections::HashMap;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use replica_core::{ChangeType, EntityFields, EntityNameItem, FieldDefinition, NodeId, SessionId};

use super::SqliteStore;
use crate::error::{Result, StoreError};
use crate::traits::EntityFetching;

fn order_column(change_type: ChangeType) -> &'static str {
    match change_type {
        ChangeType::AddOrUpdate => "ProcOrderAddUpdate",
        ChangeType::Delete => "ProcOrderDelete",
    }
}

pub(crate) fn entities_for_fetch(
    conn: &Connection,
    order_num: i64,
    node_id: &NodeId,
    change_type: ChangeType,
) -> Result<Vec<EntityNameItem>> {
    let sql = format!(
        "SELECT EntitySingularName, EntityPluralName FROM sync_data_entity
         WHERE {} = ?1
           AND DataVersionName IN (SELECT DataVersionName FROM sync_node WHERE NodeId = ?2)
         ORDER BY EntitySingularName",
        order_column(change_type)
    );
    let mut stmt = conn.prepare(&sql)?;
    let items = stmt
        .query_map(params![order_num, node_id.as_str()], |row| {
            Ok(EntityNameItem::new(
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(items)
}

pub(crate) fn plural_entity_names(
    conn: &Connection,
    node_id: &NodeId,
) -> Result<HashMap<String, EntityNameItem>> {
    let mut stmt = conn.prepare(
        "SELECT EntitySingularName, EntityPluralName FROM sync_data_entity
         WHERE DataVersionName IN (SELECT DataVersionName FROM sync_node WHERE NodeId = ?1)",
    )?;
    let items = stmt
        .query_map(params![node_id.as_str()], |row| {
            Ok(EntityNameItem::new(
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(items
        .into_iter()
        .map(|item| (item.plural_name.clone(), item))
        .collect())
}

pub(crate) fn node_data_version(conn: &Connection, node_id: &NodeId) -> Result<String> {
    conn.query_row(
        "SELECT DataVersionName FROM sync_node WHERE NodeId = ?1",
        params![node_id.as_str()],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| StoreError::NoDataFound(format!("node {}", node_id)))
}

pub(crate) fn node_entity_fields(
    conn: &Connection,
    node_id: &NodeId,
    entity_singular_name: &str,
) -> Result<EntityFields> {
    let mut stmt = conn.prepare(
        "SELECT FieldName, DataTypeName, IsPrimaryKey FROM sync_data_field
         WHERE EntitySingularName = ?1
           AND DataVersionName IN (SELECT DataVersionName FROM sync_node WHERE NodeId = ?2)",
    )?;
    let rows = stmt
        .query_map(params![entity_singular_name, node_id.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, bool>(2)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut definitions = Vec::with_capacity(rows.len());
    for (name, type_name, is_primary_key) in rows {
        definitions.push(FieldDefinition::new(name, type_name.parse()?, is_primary_key));
    }
    Ok(EntityFields::new(definitions))
}

impl SqliteStore {
    /// Resolve a plural entity name to its singular form within a data version.
    pub async fn find_singular_entity_name(
        &self,
        plural_name: &str,
        data_version: &str,
    ) -> Result<String> {
        let plural_name = plural_name.to_string();
        let data_version = data_version.to_string();
        self.db
            .call(move |conn| {
                conn.query_row(
                    "SELECT EntitySingularName FROM sync_data_entity
                     WHERE EntityPluralName = ?1 AND DataVersionName = ?2",
                    params![plural_name, data_version],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or_else(|| {
                    StoreError::NoDataFound(format!(
                        "entity {} in data version {}",
                        plural_name, data_version
                    ))
                })
            })
            .await
    }

    /// Field definitions of an entity in the node's data version.
    ///
    /// Empty when the entity declares no fields.
    pub async fn find_node_entity_fields(
        &self,
        node_id: &NodeId,
        entity_singular_name: &str,
    ) -> Result<EntityFields> {
        let node_id = node_id.clone();
        let entity = entity_singular_name.to_string();
        self.db
            .call(move |conn| node_entity_fields(conn, &node_id, &entity))
            .await
    }
}

#[async_trait]
impl EntityFetching for SqliteStore {
    async fn find_entities_for_fetch(
        &self,
        order_num: i64,
        _session_id: &SessionId,
        node_id: &NodeId,
        change_type: ChangeType,
    ) -> Result<Vec<EntityNameItem>> {
        let node_id = node_id.clone();
        self.db
            .call(move |conn| entities_for_fetch(conn, order_num, &node_id, change_type))
            .await
    }

    async fn find_plural_entity_names_by_id(
        &self,
        _session_id: &SessionId,
        node_id: &NodeId,
    ) -> Result<HashMap<String, EntityNameItem>> {
        let node_id = node_id.clone();
        self.db
            .call(move |conn| plural_entity_names(conn, &node_id))
            .await
    }

    async fn find_fetch_order_numbers(
        &self,
        node_id: &NodeId,
        change_type: ChangeType,
    ) -> Result<Vec<i64>> {
        let node_id = node_id.clone();
        self.db
            .call(move |conn| {
                let sql = format!(
                    "SELECT DISTINCT {col} FROM sync_data_entity
                     WHERE DataVersionName IN (SELECT DataVersionName FROM sync_node WHERE NodeId = ?1)
                     ORDER BY {col}",
                    col = order_column(change_type)
                );
                let mut stmt = conn.prepare(&sql)?;
                let orders = stmt
                    .query_map(params![node_id.as_str()], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<i64>>>()?;
                Ok(orders)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replica_core::{EntityDefinition, FieldType};

    async fn catalog_store() -> SqliteStore {
        let store = SqliteStore::open_memory().unwrap();
        store.register_data_version("v1").await.unwrap();
        store.register_data_version("v2").await.unwrap();
        store
            .register_node(&NodeId::from("hub"), "Hub", "v1")
            .await
            .unwrap();
        store
            .register_node(&NodeId::from("other"), "Other", "v2")
            .await
            .unwrap();
        for (singular, plural, add, del) in [
            ("Contact", "Contacts", 1, 2),
            ("Address", "Addresses", 2, 1),
            ("Note", "Notes", 2, 1),
        ] {
            store
                .register_entity(
                    "v1",
                    &EntityDefinition {
                        names: EntityNameItem::new(singular, plural),
                        process_order_add_update: add,
                        process_order_delete: del,
                        handler_uri: None,
                    },
                )
                .await
                .unwrap();
        }
        store
            .register_entity(
                "v2",
                &EntityDefinition {
                    names: EntityNameItem::new("Widget", "Widgets"),
                    process_order_add_update: 1,
                    process_order_delete: 1,
                    handler_uri: None,
                },
            )
            .await
            .unwrap();
        for field in [
            FieldDefinition::new("LastName", FieldType::String, false),
            FieldDefinition::new("ContactId", FieldType::String, true),
            FieldDefinition::new("HeightFt", FieldType::Int, false),
        ] {
            store.register_field("v1", "Contact", &field).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_find_entities_for_fetch_by_order() {
        let store = catalog_store().await;
        let session = SessionId::from("s1");
        let hub = NodeId::from("hub");

        let first = store
            .find_entities_for_fetch(1, &session, &hub, ChangeType::AddOrUpdate)
            .await
            .unwrap();
        assert_eq!(first, vec![EntityNameItem::new("Contact", "Contacts")]);

        let second = store
            .find_entities_for_fetch(2, &session, &hub, ChangeType::AddOrUpdate)
            .await
            .unwrap();
        assert_eq!(
            second,
            vec![
                EntityNameItem::new("Address", "Addresses"),
                EntityNameItem::new("Note", "Notes"),
            ]
        );

        let deletes = store
            .find_entities_for_fetch(2, &session, &hub, ChangeType::Delete)
            .await
            .unwrap();
        assert_eq!(deletes, vec![EntityNameItem::new("Contact", "Contacts")]);
    }

    #[tokio::test]
    async fn test_order_numbers_scoped_to_node_version() {
        let store = catalog_store().await;
        let orders = store
            .find_fetch_order_numbers(&NodeId::from("hub"), ChangeType::AddOrUpdate)
            .await
            .unwrap();
        assert_eq!(orders, vec![1, 2]);

        let other = store
            .find_fetch_order_numbers(&NodeId::from("other"), ChangeType::Delete)
            .await
            .unwrap();
        assert_eq!(other, vec![1]);
    }

    #[tokio::test]
    async fn test_plural_names_by_node() {
        let store = catalog_store().await;
        let names = store
            .find_plural_entity_names_by_id(&SessionId::from("s1"), &NodeId::from("hub"))
            .await
            .unwrap();
        assert_eq!(names.len(), 3);
        assert_eq!(names["Addresses"].singular_name, "Address");
        assert!(!names.contains_key("Widgets"));
    }

    #[tokio::test]
    async fn test_find_singular_entity_name() {
        let store = catalog_store().await;
        assert_eq!(
            store.find_singular_entity_name("Contacts", "v1").await.unwrap(),
            "Contact"
        );
        assert!(matches!(
            store.find_singular_entity_name("Contacts", "v2").await,
            Err(StoreError::NoDataFound(_))
        ));
    }

    #[tokio::test]
    async fn test_find_node_entity_fields() {
        let store = catalog_store().await;
        let fields = store
            .find_node_entity_fields(&NodeId::from("hub"), "Contact")
            .await
            .unwrap();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields.primary_keys(), vec!["ContactId"]);
        assert_eq!(fields.get("HeightFt").unwrap().field_type, FieldType::Int);

        let none = store
            .find_node_entity_fields(&NodeId::from("hub"), "Note")
            .await
            .unwrap();
        assert!(none.is_empty());
    }
}
