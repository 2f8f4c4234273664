//! Entity catalog metadata.
//!
//! Static schema information: entity names, fetch/apply ordering, and the
//! field definitions used to materialize records into per-entity tables.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::record::FieldValue;

/// The singular and plural forms of an entity's name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityNameItem {
    pub singular_name: String,
    pub plural_name: String,
}

impl EntityNameItem {
    pub fn new(singular_name: impl Into<String>, plural_name: impl Into<String>) -> Self {
        Self {
            singular_name: singular_name.into(),
            plural_name: plural_name.into(),
        }
    }
}

/// Full catalog entry for an entity within a data version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDefinition {
    pub names: EntityNameItem,
    /// Position in the add/update fetch sequence.
    pub process_order_add_update: i64,
    /// Position in the delete fetch sequence.
    pub process_order_delete: i64,
    pub handler_uri: Option<String>,
}

/// Declared type of an entity field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    Undefined,
    String,
    Int,
    Float,
    Bool,
    Date,
    Binary,
}

impl FieldType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Undefined => "Undefined",
            Self::String => "String",
            Self::Int => "Int",
            Self::Float => "Float",
            Self::Bool => "Bool",
            Self::Date => "Date",
            Self::Binary => "Binary",
        }
    }

    /// Whether `value` may be stored in a field of this type.
    ///
    /// `Null` fits every type; `Undefined` accepts anything.
    pub fn accepts(self, value: &FieldValue) -> bool {
        matches!(
            (self, value),
            (_, FieldValue::Null)
                | (Self::Undefined, _)
                | (Self::String, FieldValue::String(_))
                | (Self::Int, FieldValue::Int(_))
                | (Self::Float, FieldValue::Float(_))
                | (Self::Float, FieldValue::Int(_))
                | (Self::Bool, FieldValue::Bool(_))
                | (Self::Date, FieldValue::Date(_))
                | (Self::Binary, FieldValue::Binary(_))
        )
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Undefined" => Ok(Self::Undefined),
            "String" => Ok(Self::String),
            "Int" => Ok(Self::Int),
            "Float" => Ok(Self::Float),
            "Bool" => Ok(Self::Bool),
            "Date" => Ok(Self::Date),
            "Binary" => Ok(Self::Binary),
            other => Err(CoreError::UnknownFieldType(other.to_string())),
        }
    }
}

/// A single field of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    pub field_type: FieldType,
    pub is_primary_key: bool,
}

impl FieldDefinition {
    pub fn new(name: impl Into<String>, field_type: FieldType, is_primary_key: bool) -> Self {
        Self {
            name: name.into(),
            field_type,
            is_primary_key,
        }
    }
}

/// The field definitions of one entity, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityFields {
    fields: BTreeMap<String, FieldDefinition>,
}

impl EntityFields {
    pub fn new(definitions: impl IntoIterator<Item = FieldDefinition>) -> Self {
        Self {
            fields: definitions
                .into_iter()
                .map(|d| (d.name.clone(), d))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// All definitions, sorted by field name.
    pub fn iter(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.fields.values()
    }

    /// Primary-key field names, sorted.
    pub fn primary_keys(&self) -> Vec<&str> {
        self.fields
            .values()
            .filter(|d| d.is_primary_key)
            .map(|d| d.name.as_str())
            .collect()
    }
}

/// Check that a table or column name is a plain SQL identifier.
pub fn validate_identifier(name: &str) -> Result<(), CoreError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidIdentifier(name.to_string()))
    }
}

/// Validate and double-quote an identifier for use in generated SQL.
pub fn quote_identifier(name: &str) -> Result<String, CoreError> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact_fields() -> EntityFields {
        EntityFields::new(vec![
            FieldDefinition::new("LastName", FieldType::String, false),
            FieldDefinition::new("ContactId", FieldType::String, true),
            FieldDefinition::new("HeightFt", FieldType::Int, false),
            FieldDefinition::new("Region", FieldType::String, true),
        ])
    }

    #[test]
    fn test_primary_keys_sorted() {
        assert_eq!(contact_fields().primary_keys(), vec!["ContactId", "Region"]);
    }

    #[test]
    fn test_iter_sorted_by_name() {
        let fields = contact_fields();
        let names: Vec<&str> = fields.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["ContactId", "HeightFt", "LastName", "Region"]);
    }

    #[test]
    fn test_field_type_accepts() {
        assert!(FieldType::Int.accepts(&FieldValue::Int(3)));
        assert!(FieldType::Float.accepts(&FieldValue::Int(3)));
        assert!(FieldType::String.accepts(&FieldValue::Null));
        assert!(FieldType::Undefined.accepts(&FieldValue::Bool(true)));
        assert!(!FieldType::Int.accepts(&FieldValue::String("3".into())));
        assert!(!FieldType::Date.accepts(&FieldValue::Int(3)));
    }

    #[test]
    fn test_field_type_names() {
        assert_eq!("Date".parse::<FieldType>().unwrap(), FieldType::Date);
        assert!("varchar".parse::<FieldType>().is_err());
    }

    #[test]
    fn test_identifiers() {
        assert!(validate_identifier("contacts").is_ok());
        assert!(validate_identifier("_x1").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("1abc").is_err());
        assert!(validate_identifier("a b").is_err());
        assert!(validate_identifier("x\";DROP TABLE y;--").is_err());
        assert_eq!(quote_identifier("FirstName").unwrap(), "\"FirstName\"");
    }
}
