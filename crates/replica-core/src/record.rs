//! Record payload codec and content hashing.
//!
//! A record is a set of named, typed field values. Fields live in a
//! `BTreeMap`, so they are always encoded in alphabetical order by name and
//! two equal records always produce identical bytes (and thus identical
//! hashes) no matter how they were built.
//!
//! Encoding is CBOR via ciborium: an array of `[name, value]` pairs.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::RecordHash;

/// A single typed field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Null,
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    /// Unix milliseconds.
    Date(i64),
    Binary(Vec<u8>),
}

impl FieldValue {
    /// Short name of the value's type, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "Null",
            Self::String(_) => "String",
            Self::Int(_) => "Int",
            Self::Float(_) => "Float",
            Self::Bool(_) => "Bool",
            Self::Date(_) => "Date",
            Self::Binary(_) => "Binary",
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// A record: field name to value, ordered by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: BTreeMap<String, FieldValue>,
}

impl Record {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field setter.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Set a field, replacing any previous value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Get a field value by name.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Iterate fields in encoding order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Encode to CBOR bytes.
    pub fn encode(&self) -> Result<Vec<u8>, CoreError> {
        let pairs: Vec<(&str, &FieldValue)> = self.fields().collect();
        let mut buf = Vec::new();
        ciborium::into_writer(&pairs, &mut buf)
            .map_err(|e| CoreError::EncodingError(e.to_string()))?;
        Ok(buf)
    }

    /// Decode from CBOR bytes.
    ///
    /// Duplicate field names are rejected, since they could never have been
    /// produced by [`Record::encode`].
    pub fn decode(data: &[u8]) -> Result<Self, CoreError> {
        let pairs: Vec<(String, FieldValue)> =
            ciborium::from_reader(data).map_err(|e| CoreError::DecodingError(e.to_string()))?;
        let mut fields = BTreeMap::new();
        for (name, value) in pairs {
            if fields.insert(name.clone(), value).is_some() {
                return Err(CoreError::DecodingError(format!(
                    "duplicate field {:?}",
                    name
                )));
            }
        }
        Ok(Self { fields })
    }
}

/// An encoded record with its content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedRecord {
    pub data: Bytes,
    pub hash: RecordHash,
    pub bytes_size: u64,
}

impl EncodedRecord {
    /// Encode a record and compute its hash.
    pub fn from_record(record: &Record) -> Result<Self, CoreError> {
        let data = record.encode()?;
        Ok(Self::from_bytes(data))
    }

    /// Wrap already-encoded bytes.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        let hash = RecordHash::of(&data);
        let bytes_size = data.len() as u64;
        Self {
            data: Bytes::from(data),
            hash,
            bytes_size,
        }
    }

    /// Decode the payload back into a record.
    pub fn record(&self) -> Result<Record, CoreError> {
        Record::decode(&self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn contact() -> Record {
        Record::new()
            .with("ContactId", "B6581A36-804D-45AC-B2E2-F6DA265AF7DE")
            .with("FirstName", "Jack")
            .with("LastName", "Smith")
            .with("HeightFt", 6i64)
            .with("HeightInch", 1.0f64)
            .with("DateOfBirth", FieldValue::Date(641_347_200_000))
    }

    #[test]
    fn test_encode_decode() {
        let record = contact();
        let bytes = record.encode().unwrap();
        let decoded = Record::decode(&bytes).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_insertion_order_does_not_change_hash() {
        let forward = Record::new().with("a", 1i64).with("b", "x").with("c", true);
        let backward = Record::new().with("c", true).with("b", "x").with("a", 1i64);
        let h1 = EncodedRecord::from_record(&forward).unwrap();
        let h2 = EncodedRecord::from_record(&backward).unwrap();
        assert_eq!(h1.hash, h2.hash);
        assert_eq!(h1.data, h2.data);
    }

    #[test]
    fn test_field_change_changes_hash() {
        let before = EncodedRecord::from_record(&contact()).unwrap();
        let after = EncodedRecord::from_record(&contact().with("LastName", "Adkins")).unwrap();
        assert_ne!(before.hash, after.hash);
    }

    #[test]
    fn test_field_names_are_alphabetical() {
        let rec = contact();
        let names: Vec<&str> = rec.fields().map(|(n, _)| n).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }

    #[test]
    fn test_decode_rejects_duplicate_fields() {
        let pairs = vec![
            ("a".to_string(), FieldValue::Int(1)),
            ("a".to_string(), FieldValue::Int(2)),
        ];
        let mut buf = Vec::new();
        ciborium::into_writer(&pairs, &mut buf).unwrap();
        assert!(Record::decode(&buf).is_err());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Record::decode(&[0xff, 0x00, 0x13]).is_err());
    }

    #[test]
    fn test_bytes_size_matches_data() {
        let encoded = EncodedRecord::from_record(&contact()).unwrap();
        assert_eq!(encoded.bytes_size, encoded.data.len() as u64);
        assert_eq!(encoded.record().unwrap(), contact());
    }

    proptest! {
        #[test]
        fn prop_hash_is_deterministic(
            fields in prop::collection::btree_map("[a-zA-Z]{1,8}", any::<i64>(), 0..8)
        ) {
            let mut a = Record::new();
            for (k, v) in fields.iter() {
                a.set(k.clone(), *v);
            }
            let mut b = Record::new();
            for (k, v) in fields.iter().rev() {
                b.set(k.clone(), *v);
            }
            let ea = EncodedRecord::from_record(&a).unwrap();
            let eb = EncodedRecord::from_record(&b).unwrap();
            prop_assert_eq!(ea.hash, eb.hash);
        }
    }
}
