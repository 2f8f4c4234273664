//! Proptest generators for property-based testing.

use proptest::prelude::*;

use replica_core::{FieldValue, Record};

/// Generate a field value of any type. Floats stay finite so equality holds
/// after a decode.
pub fn field_value() -> impl Strategy<Value = FieldValue> {
    prop_oneof![
        Just(FieldValue::Null),
        "[a-zA-Z0-9 ]{0,16}".prop_map(FieldValue::String),
        any::<i64>().prop_map(FieldValue::Int),
        (-1.0e9f64..1.0e9f64).prop_map(FieldValue::Float),
        any::<bool>().prop_map(FieldValue::Bool),
        (0i64..4_102_444_800_000).prop_map(FieldValue::Date),
        prop::collection::vec(any::<u8>(), 0..32).prop_map(FieldValue::Binary),
    ]
}

/// Generate an identifier-shaped field name.
pub fn field_name() -> impl Strategy<Value = String> {
    "[A-Z][a-zA-Z]{0,11}"
}

/// Generate a record with up to eight arbitrary fields.
pub fn record() -> impl Strategy<Value = Record> {
    prop::collection::btree_map(field_name(), field_value(), 0..8).prop_map(|fields| {
        let mut record = Record::new();
        for (name, value) in fields {
            record.set(name, value);
        }
        record
    })
}

/// Generate a contact id.
pub fn contact_id() -> impl Strategy<Value = String> {
    "c[0-9]{1,4}"
}

/// Generate a record matching the fixture contact schema.
pub fn contact() -> impl Strategy<Value = Record> {
    (contact_id(), "[A-Z][a-z]{1,10}", 3i64..8)
        .prop_map(|(id, last_name, height)| crate::fixtures::contact_record(&id, &last_name, height))
}

/// Generate a set of contacts with distinct ids.
pub fn contacts(max: usize) -> impl Strategy<Value = Vec<(String, String, i64)>> {
    prop::collection::btree_map(contact_id(), ("[A-Z][a-z]{1,10}", 3i64..8), 0..max).prop_map(
        |contacts| {
            contacts
                .into_iter()
                .map(|(id, (last_name, height))| (id, last_name, height))
                .collect()
        },
    )
}
