//! Result normalization.
//!
//! Raw rows come back keyed by storage column names (sometimes upper-cased
//! by the engine) and may carry columns that are not declared attributes.
//! Normalization maps every declared attribute onto its value, drops
//! store-only columns, and coerces storage shapes back into logical ones.
//! It is idempotent: normalizing an already-normalized set is a no-op.
//!
//! This module also owns the single resolution point for the `___` alias
//! wire format: columns like `orders___total` on a parent row are embedded
//! child fields from a foreign-key join and get split out before the
//! parent itself is normalized.

use rowline_core::record::Record;
use rowline_core::schema::{AttrType, CollectionDef};
use rowline_core::value::Value;
use rowline_query::EMBEDDED_KEY_PREFIX;
use std::collections::BTreeMap;

/// Resolve one declared attribute's value out of a record's fields.
///
/// Lookup order: the attribute name itself (already-normalized input),
/// the storage column name, then a case-insensitive match on either.
fn resolve<'a>(record: &'a Record, attr: &str, column: &str) -> Option<&'a Value> {
    if let Some(value) = record.get(attr) {
        return Some(value);
    }
    if let Some(value) = record.get(column) {
        return Some(value);
    }
    record
        .fields
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(attr) || key.eq_ignore_ascii_case(column))
        .map(|(_, value)| value)
}

/// Coerce a storage value back into its declared logical shape.
fn coerce_read(attr_type: AttrType, value: Value) -> Value {
    match (attr_type, value) {
        (AttrType::Boolean, Value::Int(v)) => Value::Bool(v != 0),
        (_, value) => value,
    }
}

/// Normalize one record against a collection definition.
pub fn normalize_record(record: Record, def: &CollectionDef) -> Record {
    let mut normalized = Record::new();
    for (attr, attr_def) in &def.attributes {
        let column = attr_def.column_name.as_deref().unwrap_or(attr);
        if let Some(value) = resolve(&record, attr, column) {
            normalized
                .fields
                .insert(attr.clone(), coerce_read(attr_def.attr_type, value.clone()));
        }
        // Attributes absent from the row stay absent, not null.
    }
    normalized.populated = record.populated;
    normalized
}

/// Normalize a record set against a collection definition.
pub fn normalize(records: Vec<Record>, def: &CollectionDef) -> Vec<Record> {
    records
        .into_iter()
        .map(|record| normalize_record(record, def))
        .collect()
}

/// Split embedded child columns off a parent record.
///
/// Any field whose name contains the `___` separator is an aliased child
/// column from a foreign-key join: `orders___total` belongs to the
/// `orders` association's child under its `total` column. The embedded
/// fields are removed from the parent and returned grouped by alias, one
/// child record per alias per parent row.
pub fn split_embedded(record: &mut Record) -> BTreeMap<String, Record> {
    let embedded_keys: Vec<String> = record
        .fields
        .keys()
        .filter(|key| {
            // A leading separator marks a grouping alias, not a child column.
            key.find(EMBEDDED_KEY_PREFIX)
                .is_some_and(|pos| pos > 0 && pos + EMBEDDED_KEY_PREFIX.len() < key.len())
        })
        .cloned()
        .collect();

    let mut children: BTreeMap<String, Record> = BTreeMap::new();
    for key in embedded_keys {
        let Some(pos) = key.find(EMBEDDED_KEY_PREFIX) else {
            continue;
        };
        let alias = key[..pos].to_string();
        let column = key[pos + EMBEDDED_KEY_PREFIX.len()..].to_string();
        if let Some(value) = record.remove(&key) {
            children.entry(alias).or_default().fields.insert(column, value);
        }
    }
    children
}
