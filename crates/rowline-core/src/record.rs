//! Normalized records.
//!
//! A [`Record`] is the adapter's unit of exchange with the host ORM: a map
//! of attribute name to value, plus the child record sets attached by a
//! populate operation. Raw rows become records through the result
//! processor; the `populated` side is only ever filled by the population
//! engine.

use crate::row::Row;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A normalized record keyed by attribute name.
///
/// `fields` holds scalar attribute values. `populated` holds resolved
/// association record sets keyed by association attribute name; a resolved
/// association with no children is present with an empty list, never
/// absent and never null.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Scalar attribute values
    pub fields: BTreeMap<String, Value>,
    /// Resolved association record sets
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub populated: BTreeMap<String, Vec<Record>>,
}

impl Record {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a record directly from a raw row, one field per column.
    ///
    /// No attribute mapping happens here; embedded-child columns are kept
    /// as-is. Use the result processor for normalization.
    pub fn from_row(row: &Row) -> Self {
        let mut fields = BTreeMap::new();
        for (name, value) in row.iter() {
            fields.insert(name.to_string(), value.clone());
        }
        Self {
            fields,
            populated: BTreeMap::new(),
        }
    }

    /// Get a field value by attribute name.
    pub fn get(&self, attr: &str) -> Option<&Value> {
        self.fields.get(attr)
    }

    /// Set a field value.
    pub fn set(&mut self, attr: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(attr.into(), value.into());
    }

    /// Remove a field, returning its value if present.
    pub fn remove(&mut self, attr: &str) -> Option<Value> {
        self.fields.remove(attr)
    }

    /// Check whether a field is present (a NULL field is still present).
    pub fn contains(&self, attr: &str) -> bool {
        self.fields.contains_key(attr)
    }

    /// Get a resolved association's records.
    pub fn children(&self, attr: &str) -> Option<&[Record]> {
        self.populated.get(attr).map(Vec::as_slice)
    }

    /// Attach a resolved association record set.
    pub fn attach_children(&mut self, attr: impl Into<String>, records: Vec<Record>) {
        self.populated.insert(attr.into(), records);
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
            populated: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_row_copies_all_columns() {
        let row = Row::new(
            vec!["id".to_string(), "name".to_string()],
            vec![Value::Int(1), Value::Text("a".to_string())],
        );
        let rec = Record::from_row(&row);
        assert_eq!(rec.get("id"), Some(&Value::Int(1)));
        assert_eq!(rec.get("name"), Some(&Value::Text("a".to_string())));
        assert!(rec.populated.is_empty());
    }

    #[test]
    fn field_accessors() {
        let mut rec = Record::new();
        rec.set("active", true);
        assert!(rec.contains("active"));
        assert_eq!(rec.get("active"), Some(&Value::Bool(true)));
        assert_eq!(rec.remove("active"), Some(Value::Bool(true)));
        assert!(!rec.contains("active"));
    }

    #[test]
    fn null_field_is_still_present() {
        let mut rec = Record::new();
        rec.set("deleted_at", Value::Null);
        assert!(rec.contains("deleted_at"));
        assert_eq!(rec.get("deleted_at"), Some(&Value::Null));
    }

    #[test]
    fn attached_children_round_trip() {
        let mut parent = Record::new();
        parent.set("id", 1i64);
        parent.attach_children("orders", vec![]);

        // Empty association is present, not absent
        assert_eq!(parent.children("orders"), Some(&[][..]));
        assert_eq!(parent.children("tags"), None);
    }

    #[test]
    fn json_round_trip() {
        let mut rec = Record::new();
        rec.set("id", 2i64);
        rec.attach_children("orders", vec![Record::from_iter([(
            "total".to_string(),
            Value::Int(10),
        )])]);

        let json = serde_json::to_string(&rec).expect("serialize");
        let back: Record = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, rec);
    }
}
