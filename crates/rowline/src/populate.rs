//! Population (join emulation) building blocks.
//!
//! The engine cannot serve the ORM's populate feature with native joins,
//! so associations resolve in stages: the parent query runs once, then one
//! synthesized UNION statement per separate-table association, and the
//! results are grouped per parent and merged back. This module holds the
//! buffer type and the pure stages; the adapter drives the round trips.

use crate::processor;
use rowline_core::record::Record;
use rowline_core::schema::CollectionDef;
use rowline_core::value::Value;
use rowline_query::{JoinInstruction, JoinMeta, SchemaMap};
use std::collections::BTreeMap;

/// Canonical grouping key for a value.
///
/// Numeric values of different storage widths must land in the same
/// bucket, so keys go through the literal renderer.
fn value_key(value: &Value) -> String {
    value.to_sql_literal()
}

/// Intermediate per-association holder of matched child records.
///
/// Exactly one buffer exists per (parent record, requested association),
/// even when zero child rows matched — its records list is just empty.
#[derive(Debug, Clone, PartialEq)]
pub struct Buffer {
    /// Association attribute name on the parent
    pub attr_name: String,
    /// The parent record's primary key value
    pub parent_pk: Value,
    /// The parent's primary key attribute name
    pub pk_attr: String,
    /// The alias child rows are keyed under
    pub key_name: String,
    /// The parent's key value children are matched against
    pub key_value: Value,
    /// Matched child records, normalized
    pub records: Vec<Record>,
}

/// Build one buffer per (parent, instruction), serving foreign-key
/// associations straight from the embedded-child cache.
///
/// A parent whose key value is NULL never receives cached matches.
pub fn build_buffers(
    parents: &[Record],
    instructions: &[JoinInstruction],
    parent_def: &CollectionDef,
    cached: &BTreeMap<String, Vec<Record>>,
    schema: &SchemaMap,
) -> Vec<Buffer> {
    let pk_attr = parent_def.primary_key();
    let mut buffers = Vec::with_capacity(parents.len() * instructions.len());

    for instruction in instructions {
        let key_attr = parent_def
            .attr_for_column(&instruction.parent_key)
            .unwrap_or(&instruction.parent_key);
        let child_def = schema.get(&instruction.child);

        for parent in parents {
            let parent_pk = parent.get(pk_attr).cloned().unwrap_or(Value::Null);
            let key_value = parent.get(key_attr).cloned().unwrap_or(Value::Null);

            let mut records = Vec::new();
            if !key_value.is_null() {
                if let Some(children) = cached.get(&instruction.alias) {
                    for child in children {
                        let matches = child
                            .get(&instruction.child_key)
                            .is_some_and(|v| !v.is_null() && *v == key_value);
                        if matches {
                            records.push(child.clone());
                        }
                    }
                }
            }
            if let Some(child_def) = child_def {
                records = processor::normalize(records, child_def);
            }

            buffers.push(Buffer {
                attr_name: instruction.alias.clone(),
                parent_pk,
                pk_attr: pk_attr.to_string(),
                key_name: instruction.alias.clone(),
                key_value,
                records,
            });
        }
    }
    buffers
}

/// Collect the distinct-per-parent key values to substitute into one
/// association's template, skipping NULL keys.
pub fn parent_keys(
    parents: &[Record],
    parent_def: &CollectionDef,
    meta: &JoinMeta,
) -> Vec<Value> {
    let key_attr = parent_def
        .attr_for_column(&meta.parent_key)
        .unwrap_or(&meta.parent_key);
    parents
        .iter()
        .filter_map(|parent| parent.get(key_attr))
        .filter(|value| !value.is_null())
        .cloned()
        .collect()
}

/// Group returned child rows by the association's foreign-key column.
///
/// Multi-hop rows group by the `___`-prefixed key alias, which is stripped
/// from each row before it is stored.
pub fn group_children(rows: Vec<Record>, meta: &JoinMeta) -> BTreeMap<String, Vec<Record>> {
    let mut grouped: BTreeMap<String, Vec<Record>> = BTreeMap::new();
    for mut row in rows {
        let key = if meta.multi_hop {
            row.remove(&meta.group_column).or_else(|| {
                let found = row
                    .fields
                    .keys()
                    .find(|k| k.eq_ignore_ascii_case(&meta.group_column))
                    .cloned();
                found.and_then(|k| row.remove(&k))
            })
        } else {
            row.get(&meta.group_column)
                .or_else(|| {
                    row.fields
                        .iter()
                        .find(|(k, _)| k.eq_ignore_ascii_case(&meta.group_column))
                        .map(|(_, v)| v)
                })
                .cloned()
        };

        let Some(key) = key else {
            tracing::debug!(column = %meta.group_column, "child row without grouping key");
            continue;
        };
        grouped.entry(value_key(&key)).or_default().push(row);
    }
    grouped
}

/// Attach grouped child rows onto the matching buffers, normalized against
/// the child collection. Buffers with no matching group keep their empty
/// records list.
pub fn attach_to_buffers(
    buffers: &mut [Buffer],
    meta: &JoinMeta,
    grouped: &BTreeMap<String, Vec<Record>>,
    child_def: &CollectionDef,
) {
    for buffer in buffers.iter_mut() {
        if buffer.attr_name != meta.alias || buffer.key_value.is_null() {
            continue;
        }
        if let Some(records) = grouped.get(&value_key(&buffer.key_value)) {
            buffer
                .records
                .extend(processor::normalize(records.clone(), child_def));
        }
    }
}

/// Merge buffers onto the parent record set, keyed by attribute name and
/// parent primary key. Every buffer lands, so every parent carries every
/// requested association — empty list rather than absent.
pub fn merge_buffers(parents: &mut [Record], buffers: Vec<Buffer>) {
    for buffer in buffers {
        let target = parents.iter_mut().find(|parent| {
            parent
                .get(&buffer.pk_attr)
                .is_some_and(|pk| *pk == buffer.parent_pk)
                && !parent.populated.contains_key(&buffer.attr_name)
        });
        if let Some(parent) = target {
            parent.attach_children(buffer.attr_name, buffer.records);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowline_core::schema::{AttrDef, AttrType};

    fn users() -> CollectionDef {
        CollectionDef::new(
            "users",
            [
                (
                    "id".to_string(),
                    AttrDef::new(AttrType::Integer).primary_key(),
                ),
                ("team_id".to_string(), AttrDef::new(AttrType::Integer)),
            ],
        )
    }

    fn orders() -> CollectionDef {
        CollectionDef::new(
            "orders",
            [
                (
                    "id".to_string(),
                    AttrDef::new(AttrType::Integer).primary_key(),
                ),
                ("user_id".to_string(), AttrDef::new(AttrType::Integer)),
            ],
        )
    }

    fn schema() -> SchemaMap {
        let mut map = SchemaMap::new();
        map.insert("users".to_string(), users());
        map.insert("orders".to_string(), orders());
        map
    }

    fn parent(id: i64) -> Record {
        Record::from_iter([("id".to_string(), Value::Int(id))])
    }

    fn meta() -> JoinMeta {
        JoinMeta::single_hop(&JoinInstruction::via_child(
            "orders", "users", "id", "orders", "user_id",
        ))
    }

    #[test]
    fn one_buffer_per_parent_per_association() {
        let parents = vec![parent(1), parent(2)];
        let instructions = vec![JoinInstruction::via_child(
            "orders", "users", "id", "orders", "user_id",
        )];
        let buffers = build_buffers(
            &parents,
            &instructions,
            &users(),
            &BTreeMap::new(),
            &schema(),
        );

        assert_eq!(buffers.len(), 2);
        assert!(buffers.iter().all(|b| b.records.is_empty()));
        assert_eq!(buffers[0].parent_pk, Value::Int(1));
        assert_eq!(buffers[1].parent_pk, Value::Int(2));
    }

    #[test]
    fn cached_children_match_on_key_and_skip_null_parents() {
        let parents = vec![
            Record::from_iter([
                ("id".to_string(), Value::Int(1)),
                ("team_id".to_string(), Value::Int(7)),
            ]),
            Record::from_iter([
                ("id".to_string(), Value::Int(2)),
                ("team_id".to_string(), Value::Null),
            ]),
        ];
        let instructions = vec![JoinInstruction::foreign_key(
            "team", "users", "team_id", "orders", "user_id",
        )];
        let mut cached = BTreeMap::new();
        cached.insert(
            "team".to_string(),
            vec![Record::from_iter([
                ("id".to_string(), Value::Int(70)),
                ("user_id".to_string(), Value::Int(7)),
            ])],
        );

        let buffers = build_buffers(&parents, &instructions, &users(), &cached, &schema());

        assert_eq!(buffers[0].records.len(), 1);
        // NULL foreign key never receives cached matches
        assert!(buffers[1].records.is_empty());
    }

    #[test]
    fn parent_keys_skip_nulls() {
        let parents = vec![
            parent(1),
            Record::from_iter([("id".to_string(), Value::Null)]),
            parent(3),
        ];
        let keys = parent_keys(&parents, &users(), &meta());
        assert_eq!(keys, vec![Value::Int(1), Value::Int(3)]);
    }

    #[test]
    fn grouping_by_foreign_key_column() {
        let rows = vec![
            Record::from_iter([
                ("id".to_string(), Value::Int(10)),
                ("user_id".to_string(), Value::Int(1)),
            ]),
            Record::from_iter([
                ("id".to_string(), Value::Int(11)),
                ("user_id".to_string(), Value::Int(1)),
            ]),
            Record::from_iter([
                ("id".to_string(), Value::Int(12)),
                ("user_id".to_string(), Value::Int(2)),
            ]),
        ];

        let grouped = group_children(rows, &meta());
        assert_eq!(grouped.get("1").map(Vec::len), Some(2));
        assert_eq!(grouped.get("2").map(Vec::len), Some(1));
    }

    #[test]
    fn multi_hop_grouping_strips_the_alias() {
        let instruction = JoinInstruction::via_junction(
            "tags", "users", "id", "tags", "id", "user_tags", "user_id", "tag_id",
        );
        let meta = JoinMeta::junction_hop(&instruction, "user_id");

        let rows = vec![Record::from_iter([
            ("id".to_string(), Value::Int(5)),
            ("___user_id".to_string(), Value::Int(1)),
        ])];

        let grouped = group_children(rows, &meta);
        let stored = &grouped.get("1").expect("group for parent 1")[0];
        assert!(!stored.contains("___user_id"));
        assert_eq!(stored.get("id"), Some(&Value::Int(5)));
    }

    #[test]
    fn attach_and_merge_leave_unmatched_buffers_empty() {
        let parents_source = vec![parent(1), parent(2)];
        let instructions = vec![JoinInstruction::via_child(
            "orders", "users", "id", "orders", "user_id",
        )];
        let mut buffers = build_buffers(
            &parents_source,
            &instructions,
            &users(),
            &BTreeMap::new(),
            &schema(),
        );

        let rows = vec![Record::from_iter([
            ("id".to_string(), Value::Int(10)),
            ("user_id".to_string(), Value::Int(1)),
        ])];
        let grouped = group_children(rows, &meta());
        attach_to_buffers(&mut buffers, &meta(), &grouped, &orders());

        let mut parents = parents_source;
        merge_buffers(&mut parents, buffers);

        assert_eq!(parents[0].children("orders").map(<[Record]>::len), Some(1));
        // Parent 2 matched nothing: empty list, not absent, not null
        assert_eq!(parents[1].children("orders"), Some(&[][..]));
    }
}
