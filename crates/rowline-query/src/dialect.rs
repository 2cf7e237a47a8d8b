//! Dialect post-processing passes.
//!
//! The engine has no native OFFSET/LIMIT and no usable multi-join populate
//! path, so compiled statements get reworked here: pagination becomes a
//! row-number wrapper, association templates become one UNION statement per
//! association, and write values are coerced into the engine's storage
//! shapes before compilation.

use crate::plan::{PARENT_KEY_PLACEHOLDER, PlanStatement};
use rowline_core::error::{Error, Result};
use rowline_core::schema::{AttrType, CollectionDef};
use rowline_core::value::Value;

/// The row-number pseudo-column projected by compiled selects.
pub const ROW_NUMBER_COLUMN: &str = "LINE_NUMBER";

/// Wrap a compiled select in a row-number window.
///
/// The inner statement must already be deterministically ordered; the
/// compiler guarantees that by always projecting `"LINE_NUMBER"` over the
/// effective sort.
pub fn paginate(sql: &str, skip: Option<u64>, limit: Option<u64>) -> String {
    match (skip, limit) {
        (Some(skip), Some(limit)) => format!(
            "SELECT * FROM ({sql}) WHERE \"{ROW_NUMBER_COLUMN}\" > {skip} AND \
             \"{ROW_NUMBER_COLUMN}\" <= {}",
            skip + limit
        ),
        (None, Some(limit)) => {
            format!("SELECT * FROM ({sql}) WHERE \"{ROW_NUMBER_COLUMN}\" <= {limit}")
        }
        (Some(skip), None) => {
            format!("SELECT * FROM ({sql}) WHERE \"{ROW_NUMBER_COLUMN}\" > {skip}")
        }
        (None, None) => sql.to_string(),
    }
}

/// Wrap a compiled select so only its first row returns.
///
/// Used by update's single-match re-fetch path.
pub fn first_row_only(sql: &str) -> String {
    format!("SELECT * FROM ({sql}) WHERE \"{ROW_NUMBER_COLUMN}\" = 1")
}

/// Substitute one parent key into a clone of a child template.
///
/// Numeric keys are substituted unquoted; everything else goes through the
/// literal renderer (quoted, escaped). Non-numeric clones additionally lose
/// their trailing ORDER BY — ordering is re-established after grouping by
/// parent.
fn bind_template(template: &str, key: &Value) -> String {
    if key.is_numeric() {
        template.replace(PARENT_KEY_PLACEHOLDER, &key.to_sql_literal())
    } else {
        let bound = template.replace(PARENT_KEY_PLACEHOLDER, &key.to_sql_literal());
        match bound.rfind(" ORDER BY ") {
            Some(pos) => bound[..pos].to_string(),
            None => bound,
        }
    }
}

/// Synthesize the combined statement for one association: one clone of the
/// template per parent key, clones after the first parenthesized, all
/// joined with a set union.
///
/// The statement grows with the parent count by design — one round trip per
/// association beats one per parent, and no chunking is applied.
pub fn synthesize_union(template: &PlanStatement, keys: &[Value]) -> Result<String> {
    if keys.is_empty() {
        return Err(Error::compile(
            "cannot synthesize a union over zero parent keys",
        ));
    }
    if !template.sql.contains(PARENT_KEY_PLACEHOLDER) {
        return Err(Error::compile(format!(
            "child template carries no `{PARENT_KEY_PLACEHOLDER}` placeholder"
        )));
    }

    let mut combined = String::new();
    for (i, key) in keys.iter().enumerate() {
        let clone = bind_template(&template.sql, key);
        if i == 0 {
            combined.push_str(&clone);
        } else {
            combined.push_str(" UNION ( ");
            combined.push_str(&clone);
            combined.push_str(" )");
        }
    }
    Ok(combined)
}

/// Coerce write values for an insert.
///
/// Booleans become 0/1, datetimes become session-format literals, and
/// datetime attributes absent from the payload are written as explicit
/// NULLs.
pub fn coerce_for_insert(def: &CollectionDef, values: &mut Vec<(String, Value)>) {
    coerce_present_values(def, values);

    for (attr, attr_def) in &def.attributes {
        if attr_def.attr_type == AttrType::Datetime
            && !values.iter().any(|(name, _)| name == attr)
        {
            values.push((attr.clone(), Value::Null));
        }
    }
}

/// Coerce write values for an update: only attributes present in the
/// payload are touched.
pub fn coerce_for_update(def: &CollectionDef, values: &mut [(String, Value)]) {
    coerce_present_values(def, values);
}

fn coerce_present_values(def: &CollectionDef, values: &mut [(String, Value)]) {
    for (attr, value) in values.iter_mut() {
        let Some(attr_def) = def.attr(attr) else {
            continue;
        };
        match attr_def.attr_type {
            AttrType::Boolean => {
                if let Some(b) = value.as_bool() {
                    *value = Value::Int(if b { 1 } else { 0 });
                }
            }
            AttrType::Datetime => {
                if let Value::Timestamp(micros) = value {
                    *value = Value::Text(rowline_core::format_datetime(*micros));
                }
            }
            _ => {}
        }
    }
}
