//! Schema DDL and introspection statements.
//!
//! Table creation, column add/drop, the auto-increment seed probe, and the
//! three catalog probes `describe` merges into a normalized schema.

use crate::compile::quote_ident;
use rowline_core::row::Row;
use rowline_core::schema::{AttrDef, AttrType, CollectionDef};
use rowline_core::value::Value;
use rowline_core::ConnectConfig;

/// Render the CREATE TABLE statement for a collection.
pub fn create_table(def: &CollectionDef, config: &ConnectConfig) -> String {
    let columns: Vec<String> = def
        .attributes
        .iter()
        .map(|(attr, attr_def)| {
            let mut column = format!(
                "{} {}",
                quote_ident(attr_def.column_name.as_deref().unwrap_or(attr)),
                attr_def.attr_type.sql_type()
            );
            if attr_def.required {
                column.push_str(" NOT NULL");
            }
            if attr_def.unique {
                column.push_str(" UNIQUE");
            }
            if attr_def.primary_key {
                column.push_str(" PRIMARY KEY");
            }
            column
        })
        .collect();

    let mut sql = format!(
        "CREATE TABLE {} ({})",
        quote_ident(def.table_name()),
        columns.join(", ")
    );
    if let Some(charset) = &config.charset {
        sql.push_str(&format!(" DEFAULT CHARSET {charset}"));
    }
    if let Some(collation) = &config.collation {
        if config.charset.is_none() {
            sql.push_str(" DEFAULT");
        }
        sql.push_str(&format!(" COLLATE {collation}"));
    }
    sql
}

/// Render the DROP TABLE statement.
pub fn drop_table(table: &str) -> String {
    format!("DROP TABLE {}", quote_ident(table))
}

/// Render the ADD column statement.
pub fn add_column(table: &str, column: &str, def: &AttrDef) -> String {
    let mut sql = format!(
        "ALTER TABLE {} ADD {} {}",
        quote_ident(table),
        quote_ident(def.column_name.as_deref().unwrap_or(column)),
        def.attr_type.sql_type()
    );
    if def.required {
        sql.push_str(" NOT NULL");
    }
    sql
}

/// Render the DROP COLUMN statement.
pub fn drop_column(table: &str, column: &str) -> String {
    format!(
        "ALTER TABLE {} DROP COLUMN {}",
        quote_ident(table),
        quote_ident(column)
    )
}

/// Probe for the current maximum of an auto-increment column, used to seed
/// the in-process counter at table creation.
pub fn max_probe(table: &str, column: &str) -> String {
    format!(
        "SELECT MAX({}) \"MAX\" FROM {}",
        quote_ident(column),
        quote_ident(table)
    )
}

/// The three catalog probes behind `describe`: column shapes, index
/// membership, and primary-key constraint columns.
pub fn describe_queries(table: &str) -> [String; 3] {
    [
        format!(
            "SELECT COLUMN_NAME, DATA_TYPE, NULLABLE FROM USER_TAB_COLUMNS \
             WHERE TABLE_NAME = '{table}'"
        ),
        format!(
            "SELECT INDEX_NAME, COLUMN_NAME FROM USER_IND_COLUMNS WHERE TABLE_NAME = '{table}'"
        ),
        format!(
            "SELECT COLS.TABLE_NAME, COLS.COLUMN_NAME, COLS.POSITION, CONS.STATUS, CONS.OWNER \
             FROM ALL_CONSTRAINTS CONS, ALL_CONS_COLUMNS COLS \
             WHERE COLS.TABLE_NAME = '{table}' AND CONS.CONSTRAINT_TYPE = 'P' \
             AND CONS.CONSTRAINT_NAME = COLS.CONSTRAINT_NAME AND CONS.OWNER = COLS.OWNER \
             ORDER BY COLS.TABLE_NAME, COLS.POSITION"
        ),
    ]
}

fn attr_type_for(data_type: &str) -> AttrType {
    let upper = data_type.to_ascii_uppercase();
    if upper.starts_with("NUMBER") {
        AttrType::Integer
    } else if upper.starts_with("FLOAT") || upper.starts_with("BINARY_DOUBLE") {
        AttrType::Float
    } else if upper.starts_with("TIMESTAMP") || upper == "DATE" {
        AttrType::Datetime
    } else if upper.starts_with("RAW") || upper == "BLOB" {
        AttrType::Binary
    } else {
        AttrType::Text
    }
}

fn row_text(row: &Row, column: &str) -> Option<String> {
    row.get_by_name(column)
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Merge the three probe result sets into a normalized collection
/// definition, preferring the declared attribute names where a column maps
/// onto a registered attribute.
pub fn merge_describe(
    declared: &CollectionDef,
    column_rows: &[Row],
    index_rows: &[Row],
    pk_rows: &[Row],
) -> CollectionDef {
    let pk_columns: Vec<String> = pk_rows
        .iter()
        .filter_map(|row| row_text(row, "COLUMN_NAME"))
        .collect();
    let indexed_columns: Vec<String> = index_rows
        .iter()
        .filter_map(|row| row_text(row, "COLUMN_NAME"))
        .collect();

    let mut attributes = Vec::new();
    for row in column_rows {
        let Some(column) = row_text(row, "COLUMN_NAME") else {
            continue;
        };
        let data_type = row_text(row, "DATA_TYPE").unwrap_or_default();
        let nullable = row_text(row, "NULLABLE");

        let attr_name = declared
            .attr_for_column(&column)
            .map_or_else(|| column.clone(), str::to_string);
        // Keep the declared logical type when the column backs a known
        // attribute; the catalog cannot distinguish booleans from numbers.
        let attr_type = declared
            .attr(&attr_name)
            .map_or_else(|| attr_type_for(&data_type), |d| d.attr_type);

        let is_pk = pk_columns.iter().any(|pk| pk == &column);
        let mut attr_def = AttrDef {
            column_name: (attr_name != column).then(|| column.clone()),
            attr_type,
            primary_key: is_pk,
            auto_increment: is_pk && data_type.to_ascii_uppercase().starts_with("NUMBER"),
            required: nullable.as_deref() == Some("N"),
            unique: declared.attr(&attr_name).is_some_and(|d| d.unique),
            indexed: indexed_columns.iter().any(|c| c == &column),
        };
        if let Some(declared_def) = declared.attr(&attr_name) {
            attr_def.auto_increment = attr_def.auto_increment || declared_def.auto_increment;
        }
        attributes.push((attr_name, attr_def));
    }

    CollectionDef::new(declared.identity.clone(), attributes)
}
