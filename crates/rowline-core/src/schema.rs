//! Collection and attribute definitions.
//!
//! Collections are the adapter's notion of a table: an identity plus a map
//! of attribute definitions registered by the host ORM. Attribute names are
//! the ORM-facing keys; each may map to a differently-named storage column.

use std::collections::BTreeMap;

/// Logical attribute type, as declared by the host ORM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttrType {
    /// Integer column (NUMBER)
    Integer,
    /// Floating-point column (FLOAT)
    Float,
    /// Text column (VARCHAR2)
    #[default]
    Text,
    /// Boolean stored as NUMBER(1) 0/1
    Boolean,
    /// Date/time stored in the session timestamp format
    Datetime,
    /// JSON document stored as CLOB
    Json,
    /// Binary column (RAW)
    Binary,
}

impl AttrType {
    /// Get the engine column type used in DDL for this attribute type.
    pub const fn sql_type(&self) -> &'static str {
        match self {
            AttrType::Integer => "NUMBER",
            AttrType::Float => "FLOAT",
            AttrType::Text => "VARCHAR2(255)",
            AttrType::Boolean => "NUMBER(1)",
            AttrType::Datetime => "TIMESTAMP",
            AttrType::Json => "CLOB",
            AttrType::Binary => "RAW(2000)",
        }
    }
}

/// Definition of a single attribute.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttrDef {
    /// Storage column name when it differs from the attribute name
    pub column_name: Option<String>,
    /// Logical type
    pub attr_type: AttrType,
    /// Whether this attribute is the primary key
    pub primary_key: bool,
    /// Whether values are issued by the auto-increment registry
    pub auto_increment: bool,
    /// Whether the column is NOT NULL
    pub required: bool,
    /// Whether the column carries a unique constraint
    pub unique: bool,
    /// Whether the column is covered by an index (filled in by describe)
    pub indexed: bool,
}

impl AttrDef {
    /// Create a definition with the given type and all flags clear.
    pub fn new(attr_type: AttrType) -> Self {
        Self {
            attr_type,
            ..Self::default()
        }
    }

    /// Set the storage column name.
    pub fn column(mut self, name: impl Into<String>) -> Self {
        self.column_name = Some(name.into());
        self
    }

    /// Mark as primary key.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Mark as auto-increment.
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    /// Mark as required (NOT NULL).
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Mark as unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Fallback primary key attribute when none is declared.
pub const DEFAULT_PRIMARY_KEY: &str = "id";

/// A registered collection: identity plus attribute definitions.
///
/// Immutable once schema description completes; the registry hands out
/// clones rather than shared references.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionDef {
    /// Collection identity (doubles as the table name)
    pub identity: String,
    /// Attribute name -> definition
    pub attributes: BTreeMap<String, AttrDef>,
}

impl CollectionDef {
    /// Create a collection definition.
    pub fn new(
        identity: impl Into<String>,
        attributes: impl IntoIterator<Item = (String, AttrDef)>,
    ) -> Self {
        Self {
            identity: identity.into(),
            attributes: attributes.into_iter().collect(),
        }
    }

    /// The table name backing this collection.
    pub fn table_name(&self) -> &str {
        &self.identity
    }

    /// The primary key attribute name.
    ///
    /// Exactly one attribute may be declared `primary_key`; when none is,
    /// the conventional `id` is assumed.
    pub fn primary_key(&self) -> &str {
        self.attributes
            .iter()
            .find(|(_, def)| def.primary_key)
            .map_or(DEFAULT_PRIMARY_KEY, |(name, _)| name.as_str())
    }

    /// Storage column name for an attribute.
    ///
    /// Falls back to the attribute name itself, both for attributes without
    /// an explicit column name and for undeclared attributes.
    pub fn column_name<'a>(&'a self, attr: &'a str) -> &'a str {
        self.attributes
            .get(attr)
            .and_then(|def| def.column_name.as_deref())
            .unwrap_or(attr)
    }

    /// Attribute definition lookup.
    pub fn attr(&self, name: &str) -> Option<&AttrDef> {
        self.attributes.get(name)
    }

    /// Find the attribute mapped to a storage column.
    ///
    /// The engine upper-cases unquoted result columns, so the match is
    /// exact first, case-insensitive second.
    pub fn attr_for_column(&self, column: &str) -> Option<&str> {
        for (name, def) in &self.attributes {
            let col = def.column_name.as_deref().unwrap_or(name);
            if col == column {
                return Some(name);
            }
        }
        for (name, def) in &self.attributes {
            let col = def.column_name.as_deref().unwrap_or(name);
            if col.eq_ignore_ascii_case(column) {
                return Some(name);
            }
        }
        None
    }

    /// Attribute name for a primary-key storage column, for mapping a
    /// compiled plan's key column back onto parent records.
    pub fn model_pk_for_column(&self, pk_column: &str) -> Option<&str> {
        self.attr_for_column(pk_column)
    }

    /// Iterate (attribute, column, definition) for auto-increment columns.
    pub fn auto_increment_columns(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes.iter().filter_map(|(name, def)| {
            def.auto_increment
                .then(|| (name.as_str(), def.column_name.as_deref().unwrap_or(name)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> CollectionDef {
        CollectionDef::new(
            "users",
            [
                (
                    "id".to_string(),
                    AttrDef::new(AttrType::Integer).primary_key().auto_increment(),
                ),
                ("name".to_string(), AttrDef::new(AttrType::Text).unique()),
                ("active".to_string(), AttrDef::new(AttrType::Boolean)),
                (
                    "created_at".to_string(),
                    AttrDef::new(AttrType::Datetime).column("CREATION_TS"),
                ),
            ],
        )
    }

    #[test]
    fn primary_key_resolution() {
        assert_eq!(users().primary_key(), "id");

        let no_pk = CollectionDef::new(
            "logs",
            [("message".to_string(), AttrDef::new(AttrType::Text))],
        );
        assert_eq!(no_pk.primary_key(), "id");
    }

    #[test]
    fn column_name_fallback() {
        let def = users();
        assert_eq!(def.column_name("name"), "name");
        assert_eq!(def.column_name("created_at"), "CREATION_TS");
        assert_eq!(def.column_name("not_declared"), "not_declared");
    }

    #[test]
    fn attr_for_column_is_case_insensitive_fallback() {
        let def = users();
        assert_eq!(def.attr_for_column("CREATION_TS"), Some("created_at"));
        assert_eq!(def.attr_for_column("NAME"), Some("name"));
        assert_eq!(def.attr_for_column("name"), Some("name"));
        assert_eq!(def.attr_for_column("nope"), None);
    }

    #[test]
    fn auto_increment_columns() {
        let def = users();
        let cols: Vec<_> = def.auto_increment_columns().collect();
        assert_eq!(cols, vec![("id", "id")]);
    }

    #[test]
    fn sql_types() {
        assert_eq!(AttrType::Integer.sql_type(), "NUMBER");
        assert_eq!(AttrType::Boolean.sql_type(), "NUMBER(1)");
        assert_eq!(AttrType::Datetime.sql_type(), "TIMESTAMP");
    }
}
