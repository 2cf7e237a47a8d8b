//! Dynamic SQL values.

use serde::{Deserialize, Serialize};

/// A dynamically-typed SQL value.
///
/// This enum represents the values the adapter reads from and writes to the
/// engine. It is used for record fields, bound parameters, and parent-key
/// substitution during association resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// NULL value
    Null,

    /// Boolean value
    Bool(bool),

    /// 64-bit signed integer (the engine's NUMBER without scale)
    Int(i64),

    /// 64-bit floating point
    Double(f64),

    /// Text string
    Text(String),

    /// Binary data
    Bytes(Vec<u8>),

    /// Timestamp (microseconds since epoch, UTC)
    Timestamp(i64),

    /// JSON value
    Json(serde_json::Value),
}

impl Value {
    /// Check if this value is NULL.
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if this value is numeric (integer or floating point).
    ///
    /// Numeric parent keys are substituted unquoted when synthesizing
    /// association queries; everything else is quoted.
    pub const fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Double(_))
    }

    /// Get the type name of this value.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOLEAN",
            Value::Int(_) => "NUMBER",
            Value::Double(_) => "FLOAT",
            Value::Text(_) => "VARCHAR2",
            Value::Bytes(_) => "RAW",
            Value::Timestamp(_) => "TIMESTAMP",
            Value::Json(_) => "CLOB",
        }
    }

    /// Try to convert this value to a bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            Value::Int(v) => Some(*v != 0),
            _ => None,
        }
    }

    /// Try to convert this value to an i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Bool(v) => Some(if *v { 1 } else { 0 }),
            _ => None,
        }
    }

    /// Try to convert this value to an f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Try to get this value as a string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Render this value as an inline SQL literal.
    ///
    /// The engine dialect is compiled without bound parameters, so every
    /// value reaches the statement text through this single escape point.
    /// Strings are delimited with `'` and embedded quotes doubled.
    pub fn to_sql_literal(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Bool(v) => (if *v { "1" } else { "0" }).to_string(),
            Value::Int(v) => v.to_string(),
            Value::Double(v) => v.to_string(),
            Value::Text(s) => quote_string(s),
            Value::Bytes(b) => {
                let mut hex = String::with_capacity(b.len() * 2 + 2);
                for byte in b {
                    hex.push_str(&format!("{byte:02X}"));
                }
                format!("'{hex}'")
            }
            Value::Timestamp(micros) => quote_string(&crate::format_datetime(*micros)),
            Value::Json(v) => quote_string(&v.to_string()),
        }
    }
}

/// Quote a string as a SQL literal, doubling embedded delimiters.
fn quote_string(s: &str) -> String {
    let escaped = s.replace('\'', "''");
    format!("'{escaped}'")
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_and_numeric_checks() {
        assert!(Value::Null.is_null());
        assert!(!Value::Int(0).is_null());
        assert!(Value::Int(1).is_numeric());
        assert!(Value::Double(1.5).is_numeric());
        assert!(!Value::Text("1".into()).is_numeric());
        assert!(!Value::Bool(true).is_numeric());
    }

    #[test]
    fn conversions() {
        assert_eq!(Value::Int(3).as_i64(), Some(3));
        assert_eq!(Value::Bool(true).as_i64(), Some(1));
        assert_eq!(Value::Int(1).as_bool(), Some(true));
        assert_eq!(Value::Int(0).as_bool(), Some(false));
        assert_eq!(Value::Text("x".into()).as_bool(), None);
        assert_eq!(Value::Int(2).as_f64(), Some(2.0));
        assert_eq!(Value::Text("abc".into()).as_str(), Some("abc"));
    }

    #[test]
    fn sql_literals() {
        assert_eq!(Value::Null.to_sql_literal(), "NULL");
        assert_eq!(Value::Bool(true).to_sql_literal(), "1");
        assert_eq!(Value::Bool(false).to_sql_literal(), "0");
        assert_eq!(Value::Int(42).to_sql_literal(), "42");
        assert_eq!(Value::Text("a".into()).to_sql_literal(), "'a'");
    }

    #[test]
    fn string_literal_escapes_quotes() {
        assert_eq!(
            Value::Text("o'brien".into()).to_sql_literal(),
            "'o''brien'"
        );
    }

    #[test]
    fn timestamp_literal_uses_session_format() {
        // 2001-09-09 01:46:40 UTC
        let v = Value::Timestamp(1_000_000_000 * 1_000_000);
        assert_eq!(v.to_sql_literal(), "'2001-09-09 01:46:40'");
    }

    #[test]
    fn from_impls() {
        assert_eq!(Value::from(true), Value::Bool(true));
        assert_eq!(Value::from(7i64), Value::Int(7));
        assert_eq!(Value::from("s"), Value::Text("s".into()));
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some(5i64)), Value::Int(5));
    }
}
