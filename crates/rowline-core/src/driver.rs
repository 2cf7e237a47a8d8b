//! Raw driver abstraction.
//!
//! The adapter never talks to the engine directly; it executes compiled
//! statements through a [`Driver`] session handed out by the pool. Drivers
//! are an external collaborator — this crate only fixes the calling
//! convention: `&Cx` for cancellation, [`Outcome`] for results.

use crate::error::{Error, Result};
use crate::row::Row;
use crate::value::Value;
use asupersync::{Cx, Outcome};
use std::future::Future;

/// Session-initialization statements executed, in order, on every fresh
/// session before it enters the pool. They pin the timestamp/date wire
/// format the value coercion layer emits and switch comparisons to
/// case-insensitive linguistic mode.
///
/// A port to a different engine must supply equivalent session bootstrap
/// semantics.
pub const SESSION_BOOTSTRAP: [&str; 4] = [
    "ALTER SESSION SET NLS_TIMESTAMP_FORMAT = 'yyyy-mm-dd hh24:mi:ss'",
    "ALTER SESSION SET NLS_DATE_FORMAT = 'yyyy-mm-dd hh24:mi:ss'",
    "ALTER SESSION SET NLS_COMP=LINGUISTIC",
    "ALTER SESSION SET NLS_SORT=BINARY_CI",
];

/// Result of executing one statement.
#[derive(Debug, Clone, Default)]
pub struct ExecResult {
    /// Rows returned by a SELECT (empty for DML)
    pub rows: Vec<Row>,
    /// Rows affected by DML (0 for SELECT)
    pub rows_affected: u64,
}

impl ExecResult {
    /// A result carrying only rows.
    pub fn with_rows(rows: Vec<Row>) -> Self {
        Self {
            rows,
            rows_affected: 0,
        }
    }

    /// A result carrying only an affected-row count.
    pub fn with_affected(rows_affected: u64) -> Self {
        Self {
            rows: Vec::new(),
            rows_affected,
        }
    }
}

/// A live session against the engine.
///
/// Within one session, statements execute strictly in issuing order; the
/// pool guarantees a session is owned by at most one in-flight operation.
pub trait Driver: Send + Sync {
    /// Execute a statement and return rows / affected count.
    fn execute(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<ExecResult, Error>> + Send;

    /// Close the session gracefully.
    fn close(self, cx: &Cx) -> impl Future<Output = Result<()>> + Send;
}
