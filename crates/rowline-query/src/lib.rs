//! Criteria compilation and dialect post-processing for the Rowline adapter.
//!
//! `rowline-query` is the **query construction layer**. It models the
//! abstract criteria the host ORM hands over, compiles them into structured
//! plans, and applies the dialect passes the engine demands: row-number
//! pagination wrapping, UNION synthesis for association templates, and
//! write-value coercion.
//!
//! # Role In The Architecture
//!
//! - **Criteria model**: where/sort/pagination/grouping plus populate
//!   instructions, attribute-keyed.
//! - **Compiler seam**: [`CriteriaCompiler`] is what the adapter depends
//!   on; [`SequelCompiler`] is the built-in implementation.
//! - **Dialect passes**: pure functions over compiled statements, applied
//!   by the façade after compilation and before execution.
//!
//! Compiled plans execute through the `Driver` trait from `rowline-core`.

pub mod compile;
pub mod criteria;
pub mod ddl;
pub mod dialect;
pub mod plan;

pub use compile::{CriteriaCompiler, SchemaMap, SequelCompiler, quote_ident};
pub use criteria::{Cmp, Condition, Criteria, JoinInstruction, JoinStrategy, SortDir};
pub use dialect::{
    ROW_NUMBER_COLUMN, coerce_for_insert, coerce_for_update, first_row_only, paginate,
    synthesize_union,
};
pub use plan::{
    EMBEDDED_KEY_PREFIX, JoinMeta, PARENT_KEY_PLACEHOLDER, PlanStatement, QueryPlan,
};

use asupersync::{Cx, Outcome};
use rowline_core::driver::{Driver, ExecResult};
use rowline_core::{Error, Value};

/// Execute a raw statement through a driver session.
///
/// For statements that can't be expressed through the criteria model.
pub async fn raw_execute<D: Driver>(
    cx: &Cx,
    session: &D,
    sql: &str,
    params: &[Value],
) -> Outcome<ExecResult, Error> {
    session.execute(cx, sql, params).await
}
