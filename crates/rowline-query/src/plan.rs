//! Compiled query plans.
//!
//! A plan is an ordered sequence of statements: the first is always the
//! parent query, the rest are per-association child templates. Templates
//! carry the literal `^?^` placeholder where a parent key value is
//! substituted during UNION synthesis — the placeholder token is part of
//! the compiler wire format and must survive any compiler swap.

use crate::criteria::JoinInstruction;
use rowline_core::value::Value;

/// Placeholder standing in for a parent key value in child templates.
pub const PARENT_KEY_PLACEHOLDER: &str = "^?^";

/// Prefix marking the grouping alias carried by multi-hop child rows.
pub const EMBEDDED_KEY_PREFIX: &str = "___";

/// Association metadata attached to a child template statement.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinMeta {
    /// Association attribute name on the parent
    pub alias: String,
    /// Parent collection identity
    pub parent: String,
    /// Parent column whose value fills the placeholder
    pub parent_key: String,
    /// Child collection identity
    pub child: String,
    /// Child column referencing the parent key
    pub child_key: String,
    /// Result column to group child rows by
    pub group_column: String,
    /// Whether the group column is a synthetic multi-hop alias that must be
    /// stripped from each row before it is stored
    pub multi_hop: bool,
}

impl JoinMeta {
    /// Build metadata for a single-hop association: rows group directly by
    /// the child's foreign-key column.
    pub fn single_hop(instruction: &JoinInstruction) -> Self {
        Self {
            alias: instruction.alias.clone(),
            parent: instruction.parent.clone(),
            parent_key: instruction.parent_key.clone(),
            child: instruction.child.clone(),
            child_key: instruction.child_key.clone(),
            group_column: instruction.child_key.clone(),
            multi_hop: false,
        }
    }

    /// Build metadata for a junction-hop association: rows group by the
    /// `___`-prefixed key alias the template projects, which is stripped
    /// from each stored row.
    pub fn junction_hop(instruction: &JoinInstruction, through_parent_key: &str) -> Self {
        Self {
            alias: instruction.alias.clone(),
            parent: instruction.parent.clone(),
            parent_key: instruction.parent_key.clone(),
            child: instruction.child.clone(),
            child_key: instruction.child_key.clone(),
            group_column: format!("{EMBEDDED_KEY_PREFIX}{through_parent_key}"),
            multi_hop: true,
        }
    }
}

/// One compiled statement: SQL text, bound parameters, and association
/// metadata when this statement is a child template.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanStatement {
    /// Statement text; templates contain [`PARENT_KEY_PLACEHOLDER`]
    pub sql: String,
    /// Bound parameters (empty for this dialect: literals are inlined)
    pub params: Vec<Value>,
    /// Association metadata; `None` for the parent statement
    pub join: Option<JoinMeta>,
}

impl PlanStatement {
    /// A plain statement with no association metadata.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            join: None,
        }
    }

    /// A child template statement.
    pub fn template(sql: impl Into<String>, join: JoinMeta) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            join: Some(join),
        }
    }

    /// Whether this statement is a child template awaiting key substitution.
    pub fn is_template(&self) -> bool {
        self.join.is_some()
    }
}

/// An ordered compiled plan; the first statement is the parent query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryPlan {
    pub statements: Vec<PlanStatement>,
}

impl QueryPlan {
    /// Plan with a single parent statement.
    pub fn single(statement: PlanStatement) -> Self {
        Self {
            statements: vec![statement],
        }
    }

    /// The parent statement.
    pub fn parent(&self) -> Option<&PlanStatement> {
        self.statements.first()
    }

    /// The child template statements, in association order.
    pub fn templates(&self) -> &[PlanStatement] {
        if self.statements.is_empty() {
            &[]
        } else {
            &self.statements[1..]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_and_templates_split() {
        let meta = JoinMeta {
            alias: "orders".into(),
            parent: "users".into(),
            parent_key: "id".into(),
            child: "orders".into(),
            child_key: "user_id".into(),
            group_column: "user_id".into(),
            multi_hop: false,
        };
        let plan = QueryPlan {
            statements: vec![
                PlanStatement::new("SELECT 1"),
                PlanStatement::template("SELECT 2 WHERE k = ^?^", meta),
            ],
        };

        assert_eq!(plan.parent().map(|s| s.sql.as_str()), Some("SELECT 1"));
        assert_eq!(plan.templates().len(), 1);
        assert!(plan.templates()[0].is_template());
        assert!(plan.templates()[0].sql.contains(PARENT_KEY_PLACEHOLDER));
    }

    #[test]
    fn junction_meta_builds_prefixed_group_column() {
        let instruction = crate::criteria::JoinInstruction::via_junction(
            "tags", "posts", "id", "tags", "id", "post_tags", "post_id", "tag_id",
        );
        let meta = JoinMeta::junction_hop(&instruction, "post_id");
        assert_eq!(meta.group_column, "___post_id");
        assert!(meta.multi_hop);
    }
}
