//! Abstract query criteria, as handed over by the host ORM.
//!
//! Criteria arrive attribute-keyed; translation to storage columns happens
//! in the compiler. The same structure carries the child criteria of a
//! populate instruction.

use rowline_core::error::{Error, Result};
use rowline_core::value::Value;
use serde::{Deserialize, Serialize};

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortDir {
    #[default]
    Asc,
    Desc,
}

impl SortDir {
    /// SQL keyword for this direction.
    pub const fn as_sql(&self) -> &'static str {
        match self {
            SortDir::Asc => "ASC",
            SortDir::Desc => "DESC",
        }
    }
}

/// Comparison operator for a single-attribute condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cmp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl Cmp {
    /// SQL operator text.
    pub const fn as_sql(&self) -> &'static str {
        match self {
            Cmp::Eq => "=",
            Cmp::Ne => "<>",
            Cmp::Lt => "<",
            Cmp::Lte => "<=",
            Cmp::Gt => ">",
            Cmp::Gte => ">=",
        }
    }
}

/// A where-clause condition tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    /// All sub-conditions must hold
    And(Vec<Condition>),
    /// Any sub-condition must hold
    Or(Vec<Condition>),
    /// Attribute compared against a value
    Cmp {
        attr: String,
        op: Cmp,
        value: Value,
    },
    /// Attribute within (or outside) a value set
    In {
        attr: String,
        values: Vec<Value>,
        negated: bool,
    },
    /// Attribute matches a LIKE pattern
    Like { attr: String, pattern: String },
    /// Attribute IS NULL / IS NOT NULL
    Null { attr: String, negated: bool },
}

impl Condition {
    /// Equality shorthand; a NULL value compiles to IS NULL.
    pub fn eq(attr: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::Cmp {
            attr: attr.into(),
            op: Cmp::Eq,
            value: value.into(),
        }
    }

    /// Membership shorthand.
    pub fn within(attr: impl Into<String>, values: Vec<Value>) -> Self {
        Condition::In {
            attr: attr.into(),
            values,
            negated: false,
        }
    }
}

/// Query criteria: where/sort/pagination/grouping/aggregates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Criteria {
    /// WHERE condition tree
    pub where_clause: Option<Condition>,
    /// Sort order, applied in sequence
    pub sort: Vec<(String, SortDir)>,
    /// Rows to skip (pagination)
    pub skip: Option<u64>,
    /// Maximum rows to return (pagination)
    pub limit: Option<u64>,
    /// GROUP BY attributes
    pub group_by: Vec<String>,
    /// SUM aggregates
    pub sum: Vec<String>,
    /// AVG aggregates
    pub average: Vec<String>,
    /// MIN aggregates
    pub min: Vec<String>,
    /// MAX aggregates
    pub max: Vec<String>,
}

impl Criteria {
    /// Empty criteria (match everything).
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an AND condition.
    pub fn filter(mut self, condition: Condition) -> Self {
        self.where_clause = Some(match self.where_clause {
            Some(Condition::And(mut parts)) => {
                parts.push(condition);
                Condition::And(parts)
            }
            Some(existing) => Condition::And(vec![existing, condition]),
            None => condition,
        });
        self
    }

    /// Append a sort key.
    pub fn sort_by(mut self, attr: impl Into<String>, dir: SortDir) -> Self {
        self.sort.push((attr.into(), dir));
        self
    }

    /// Set the skip count.
    pub fn skip(mut self, n: u64) -> Self {
        self.skip = Some(n);
        self
    }

    /// Set the row limit.
    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    /// Add a GROUP BY attribute.
    pub fn group_by(mut self, attr: impl Into<String>) -> Self {
        self.group_by.push(attr.into());
        self
    }

    /// Add a SUM aggregate.
    pub fn sum(mut self, attr: impl Into<String>) -> Self {
        self.sum.push(attr.into());
        self
    }

    /// Add an AVG aggregate.
    pub fn average(mut self, attr: impl Into<String>) -> Self {
        self.average.push(attr.into());
        self
    }

    /// Whether any aggregate function is requested.
    pub fn has_aggregate_fn(&self) -> bool {
        !(self.sum.is_empty()
            && self.average.is_empty()
            && self.min.is_empty()
            && self.max.is_empty())
    }

    /// Whether this is an aggregate-shaped request at all.
    pub fn is_aggregate_request(&self) -> bool {
        !self.group_by.is_empty() || self.has_aggregate_fn()
    }

    /// Reject aggregate-shaped requests that carry no aggregate function.
    ///
    /// Runs before compilation; grouping over nothing has no defined
    /// result shape.
    pub fn validate_aggregates(&self) -> Result<()> {
        if self.is_aggregate_request() && !self.has_aggregate_fn() {
            return Err(Error::InvalidAggregate);
        }
        Ok(())
    }

    /// Take skip/limit out of the criteria, leaving the rest intact.
    ///
    /// Pagination is applied as a wrapper after compilation, never inside
    /// the compiled statement.
    pub fn take_pagination(&mut self) -> (Option<u64>, Option<u64>) {
        (self.skip.take(), self.limit.take())
    }
}

/// Join strategy for one association.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JoinStrategy {
    /// The parent row carries the foreign key; resolvable inline on the
    /// parent query via aliased columns
    ForeignKey,
    /// The child table carries the foreign key; one synthesized query
    ViaChild,
    /// Many-to-many through a junction table; one synthesized query with a
    /// prefixed key alias
    ViaJunction {
        through: String,
        through_parent_key: String,
        through_child_key: String,
    },
}

/// One association to resolve for a populate request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinInstruction {
    /// Association attribute name on the parent
    pub alias: String,
    /// Parent collection identity
    pub parent: String,
    /// Parent column carrying the key
    pub parent_key: String,
    /// Child collection identity
    pub child: String,
    /// Child column referencing the parent key
    pub child_key: String,
    /// How to resolve this association
    pub strategy: JoinStrategy,
    /// Criteria applied to child rows (where/sort)
    pub criteria: Criteria,
}

impl JoinInstruction {
    /// One-to-many association resolved through the child's foreign key.
    pub fn via_child(
        alias: impl Into<String>,
        parent: impl Into<String>,
        parent_key: impl Into<String>,
        child: impl Into<String>,
        child_key: impl Into<String>,
    ) -> Self {
        Self {
            alias: alias.into(),
            parent: parent.into(),
            parent_key: parent_key.into(),
            child: child.into(),
            child_key: child_key.into(),
            strategy: JoinStrategy::ViaChild,
            criteria: Criteria::new(),
        }
    }

    /// Belongs-to association resolvable inline on the parent query.
    pub fn foreign_key(
        alias: impl Into<String>,
        parent: impl Into<String>,
        parent_key: impl Into<String>,
        child: impl Into<String>,
        child_key: impl Into<String>,
    ) -> Self {
        Self {
            alias: alias.into(),
            parent: parent.into(),
            parent_key: parent_key.into(),
            child: child.into(),
            child_key: child_key.into(),
            strategy: JoinStrategy::ForeignKey,
            criteria: Criteria::new(),
        }
    }

    /// Many-to-many association through a junction collection.
    pub fn via_junction(
        alias: impl Into<String>,
        parent: impl Into<String>,
        parent_key: impl Into<String>,
        child: impl Into<String>,
        child_key: impl Into<String>,
        through: impl Into<String>,
        through_parent_key: impl Into<String>,
        through_child_key: impl Into<String>,
    ) -> Self {
        Self {
            alias: alias.into(),
            parent: parent.into(),
            parent_key: parent_key.into(),
            child: child.into(),
            child_key: child_key.into(),
            strategy: JoinStrategy::ViaJunction {
                through: through.into(),
                through_parent_key: through_parent_key.into(),
                through_child_key: through_child_key.into(),
            },
            criteria: Criteria::new(),
        }
    }

    /// Set child criteria.
    pub fn with_criteria(mut self, criteria: Criteria) -> Self {
        self.criteria = criteria;
        self
    }
}
