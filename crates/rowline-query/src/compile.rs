//! Criteria-to-SQL compilation.
//!
//! [`CriteriaCompiler`] is the seam to the generic criteria compiler the
//! adapter consumes as a collaborator. [`SequelCompiler`] is the built-in
//! implementation for the row-number dialect: `"`-quoted identifiers,
//! inline literals, and a `"LINE_NUMBER"` projection over the requested
//! sort so pagination can be applied as a wrapper afterwards.

use crate::criteria::{Cmp, Condition, Criteria, JoinInstruction, JoinStrategy, SortDir};
use crate::plan::{JoinMeta, PARENT_KEY_PLACEHOLDER, PlanStatement, QueryPlan};
use rowline_core::error::{Error, Result};
use rowline_core::schema::CollectionDef;
use rowline_core::value::Value;
use std::collections::HashMap;

/// All collections registered on one connection, keyed by identity.
pub type SchemaMap = HashMap<String, CollectionDef>;

/// Translates abstract criteria into executable plans.
pub trait CriteriaCompiler: Send + Sync {
    /// Compile a find/select query.
    fn compile_find(
        &self,
        schema: &SchemaMap,
        collection: &str,
        criteria: &Criteria,
    ) -> Result<QueryPlan>;

    /// Compile a populate request: parent statement first, one child
    /// template per separate-table association after it.
    fn compile_join(
        &self,
        schema: &SchemaMap,
        collection: &str,
        criteria: &Criteria,
        instructions: &[JoinInstruction],
    ) -> Result<QueryPlan>;

    /// Compile an insert.
    fn compile_create(
        &self,
        schema: &SchemaMap,
        collection: &str,
        values: &[(String, Value)],
    ) -> Result<PlanStatement>;

    /// Compile an update.
    fn compile_update(
        &self,
        schema: &SchemaMap,
        collection: &str,
        criteria: &Criteria,
        values: &[(String, Value)],
    ) -> Result<PlanStatement>;

    /// Compile a delete.
    fn compile_destroy(
        &self,
        schema: &SchemaMap,
        collection: &str,
        criteria: &Criteria,
    ) -> Result<PlanStatement>;

    /// Compile a count.
    fn compile_count(
        &self,
        schema: &SchemaMap,
        collection: &str,
        criteria: &Criteria,
    ) -> Result<PlanStatement>;
}

/// Quote an identifier, doubling embedded quote characters.
pub fn quote_ident(name: &str) -> String {
    let escaped = name.replace('"', "\"\"");
    format!("\"{escaped}\"")
}

fn qualified(table: &str, column: &str) -> String {
    format!("{}.{}", quote_ident(table), quote_ident(column))
}

fn lookup<'a>(schema: &'a SchemaMap, collection: &str) -> Result<&'a CollectionDef> {
    schema
        .get(collection)
        .ok_or_else(|| Error::compile(format!("unknown collection `{collection}`")))
}

/// The built-in criteria compiler for the row-number dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequelCompiler;

impl SequelCompiler {
    /// Render a condition tree against a collection's column mapping.
    fn render_condition(def: &CollectionDef, condition: &Condition) -> String {
        let table = def.table_name();
        match condition {
            Condition::And(parts) => {
                let rendered: Vec<String> = parts
                    .iter()
                    .map(|p| Self::render_condition(def, p))
                    .collect();
                format!("({})", rendered.join(" AND "))
            }
            Condition::Or(parts) => {
                let rendered: Vec<String> = parts
                    .iter()
                    .map(|p| Self::render_condition(def, p))
                    .collect();
                format!("({})", rendered.join(" OR "))
            }
            Condition::Cmp { attr, op, value } => {
                let column = qualified(table, def.column_name(attr));
                if value.is_null() {
                    return match op {
                        Cmp::Ne => format!("{column} IS NOT NULL"),
                        _ => format!("{column} IS NULL"),
                    };
                }
                format!("{column} {} {}", op.as_sql(), value.to_sql_literal())
            }
            Condition::In {
                attr,
                values,
                negated,
            } => {
                let column = qualified(table, def.column_name(attr));
                if values.is_empty() {
                    // Empty set: nothing matches (or everything, negated)
                    return if *negated { "1 = 1" } else { "1 = 0" }.to_string();
                }
                let list: Vec<String> = values.iter().map(Value::to_sql_literal).collect();
                let op = if *negated { "NOT IN" } else { "IN" };
                format!("{column} {op} ({})", list.join(", "))
            }
            Condition::Like { attr, pattern } => {
                let column = qualified(table, def.column_name(attr));
                format!(
                    "{column} LIKE {}",
                    Value::Text(pattern.clone()).to_sql_literal()
                )
            }
            Condition::Null { attr, negated } => {
                let column = qualified(table, def.column_name(attr));
                if *negated {
                    format!("{column} IS NOT NULL")
                } else {
                    format!("{column} IS NULL")
                }
            }
        }
    }

    /// Render the sort list, defaulting to the primary key ascending so the
    /// row-number projection is always deterministic.
    fn render_sort(def: &CollectionDef, sort: &[(String, SortDir)]) -> String {
        let table = def.table_name();
        let effective: Vec<(String, SortDir)> = if sort.is_empty() {
            vec![(def.primary_key().to_string(), SortDir::Asc)]
        } else {
            sort.to_vec()
        };
        effective
            .iter()
            .map(|(attr, dir)| {
                format!("{} {}", qualified(table, def.column_name(attr)), dir.as_sql())
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn where_clause(def: &CollectionDef, criteria: &Criteria) -> String {
        criteria
            .where_clause
            .as_ref()
            .map(|c| format!(" WHERE {}", Self::render_condition(def, c)))
            .unwrap_or_default()
    }

    /// Aggregate select: grouping columns plus aggregate functions, no
    /// row-number projection.
    fn aggregate_select(def: &CollectionDef, criteria: &Criteria) -> String {
        let table = def.table_name();
        let mut columns: Vec<String> = criteria
            .group_by
            .iter()
            .map(|attr| qualified(table, def.column_name(attr)))
            .collect();
        for (func, attrs) in [
            ("SUM", &criteria.sum),
            ("AVG", &criteria.average),
            ("MIN", &criteria.min),
            ("MAX", &criteria.max),
        ] {
            for attr in attrs {
                columns.push(format!(
                    "{func}({}) {}",
                    qualified(table, def.column_name(attr)),
                    quote_ident(attr)
                ));
            }
        }

        let mut sql = format!(
            "SELECT {} FROM {}{}",
            columns.join(", "),
            quote_ident(table),
            Self::where_clause(def, criteria)
        );
        if !criteria.group_by.is_empty() {
            let group: Vec<String> = criteria
                .group_by
                .iter()
                .map(|attr| qualified(table, def.column_name(attr)))
                .collect();
            sql.push_str(&format!(" GROUP BY {}", group.join(", ")));
        }
        sql
    }

    /// Child template for a one-to-many association.
    fn child_template(schema: &SchemaMap, instruction: &JoinInstruction) -> Result<PlanStatement> {
        let child_def = lookup(schema, &instruction.child)?;
        let table = child_def.table_name();

        let mut sql = format!(
            "SELECT {}.* FROM {} WHERE {} = {PARENT_KEY_PLACEHOLDER}",
            quote_ident(table),
            quote_ident(table),
            qualified(table, &instruction.child_key)
        );
        if let Some(cond) = &instruction.criteria.where_clause {
            sql.push_str(&format!(
                " AND {}",
                Self::render_condition(child_def, cond)
            ));
        }
        sql.push_str(&format!(
            " ORDER BY {}",
            Self::render_sort(child_def, &instruction.criteria.sort)
        ));

        Ok(PlanStatement::template(
            sql,
            JoinMeta::single_hop(instruction),
        ))
    }

    /// Child template for a many-to-many association through a junction
    /// table. The junction's parent-key column is projected under a
    /// `___`-prefixed alias so rows can be grouped per parent and the alias
    /// stripped afterwards.
    fn junction_template(
        schema: &SchemaMap,
        instruction: &JoinInstruction,
        through: &str,
        through_parent_key: &str,
        through_child_key: &str,
    ) -> Result<PlanStatement> {
        let child_def = lookup(schema, &instruction.child)?;
        let child_table = child_def.table_name();

        let mut sql = format!(
            "SELECT {}.*, {} {} FROM {} INNER JOIN {} ON {} = {} WHERE {} = {PARENT_KEY_PLACEHOLDER}",
            quote_ident(child_table),
            qualified(through, through_parent_key),
            quote_ident(&format!("___{through_parent_key}")),
            quote_ident(through),
            quote_ident(child_table),
            qualified(through, through_child_key),
            qualified(child_table, &instruction.child_key),
            qualified(through, through_parent_key),
        );
        if let Some(cond) = &instruction.criteria.where_clause {
            sql.push_str(&format!(
                " AND {}",
                Self::render_condition(child_def, cond)
            ));
        }
        sql.push_str(&format!(
            " ORDER BY {}",
            Self::render_sort(child_def, &instruction.criteria.sort)
        ));

        Ok(PlanStatement::template(
            sql,
            JoinMeta::junction_hop(instruction, through_parent_key),
        ))
    }
}

impl CriteriaCompiler for SequelCompiler {
    fn compile_find(
        &self,
        schema: &SchemaMap,
        collection: &str,
        criteria: &Criteria,
    ) -> Result<QueryPlan> {
        let def = lookup(schema, collection)?;
        let table = def.table_name();

        if criteria.is_aggregate_request() {
            return Ok(QueryPlan::single(PlanStatement::new(
                Self::aggregate_select(def, criteria),
            )));
        }

        let order = Self::render_sort(def, &criteria.sort);
        let sql = format!(
            "SELECT {}.*, ROW_NUMBER() OVER (ORDER BY {order}) \"LINE_NUMBER\" FROM {}{} ORDER BY {order}",
            quote_ident(table),
            quote_ident(table),
            Self::where_clause(def, criteria)
        );
        Ok(QueryPlan::single(PlanStatement::new(sql)))
    }

    #[tracing::instrument(level = "trace", skip(self, schema, criteria, instructions))]
    fn compile_join(
        &self,
        schema: &SchemaMap,
        collection: &str,
        criteria: &Criteria,
        instructions: &[JoinInstruction],
    ) -> Result<QueryPlan> {
        let def = lookup(schema, collection)?;
        let table = def.table_name();

        // Parent statement: base columns, plus inline aliased child columns
        // for every foreign-key association.
        let mut select_cols = vec![format!("{}.*", quote_ident(table))];
        let mut join_sql = String::new();
        for instruction in instructions {
            if instruction.strategy != JoinStrategy::ForeignKey {
                continue;
            }
            let child_def = lookup(schema, &instruction.child)?;
            let child_table = child_def.table_name();
            for (attr, attr_def) in &child_def.attributes {
                let column = attr_def.column_name.as_deref().unwrap_or(attr);
                select_cols.push(format!(
                    "{} {}",
                    qualified(child_table, column),
                    quote_ident(&format!("{}___{column}", instruction.alias))
                ));
            }
            join_sql.push_str(&format!(
                " LEFT OUTER JOIN {} ON {} = {}",
                quote_ident(child_table),
                qualified(table, &instruction.parent_key),
                qualified(child_table, &instruction.child_key),
            ));
        }

        let order = Self::render_sort(def, &criteria.sort);
        let parent_sql = format!(
            "SELECT {}, ROW_NUMBER() OVER (ORDER BY {order}) \"LINE_NUMBER\" FROM {}{}{} ORDER BY {order}",
            select_cols.join(", "),
            quote_ident(table),
            join_sql,
            Self::where_clause(def, criteria)
        );

        let mut statements = vec![PlanStatement::new(parent_sql)];
        for instruction in instructions {
            match &instruction.strategy {
                JoinStrategy::ForeignKey => {}
                JoinStrategy::ViaChild => {
                    statements.push(Self::child_template(schema, instruction)?);
                }
                JoinStrategy::ViaJunction {
                    through,
                    through_parent_key,
                    through_child_key,
                } => {
                    statements.push(Self::junction_template(
                        schema,
                        instruction,
                        through,
                        through_parent_key,
                        through_child_key,
                    )?);
                }
            }
        }

        Ok(QueryPlan { statements })
    }

    fn compile_create(
        &self,
        schema: &SchemaMap,
        collection: &str,
        values: &[(String, Value)],
    ) -> Result<PlanStatement> {
        let def = lookup(schema, collection)?;

        // Undeclared attributes never reach the statement.
        let declared: Vec<&(String, Value)> = values
            .iter()
            .filter(|(attr, _)| def.attr(attr).is_some())
            .collect();
        if declared.is_empty() {
            return Err(Error::compile(format!(
                "no declared attributes in insert for `{collection}`"
            )));
        }

        let columns: Vec<String> = declared
            .iter()
            .map(|(attr, _)| quote_ident(def.column_name(attr)))
            .collect();
        let literals: Vec<String> = declared
            .iter()
            .map(|(_, value)| value.to_sql_literal())
            .collect();

        Ok(PlanStatement::new(format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(def.table_name()),
            columns.join(", "),
            literals.join(", ")
        )))
    }

    fn compile_update(
        &self,
        schema: &SchemaMap,
        collection: &str,
        criteria: &Criteria,
        values: &[(String, Value)],
    ) -> Result<PlanStatement> {
        let def = lookup(schema, collection)?;

        let assignments: Vec<String> = values
            .iter()
            .filter(|(attr, _)| def.attr(attr).is_some())
            .map(|(attr, value)| {
                format!(
                    "{} = {}",
                    quote_ident(def.column_name(attr)),
                    value.to_sql_literal()
                )
            })
            .collect();
        if assignments.is_empty() {
            return Err(Error::compile(format!(
                "no declared attributes in update for `{collection}`"
            )));
        }

        Ok(PlanStatement::new(format!(
            "UPDATE {} SET {}{}",
            quote_ident(def.table_name()),
            assignments.join(", "),
            Self::where_clause(def, criteria)
        )))
    }

    fn compile_destroy(
        &self,
        schema: &SchemaMap,
        collection: &str,
        criteria: &Criteria,
    ) -> Result<PlanStatement> {
        let def = lookup(schema, collection)?;
        Ok(PlanStatement::new(format!(
            "DELETE FROM {}{}",
            quote_ident(def.table_name()),
            Self::where_clause(def, criteria)
        )))
    }

    fn compile_count(
        &self,
        schema: &SchemaMap,
        collection: &str,
        criteria: &Criteria,
    ) -> Result<PlanStatement> {
        let def = lookup(schema, collection)?;
        Ok(PlanStatement::new(format!(
            "SELECT COUNT(*) \"COUNT\" FROM {}{}",
            quote_ident(def.table_name()),
            Self::where_clause(def, criteria)
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::criteria::Condition;
    use rowline_core::schema::{AttrDef, AttrType};

    fn schema() -> SchemaMap {
        let users = CollectionDef::new(
            "users",
            [
                (
                    "id".to_string(),
                    AttrDef::new(AttrType::Integer).primary_key().auto_increment(),
                ),
                ("name".to_string(), AttrDef::new(AttrType::Text).unique()),
                ("active".to_string(), AttrDef::new(AttrType::Boolean)),
            ],
        );
        let orders = CollectionDef::new(
            "orders",
            [
                (
                    "id".to_string(),
                    AttrDef::new(AttrType::Integer).primary_key().auto_increment(),
                ),
                ("user_id".to_string(), AttrDef::new(AttrType::Integer)),
                ("total".to_string(), AttrDef::new(AttrType::Float)),
            ],
        );
        let mut map = SchemaMap::new();
        map.insert("users".to_string(), users);
        map.insert("orders".to_string(), orders);
        map
    }

    #[test]
    fn find_projects_line_number_over_default_pk_sort() {
        let plan = SequelCompiler
            .compile_find(&schema(), "users", &Criteria::new())
            .expect("compile");
        assert_eq!(
            plan.parent().map(|s| s.sql.as_str()),
            Some(
                "SELECT \"users\".*, ROW_NUMBER() OVER (ORDER BY \"users\".\"id\" ASC) \
                 \"LINE_NUMBER\" FROM \"users\" ORDER BY \"users\".\"id\" ASC"
            )
        );
    }

    #[test]
    fn find_renders_where_and_explicit_sort() {
        let criteria = Criteria::new()
            .filter(Condition::eq("active", true))
            .sort_by("name", SortDir::Desc);
        let plan = SequelCompiler
            .compile_find(&schema(), "users", &criteria)
            .expect("compile");
        let sql = &plan.parent().expect("parent").sql;
        assert!(sql.contains("WHERE \"users\".\"active\" = 1"));
        assert!(sql.contains("OVER (ORDER BY \"users\".\"name\" DESC)"));
        assert!(sql.ends_with("ORDER BY \"users\".\"name\" DESC"));
    }

    #[test]
    fn aggregate_find_groups_without_line_number() {
        let criteria = Criteria::new().group_by("user_id").sum("total");
        let plan = SequelCompiler
            .compile_find(&schema(), "orders", &criteria)
            .expect("compile");
        assert_eq!(
            plan.parent().map(|s| s.sql.as_str()),
            Some(
                "SELECT \"orders\".\"user_id\", SUM(\"orders\".\"total\") \"total\" \
                 FROM \"orders\" GROUP BY \"orders\".\"user_id\""
            )
        );
    }

    #[test]
    fn null_comparison_compiles_to_is_null() {
        let criteria = Criteria::new().filter(Condition::eq("name", Value::Null));
        let plan = SequelCompiler
            .compile_find(&schema(), "users", &criteria)
            .expect("compile");
        assert!(plan
            .parent()
            .expect("parent")
            .sql
            .contains("\"users\".\"name\" IS NULL"));
    }

    #[test]
    fn empty_in_list_matches_nothing() {
        let criteria = Criteria::new().filter(Condition::within("id", vec![]));
        let plan = SequelCompiler
            .compile_find(&schema(), "users", &criteria)
            .expect("compile");
        assert!(plan.parent().expect("parent").sql.contains("WHERE 1 = 0"));
    }

    #[test]
    fn string_values_are_escaped() {
        let criteria = Criteria::new().filter(Condition::eq("name", "o'brien"));
        let plan = SequelCompiler
            .compile_find(&schema(), "users", &criteria)
            .expect("compile");
        assert!(plan
            .parent()
            .expect("parent")
            .sql
            .contains("\"users\".\"name\" = 'o''brien'"));
    }

    #[test]
    fn create_inlines_literals_and_drops_undeclared() {
        let stmt = SequelCompiler
            .compile_create(
                &schema(),
                "users",
                &[
                    ("id".to_string(), Value::Int(1)),
                    ("name".to_string(), Value::Text("a".to_string())),
                    ("bogus".to_string(), Value::Int(9)),
                ],
            )
            .expect("compile");
        assert_eq!(
            stmt.sql,
            "INSERT INTO \"users\" (\"id\", \"name\") VALUES (1, 'a')"
        );
    }

    #[test]
    fn update_sets_only_declared_attributes() {
        let criteria = Criteria::new().filter(Condition::eq("active", true));
        let stmt = SequelCompiler
            .compile_update(
                &schema(),
                "users",
                &criteria,
                &[("active".to_string(), Value::Int(0))],
            )
            .expect("compile");
        assert_eq!(
            stmt.sql,
            "UPDATE \"users\" SET \"active\" = 0 WHERE \"users\".\"active\" = 1"
        );
    }

    #[test]
    fn destroy_and_count_render() {
        let criteria = Criteria::new().filter(Condition::eq("id", 3i64));
        let destroy = SequelCompiler
            .compile_destroy(&schema(), "users", &criteria)
            .expect("compile");
        assert_eq!(
            destroy.sql,
            "DELETE FROM \"users\" WHERE \"users\".\"id\" = 3"
        );

        let count = SequelCompiler
            .compile_count(&schema(), "users", &Criteria::new())
            .expect("compile");
        assert_eq!(count.sql, "SELECT COUNT(*) \"COUNT\" FROM \"users\"");
    }

    #[test]
    fn join_plan_parent_first_then_templates() {
        let instructions = vec![JoinInstruction::via_child(
            "orders", "users", "id", "orders", "user_id",
        )];
        let plan = SequelCompiler
            .compile_join(&schema(), "users", &Criteria::new(), &instructions)
            .expect("compile");

        assert_eq!(plan.statements.len(), 2);
        assert!(!plan.statements[0].is_template());

        let template = &plan.statements[1];
        assert_eq!(
            template.sql,
            "SELECT \"orders\".* FROM \"orders\" WHERE \"orders\".\"user_id\" = ^?^ \
             ORDER BY \"orders\".\"id\" ASC"
        );
        let meta = template.join.as_ref().expect("join meta");
        assert_eq!(meta.alias, "orders");
        assert_eq!(meta.group_column, "user_id");
        assert!(!meta.multi_hop);
    }

    #[test]
    fn foreign_key_join_inlines_aliased_child_columns() {
        let mut map = schema();
        map.insert(
            "teams".to_string(),
            CollectionDef::new(
                "teams",
                [
                    (
                        "id".to_string(),
                        AttrDef::new(AttrType::Integer).primary_key(),
                    ),
                    ("title".to_string(), AttrDef::new(AttrType::Text)),
                ],
            ),
        );
        let mut users = map.get("users").expect("users").clone();
        users
            .attributes
            .insert("team_id".to_string(), AttrDef::new(AttrType::Integer));
        map.insert("users".to_string(), users);

        let instructions = vec![JoinInstruction::foreign_key(
            "team", "users", "team_id", "teams", "id",
        )];
        let plan = SequelCompiler
            .compile_join(&map, "users", &Criteria::new(), &instructions)
            .expect("compile");

        // Foreign-key associations resolve inline: no child template.
        assert_eq!(plan.statements.len(), 1);
        let sql = &plan.statements[0].sql;
        assert!(sql.contains("\"teams\".\"id\" \"team___id\""));
        assert!(sql.contains("\"teams\".\"title\" \"team___title\""));
        assert!(sql.contains(
            "LEFT OUTER JOIN \"teams\" ON \"users\".\"team_id\" = \"teams\".\"id\""
        ));
    }

    #[test]
    fn junction_join_projects_prefixed_key_alias() {
        let mut map = schema();
        map.insert(
            "tags".to_string(),
            CollectionDef::new(
                "tags",
                [(
                    "id".to_string(),
                    AttrDef::new(AttrType::Integer).primary_key(),
                )],
            ),
        );

        let instructions = vec![JoinInstruction::via_junction(
            "tags", "users", "id", "tags", "id", "user_tags", "user_id", "tag_id",
        )];
        let plan = SequelCompiler
            .compile_join(&map, "users", &Criteria::new(), &instructions)
            .expect("compile");

        let template = &plan.statements[1];
        assert!(template.sql.contains("\"user_tags\".\"user_id\" \"___user_id\""));
        assert!(template
            .sql
            .contains("INNER JOIN \"tags\" ON \"user_tags\".\"tag_id\" = \"tags\".\"id\""));
        assert!(template.sql.contains("WHERE \"user_tags\".\"user_id\" = ^?^"));

        let meta = template.join.as_ref().expect("join meta");
        assert_eq!(meta.group_column, "___user_id");
        assert!(meta.multi_hop);
    }

    #[test]
    fn unknown_collection_is_a_compile_error() {
        let err = SequelCompiler
            .compile_find(&schema(), "missing", &Criteria::new())
            .expect_err("should fail");
        assert!(matches!(err, Error::Compile(_)));
    }
}
