//! The adapter façade.
//!
//! Every operation follows the same pipeline: resolve the registry entry,
//! compile before touching a session (compile errors can never leak a held
//! session), acquire from the pool, execute, normalize, and let the
//! [`PooledSession`] guard release the session on every exit path.

use crate::autoinc::AutoIncrementRegistry;
use crate::populate;
use crate::processor;
use crate::registry::{ConnectionRegistry, RegistryEntry};

use rowline_core::driver::{Driver, ExecResult};
use rowline_core::error::{remap_constraint_violation, Error, ExecutionError, Result};
use rowline_core::record::Record;
use rowline_core::schema::{AttrDef, CollectionDef};
use rowline_core::value::Value;
use rowline_core::{ConnectConfig, Cx, Outcome};
use rowline_pool::{PooledSession, SessionFactory};
use rowline_query::{
    coerce_for_insert, coerce_for_update, ddl, first_row_only, paginate, synthesize_union,
    Condition, Criteria, CriteriaCompiler, JoinInstruction, SequelCompiler,
};

use std::collections::BTreeMap;
use std::sync::Arc;

/// The dispatch surface the host ORM drives.
///
/// Owns its services — connection registry, auto-increment registry, and
/// the criteria compiler — rather than reaching into ambient state.
pub struct Adapter<F: SessionFactory, C: CriteriaCompiler = SequelCompiler> {
    registry: ConnectionRegistry<F>,
    auto_increments: AutoIncrementRegistry,
    compiler: C,
}

/// Replace an attribute's value in a write payload, or append it.
fn set_value(values: &mut Vec<(String, Value)>, attr: &str, value: Value) {
    match values.iter_mut().find(|(name, _)| name == attr) {
        Some((_, existing)) => *existing = value,
        None => values.push((attr.to_string(), value)),
    }
}

/// Whether an execution error reports the target table as absent.
fn is_missing_table(err: &ExecutionError) -> bool {
    matches!(
        err.code.as_deref(),
        Some("ORA-00942" | "ER_BAD_TABLE_ERROR" | "ER_NO_SUCH_TABLE")
    ) || err.message.contains("table or view does not exist")
}

impl<F: SessionFactory> Adapter<F> {
    /// Create an adapter with the built-in compiler.
    pub fn new() -> Self {
        Self::with_compiler(SequelCompiler)
    }
}

impl<F: SessionFactory> Default for Adapter<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: SessionFactory, C: CriteriaCompiler> Adapter<F, C> {
    /// Create an adapter around a specific criteria compiler.
    pub fn with_compiler(compiler: C) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            auto_increments: AutoIncrementRegistry::new(),
            compiler,
        }
    }

    /// Register a connection identity with its collections and session
    /// factory. Fails on a duplicate or missing identity.
    pub fn register(
        &self,
        config: ConnectConfig,
        collections: Vec<CollectionDef>,
        factory: F,
    ) -> Result<()> {
        self.registry.register(config, collections, factory)
    }

    /// Unregister an identity and drain its pool: outstanding sessions are
    /// waited for, then every session is destroyed.
    pub async fn teardown(&self, cx: &Cx, identity: &str) -> Result<()> {
        let entry = self.registry.remove(identity)?;
        tracing::debug!(identity, "draining connection pool");
        entry.pool.drain(cx).await
    }

    fn entry_and_def(
        &self,
        identity: &str,
        collection: &str,
    ) -> Result<(Arc<RegistryEntry<F>>, CollectionDef)> {
        let entry = self.registry.entry(identity)?;
        let def = entry.collection(collection)?;
        Ok((entry, def))
    }

    async fn acquire(
        &self,
        cx: &Cx,
        entry: &RegistryEntry<F>,
    ) -> Outcome<PooledSession<F>, Error> {
        entry.pool.acquire(cx).await
    }

    /// Inject auto-increment values and coerce a write payload; returns
    /// the statement payload and the record shape handed back to the
    /// caller (input values plus the resolved primary key).
    fn prepare_insert(
        &self,
        def: &CollectionDef,
        values: Vec<(String, Value)>,
    ) -> (Vec<(String, Value)>, Record) {
        let input = values.clone();
        let mut write = values;

        let pk_attr = def.primary_key().to_string();
        let mut pk_value = input
            .iter()
            .find(|(attr, _)| *attr == pk_attr)
            .map(|(_, value)| value.clone());

        let auto_cols: Vec<(String, String)> = def
            .auto_increment_columns()
            .map(|(attr, column)| (attr.to_string(), column.to_string()))
            .collect();
        for (attr, column) in auto_cols {
            let next = self.auto_increments.next_value(def.table_name(), &column);
            set_value(&mut write, &attr, Value::Int(next));
            if attr == pk_attr {
                pk_value = Some(Value::Int(next));
            }
        }
        coerce_for_insert(def, &mut write);

        let mut record: Record = input.into_iter().collect();
        if let Some(pk) = pk_value {
            record.set(pk_attr, pk);
        }
        (write, record)
    }

    /// Execute a raw statement on a borrowed session.
    pub async fn query(
        &self,
        cx: &Cx,
        identity: &str,
        sql: &str,
        params: &[Value],
    ) -> Outcome<ExecResult, Error> {
        let entry = match self.registry.entry(identity) {
            Ok(entry) => entry,
            Err(e) => return Outcome::Err(e),
        };
        let session = match self.acquire(cx, &entry).await {
            Outcome::Ok(session) => session,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        tracing::debug!(sql, "executing raw query");
        match session.execute(cx, sql, params).await {
            Outcome::Ok(result) => Outcome::Ok(result),
            Outcome::Err(Error::Execution(e)) => Outcome::Err(remap_constraint_violation(e)),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Insert one record; the result carries the caller's values plus the
    /// resolved primary key.
    pub async fn create(
        &self,
        cx: &Cx,
        identity: &str,
        collection: &str,
        values: Vec<(String, Value)>,
    ) -> Outcome<Record, Error> {
        let (entry, def) = match self.entry_and_def(identity, collection) {
            Ok(v) => v,
            Err(e) => return Outcome::Err(e),
        };
        let (write, record) = self.prepare_insert(&def, values);

        let schema = entry.schema_map();
        let stmt = match self.compiler.compile_create(&schema, collection, &write) {
            Ok(stmt) => stmt,
            Err(e) => return Outcome::Err(e),
        };

        let session = match self.acquire(cx, &entry).await {
            Outcome::Ok(session) => session,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        tracing::debug!(sql = %stmt.sql, "executing create");
        match session.execute(cx, &stmt.sql, &stmt.params).await {
            Outcome::Ok(_) => {}
            Outcome::Err(Error::Execution(e)) => {
                return Outcome::Err(remap_constraint_violation(e));
            }
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }

        Outcome::Ok(record)
    }

    /// Insert a batch of records over a single borrowed session.
    /// The first failure aborts the batch.
    pub async fn create_each(
        &self,
        cx: &Cx,
        identity: &str,
        collection: &str,
        records: Vec<Vec<(String, Value)>>,
    ) -> Outcome<Vec<Record>, Error> {
        let (entry, def) = match self.entry_and_def(identity, collection) {
            Ok(v) => v,
            Err(e) => return Outcome::Err(e),
        };
        let schema = entry.schema_map();

        let session = match self.acquire(cx, &entry).await {
            Outcome::Ok(session) => session,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        let mut created = Vec::with_capacity(records.len());
        for values in records {
            let (write, record) = self.prepare_insert(&def, values);
            let stmt = match self.compiler.compile_create(&schema, collection, &write) {
                Ok(stmt) => stmt,
                Err(e) => return Outcome::Err(e),
            };
            match session.execute(cx, &stmt.sql, &stmt.params).await {
                Outcome::Ok(_) => created.push(record),
                Outcome::Err(Error::Execution(e)) => {
                    return Outcome::Err(remap_constraint_violation(e));
                }
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }

        Outcome::Ok(created)
    }

    /// Find records matching the criteria, normalized.
    ///
    /// A request without an explicit sort and without grouping is ordered
    /// by the primary key ascending, so pagination is always defined.
    pub async fn find(
        &self,
        cx: &Cx,
        identity: &str,
        collection: &str,
        criteria: Criteria,
    ) -> Outcome<Vec<Record>, Error> {
        if let Err(e) = criteria.validate_aggregates() {
            return Outcome::Err(e);
        }
        let (entry, def) = match self.entry_and_def(identity, collection) {
            Ok(v) => v,
            Err(e) => return Outcome::Err(e),
        };

        let mut criteria = criteria;
        let (skip, limit) = criteria.take_pagination();
        let schema = entry.schema_map();
        let plan = match self.compiler.compile_find(&schema, collection, &criteria) {
            Ok(plan) => plan,
            Err(e) => return Outcome::Err(e),
        };
        let Some(parent) = plan.parent() else {
            return Outcome::Err(Error::compile("compiler returned an empty plan"));
        };
        let sql = paginate(&parent.sql, skip, limit);

        let session = match self.acquire(cx, &entry).await {
            Outcome::Ok(session) => session,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        tracing::debug!(sql = %sql, "executing find");
        let result = match session.execute(cx, &sql, &parent.params).await {
            Outcome::Ok(result) => result,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        drop(session);

        let records = result.rows.iter().map(Record::from_row).collect();
        Outcome::Ok(processor::normalize(records, &def))
    }

    /// Count records matching the criteria.
    pub async fn count(
        &self,
        cx: &Cx,
        identity: &str,
        collection: &str,
        criteria: Criteria,
    ) -> Outcome<i64, Error> {
        if let Err(e) = criteria.validate_aggregates() {
            return Outcome::Err(e);
        }
        let (entry, _def) = match self.entry_and_def(identity, collection) {
            Ok(v) => v,
            Err(e) => return Outcome::Err(e),
        };
        let schema = entry.schema_map();
        let stmt = match self.compiler.compile_count(&schema, collection, &criteria) {
            Ok(stmt) => stmt,
            Err(e) => return Outcome::Err(e),
        };

        let session = match self.acquire(cx, &entry).await {
            Outcome::Ok(session) => session,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        let result = match session.execute(cx, &stmt.sql, &stmt.params).await {
            Outcome::Ok(result) => result,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        drop(session);

        let count = result
            .rows
            .first()
            .and_then(|row| row.get_by_name("COUNT"))
            .and_then(Value::as_i64);
        match count {
            Some(n) => Outcome::Ok(n),
            None => Outcome::Err(Error::execution("count query returned no COUNT column")),
        }
    }

    /// Update records matching the criteria; returns the matched records
    /// re-fetched by primary key after the update.
    ///
    /// Zero matches short-circuits to an empty result without executing
    /// the update. A single match re-fetches through the first-row
    /// wrapper; multiple matches re-fetch through an IN-list.
    pub async fn update(
        &self,
        cx: &Cx,
        identity: &str,
        collection: &str,
        criteria: Criteria,
        values: Vec<(String, Value)>,
    ) -> Outcome<Vec<Record>, Error> {
        let (entry, def) = match self.entry_and_def(identity, collection) {
            Ok(v) => v,
            Err(e) => return Outcome::Err(e),
        };
        let schema = entry.schema_map();

        // Pre-image: which primary keys does the criteria hit right now?
        let find_plan = match self.compiler.compile_find(&schema, collection, &criteria) {
            Ok(plan) => plan,
            Err(e) => return Outcome::Err(e),
        };
        let Some(find_stmt) = find_plan.parent() else {
            return Outcome::Err(Error::compile("compiler returned an empty plan"));
        };

        let session = match self.acquire(cx, &entry).await {
            Outcome::Ok(session) => session,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        let matched = match session.execute(cx, &find_stmt.sql, &find_stmt.params).await {
            Outcome::Ok(result) => {
                let records = result.rows.iter().map(Record::from_row).collect();
                processor::normalize(records, &def)
            }
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        if matched.is_empty() {
            return Outcome::Ok(Vec::new());
        }

        let pk_attr = def.primary_key().to_string();
        let ids: Vec<Value> = matched
            .iter()
            .filter_map(|record| record.get(&pk_attr))
            .cloned()
            .collect();

        let mut write = values;
        coerce_for_update(&def, &mut write);
        let update_stmt = match self
            .compiler
            .compile_update(&schema, collection, &criteria, &write)
        {
            Ok(stmt) => stmt,
            Err(e) => return Outcome::Err(e),
        };
        tracing::debug!(sql = %update_stmt.sql, "executing update");
        match session
            .execute(cx, &update_stmt.sql, &update_stmt.params)
            .await
        {
            Outcome::Ok(_) => {}
            Outcome::Err(Error::Execution(e)) => {
                return Outcome::Err(remap_constraint_violation(e));
            }
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }

        // Re-fetch by primary key, post-update.
        let refetch_criteria = if ids.len() == 1 {
            Criteria::new().filter(Condition::eq(pk_attr.clone(), ids[0].clone()))
        } else {
            Criteria::new().filter(Condition::within(pk_attr.clone(), ids.clone()))
        };
        let refetch_plan = match self
            .compiler
            .compile_find(&schema, collection, &refetch_criteria)
        {
            Ok(plan) => plan,
            Err(e) => return Outcome::Err(e),
        };
        let Some(refetch_stmt) = refetch_plan.parent() else {
            return Outcome::Err(Error::compile("compiler returned an empty plan"));
        };
        let refetch_sql = if ids.len() == 1 {
            first_row_only(&refetch_stmt.sql)
        } else {
            refetch_stmt.sql.clone()
        };

        let result = match session.execute(cx, &refetch_sql, &refetch_stmt.params).await {
            Outcome::Ok(result) => result,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        drop(session);

        let records = result.rows.iter().map(Record::from_row).collect();
        Outcome::Ok(processor::normalize(records, &def))
    }

    /// Delete records matching the criteria; returns the set that matched
    /// before deletion.
    pub async fn destroy(
        &self,
        cx: &Cx,
        identity: &str,
        collection: &str,
        criteria: Criteria,
    ) -> Outcome<Vec<Record>, Error> {
        let (entry, def) = match self.entry_and_def(identity, collection) {
            Ok(v) => v,
            Err(e) => return Outcome::Err(e),
        };
        let schema = entry.schema_map();

        let find_plan = match self.compiler.compile_find(&schema, collection, &criteria) {
            Ok(plan) => plan,
            Err(e) => return Outcome::Err(e),
        };
        let Some(find_stmt) = find_plan.parent() else {
            return Outcome::Err(Error::compile("compiler returned an empty plan"));
        };
        let destroy_stmt = match self.compiler.compile_destroy(&schema, collection, &criteria) {
            Ok(stmt) => stmt,
            Err(e) => return Outcome::Err(e),
        };

        let session = match self.acquire(cx, &entry).await {
            Outcome::Ok(session) => session,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        let matched = match session.execute(cx, &find_stmt.sql, &find_stmt.params).await {
            Outcome::Ok(result) => {
                let records = result.rows.iter().map(Record::from_row).collect();
                processor::normalize(records, &def)
            }
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        tracing::debug!(sql = %destroy_stmt.sql, "executing destroy");
        match session
            .execute(cx, &destroy_stmt.sql, &destroy_stmt.params)
            .await
        {
            Outcome::Ok(_) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }

        Outcome::Ok(matched)
    }

    /// Resolve a populate request: parent query, then one synthesized
    /// UNION statement per separate-table association, merged per parent.
    ///
    /// Zero parent records short-circuits without issuing any association
    /// query. Any stage failure aborts the whole join — results are never
    /// partially populated.
    pub async fn join(
        &self,
        cx: &Cx,
        identity: &str,
        collection: &str,
        criteria: Criteria,
        instructions: Vec<JoinInstruction>,
    ) -> Outcome<Vec<Record>, Error> {
        let (entry, def) = match self.entry_and_def(identity, collection) {
            Ok(v) => v,
            Err(e) => return Outcome::Err(e),
        };

        let mut criteria = criteria;
        let (skip, limit) = criteria.take_pagination();
        let schema = entry.schema_map();
        let plan = match self
            .compiler
            .compile_join(&schema, collection, &criteria, &instructions)
        {
            Ok(plan) => plan,
            Err(e) => return Outcome::Err(e),
        };
        let Some(parent_stmt) = plan.parent() else {
            return Outcome::Err(Error::compile("compiler returned an empty plan"));
        };
        let parent_sql = paginate(&parent_stmt.sql, skip, limit);

        let session = match self.acquire(cx, &entry).await {
            Outcome::Ok(session) => session,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        tracing::debug!(sql = %parent_sql, "executing join parent query");
        let result = match session.execute(cx, &parent_sql, &parent_stmt.params).await {
            Outcome::Ok(result) => result,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        // Pull aliased child columns off the parent rows into a per-alias
        // cache; these came back inline from foreign-key associations.
        let mut cached: BTreeMap<String, Vec<Record>> = BTreeMap::new();
        let mut raw_parents = Vec::with_capacity(result.rows.len());
        for row in &result.rows {
            let mut record = Record::from_row(row);
            for (alias, child) in processor::split_embedded(&mut record) {
                cached.entry(alias).or_default().push(child);
            }
            raw_parents.push(record);
        }
        let mut parents = processor::normalize(raw_parents, &def);

        if parents.is_empty() {
            return Outcome::Ok(Vec::new());
        }

        let mut buffers = populate::build_buffers(&parents, &instructions, &def, &cached, &schema);

        for template in plan.templates() {
            let Some(meta) = template.join.as_ref() else {
                continue;
            };
            let keys = populate::parent_keys(&parents, &def, meta);
            if keys.is_empty() {
                continue;
            }
            let union_sql = match synthesize_union(template, &keys) {
                Ok(sql) => sql,
                Err(e) => return Outcome::Err(e),
            };
            tracing::debug!(association = %meta.alias, sql = %union_sql, "resolving association");
            let result = match session.execute(cx, &union_sql, &[]).await {
                Outcome::Ok(result) => result,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };

            let rows: Vec<Record> = result.rows.iter().map(Record::from_row).collect();
            let grouped = populate::group_children(rows, meta);
            let child_def = match entry.collection(&meta.child) {
                Ok(child_def) => child_def,
                Err(e) => return Outcome::Err(e),
            };
            populate::attach_to_buffers(&mut buffers, meta, &grouped, &child_def);
        }
        drop(session);

        populate::merge_buffers(&mut parents, buffers);
        Outcome::Ok(parents)
    }

    /// Create the collection's table, seed auto-increment counters from
    /// existing data, and describe the resulting schema.
    pub async fn define(
        &self,
        cx: &Cx,
        identity: &str,
        collection: &str,
        definition: CollectionDef,
    ) -> Outcome<Option<CollectionDef>, Error> {
        let entry = match self.registry.entry(identity) {
            Ok(entry) => entry,
            Err(e) => return Outcome::Err(e),
        };
        tracing::debug!(collection, "defining collection");

        let create_sql = ddl::create_table(&definition, &entry.config);
        let session = match self.acquire(cx, &entry).await {
            Outcome::Ok(session) => session,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        match session.execute(cx, &create_sql, &[]).await {
            Outcome::Ok(_) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }

        let table = definition.table_name().to_string();
        let auto_cols: Vec<String> = definition
            .auto_increment_columns()
            .map(|(_, column)| column.to_string())
            .collect();
        for column in auto_cols {
            let probe = ddl::max_probe(&table, &column);
            match session.execute(cx, &probe, &[]).await {
                Outcome::Ok(result) => {
                    let observed = result
                        .rows
                        .first()
                        .and_then(|row| row.get_by_name("MAX"))
                        .and_then(Value::as_i64)
                        .unwrap_or(0);
                    self.auto_increments.seed(&table, &column, observed);
                }
                Outcome::Err(e) => {
                    tracing::warn!(column = %column, error = %e, "could not read last auto-increment value");
                }
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }
        drop(session);

        entry.store_collection(definition);
        self.describe(cx, identity, collection).await
    }

    /// Probe the catalog for the collection's actual schema and merge it
    /// with the declared definition. Returns `None` when the table does
    /// not exist yet.
    pub async fn describe(
        &self,
        cx: &Cx,
        identity: &str,
        collection: &str,
    ) -> Outcome<Option<CollectionDef>, Error> {
        let (entry, declared) = match self.entry_and_def(identity, collection) {
            Ok(v) => v,
            Err(e) => return Outcome::Err(e),
        };
        let [columns_sql, indexes_sql, pks_sql] = ddl::describe_queries(declared.table_name());

        let session = match self.acquire(cx, &entry).await {
            Outcome::Ok(session) => session,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        let column_rows = match session.execute(cx, &columns_sql, &[]).await {
            Outcome::Ok(result) => result.rows,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        if column_rows.is_empty() {
            tracing::debug!(collection, "table does not exist yet");
            return Outcome::Ok(None);
        }
        let index_rows = match session.execute(cx, &indexes_sql, &[]).await {
            Outcome::Ok(result) => result.rows,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        let pk_rows = match session.execute(cx, &pks_sql, &[]).await {
            Outcome::Ok(result) => result.rows,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        drop(session);

        let merged = ddl::merge_describe(&declared, &column_rows, &index_rows, &pk_rows);
        entry.store_collection(merged.clone());
        Outcome::Ok(Some(merged))
    }

    /// Drop the collection's table and any related tables, resetting their
    /// auto-increment counters. Missing tables are tolerated.
    pub async fn drop_collection(
        &self,
        cx: &Cx,
        identity: &str,
        collection: &str,
        relations: Vec<String>,
    ) -> Outcome<(), Error> {
        let entry = match self.registry.entry(identity) {
            Ok(entry) => entry,
            Err(e) => return Outcome::Err(e),
        };

        let session = match self.acquire(cx, &entry).await {
            Outcome::Ok(session) => session,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        let mut tables = relations;
        tables.push(collection.to_string());
        for table in tables {
            let sql = ddl::drop_table(&table);
            tracing::debug!(sql = %sql, "dropping table");
            match session.execute(cx, &sql, &[]).await {
                Outcome::Ok(_) => self.auto_increments.reset(&table),
                Outcome::Err(Error::Execution(e)) if is_missing_table(&e) => {
                    tracing::debug!(table = %table, "table already absent");
                }
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }

        Outcome::Ok(())
    }

    /// Add a column for a new attribute.
    pub async fn add_attribute(
        &self,
        cx: &Cx,
        identity: &str,
        collection: &str,
        attr: &str,
        attr_def: AttrDef,
    ) -> Outcome<(), Error> {
        let (entry, mut def) = match self.entry_and_def(identity, collection) {
            Ok(v) => v,
            Err(e) => return Outcome::Err(e),
        };
        let sql = ddl::add_column(def.table_name(), attr, &attr_def);

        let session = match self.acquire(cx, &entry).await {
            Outcome::Ok(session) => session,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        match session.execute(cx, &sql, &[]).await {
            Outcome::Ok(_) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
        drop(session);

        def.attributes.insert(attr.to_string(), attr_def);
        entry.store_collection(def);
        Outcome::Ok(())
    }

    /// Drop an attribute's column.
    pub async fn remove_attribute(
        &self,
        cx: &Cx,
        identity: &str,
        collection: &str,
        attr: &str,
    ) -> Outcome<(), Error> {
        let (entry, mut def) = match self.entry_and_def(identity, collection) {
            Ok(v) => v,
            Err(e) => return Outcome::Err(e),
        };
        let column = def.column_name(attr).to_string();
        let sql = ddl::drop_column(def.table_name(), &column);

        let session = match self.acquire(cx, &entry).await {
            Outcome::Ok(session) => session,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        match session.execute(cx, &sql, &[]).await {
            Outcome::Ok(_) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
        drop(session);

        def.attributes.remove(attr);
        entry.store_collection(def);
        Outcome::Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_value_replaces_or_appends() {
        let mut values = vec![("a".to_string(), Value::Int(1))];
        set_value(&mut values, "a", Value::Int(2));
        assert_eq!(values, vec![("a".to_string(), Value::Int(2))]);

        set_value(&mut values, "b", Value::Int(3));
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn missing_table_detection() {
        let by_code = ExecutionError {
            code: Some("ORA-00942".to_string()),
            sql: None,
            message: "bad".to_string(),
            source: None,
        };
        assert!(is_missing_table(&by_code));

        let by_message = ExecutionError {
            code: None,
            sql: None,
            message: "ORA-00942: table or view does not exist".to_string(),
            source: None,
        };
        assert!(is_missing_table(&by_message));

        let other = ExecutionError {
            code: Some("ORA-00001".to_string()),
            sql: None,
            message: "unique constraint violated".to_string(),
            source: None,
        };
        assert!(!is_missing_table(&other));
    }
}
