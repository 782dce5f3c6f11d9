//! Public query facade
//!
//! The CRUD surface of a model. Reads go through the result cache when a
//! cache adapter is bound; every successful write invalidates the model's
//! tag. Single-record writes run the full lifecycle (hooks, validation);
//! the `*_many` bulk verbs compile one statement and skip per-record
//! hooks.

pub mod builder;
pub(crate) mod sql;

pub use builder::{ModelQuery, QuerySpec};

use crate::backends::ExecuteResult;
use crate::cache::{self, QueryShape};
use crate::conditions::{compile_where, ordering, CompileContext, Condition, TrashedVisibility};
use crate::error::{ModelError, OrmResult};
use crate::fields::{self, Record};
use crate::lifecycle;
use crate::schema::Model;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

/// One page of results.
#[derive(Debug, Clone, Serialize)]
pub struct Page {
    pub data: Vec<Record>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
    pub total_pages: u64,
}

impl Model {
    /// Start a chainable query.
    pub fn query(&self) -> ModelQuery {
        ModelQuery::new(self.clone())
    }

    /// Chainable query including soft-deleted rows.
    pub fn with_trashed(&self) -> ModelQuery {
        ModelQuery::new(self.clone()).with_visibility(TrashedVisibility::WITH_TRASHED)
    }

    /// Chainable query over soft-deleted rows only.
    pub fn only_trashed(&self) -> ModelQuery {
        ModelQuery::new(self.clone()).with_visibility(TrashedVisibility::ONLY_TRASHED)
    }

    fn compile_ctx(&self, visibility: TrashedVisibility) -> CompileContext<'_> {
        CompileContext {
            dialect: self.dialect(),
            primary_key: self.primary_key(),
            soft_delete_column: if self.definition().soft_delete {
                Some(self.definition().deleted_at_column.as_str())
            } else {
                None
            },
            visibility,
        }
    }

    /// Cached read path shared by every row-returning query.
    pub(crate) async fn fetch_rows(&self, spec: &QuerySpec) -> OrmResult<Vec<Record>> {
        let adapter = self.adapter()?;

        let shape = QueryShape {
            condition: &spec.condition,
            fields: &spec.fields,
            sort: spec.sort.as_ref(),
            skip: spec.skip,
            limit: spec.limit,
            visibility: spec.visibility,
        };
        let key = cache::cache_key(self, &shape);
        if let Some(Value::Array(rows)) = cache::get(self, &key).await {
            return Ok(rows
                .into_iter()
                .filter_map(|row| match row {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .collect());
        }

        let ctx = self.compile_ctx(spec.visibility);
        let (where_sql, params) = compile_where(&spec.condition, &ctx);
        let order = spec
            .sort
            .as_ref()
            .map(|sort| ordering::compile_order_by(sort, self.dialect(), self.primary_key()));
        let statement = sql::select(
            self.dialect(),
            self.table(),
            &spec.fields,
            &where_sql,
            order.as_deref(),
            spec.limit,
            spec.skip,
        );
        debug!(table = self.table(), sql = %statement, "select");
        let rows = adapter.query(&statement, &params).await?;
        let records: Vec<Record> = rows
            .into_iter()
            .map(|row| fields::materialize(self, row))
            .collect();

        let cached: Vec<Value> = records.iter().cloned().map(Value::Object).collect();
        cache::put(self, &key, Value::Array(cached)).await;
        Ok(records)
    }

    pub(crate) async fn count_spec(&self, spec: &QuerySpec) -> OrmResult<u64> {
        let adapter = self.adapter()?;

        let count_fields = vec!["COUNT(*) AS total".to_string()];
        let shape = QueryShape {
            condition: &spec.condition,
            fields: &count_fields,
            sort: None,
            skip: None,
            limit: None,
            visibility: spec.visibility,
        };
        let key = cache::cache_key(self, &shape);
        if let Some(cached) = cache::get(self, &key).await {
            if let Some(total) = scalar_count(&cached) {
                return Ok(total);
            }
        }

        let ctx = self.compile_ctx(spec.visibility);
        let (where_sql, params) = compile_where(&spec.condition, &ctx);
        let statement = sql::select(
            self.dialect(),
            self.table(),
            &count_fields,
            &where_sql,
            None,
            None,
            None,
        );
        let rows = adapter.query(&statement, &params).await?;
        let total = rows
            .first()
            .and_then(|row| row.get("total"))
            .and_then(scalar_count)
            .unwrap_or(0);

        cache::put(self, &key, Value::from(total)).await;
        Ok(total)
    }

    pub(crate) async fn exists_spec(&self, spec: &QuerySpec) -> OrmResult<bool> {
        let adapter = self.adapter()?;
        let ctx = self.compile_ctx(spec.visibility);
        let (where_sql, params) = compile_where(&spec.condition, &ctx);
        let statement = format!("SELECT 1 FROM {} WHERE {} LIMIT 1", self.table(), where_sql);
        let rows = adapter.query(&statement, &params).await?;
        Ok(!rows.is_empty())
    }

    pub(crate) async fn distinct_spec(&self, field: &str, spec: &QuerySpec) -> OrmResult<Vec<Value>> {
        let adapter = self.adapter()?;

        let projected = vec![format!("DISTINCT {}", self.dialect().escape_field(field))];
        let shape = QueryShape {
            condition: &spec.condition,
            fields: &projected,
            sort: None,
            skip: None,
            limit: None,
            visibility: spec.visibility,
        };
        let key = cache::cache_key(self, &shape);
        if let Some(Value::Array(values)) = cache::get(self, &key).await {
            return Ok(values);
        }

        let ctx = self.compile_ctx(spec.visibility);
        let (where_sql, params) = compile_where(&spec.condition, &ctx);
        let statement = sql::select(
            self.dialect(),
            self.table(),
            &projected,
            &where_sql,
            None,
            None,
            None,
        );
        let rows = adapter.query(&statement, &params).await?;
        let values: Vec<Value> = rows
            .into_iter()
            .filter_map(|mut row| row.remove(field))
            .collect();

        cache::put(self, &key, Value::Array(values.clone())).await;
        Ok(values)
    }

    pub(crate) async fn paginate_spec(
        &self,
        spec: &QuerySpec,
        page: u64,
        page_size: u64,
    ) -> OrmResult<Page> {
        let page = page.max(1);
        let page_size = page_size.max(1);

        let mut window = spec.clone();
        window.limit = Some(page_size);
        window.skip = Some((page - 1) * page_size);
        let data = self.fetch_rows(&window).await?;

        let total = self.count_spec(spec).await?;
        let total_pages = total.div_ceil(page_size);

        Ok(Page {
            data,
            total,
            page,
            page_size,
            total_pages,
        })
    }

    // Read surface ---------------------------------------------------------

    pub async fn find_all(&self, condition: impl Into<Condition>) -> OrmResult<Vec<Record>> {
        let spec = QuerySpec {
            condition: condition.into(),
            ..QuerySpec::default()
        };
        self.fetch_rows(&spec).await
    }

    /// First matching record, or `None`. A scalar condition is primary-key
    /// equality.
    pub async fn find(&self, condition: impl Into<Condition>) -> OrmResult<Option<Record>> {
        let spec = QuerySpec {
            condition: condition.into(),
            limit: Some(1),
            ..QuerySpec::default()
        };
        let mut rows = self.fetch_rows(&spec).await?;
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.remove(0))
        })
    }

    pub async fn find_one(&self, condition: impl Into<Condition>) -> OrmResult<Option<Record>> {
        self.find(condition).await
    }

    pub async fn find_by_id(&self, id: impl Into<Value>) -> OrmResult<Option<Record>> {
        self.find(Condition::Id(id.into())).await
    }

    pub async fn count(&self, condition: impl Into<Condition>) -> OrmResult<u64> {
        let spec = QuerySpec {
            condition: condition.into(),
            ..QuerySpec::default()
        };
        self.count_spec(&spec).await
    }

    pub async fn exists(&self, condition: impl Into<Condition>) -> OrmResult<bool> {
        let spec = QuerySpec {
            condition: condition.into(),
            ..QuerySpec::default()
        };
        self.exists_spec(&spec).await
    }

    /// Distinct values of one column among matching rows.
    pub async fn distinct(
        &self,
        field: &str,
        condition: impl Into<Condition>,
    ) -> OrmResult<Vec<Value>> {
        let spec = QuerySpec {
            condition: condition.into(),
            ..QuerySpec::default()
        };
        self.distinct_spec(field, &spec).await
    }

    pub async fn paginate(
        &self,
        condition: impl Into<Condition>,
        page: u64,
        page_size: u64,
    ) -> OrmResult<Page> {
        let spec = QuerySpec {
            condition: condition.into(),
            ..QuerySpec::default()
        };
        self.paginate_spec(&spec, page, page_size).await
    }

    // Write surface --------------------------------------------------------

    /// Create one record through the full lifecycle.
    pub async fn create(&self, data: Record) -> OrmResult<Record> {
        lifecycle::create_record(self, data).await
    }

    /// Create records one at a time, each through the full lifecycle.
    /// Atomicity across the batch is whatever the adapter's transaction
    /// primitive provides; this path makes one statement per record.
    pub async fn create_many(&self, rows: Vec<Record>) -> OrmResult<Vec<Record>> {
        let mut created = Vec::with_capacity(rows.len());
        for row in rows {
            created.push(lifecycle::create_record(self, row).await?);
        }
        Ok(created)
    }

    /// Update matching records through the lifecycle (existence pre-check,
    /// partial validation, hooks). Returns the affected count; zero is a
    /// miss, not an error.
    pub async fn update(
        &self,
        condition: impl Into<Condition>,
        changes: Record,
    ) -> OrmResult<u64> {
        lifecycle::update_record(self, condition.into(), changes).await
    }

    /// Update by primary key and return the fresh record, or `None` on a
    /// miss.
    pub async fn update_by_id(
        &self,
        id: impl Into<Value>,
        changes: Record,
    ) -> OrmResult<Option<Record>> {
        let id = id.into();
        let affected = lifecycle::update_record(self, Condition::Id(id.clone()), changes).await?;
        if affected == 0 {
            return Ok(None);
        }
        self.find_by_id(id).await
    }

    /// Bulk update without per-record hooks: one compiled statement.
    /// Changed fields still go through processing and synchronous
    /// validation.
    pub async fn update_many(
        &self,
        condition: impl Into<Condition>,
        changes: Record,
    ) -> OrmResult<u64> {
        self.update_where(condition.into(), changes, TrashedVisibility::DEFAULT)
            .await
    }

    /// Delete matching records through the lifecycle (pre-fetch, hooks).
    /// Soft delete when the model declares it.
    pub async fn delete(&self, condition: impl Into<Condition>) -> OrmResult<u64> {
        lifecycle::delete_record(self, condition.into(), false).await
    }

    pub async fn delete_by_id(&self, id: impl Into<Value>) -> OrmResult<u64> {
        lifecycle::delete_record(self, Condition::Id(id.into()), false).await
    }

    /// Bulk delete without per-record hooks.
    pub async fn delete_many(&self, condition: impl Into<Condition>) -> OrmResult<u64> {
        self.delete_where(condition.into(), TrashedVisibility::DEFAULT)
            .await
    }

    /// Hard-delete even when the model declares soft deletes; the row is
    /// unrecoverable afterwards.
    pub async fn force_delete(&self, condition: impl Into<Condition>) -> OrmResult<u64> {
        lifecycle::delete_record(self, condition.into(), true).await
    }

    /// Clear the deleted-at column on matching trashed rows. Returns the
    /// restored count; zero is normal when nothing matched.
    pub async fn restore(&self, condition: impl Into<Condition>) -> OrmResult<u64> {
        if !self.definition().soft_delete {
            return Err(ModelError::Configuration(format!(
                "model '{}' does not use soft deletes",
                self.table()
            )));
        }
        let adapter = self.adapter()?;
        let ctx = self.compile_ctx(TrashedVisibility::ONLY_TRASHED);
        let (where_sql, where_params) = compile_where(&condition.into(), &ctx);
        let mut stored = Record::new();
        stored.insert(self.definition().deleted_at_column.clone(), Value::Null);
        let (statement, params) = sql::update(
            self.dialect(),
            self.table(),
            &stored,
            &where_sql,
            &where_params,
        );
        let result = adapter.execute(&statement, &params).await?;
        if result.affected_rows > 0 {
            cache::invalidate(self).await;
        }
        Ok(result.affected_rows)
    }

    /// Atomically add `by` to a numeric column on matching rows.
    pub async fn increment(
        &self,
        condition: impl Into<Condition>,
        field: &str,
        by: i64,
    ) -> OrmResult<u64> {
        self.increment_where(condition.into(), field, by, TrashedVisibility::DEFAULT)
            .await
    }

    /// Insert-or-update. With conflict fields, compiles the dialect-native
    /// form (`ON CONFLICT … DO UPDATE` / `ON DUPLICATE KEY UPDATE`), which
    /// is race-free. Without conflict fields it falls back to
    /// find-then-create-or-update by primary key; that path has a
    /// check-then-write window and callers must not assume atomicity under
    /// concurrency.
    pub async fn upsert(&self, data: Record, conflict_fields: &[&str]) -> OrmResult<u64> {
        if conflict_fields.is_empty() {
            let pk = self.primary_key().to_string();
            if let Some(id) = data.get(&pk).cloned() {
                if self.exists(Condition::Id(id.clone())).await? {
                    let mut changes = data;
                    changes.remove(&pk);
                    return lifecycle::update_record(self, Condition::Id(id), changes).await;
                }
            }
            self.create(data).await?;
            return Ok(1);
        }

        let adapter = self.adapter()?;
        let mut data = fields::process(self, data, true)?;
        if self.definition().timestamps {
            let now = fields::now_string();
            let created = self.definition().created_at_column.clone();
            let updated = self.definition().updated_at_column.clone();
            data.entry(created).or_insert_with(|| Value::String(now.clone()));
            data.entry(updated).or_insert_with(|| Value::String(now.clone()));
        }
        let stored = fields::serialize_for_storage(self, &data)?;

        let conflict: Vec<String> = conflict_fields.iter().map(|f| (*f).to_string()).collect();
        let update_fields: Vec<String> = stored
            .keys()
            .filter(|k| !conflict.contains(k))
            .cloned()
            .collect();
        let (statement, params) = sql::upsert(
            self.dialect(),
            self.table(),
            &stored,
            &conflict,
            &update_fields,
        );
        debug!(table = self.table(), sql = %statement, "upsert");
        let result: ExecuteResult = adapter.execute(&statement, &params).await?;
        cache::invalidate(self).await;
        Ok(result.affected_rows)
    }

    /// Find the first record matching `condition`, creating one from the
    /// condition's equality pairs plus `defaults` when nothing matches.
    pub async fn find_or_create(
        &self,
        condition: impl Into<Condition>,
        defaults: Record,
    ) -> OrmResult<Record> {
        let condition = condition.into();
        if let Some(found) = self.find(condition.clone()).await? {
            return Ok(found);
        }
        let mut seed: Map<String, Value> = condition.equality_pairs().into_iter().collect();
        for (key, value) in defaults {
            seed.entry(key).or_insert(value);
        }
        self.create(seed).await
    }

    // Bulk internals shared with the builder -------------------------------

    pub(crate) async fn update_where(
        &self,
        condition: Condition,
        changes: Record,
        visibility: TrashedVisibility,
    ) -> OrmResult<u64> {
        let adapter = self.adapter()?;
        let mut changes = fields::process(self, changes, false)?;
        // Bulk updates run the synchronous pipeline only; uniqueness probes
        // cannot exclude "the row being updated" when many rows match.
        crate::validate::validate_partial_sync(self, &changes)?;
        if self.definition().timestamps {
            changes.insert(
                self.definition().updated_at_column.clone(),
                Value::String(fields::now_string()),
            );
        }
        let stored = fields::serialize_for_storage(self, &changes)?;
        let ctx = self.compile_ctx(visibility);
        let (where_sql, where_params) = compile_where(&condition, &ctx);
        let (statement, params) = sql::update(
            self.dialect(),
            self.table(),
            &stored,
            &where_sql,
            &where_params,
        );
        let result = adapter.execute(&statement, &params).await?;
        if result.affected_rows > 0 {
            cache::invalidate(self).await;
        }
        Ok(result.affected_rows)
    }

    pub(crate) async fn delete_where(
        &self,
        condition: Condition,
        visibility: TrashedVisibility,
    ) -> OrmResult<u64> {
        let adapter = self.adapter()?;
        let affected = if self.definition().soft_delete {
            let ctx = self.compile_ctx(visibility);
            let (where_sql, where_params) = compile_where(&condition, &ctx);
            let mut stored = Record::new();
            stored.insert(
                self.definition().deleted_at_column.clone(),
                Value::String(fields::now_string()),
            );
            let (statement, params) = sql::update(
                self.dialect(),
                self.table(),
                &stored,
                &where_sql,
                &where_params,
            );
            adapter.execute(&statement, &params).await?.affected_rows
        } else {
            let ctx = self.compile_ctx(visibility);
            let (where_sql, params) = compile_where(&condition, &ctx);
            let statement = sql::delete(self.table(), &where_sql);
            adapter.execute(&statement, &params).await?.affected_rows
        };
        if affected > 0 {
            cache::invalidate(self).await;
        }
        Ok(affected)
    }

    pub(crate) async fn increment_where(
        &self,
        condition: Condition,
        field: &str,
        by: i64,
        visibility: TrashedVisibility,
    ) -> OrmResult<u64> {
        let adapter = self.adapter()?;
        let ctx = self.compile_ctx(visibility);
        let (where_sql, where_params) = compile_where(&condition, &ctx);
        let escaped = self.dialect().escape_field(field);
        let statement = format!(
            "UPDATE {} SET {} = {} + ? WHERE {}",
            self.table(),
            escaped,
            escaped,
            where_sql
        );
        let mut params = vec![Value::from(by)];
        params.extend(where_params);
        let result = adapter.execute(&statement, &params).await?;
        if result.affected_rows > 0 {
            cache::invalidate(self).await;
        }
        Ok(result.affected_rows)
    }
}

fn scalar_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f as u64)),
        Value::String(s) => s.parse::<u64>().ok(),
        _ => None,
    }
}
