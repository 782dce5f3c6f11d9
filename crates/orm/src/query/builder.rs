//! Chainable query builder
//!
//! A value type accumulating an immutable-per-step query specification;
//! every step consumes and returns the builder, and terminal verbs consume
//! the final specification. No shared mutable state survives a step, so
//! builders can be cloned and forked freely.

use crate::conditions::{Condition, Sort, SortDirection, TrashedVisibility};
use crate::error::OrmResult;
use crate::fields::Record;
use crate::query::Page;
use crate::schema::Model;
use serde_json::{Map, Value};

/// The accumulated shape of a query.
#[derive(Debug, Clone, Default)]
pub struct QuerySpec {
    pub condition: Condition,
    /// Projection; empty means `*`.
    pub fields: Vec<String>,
    pub sort: Option<Sort>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
    pub visibility: TrashedVisibility,
}

/// Fluent query over one model.
#[derive(Debug, Clone)]
pub struct ModelQuery {
    model: Model,
    spec: QuerySpec,
}

impl ModelQuery {
    pub(crate) fn new(model: Model) -> Self {
        Self {
            model,
            spec: QuerySpec::default(),
        }
    }

    pub(crate) fn with_visibility(mut self, visibility: TrashedVisibility) -> Self {
        self.spec.visibility = visibility;
        self
    }

    fn merge(mut self, field: &str, value: Value) -> Self {
        let mut map = match std::mem::take(&mut self.spec.condition) {
            Condition::Where(map) => map,
            Condition::Id(id) => {
                let mut map = Map::new();
                map.insert(self.model.primary_key().to_string(), id);
                map
            }
        };
        map.insert(field.to_string(), value);
        self.spec.condition = Condition::Where(map);
        self
    }

    fn merge_operator(mut self, field: &str, operator: &str, operand: Value) -> Self {
        let mut map = match std::mem::take(&mut self.spec.condition) {
            Condition::Where(map) => map,
            Condition::Id(id) => {
                let mut map = Map::new();
                map.insert(self.model.primary_key().to_string(), id);
                map
            }
        };
        match map.get_mut(field) {
            Some(Value::Object(ops)) => {
                ops.insert(operator.to_string(), operand);
            }
            _ => {
                let mut ops = Map::new();
                ops.insert(operator.to_string(), operand);
                map.insert(field.to_string(), Value::Object(ops));
            }
        }
        self.spec.condition = Condition::Where(map);
        self
    }

    /// Replace the whole condition.
    pub fn filter(mut self, condition: impl Into<Condition>) -> Self {
        self.spec.condition = condition.into();
        self
    }

    pub fn where_eq(self, field: &str, value: impl Into<Value>) -> Self {
        self.merge(field, value.into())
    }

    pub fn where_null(self, field: &str) -> Self {
        self.merge(field, Value::Null)
    }

    pub fn where_ne(self, field: &str, value: impl Into<Value>) -> Self {
        self.merge_operator(field, "$ne", value.into())
    }

    pub fn where_gt(self, field: &str, value: impl Into<Value>) -> Self {
        self.merge_operator(field, "$gt", value.into())
    }

    pub fn where_gte(self, field: &str, value: impl Into<Value>) -> Self {
        self.merge_operator(field, "$gte", value.into())
    }

    pub fn where_lt(self, field: &str, value: impl Into<Value>) -> Self {
        self.merge_operator(field, "$lt", value.into())
    }

    pub fn where_lte(self, field: &str, value: impl Into<Value>) -> Self {
        self.merge_operator(field, "$lte", value.into())
    }

    pub fn where_like(self, field: &str, pattern: &str) -> Self {
        self.merge_operator(field, "$like", Value::String(pattern.to_string()))
    }

    pub fn where_in<T: Into<Value>>(self, field: &str, values: Vec<T>) -> Self {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        self.merge_operator(field, "$in", Value::Array(values))
    }

    /// Restrict the projection.
    pub fn fields(mut self, fields: &[&str]) -> Self {
        self.spec.fields = fields.iter().map(|f| (*f).to_string()).collect();
        self
    }

    pub fn sort(mut self, field: &str, direction: SortDirection) -> Self {
        self.spec.sort = Some(match self.spec.sort.take() {
            Some(sort) => sort.then(field, direction),
            None => Sort::Fields(vec![(field.to_string(), direction)]),
        });
        self
    }

    pub fn sort_by(mut self, sort: Sort) -> Self {
        self.spec.sort = Some(sort);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.spec.skip = Some(skip);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.spec.limit = Some(limit);
        self
    }

    pub fn with_trashed(mut self) -> Self {
        self.spec.visibility = TrashedVisibility::WITH_TRASHED;
        self
    }

    pub fn only_trashed(mut self) -> Self {
        self.spec.visibility = TrashedVisibility::ONLY_TRASHED;
        self
    }

    pub fn spec(&self) -> &QuerySpec {
        &self.spec
    }

    // Terminal verbs: each consumes the accumulated specification.

    pub async fn find_all(self) -> OrmResult<Vec<Record>> {
        self.model.fetch_rows(&self.spec).await
    }

    pub async fn find_one(mut self) -> OrmResult<Option<Record>> {
        self.spec.limit = Some(1);
        let mut rows = self.model.fetch_rows(&self.spec).await?;
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.remove(0))
        })
    }

    pub async fn count(self) -> OrmResult<u64> {
        self.model.count_spec(&self.spec).await
    }

    pub async fn exists(self) -> OrmResult<bool> {
        self.model.exists_spec(&self.spec).await
    }

    pub async fn distinct(self, field: &str) -> OrmResult<Vec<Value>> {
        self.model.distinct_spec(field, &self.spec).await
    }

    pub async fn paginate(self, page: u64, page_size: u64) -> OrmResult<Page> {
        self.model.paginate_spec(&self.spec, page, page_size).await
    }

    /// Bulk update of every matching row. Per-record lifecycle hooks do
    /// not run on the bulk path.
    pub async fn update(self, changes: Record) -> OrmResult<u64> {
        self.model
            .update_where(self.spec.condition, changes, self.spec.visibility)
            .await
    }

    /// Bulk delete (soft when the model declares soft deletes). Per-record
    /// lifecycle hooks do not run on the bulk path.
    pub async fn delete(self) -> OrmResult<u64> {
        self.model
            .delete_where(self.spec.condition, self.spec.visibility)
            .await
    }

    pub async fn increment(self, field: &str, by: i64) -> OrmResult<u64> {
        self.model
            .increment_where(self.spec.condition, field, by, self.spec.visibility)
            .await
    }
}
