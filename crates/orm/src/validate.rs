//! Model validation
//!
//! Two phases. The synchronous pipeline (relata-validation) runs first,
//! field by field in schema order, and aborts before any storage I/O on
//! the first violation. The asynchronous phase then collects one probe per
//! declared database-backed check on each field with a present value, runs
//! the whole set concurrently, and joins before returning. Nothing is
//! cancelled: once dispatched, probes run to completion and the first
//! rejection in field order wins; later results are discarded.

use crate::conditions::{compile_where, CompileContext, Condition, TrashedVisibility};
use crate::error::OrmResult;
use crate::fields::Record;
use crate::schema::{self, Model};
use futures::future::join_all;
use relata_validation::{engine, AsyncContext, DbCheck, ValidationError};
use serde_json::{Map, Value};

impl Model {
    /// Validate a record against the model's declared rules without
    /// writing anything: the synchronous pipeline first, then the
    /// database-backed checks. `instance_id` is excluded from uniqueness
    /// probes; `groups` restricts the pass to rules in those groups.
    pub async fn validate(
        &self,
        record: &Record,
        instance_id: Option<&Value>,
        groups: Option<&[String]>,
    ) -> OrmResult<()> {
        run(self, record, None, instance_id, groups).await
    }
}

/// Validate a full record (create path): every schema field participates.
pub(crate) async fn validate_create(
    model: &Model,
    record: &Record,
    groups: Option<&[String]>,
) -> OrmResult<()> {
    run(model, record, None, None, groups).await
}

/// Validate an update: only fields present in `changed` are checked, with
/// sibling lookups resolved against the merged `context`, and uniqueness
/// probes excluding `instance_id`.
pub(crate) async fn validate_update(
    model: &Model,
    context: &Record,
    changed: &Record,
    instance_id: Option<&Value>,
    groups: Option<&[String]>,
) -> OrmResult<()> {
    run(model, context, Some(changed), instance_id, groups).await
}

/// Synchronous pipeline only, restricted to the fields present in
/// `record`. Used by bulk updates, where database-backed checks have no
/// single row to exclude.
pub(crate) fn validate_partial_sync(model: &Model, record: &Record) -> OrmResult<()> {
    let keys = schema::schema_keys(model);
    for key in keys.iter() {
        if !record.contains_key(key) {
            continue;
        }
        if let Some(rule) = model
            .definition()
            .field_definition(key)
            .and_then(|d| d.validate.as_ref())
        {
            engine::validate_field(key, rule, record, None)?;
        }
    }
    Ok(())
}

async fn run(
    model: &Model,
    context: &Record,
    restrict: Option<&Record>,
    instance_id: Option<&Value>,
    groups: Option<&[String]>,
) -> OrmResult<()> {
    let keys = schema::schema_keys(model);

    // Synchronous phase: everything that needs no storage access, aborting
    // on the first violation.
    for key in keys.iter() {
        if restrict.map_or(false, |changed| !changed.contains_key(key)) {
            continue;
        }
        let rule = match model
            .definition()
            .field_definition(key)
            .and_then(|d| d.validate.as_ref())
        {
            Some(rule) => rule,
            None => continue,
        };
        engine::validate_field(key, rule, context, groups)?;
    }

    // Asynchronous phase: collect every database-backed check for fields
    // with a present value, then fan out.
    let mut pending: Vec<(&str, &DbCheck, &Value, Option<&str>)> = Vec::new();
    for key in keys.iter() {
        if restrict.map_or(false, |changed| !changed.contains_key(key)) {
            continue;
        }
        let rule = match model
            .definition()
            .field_definition(key)
            .and_then(|d| d.validate.as_ref())
        {
            Some(rule) => rule,
            None => continue,
        };
        if !rule.in_groups(groups) {
            continue;
        }
        if let Some(when) = &rule.when {
            if !when(context) {
                continue;
            }
        }
        let value = match context.get(key.as_str()) {
            Some(value) if !value.is_null() => value,
            _ => continue,
        };
        for check in &rule.db_checks {
            pending.push((key.as_str(), check, value, rule.message.as_deref()));
        }
    }

    if pending.is_empty() {
        return Ok(());
    }

    let tasks = pending
        .iter()
        .map(|(field, check, value, message)| {
            run_db_check(model, field, check, value, context, instance_id, *message)
        })
        .collect::<Vec<_>>();

    // Fan-out/fan-in: all probes run concurrently; the first failure in
    // field order is surfaced, the rest are discarded.
    for result in join_all(tasks).await {
        result?;
    }
    Ok(())
}

async fn run_db_check(
    model: &Model,
    field: &str,
    check: &DbCheck,
    value: &Value,
    record: &Record,
    instance_id: Option<&Value>,
    message: Option<&str>,
) -> OrmResult<()> {
    match check {
        DbCheck::Unique { exclude } => {
            let mut condition = Map::new();
            condition.insert(field.to_string(), value.clone());
            if let Some(id) = instance_id {
                let mut not_self = Map::new();
                not_self.insert("$ne".to_string(), id.clone());
                condition.insert(model.primary_key().to_string(), Value::Object(not_self));
            }
            if let Some(exclude) = exclude {
                for (k, v) in exclude {
                    condition.insert(k.clone(), v.clone());
                }
            }
            let found = probe(model, model.table(), Condition::Where(condition)).await?;
            if found {
                Err(fail(field, message, format!("{} must be unique", field), "unique").into())
            } else {
                Ok(())
            }
        }
        DbCheck::Exists { table, condition } => {
            let target = table.as_deref().unwrap_or_else(|| model.table());
            let found = probe(model, target, probe_condition(field, value, condition)).await?;
            if found {
                Ok(())
            } else {
                Err(fail(
                    field,
                    message,
                    format!("{} refers to a record that does not exist", field),
                    "exists",
                )
                .into())
            }
        }
        DbCheck::NotExists { table, condition } => {
            let target = table.as_deref().unwrap_or_else(|| model.table());
            let found = probe(model, target, probe_condition(field, value, condition)).await?;
            if found {
                Err(fail(field, message, format!("{} already exists", field), "not_exists").into())
            } else {
                Ok(())
            }
        }
        DbCheck::Custom(check) => {
            let context = AsyncContext {
                field: field.to_string(),
                instance_id: instance_id.cloned(),
                table: model.table().to_string(),
            };
            check(value.clone(), record.clone(), context)
                .await
                .map_err(|reason| fail(field, None, reason, "async_custom").into())
        }
    }
}

/// Existence probe against an explicit target table. The target is a
/// parameter, never a mutation of the model's own configuration, so
/// cross-table probes cannot corrupt shared state. The model's soft-delete
/// scope applies only when probing its own table.
async fn probe(model: &Model, table: &str, condition: Condition) -> OrmResult<bool> {
    let adapter = model.adapter()?;
    let soft_delete_column = if table == model.table() && model.definition().soft_delete {
        Some(model.definition().deleted_at_column.as_str())
    } else {
        None
    };
    let ctx = CompileContext {
        dialect: model.dialect(),
        primary_key: model.primary_key(),
        soft_delete_column,
        visibility: TrashedVisibility::DEFAULT,
    };
    let (where_sql, params) = compile_where(&condition, &ctx);
    let sql = format!("SELECT 1 FROM {} WHERE {} LIMIT 1", table, where_sql);
    let rows = adapter.query(&sql, &params).await?;
    Ok(!rows.is_empty())
}

fn probe_condition(field: &str, value: &Value, declared: &Option<Record>) -> Condition {
    match declared {
        Some(condition) => Condition::Where(condition.clone()),
        None => {
            let mut map = Map::new();
            map.insert(field.to_string(), value.clone());
            Condition::Where(map)
        }
    }
}

fn fail(field: &str, message: Option<&str>, default: String, code: &str) -> ValidationError {
    ValidationError::with_code(field, message.map(str::to_string).unwrap_or(default), code)
}
