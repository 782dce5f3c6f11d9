//! Lifecycle hooks and write orchestration
//!
//! Every single-record write runs the same state machine: field processing,
//! hooks around validation, pre-write hooks, the statement itself,
//! materialization, post-write hooks, and cache invalidation last. A
//! validation failure aborts before any write; an adapter failure
//! propagates unchanged; nothing is retried.
//!
//! Hooks are an async trait with no-op defaults, held in the model
//! definition. Mutating hooks receive a working copy of the record; the
//! copy is merged back only when a shallow comparison against a pre-hook
//! snapshot shows the hook actually changed something.

use crate::backends::Row;
use crate::conditions::{compile_where, CompileContext, Condition, TrashedVisibility};
use crate::error::OrmResult;
use crate::fields::{self, Record};
use crate::query::sql;
use crate::schema::Model;
use crate::{cache, validate};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Lifecycle hooks for a model. Implement only what you need; the rest
/// default to no-ops.
#[async_trait]
pub trait ModelHooks: Send + Sync {
    async fn before_validate(&self, _record: &mut Record) -> OrmResult<()> {
        Ok(())
    }

    async fn after_validate(&self, _record: &mut Record) -> OrmResult<()> {
        Ok(())
    }

    async fn before_create(&self, _record: &mut Record) -> OrmResult<()> {
        Ok(())
    }

    /// `existing` is the current row when the update path fetched one.
    async fn before_update(&self, _record: &mut Record, _existing: Option<&Record>) -> OrmResult<()> {
        Ok(())
    }

    async fn before_save(&self, _record: &mut Record) -> OrmResult<()> {
        Ok(())
    }

    async fn after_create(&self, _instance: &Record) -> OrmResult<()> {
        Ok(())
    }

    async fn after_update(&self, _instance: &Record) -> OrmResult<()> {
        Ok(())
    }

    async fn after_save(&self, _instance: &Record) -> OrmResult<()> {
        Ok(())
    }

    async fn before_delete(&self, _instance: &Record) -> OrmResult<()> {
        Ok(())
    }

    async fn after_delete(&self, _instance: &Record) -> OrmResult<()> {
        Ok(())
    }
}

/// Shallow dirty check: key count, key identity, and value equality.
fn is_dirty(before: &Record, after: &Record) -> bool {
    before.len() != after.len()
        || before
            .iter()
            .any(|(key, value)| after.get(key) != Some(value))
}

enum MutatingHook<'a> {
    BeforeValidate,
    AfterValidate,
    BeforeCreate,
    BeforeUpdate(Option<&'a Record>),
    BeforeSave,
}

/// Run a mutating hook against a working copy, merging back only on dirty.
async fn run_mutating_hook(
    hooks: &Option<Arc<dyn ModelHooks>>,
    point: MutatingHook<'_>,
    record: &mut Record,
) -> OrmResult<()> {
    let hooks = match hooks {
        Some(hooks) => hooks,
        None => return Ok(()),
    };
    let snapshot = record.clone();
    let mut working = record.clone();
    match point {
        MutatingHook::BeforeValidate => hooks.before_validate(&mut working).await?,
        MutatingHook::AfterValidate => hooks.after_validate(&mut working).await?,
        MutatingHook::BeforeCreate => hooks.before_create(&mut working).await?,
        MutatingHook::BeforeUpdate(existing) => hooks.before_update(&mut working, existing).await?,
        MutatingHook::BeforeSave => hooks.before_save(&mut working).await?,
    }
    if is_dirty(&snapshot, &working) {
        *record = working;
    }
    Ok(())
}

fn compile_ctx<'a>(model: &'a Model, visibility: TrashedVisibility) -> CompileContext<'a> {
    CompileContext {
        dialect: model.dialect(),
        primary_key: model.primary_key(),
        soft_delete_column: if model.definition().soft_delete {
            Some(model.definition().deleted_at_column.as_str())
        } else {
            None
        },
        visibility,
    }
}

/// Fetch the first row matching `condition`, bypassing the cache. Used for
/// pre-write reads whose freshness must not depend on cache state.
async fn fetch_existing(
    model: &Model,
    condition: &Condition,
    visibility: TrashedVisibility,
) -> OrmResult<Option<Row>> {
    let adapter = model.adapter()?;
    let ctx = compile_ctx(model, visibility);
    let (where_sql, params) = compile_where(condition, &ctx);
    let statement = sql::select(
        model.dialect(),
        model.table(),
        &[],
        &where_sql,
        None,
        Some(1),
        None,
    );
    let mut rows = adapter.query(&statement, &params).await?;
    Ok(if rows.is_empty() {
        None
    } else {
        Some(rows.remove(0))
    })
}

/// Lightweight existence probe (`SELECT 1 … LIMIT 1`).
async fn exists_probe(
    model: &Model,
    condition: &Condition,
    visibility: TrashedVisibility,
) -> OrmResult<bool> {
    let adapter = model.adapter()?;
    let ctx = compile_ctx(model, visibility);
    let (where_sql, params) = compile_where(condition, &ctx);
    let statement = format!(
        "SELECT 1 FROM {} WHERE {} LIMIT 1",
        model.table(),
        where_sql
    );
    let rows = adapter.query(&statement, &params).await?;
    Ok(!rows.is_empty())
}

fn model_has_db_checks(model: &Model) -> bool {
    model
        .definition()
        .fields
        .iter()
        .any(|(_, field)| field.validate.as_ref().map_or(false, |r| r.has_db_checks()))
}

/// Create one record: process, validate, insert, materialize.
pub(crate) async fn create_record(model: &Model, data: Record) -> OrmResult<Record> {
    let adapter = model.adapter()?.clone();
    let hooks = model.definition().hooks.clone();

    let mut data = fields::process(model, data, true)?;
    if model.definition().timestamps {
        let now = fields::now_string();
        let created = model.definition().created_at_column.clone();
        let updated = model.definition().updated_at_column.clone();
        data.entry(created).or_insert_with(|| Value::String(now.clone()));
        data.entry(updated).or_insert_with(|| Value::String(now.clone()));
    }

    run_mutating_hook(&hooks, MutatingHook::BeforeValidate, &mut data).await?;
    validate::validate_create(model, &data, None).await?;
    run_mutating_hook(&hooks, MutatingHook::AfterValidate, &mut data).await?;
    run_mutating_hook(&hooks, MutatingHook::BeforeCreate, &mut data).await?;
    run_mutating_hook(&hooks, MutatingHook::BeforeSave, &mut data).await?;

    let stored = fields::serialize_for_storage(model, &data)?;
    let (statement, params) = sql::insert(model.dialect(), model.table(), &stored);
    debug!(table = model.table(), "insert");
    let result = adapter.execute(&statement, &params).await?;

    // Materialize the result instance, adopting the generated id when the
    // caller did not supply one.
    let mut row: Row = data;
    let pk = model.primary_key().to_string();
    if !row.contains_key(&pk) {
        if let Some(id) = result.insert_id {
            row.insert(pk, id);
        }
    }
    let instance = fields::materialize(model, row);

    if let Some(hooks) = &hooks {
        hooks.after_create(&instance).await?;
        hooks.after_save(&instance).await?;
    }
    cache::invalidate(model).await;
    Ok(instance)
}

/// Update matching records with per-record lifecycle semantics: existence
/// pre-check, partial validation with uniqueness excluding the existing
/// row, hooks, and cache invalidation. Returns the affected count; zero is
/// a miss, not an error.
pub(crate) async fn update_record(
    model: &Model,
    condition: Condition,
    changes: Record,
) -> OrmResult<u64> {
    let adapter = model.adapter()?.clone();
    let hooks = model.definition().hooks.clone();

    // Hooks and uniqueness probes need the current row; otherwise a
    // lightweight probe settles existence.
    let needs_record = hooks.is_some() || model_has_db_checks(model);
    let existing: Option<Record> = if needs_record {
        match fetch_existing(model, &condition, TrashedVisibility::DEFAULT).await? {
            Some(row) => Some(fields::materialize(model, row)),
            None => return Ok(0),
        }
    } else {
        if !exists_probe(model, &condition, TrashedVisibility::DEFAULT).await? {
            return Ok(0);
        }
        None
    };

    let instance_id = existing
        .as_ref()
        .and_then(|row| row.get(model.primary_key()).cloned())
        .or(match &condition {
            Condition::Id(id) => Some(id.clone()),
            Condition::Where(_) => None,
        });

    let mut changes = fields::process(model, changes, false)?;
    if model.definition().timestamps {
        changes.insert(
            model.definition().updated_at_column.clone(),
            Value::String(fields::now_string()),
        );
    }

    run_mutating_hook(&hooks, MutatingHook::BeforeValidate, &mut changes).await?;

    // Sibling lookups resolve against the merged record when we have it.
    let context: Record = match &existing {
        Some(existing) => {
            let mut merged = existing.clone();
            for (key, value) in &changes {
                merged.insert(key.clone(), value.clone());
            }
            merged
        }
        None => changes.clone(),
    };
    validate::validate_update(model, &context, &changes, instance_id.as_ref(), None).await?;

    run_mutating_hook(&hooks, MutatingHook::AfterValidate, &mut changes).await?;
    run_mutating_hook(&hooks, MutatingHook::BeforeUpdate(existing.as_ref()), &mut changes).await?;
    run_mutating_hook(&hooks, MutatingHook::BeforeSave, &mut changes).await?;

    let stored = fields::serialize_for_storage(model, &changes)?;
    let ctx = compile_ctx(model, TrashedVisibility::DEFAULT);
    let (where_sql, where_params) = compile_where(&condition, &ctx);
    let (statement, params) = sql::update(
        model.dialect(),
        model.table(),
        &stored,
        &where_sql,
        &where_params,
    );
    debug!(table = model.table(), "update");
    let result = adapter.execute(&statement, &params).await?;

    if result.affected_rows > 0 {
        let mut instance = existing.unwrap_or_default();
        for (key, value) in &changes {
            instance.insert(key.clone(), value.clone());
        }
        if let Some(hooks) = &hooks {
            hooks.after_update(&instance).await?;
            hooks.after_save(&instance).await?;
        }
        cache::invalidate(model).await;
    }
    Ok(result.affected_rows)
}

/// Delete matching records: soft delete when the model declares it (and
/// `force` is not set), hard delete otherwise. Returns the affected count.
pub(crate) async fn delete_record(
    model: &Model,
    condition: Condition,
    force: bool,
) -> OrmResult<u64> {
    let adapter = model.adapter()?.clone();
    let hooks = model.definition().hooks.clone();
    let visibility = if force {
        TrashedVisibility::WITH_TRASHED
    } else {
        TrashedVisibility::DEFAULT
    };

    let instance = match fetch_existing(model, &condition, visibility).await? {
        Some(row) => fields::materialize(model, row),
        None => return Ok(0),
    };

    if let Some(hooks) = &hooks {
        hooks.before_delete(&instance).await?;
    }

    let soft = model.definition().soft_delete && !force;
    let affected = if soft {
        // The default visibility clause excludes already-trashed rows.
        let ctx = compile_ctx(model, TrashedVisibility::DEFAULT);
        let (where_sql, where_params) = compile_where(&condition, &ctx);
        let mut stored = Record::new();
        stored.insert(
            model.definition().deleted_at_column.clone(),
            Value::String(fields::now_string()),
        );
        let (statement, params) = sql::update(
            model.dialect(),
            model.table(),
            &stored,
            &where_sql,
            &where_params,
        );
        debug!(table = model.table(), "soft delete");
        adapter.execute(&statement, &params).await?.affected_rows
    } else {
        let ctx = compile_ctx(model, visibility);
        let (where_sql, params) = compile_where(&condition, &ctx);
        let statement = sql::delete(model.table(), &where_sql);
        debug!(table = model.table(), "delete");
        adapter.execute(&statement, &params).await?.affected_rows
    };

    if let Some(hooks) = &hooks {
        hooks.after_delete(&instance).await?;
    }
    cache::invalidate(model).await;
    Ok(affected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(pairs: &[(&str, Value)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_dirty_check_detects_value_change() {
        let before = record(&[("a", json!(1))]);
        let after = record(&[("a", json!(2))]);
        assert!(is_dirty(&before, &after));
    }

    #[test]
    fn test_dirty_check_detects_added_key() {
        let before = record(&[("a", json!(1))]);
        let after = record(&[("a", json!(1)), ("b", json!(2))]);
        assert!(is_dirty(&before, &after));
    }

    #[test]
    fn test_dirty_check_ignores_no_op() {
        let before = record(&[("a", json!(1))]);
        let after = before.clone();
        assert!(!is_dirty(&before, &after));
    }
}
