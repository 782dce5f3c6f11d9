//! SQL assembly
//!
//! Builds the statement strings the engine executes. All values travel as
//! `?` placeholders; the WHERE fragment and its parameters come from the
//! condition compiler.

use crate::backends::SqlDialect;
use crate::fields::Record;
use serde_json::Value;

/// Escape a projection entry. `*` and aggregate expressions pass through.
fn projection(dialect: SqlDialect, field: &str) -> String {
    if field == "*" || field.contains('(') || field.contains(' ') {
        field.to_string()
    } else {
        dialect.escape_field(field)
    }
}

pub(crate) fn select(
    dialect: SqlDialect,
    table: &str,
    fields: &[String],
    where_sql: &str,
    order_by: Option<&str>,
    limit: Option<u64>,
    offset: Option<u64>,
) -> String {
    let projected = if fields.is_empty() {
        "*".to_string()
    } else {
        fields
            .iter()
            .map(|f| projection(dialect, f))
            .collect::<Vec<_>>()
            .join(", ")
    };

    let mut sql = format!("SELECT {} FROM {} WHERE {}", projected, table, where_sql);
    if let Some(order) = order_by {
        if !order.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(order);
        }
    }
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }
    if let Some(offset) = offset {
        sql.push_str(&format!(" OFFSET {}", offset));
    }
    sql
}

pub(crate) fn insert(dialect: SqlDialect, table: &str, stored: &Record) -> (String, Vec<Value>) {
    let columns: Vec<String> = stored.keys().map(|k| dialect.escape_field(k)).collect();
    let placeholders = vec!["?"; stored.len()].join(", ");
    let params: Vec<Value> = stored.values().cloned().collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        columns.join(", "),
        placeholders
    );
    (sql, params)
}

pub(crate) fn update(
    dialect: SqlDialect,
    table: &str,
    stored: &Record,
    where_sql: &str,
    where_params: &[Value],
) -> (String, Vec<Value>) {
    let assignments: Vec<String> = stored
        .keys()
        .map(|k| format!("{} = ?", dialect.escape_field(k)))
        .collect();
    let mut params: Vec<Value> = stored.values().cloned().collect();
    params.extend(where_params.iter().cloned());
    let sql = format!(
        "UPDATE {} SET {} WHERE {}",
        table,
        assignments.join(", "),
        where_sql
    );
    (sql, params)
}

pub(crate) fn delete(table: &str, where_sql: &str) -> String {
    format!("DELETE FROM {} WHERE {}", table, where_sql)
}

/// Dialect-native upsert: `ON CONFLICT … DO UPDATE` for Postgres and
/// SQLite, `ON DUPLICATE KEY UPDATE` for MySQL.
pub(crate) fn upsert(
    dialect: SqlDialect,
    table: &str,
    stored: &Record,
    conflict_fields: &[String],
    update_fields: &[String],
) -> (String, Vec<Value>) {
    let (mut sql, params) = insert(dialect, table, stored);

    if dialect.uses_on_conflict() {
        let conflict: Vec<String> = conflict_fields
            .iter()
            .map(|f| dialect.escape_field(f))
            .collect();
        let updates: Vec<String> = update_fields
            .iter()
            .map(|f| {
                let escaped = dialect.escape_field(f);
                format!("{} = EXCLUDED.{}", escaped, escaped)
            })
            .collect();
        sql.push_str(&format!(
            " ON CONFLICT ({}) DO UPDATE SET {}",
            conflict.join(", "),
            updates.join(", ")
        ));
    } else {
        let updates: Vec<String> = update_fields
            .iter()
            .map(|f| {
                let escaped = dialect.escape_field(f);
                format!("{} = VALUES({})", escaped, escaped)
            })
            .collect();
        sql.push_str(&format!(" ON DUPLICATE KEY UPDATE {}", updates.join(", ")));
    }
    (sql, params)
}
