//! Storage adapter contract
//!
//! Abstracts the concrete database drivers away from the engine. The engine
//! compiles SQL with uniform `?` placeholders and JSON-typed parameters; an
//! adapter translates both to its wire protocol (rewriting placeholders
//! positionally where the protocol numbers them) and returns rows as keyed
//! JSON maps. Transaction and savepoint mechanics are entirely the
//! adapter's business — the engine only ever calls through this surface.

use crate::error::OrmResult;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// A result row: column name to JSON value.
pub type Row = Map<String, Value>;

/// Outcome of a write statement.
#[derive(Debug, Clone, Default)]
pub struct ExecuteResult {
    pub affected_rows: u64,
    /// Identifier generated by the insert, when the driver reports one.
    pub insert_id: Option<Value>,
}

/// Connection-pool snapshot.
#[derive(Debug, Clone, Default)]
pub struct PoolStatus {
    pub total: u32,
    pub active: u32,
    pub idle: u32,
    pub waiting: u32,
}

/// SQL dialect tag driving identifier escaping, date formatting, and upsert
/// syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    PostgreSql,
    MySql,
    Sqlite,
}

impl SqlDialect {
    /// Escape a field name for this dialect. Postgres folds unquoted
    /// identifiers to lowercase, so only mixed-case names need quoting
    /// there; MySQL backtick-quotes everything; SQLite passes through.
    pub fn escape_field(&self, field: &str) -> String {
        match self {
            SqlDialect::PostgreSql => {
                if field.chars().any(|c| c.is_ascii_uppercase()) {
                    format!("\"{}\"", field)
                } else {
                    field.to_string()
                }
            }
            SqlDialect::MySql => format!("`{}`", field),
            SqlDialect::Sqlite => field.to_string(),
        }
    }

    /// Whether this dialect uses `ON CONFLICT … DO UPDATE` (Postgres,
    /// SQLite) or `ON DUPLICATE KEY UPDATE` (MySQL).
    pub fn uses_on_conflict(&self) -> bool {
        !matches!(self, SqlDialect::MySql)
    }
}

/// Open transaction handle. Dropping without `commit` is a rollback from
/// the engine's point of view; whether the adapter enforces that is its own
/// affair.
#[async_trait]
pub trait AdapterTransaction: Send + Sync {
    async fn query(&mut self, sql: &str, params: &[Value]) -> OrmResult<Vec<Row>>;

    async fn execute(&mut self, sql: &str, params: &[Value]) -> OrmResult<ExecuteResult>;

    async fn commit(self: Box<Self>) -> OrmResult<()>;

    async fn rollback(self: Box<Self>) -> OrmResult<()>;

    async fn create_savepoint(&mut self, name: &str) -> OrmResult<()>;

    async fn rollback_to_savepoint(&mut self, name: &str) -> OrmResult<()>;

    async fn release_savepoint(&mut self, name: &str) -> OrmResult<()>;
}

/// Uniform storage surface consumed by the engine.
#[async_trait]
pub trait DatabaseAdapter: Send + Sync {
    /// Run a read statement and return all rows.
    async fn query(&self, sql: &str, params: &[Value]) -> OrmResult<Vec<Row>>;

    /// Run a write statement.
    async fn execute(&self, sql: &str, params: &[Value]) -> OrmResult<ExecuteResult>;

    /// Open a transaction.
    async fn begin_transaction(&self) -> OrmResult<Box<dyn AdapterTransaction>>;

    fn is_connected(&self) -> bool;

    fn pool_status(&self) -> PoolStatus;

    fn dialect(&self) -> SqlDialect;
}
