//! Declarative per-field validation rules
//!
//! A `Rule` is plain data attached to a field definition: which checks run,
//! in which order, and with what parameters. Synchronous checks are
//! evaluated by [`crate::engine`]; database-backed checks are declared here
//! as [`DbCheck`] values and executed by the storage layer, which owns the
//! adapter.

use crate::format::Format;
use futures::future::BoxFuture;
use regex::Regex;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// A keyed record under validation.
pub type Record = Map<String, Value>;

/// Gate over the full record, used by `when` / `required_when`.
pub type Predicate = Arc<dyn Fn(&Record) -> bool + Send + Sync>;

/// Synchronous check over (value, record). `Err(reason)` fails the field.
pub type CheckFn = Arc<dyn Fn(&Value, &Record) -> Result<(), String> + Send + Sync>;

/// Asynchronous check over (value, record, context). `Err(reason)` fails the
/// field; the context tells the check which field, row, and table it is
/// validating against.
pub type AsyncCheckFn =
    Arc<dyn Fn(Value, Record, AsyncContext) -> BoxFuture<'static, Result<(), String>> + Send + Sync>;

/// Context handed to asynchronous checks.
#[derive(Debug, Clone)]
pub struct AsyncContext {
    /// Field under validation
    pub field: String,
    /// Primary-key value of the row being updated, if any. Uniqueness
    /// probes exclude this row.
    pub instance_id: Option<Value>,
    /// Table the owning model writes to
    pub table: String,
}

/// Expected JSON shape of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl DataType {
    pub fn name(&self) -> &'static str {
        match self {
            DataType::String => "string",
            DataType::Number => "number",
            DataType::Integer => "integer",
            DataType::Boolean => "boolean",
            DataType::Array => "array",
            DataType::Object => "object",
        }
    }

    pub fn matches(&self, value: &Value) -> bool {
        match self {
            DataType::String => value.is_string(),
            DataType::Number => value.is_number(),
            DataType::Integer => value.is_i64() || value.is_u64(),
            DataType::Boolean => value.is_boolean(),
            DataType::Array => value.is_array(),
            DataType::Object => value.is_object(),
        }
    }
}

/// A database-backed check, executed concurrently with the other async
/// checks after the synchronous pipeline has passed.
#[derive(Clone)]
pub enum DbCheck {
    /// No other row may hold this value. The row identified by the
    /// validation context's `instance_id` is excluded, as is anything
    /// matching `exclude`.
    Unique { exclude: Option<Record> },
    /// A row matching `condition` (default `{field: value}`) must exist,
    /// in `table` if given, else in the model's own table.
    Exists {
        table: Option<String>,
        condition: Option<Record>,
    },
    /// Inverse of [`DbCheck::Exists`].
    NotExists {
        table: Option<String>,
        condition: Option<Record>,
    },
    /// Caller-supplied asynchronous check.
    Custom(AsyncCheckFn),
}

impl fmt::Debug for DbCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbCheck::Unique { .. } => write!(f, "Unique"),
            DbCheck::Exists { table, .. } => write!(f, "Exists({:?})", table),
            DbCheck::NotExists { table, .. } => write!(f, "NotExists({:?})", table),
            DbCheck::Custom(_) => write!(f, "Custom"),
        }
    }
}

/// The full declarative rule for one field.
#[derive(Clone, Default)]
pub struct Rule {
    pub required: bool,
    pub required_when: Option<Predicate>,
    pub when: Option<Predicate>,
    pub data_type: Option<DataType>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub length: Option<usize>,
    pub pattern: Option<Regex>,
    pub one_of: Option<Vec<Value>>,
    pub format: Option<Format>,
    /// Element rule for array values, applied recursively.
    pub each: Option<Box<Rule>>,
    /// Sibling field this value must equal.
    pub equals: Option<String>,
    /// Sibling field this value must differ from.
    pub not_equals: Option<String>,
    pub compare: Option<CheckFn>,
    pub custom: Option<CheckFn>,
    /// Validation groups this rule belongs to; empty means always active.
    pub groups: Vec<String>,
    /// Message overriding the per-check defaults.
    pub message: Option<String>,
    pub db_checks: Vec<DbCheck>,
}

impl Rule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn required_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        self.required_when = Some(Arc::new(predicate));
        self
    }

    /// Skip every other check when the predicate is false.
    pub fn when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        self.when = Some(Arc::new(predicate));
        self
    }

    pub fn of_type(mut self, data_type: DataType) -> Self {
        self.data_type = Some(data_type);
        self
    }

    /// Lower bound: numeric value for numbers, length for strings and arrays.
    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    /// Upper bound: numeric value for numbers, length for strings and arrays.
    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    /// Exact length for strings and arrays.
    pub fn length(mut self, length: usize) -> Self {
        self.length = Some(length);
        self
    }

    pub fn pattern(mut self, pattern: Regex) -> Self {
        self.pattern = Some(pattern);
        self
    }

    /// Compile and attach a pattern, failing on invalid regex syntax.
    pub fn try_pattern(mut self, pattern: &str) -> Result<Self, regex::Error> {
        self.pattern = Some(Regex::new(pattern)?);
        Ok(self)
    }

    pub fn one_of(mut self, values: Vec<Value>) -> Self {
        self.one_of = Some(values);
        self
    }

    pub fn format(mut self, format: Format) -> Self {
        self.format = Some(format);
        self
    }

    pub fn each(mut self, rule: Rule) -> Self {
        self.each = Some(Box::new(rule));
        self
    }

    pub fn equals(mut self, other_field: impl Into<String>) -> Self {
        self.equals = Some(other_field.into());
        self
    }

    pub fn not_equals(mut self, other_field: impl Into<String>) -> Self {
        self.not_equals = Some(other_field.into());
        self
    }

    pub fn compare<F>(mut self, check: F) -> Self
    where
        F: Fn(&Value, &Record) -> Result<(), String> + Send + Sync + 'static,
    {
        self.compare = Some(Arc::new(check));
        self
    }

    pub fn custom<F>(mut self, check: F) -> Self
    where
        F: Fn(&Value, &Record) -> Result<(), String> + Send + Sync + 'static,
    {
        self.custom = Some(Arc::new(check));
        self
    }

    pub fn groups(mut self, groups: &[&str]) -> Self {
        self.groups = groups.iter().map(|g| (*g).to_string()).collect();
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn unique(mut self) -> Self {
        self.db_checks.push(DbCheck::Unique { exclude: None });
        self
    }

    pub fn unique_excluding(mut self, exclude: Record) -> Self {
        self.db_checks.push(DbCheck::Unique {
            exclude: Some(exclude),
        });
        self
    }

    pub fn exists(mut self) -> Self {
        self.db_checks.push(DbCheck::Exists {
            table: None,
            condition: None,
        });
        self
    }

    pub fn exists_in(mut self, table: impl Into<String>, condition: Option<Record>) -> Self {
        self.db_checks.push(DbCheck::Exists {
            table: Some(table.into()),
            condition,
        });
        self
    }

    pub fn not_exists(mut self) -> Self {
        self.db_checks.push(DbCheck::NotExists {
            table: None,
            condition: None,
        });
        self
    }

    pub fn not_exists_in(mut self, table: impl Into<String>, condition: Option<Record>) -> Self {
        self.db_checks.push(DbCheck::NotExists {
            table: Some(table.into()),
            condition,
        });
        self
    }

    pub fn async_custom<F>(mut self, check: F) -> Self
    where
        F: Fn(Value, Record, AsyncContext) -> BoxFuture<'static, Result<(), String>>
            + Send
            + Sync
            + 'static,
    {
        self.db_checks.push(DbCheck::Custom(Arc::new(check)));
        self
    }

    /// Whether this rule participates in a validation pass restricted to
    /// `groups`. A rule with no groups always participates.
    pub fn in_groups(&self, groups: Option<&[String]>) -> bool {
        match groups {
            None => true,
            Some(active) => {
                self.groups.is_empty() || self.groups.iter().any(|g| active.contains(g))
            }
        }
    }

    /// Whether any database-backed checks are declared.
    pub fn has_db_checks(&self) -> bool {
        !self.db_checks.is_empty()
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("required", &self.required)
            .field("data_type", &self.data_type)
            .field("min", &self.min)
            .field("max", &self.max)
            .field("length", &self.length)
            .field("format", &self.format)
            .field("groups", &self.groups)
            .field("db_checks", &self.db_checks)
            .finish_non_exhaustive()
    }
}
