//! Condition compilation
//!
//! Turns a structured condition — a scalar primary key or a field-to-value
//! map with optional `$`-operator objects — plus the model's soft-delete
//! visibility into a parameterized WHERE fragment. All clauses are
//! AND-joined; an empty condition compiles to `1=1` so callers can always
//! append the fragment.

pub mod ordering;

pub use ordering::{Sort, SortDirection};

use crate::backends::SqlDialect;
use serde_json::{Map, Value};

/// A structured filter: a scalar is primary-key equality, a map is
/// field-by-field matching.
#[derive(Debug, Clone)]
pub enum Condition {
    /// Primary-key equality with the given scalar.
    Id(Value),
    /// Field → scalar equality, explicit null (`IS NULL`), or an operator
    /// object (`{"$gt": 5, "$lte": 10}`).
    Where(Map<String, Value>),
}

impl Condition {
    pub fn empty() -> Self {
        Condition::Where(Map::new())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Condition::Where(map) if map.is_empty())
    }

    /// Plain-equality entries of a map condition, used to seed records in
    /// `find_or_create`.
    pub fn equality_pairs(&self) -> Vec<(String, Value)> {
        match self {
            Condition::Id(_) => Vec::new(),
            Condition::Where(map) => map
                .iter()
                .filter(|(_, v)| !v.is_object())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

impl Default for Condition {
    fn default() -> Self {
        Condition::empty()
    }
}

impl From<Value> for Condition {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Condition::Where(map),
            scalar => Condition::Id(scalar),
        }
    }
}

impl From<Map<String, Value>> for Condition {
    fn from(map: Map<String, Value>) -> Self {
        Condition::Where(map)
    }
}

impl From<i64> for Condition {
    fn from(id: i64) -> Self {
        Condition::Id(Value::from(id))
    }
}

impl From<&str> for Condition {
    fn from(id: &str) -> Self {
        Condition::Id(Value::from(id))
    }
}

/// Soft-delete visibility for one query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrashedVisibility {
    pub include_trashed: bool,
    pub only_trashed: bool,
}

impl TrashedVisibility {
    pub const DEFAULT: Self = Self {
        include_trashed: false,
        only_trashed: false,
    };

    pub const WITH_TRASHED: Self = Self {
        include_trashed: true,
        only_trashed: false,
    };

    pub const ONLY_TRASHED: Self = Self {
        include_trashed: false,
        only_trashed: true,
    };
}

/// Everything the compiler needs besides the condition itself.
#[derive(Debug, Clone)]
pub struct CompileContext<'a> {
    pub dialect: SqlDialect,
    pub primary_key: &'a str,
    /// Soft-delete column when the target table has one.
    pub soft_delete_column: Option<&'a str>,
    pub visibility: TrashedVisibility,
}

/// Compile a condition to `(fragment, parameters)`.
pub fn compile_where(condition: &Condition, ctx: &CompileContext<'_>) -> (String, Vec<Value>) {
    let mut fragments: Vec<String> = Vec::new();
    let mut params: Vec<Value> = Vec::new();

    match condition {
        Condition::Id(scalar) => {
            fragments.push(format!("{} = ?", ctx.dialect.escape_field(ctx.primary_key)));
            params.push(scalar.clone());
        }
        Condition::Where(map) => {
            for (field, value) in map {
                let escaped = ctx.dialect.escape_field(field);
                match value {
                    Value::Null => fragments.push(format!("{} IS NULL", escaped)),
                    Value::Object(ops) => {
                        compile_operators(&escaped, ops, &mut fragments, &mut params);
                    }
                    scalar => {
                        fragments.push(format!("{} = ?", escaped));
                        params.push(scalar.clone());
                    }
                }
            }
        }
    }

    if let Some(column) = ctx.soft_delete_column {
        let escaped = ctx.dialect.escape_field(column);
        // only_trashed takes precedence when both flags are set.
        if ctx.visibility.only_trashed {
            fragments.push(format!("{} IS NOT NULL", escaped));
        } else if !ctx.visibility.include_trashed {
            fragments.push(format!("{} IS NULL", escaped));
        }
    }

    if fragments.is_empty() {
        ("1=1".to_string(), params)
    } else {
        (fragments.join(" AND "), params)
    }
}

/// One comparison per recognized operator key; unknown operators are
/// silently ignored.
fn compile_operators(
    escaped: &str,
    ops: &Map<String, Value>,
    fragments: &mut Vec<String>,
    params: &mut Vec<Value>,
) {
    for (op, operand) in ops {
        let comparison = match op.as_str() {
            "$gt" => ">",
            "$lt" => "<",
            "$gte" => ">=",
            "$lte" => "<=",
            "$ne" => "!=",
            "$like" => "LIKE",
            "$in" => {
                match operand.as_array() {
                    Some(values) if values.is_empty() => {
                        // IN over nothing matches nothing.
                        fragments.push("1=0".to_string());
                    }
                    Some(values) => {
                        let placeholders = vec!["?"; values.len()].join(", ");
                        fragments.push(format!("{} IN ({})", escaped, placeholders));
                        params.extend(values.iter().cloned());
                    }
                    None => {
                        fragments.push(format!("{} IN (?)", escaped));
                        params.push(operand.clone());
                    }
                }
                continue;
            }
            _ => continue,
        };
        fragments.push(format!("{} {} ?", escaped, comparison));
        params.push(operand.clone());
    }
}
