//! ORDER BY compilation
//!
//! A sort specification is either a bare direction token (applied to the
//! primary key) or an ordered field-to-direction mapping. Direction tokens
//! accept `1`/`-1` and `asc`/`desc` case-insensitively.

use crate::backends::SqlDialect;
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    /// Parse a direction token: `1`/`-1`, or `asc`/`desc` in any case.
    pub fn parse(token: &Value) -> Option<Self> {
        match token {
            Value::Number(n) => match n.as_i64() {
                Some(1) => Some(SortDirection::Asc),
                Some(-1) => Some(SortDirection::Desc),
                _ => None,
            },
            Value::String(s) => match s.to_ascii_lowercase().as_str() {
                "asc" => Some(SortDirection::Asc),
                "desc" => Some(SortDirection::Desc),
                _ => None,
            },
            _ => None,
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortDirection::Asc => write!(f, "ASC"),
            SortDirection::Desc => write!(f, "DESC"),
        }
    }
}

/// A sort specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sort {
    /// A single direction applied to the primary key.
    Direction(SortDirection),
    /// Ordered (field, direction) pairs.
    Fields(Vec<(String, SortDirection)>),
}

impl Sort {
    pub fn asc(field: impl Into<String>) -> Self {
        Sort::Fields(vec![(field.into(), SortDirection::Asc)])
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Sort::Fields(vec![(field.into(), SortDirection::Desc)])
    }

    pub fn then(self, field: impl Into<String>, direction: SortDirection) -> Self {
        match self {
            Sort::Fields(mut fields) => {
                fields.push((field.into(), direction));
                Sort::Fields(fields)
            }
            Sort::Direction(_) => Sort::Fields(vec![(field.into(), direction)]),
        }
    }

    /// Parse a JSON sort value: a direction token, or a field→direction
    /// object. Entries with unrecognized directions are dropped.
    pub fn parse(value: &Value) -> Option<Self> {
        if let Some(direction) = SortDirection::parse(value) {
            return Some(Sort::Direction(direction));
        }
        let map = value.as_object()?;
        let fields: Vec<(String, SortDirection)> = map
            .iter()
            .filter_map(|(field, token)| {
                SortDirection::parse(token).map(|direction| (field.clone(), direction))
            })
            .collect();
        if fields.is_empty() {
            None
        } else {
            Some(Sort::Fields(fields))
        }
    }

    /// Stable textual form used in cache-key fingerprints.
    pub fn fingerprint(&self) -> String {
        match self {
            Sort::Direction(direction) => format!("@{}", direction),
            Sort::Fields(fields) => fields
                .iter()
                .map(|(field, direction)| format!("{}:{}", field, direction))
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

/// Compile to an `ORDER BY` clause body (no keyword), e.g. `name ASC, id DESC`.
pub fn compile_order_by(sort: &Sort, dialect: SqlDialect, primary_key: &str) -> String {
    match sort {
        Sort::Direction(direction) => {
            format!("{} {}", dialect.escape_field(primary_key), direction)
        }
        Sort::Fields(fields) => fields
            .iter()
            .map(|(field, direction)| format!("{} {}", dialect.escape_field(field), direction))
            .collect::<Vec<_>>()
            .join(", "),
    }
}
