//! Field processing
//!
//! One pass over the schema keys applies defaults, coerces values to their
//! declared types, and runs `set` transforms. A second pass serializes for
//! storage: arrays and objects become JSON text, dates become
//! `YYYY-MM-DD HH:MM:SS` strings uniformly across dialects, booleans become
//! 0/1. Materialization reverses the storage encoding, runs `get`
//! transforms, and resolves virtual fields.
//!
//! Coercion is best-effort: a value that cannot be converted is passed
//! through unchanged rather than rejected, except for enum membership,
//! which fails with a field-tagged validation error.

use crate::backends::Row;
use crate::error::OrmResult;
use crate::schema::{self, FieldDefinition, FieldType, Model};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use relata_validation::ValidationError;
use serde_json::{Map, Value};
use uuid::Uuid;

/// A keyed record flowing through the engine.
pub type Record = Map<String, Value>;

const STORAGE_DATETIME: &str = "%Y-%m-%d %H:%M:%S";

/// Current timestamp in the storage format.
pub(crate) fn now_string() -> String {
    Utc::now().format(STORAGE_DATETIME).to_string()
}

/// Apply defaults, coercion, and `set` transforms over the schema keys in
/// declaration order. Defaults are applied only when `apply_defaults` is
/// set (creates, not updates) and the key is absent from the input.
pub fn process(model: &Model, mut record: Record, apply_defaults: bool) -> OrmResult<Record> {
    let keys = schema::schema_keys(model);
    for key in keys.iter() {
        let definition = match model.definition().field_definition(key) {
            Some(definition) => definition,
            None => continue,
        };

        if apply_defaults && !record.contains_key(key) {
            if let Some(default) = &definition.default {
                record.insert(key.clone(), default.produce());
            }
        }

        let value = match record.get(key) {
            Some(value) if !value.is_null() => value.clone(),
            _ => continue,
        };

        let coerced = coerce(key, definition, value)?;
        let transformed = match &definition.set {
            Some(set) => set(coerced),
            None => coerced,
        };
        record.insert(key.clone(), transformed);
    }
    Ok(record)
}

/// Coerce one value to its declared field type.
fn coerce(field: &str, definition: &FieldDefinition, value: Value) -> OrmResult<Value> {
    let field_type = match definition.field_type {
        Some(field_type) => field_type,
        None => return Ok(value),
    };

    let coerced = match field_type {
        FieldType::String | FieldType::Text => match &value {
            Value::String(_) => value,
            Value::Number(n) => Value::String(n.to_string()),
            Value::Bool(b) => Value::String(b.to_string()),
            _ => value,
        },
        FieldType::Number | FieldType::Decimal => match &value {
            Value::Number(_) => value,
            Value::String(s) => match s.trim().parse::<f64>() {
                Ok(parsed) => number_value(parsed),
                // Graceful fallback to the original value.
                Err(_) => value,
            },
            _ => value,
        },
        FieldType::BigInt => match &value {
            Value::Number(_) => value,
            Value::String(s) => match s.trim().parse::<i64>() {
                Ok(parsed) => Value::from(parsed),
                Err(_) => value,
            },
            _ => value,
        },
        FieldType::Boolean => match &value {
            Value::Bool(_) => value,
            Value::String(s) => match s.as_str() {
                "true" | "1" => Value::Bool(true),
                "false" | "0" => Value::Bool(false),
                _ => value,
            },
            Value::Number(n) => match n.as_i64() {
                Some(1) => Value::Bool(true),
                Some(0) => Value::Bool(false),
                _ => value,
            },
            _ => value,
        },
        FieldType::Date | FieldType::Timestamp => match parse_datetime(&value) {
            Some(datetime) => Value::String(datetime.format(STORAGE_DATETIME).to_string()),
            None => value,
        },
        FieldType::Array => match value {
            Value::Array(_) => value,
            scalar => Value::Array(vec![scalar]),
        },
        FieldType::Object => match &value {
            Value::String(s) => match serde_json::from_str::<Value>(s) {
                Ok(Value::Object(parsed)) => Value::Object(parsed),
                _ => value,
            },
            _ => value,
        },
        FieldType::Json => match &value {
            Value::String(s) => match serde_json::from_str::<Value>(s) {
                Ok(parsed) => parsed,
                // Unparseable JSON text stays a raw string.
                Err(_) => value,
            },
            _ => value,
        },
        FieldType::Enum => {
            if definition.enum_values.contains(&value) {
                value
            } else {
                return Err(ValidationError::with_code(
                    field,
                    format!("{} must be one of the declared enum values", field),
                    "enum",
                )
                .into());
            }
        }
        FieldType::Uuid => match &value {
            Value::String(s) => match Uuid::parse_str(s) {
                Ok(parsed) => Value::String(parsed.to_string()),
                Err(_) => value,
            },
            _ => value,
        },
        FieldType::Binary | FieldType::Any => value,
    };
    Ok(coerced)
}

/// Serialize a processed record for storage. Applies to every key, schema
/// or not: collections become JSON text, booleans become 0/1, declared
/// date fields are normalized to the storage format.
pub fn serialize_for_storage(model: &Model, record: &Record) -> OrmResult<Record> {
    let mut stored = Record::new();
    for (key, value) in record {
        let serialized = match value {
            Value::Array(_) | Value::Object(_) => Value::String(serde_json::to_string(value)?),
            Value::Bool(b) => Value::from(if *b { 1 } else { 0 }),
            Value::String(_) => {
                let declared = model
                    .definition()
                    .field_definition(key)
                    .and_then(|d| d.field_type);
                if matches!(declared, Some(FieldType::Date) | Some(FieldType::Timestamp)) {
                    match parse_datetime(value) {
                        Some(datetime) => {
                            Value::String(datetime.format(STORAGE_DATETIME).to_string())
                        }
                        None => value.clone(),
                    }
                } else {
                    value.clone()
                }
            }
            other => other.clone(),
        };
        stored.insert(key.clone(), serialized);
    }
    Ok(stored)
}

/// Reverse the storage encoding for a fetched row, apply `get` transforms,
/// and resolve virtual fields.
pub fn materialize(model: &Model, row: Row) -> Record {
    let mut record = Record::new();
    for (key, value) in row {
        let declared = model
            .definition()
            .field_definition(&key)
            .and_then(|d| d.field_type);
        let decoded = match declared {
            Some(FieldType::Boolean) => match &value {
                Value::Number(n) if n.as_i64() == Some(1) => Value::Bool(true),
                Value::Number(n) if n.as_i64() == Some(0) => Value::Bool(false),
                Value::String(s) if s == "1" => Value::Bool(true),
                Value::String(s) if s == "0" => Value::Bool(false),
                _ => value,
            },
            Some(FieldType::Array) | Some(FieldType::Object) | Some(FieldType::Json) => {
                match &value {
                    Value::String(s) => match serde_json::from_str::<Value>(s) {
                        Ok(parsed) => parsed,
                        Err(_) => value,
                    },
                    _ => value,
                }
            }
            _ => value,
        };

        let transformed = match model
            .definition()
            .field_definition(&key)
            .and_then(|d| d.get.clone())
        {
            Some(get) => get(decoded),
            None => decoded,
        };
        record.insert(key, transformed);
    }

    for virtual_field in &model.definition().virtuals {
        let computed = (virtual_field.getter)(&record);
        record.insert(virtual_field.name.clone(), computed);
    }
    record
}

fn number_value(parsed: f64) -> Value {
    if parsed.fract() == 0.0 && parsed.abs() < i64::MAX as f64 {
        Value::from(parsed as i64)
    } else {
        serde_json::Number::from_f64(parsed)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

/// Parse a datetime from the storage format, RFC3339, a bare date, or an
/// epoch-milliseconds number.
fn parse_datetime(value: &Value) -> Option<NaiveDateTime> {
    match value {
        Value::String(s) => NaiveDateTime::parse_from_str(s, STORAGE_DATETIME)
            .ok()
            .or_else(|| {
                DateTime::parse_from_rfc3339(s)
                    .ok()
                    .map(|dt| dt.naive_utc())
            })
            .or_else(|| {
                NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").ok()
            })
            .or_else(|| {
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
            }),
        Value::Number(n) => n
            .as_i64()
            .and_then(|millis| DateTime::<Utc>::from_timestamp_millis(millis))
            .map(|dt| dt.naive_utc()),
        _ => None,
    }
}
