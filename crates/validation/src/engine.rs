//! Synchronous rule pipeline
//!
//! Evaluates one field's rule against a record. Checks run in a fixed
//! order (gate, presence, shape, bounds, cross-field, custom) and the first
//! failing check produces the field's single error. Database-backed checks
//! are not evaluated here; the storage layer collects them from
//! `Rule::db_checks` after this pipeline passes.

use crate::error::{ValidationError, ValidationResult};
use crate::rule::{Record, Rule};
use serde_json::Value;

/// Validate a single field of `record` against `rule`.
///
/// `groups` restricts the pass: a rule declaring groups with no
/// intersection is skipped entirely.
pub fn validate_field(
    field: &str,
    rule: &Rule,
    record: &Record,
    groups: Option<&[String]>,
) -> ValidationResult<()> {
    if !rule.in_groups(groups) {
        return Ok(());
    }

    if let Some(when) = &rule.when {
        if !when(record) {
            return Ok(());
        }
    }

    let value = record.get(field).unwrap_or(&Value::Null);

    let required = rule.required
        || rule
            .required_when
            .as_ref()
            .map_or(false, |predicate| predicate(record));
    if required && is_empty(value) {
        return Err(fail(field, rule, format!("{} is required", field), "required"));
    }

    // Absent and not required: nothing further to check.
    if value.is_null() {
        return Ok(());
    }

    if let Some(format) = &rule.format {
        if let Err(reason) = format.check(value) {
            return Err(fail(field, rule, format!("{} {}", field, reason), format.name()));
        }
    }

    if let Some(expected) = &rule.data_type {
        if !expected.matches(value) {
            return Err(fail(
                field,
                rule,
                format!("{} must be of type {}", field, expected.name()),
                "type",
            ));
        }
    }

    if let Some(length) = rule.length {
        if let Some(actual) = size_of(value) {
            if actual != length as f64 {
                return Err(fail(
                    field,
                    rule,
                    format!("{} must have length {}", field, length),
                    "length",
                ));
            }
        }
    }

    if let Some(min) = rule.min {
        if let Some(actual) = magnitude(value) {
            if actual < min {
                return Err(fail(field, rule, min_message(field, value, min), "min"));
            }
        }
    }

    if let Some(max) = rule.max {
        if let Some(actual) = magnitude(value) {
            if actual > max {
                return Err(fail(field, rule, max_message(field, value, max), "max"));
            }
        }
    }

    if let Some(pattern) = &rule.pattern {
        match value.as_str() {
            Some(s) if pattern.is_match(s) => {}
            _ => {
                return Err(fail(
                    field,
                    rule,
                    format!("{} does not match the expected pattern", field),
                    "pattern",
                ));
            }
        }
    }

    if let Some(allowed) = &rule.one_of {
        if !allowed.contains(value) {
            return Err(fail(
                field,
                rule,
                format!("{} must be one of the allowed values", field),
                "enum",
            ));
        }
    }

    if let (Some(each), Some(elements)) = (&rule.each, value.as_array()) {
        for (index, element) in elements.iter().enumerate() {
            // Reuse the engine per element; sibling lookups still see the
            // parent record.
            let key = element_key(field, index);
            let mut scoped = record.clone();
            scoped.insert(key.clone(), element.clone());
            validate_field(&key, each, &scoped, groups).map_err(|e| {
                ValidationError::with_code(field.to_string(), e.message, e.code)
            })?;
        }
    }

    if let Some(other) = &rule.equals {
        let sibling = record.get(other).unwrap_or(&Value::Null);
        if value != sibling {
            return Err(fail(
                field,
                rule,
                format!("{} must match {}", field, other),
                "equals",
            ));
        }
    }

    if let Some(other) = &rule.not_equals {
        let sibling = record.get(other).unwrap_or(&Value::Null);
        if value == sibling {
            return Err(fail(
                field,
                rule,
                format!("{} must differ from {}", field, other),
                "not_equals",
            ));
        }
    }

    if let Some(compare) = &rule.compare {
        if let Err(reason) = compare(value, record) {
            return Err(fail(field, rule, reason, "compare"));
        }
    }

    if let Some(custom) = &rule.custom {
        if let Err(reason) = custom(value, record) {
            return Err(fail(field, rule, reason, "custom"));
        }
    }

    Ok(())
}

/// Validate every (field, rule) pair in declaration order, stopping at the
/// first failure.
pub fn validate_record<'a, I>(
    rules: I,
    record: &Record,
    groups: Option<&[String]>,
) -> ValidationResult<()>
where
    I: IntoIterator<Item = (&'a str, &'a Rule)>,
{
    for (field, rule) in rules {
        validate_field(field, rule, record, groups)?;
    }
    Ok(())
}

fn element_key(field: &str, index: usize) -> String {
    format!("{}[{}]", field, index)
}

fn fail(field: &str, rule: &Rule, default_message: String, code: &str) -> ValidationError {
    let message = rule.message.clone().unwrap_or(default_message);
    ValidationError::with_code(field, message, code)
}

/// Emptiness for the required check: null, blank string, empty collection.
fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(arr) => arr.is_empty(),
        Value::Object(obj) => obj.is_empty(),
        _ => false,
    }
}

/// Comparable size for min/max: numeric value for numbers, element or
/// character count for collections and strings.
fn magnitude(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => Some(s.chars().count() as f64),
        Value::Array(arr) => Some(arr.len() as f64),
        _ => None,
    }
}

/// Length for the exact-length check; numbers have no length.
fn size_of(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => Some(s.chars().count() as f64),
        Value::Array(arr) => Some(arr.len() as f64),
        _ => None,
    }
}

fn min_message(field: &str, value: &Value, min: f64) -> String {
    if value.is_number() {
        format!("{} must be at least {}", field, min)
    } else {
        format!("{} must be at least {} characters long", field, min)
    }
}

fn max_message(field: &str, value: &Value, max: f64) -> String {
    if value.is_number() {
        format!("{} must be at most {}", field, max)
    } else {
        format!("{} must be at most {} characters long", field, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::Format;
    use crate::rule::DataType;
    use serde_json::json;

    fn record(pairs: &[(&str, Value)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_required_beats_min() {
        let rule = Rule::new().required().min(5.0);
        let data = record(&[]);

        let err = validate_field("name", &rule, &data, None).unwrap_err();
        assert_eq!(err.code, "required");
        assert_eq!(err.field, "name");
    }

    #[test]
    fn test_min_on_short_string() {
        let rule = Rule::new().required().min(5.0);
        let data = record(&[("name", json!("abc"))]);

        let err = validate_field("name", &rule, &data, None).unwrap_err();
        assert_eq!(err.code, "min");
    }

    #[test]
    fn test_absent_optional_field_passes() {
        let rule = Rule::new().min(5.0).format(Format::Email);
        let data = record(&[]);
        assert!(validate_field("email", &rule, &data, None).is_ok());
    }

    #[test]
    fn test_format_runs_before_type() {
        let rule = Rule::new().format(Format::Email).of_type(DataType::String);
        let data = record(&[("email", json!(42))]);

        let err = validate_field("email", &rule, &data, None).unwrap_err();
        assert_eq!(err.code, "email");
    }

    #[test]
    fn test_numeric_bounds() {
        let rule = Rule::new().min(18.0).max(99.0);

        let too_young = record(&[("age", json!(15))]);
        assert_eq!(
            validate_field("age", &rule, &too_young, None)
                .unwrap_err()
                .code,
            "min"
        );

        let too_old = record(&[("age", json!(120))]);
        assert_eq!(
            validate_field("age", &rule, &too_old, None).unwrap_err().code,
            "max"
        );

        let fine = record(&[("age", json!(42))]);
        assert!(validate_field("age", &rule, &fine, None).is_ok());
    }

    #[test]
    fn test_enum_membership() {
        let rule = Rule::new().one_of(vec![json!("draft"), json!("published")]);
        let data = record(&[("status", json!("archived"))]);

        let err = validate_field("status", &rule, &data, None).unwrap_err();
        assert_eq!(err.code, "enum");
    }

    #[test]
    fn test_when_gate_skips_all_checks() {
        let rule = Rule::new()
            .required()
            .when(|r| r.get("kind").and_then(Value::as_str) == Some("business"));

        let personal = record(&[("kind", json!("personal"))]);
        assert!(validate_field("vat_id", &rule, &personal, None).is_ok());

        let business = record(&[("kind", json!("business"))]);
        assert_eq!(
            validate_field("vat_id", &rule, &business, None)
                .unwrap_err()
                .code,
            "required"
        );
    }

    #[test]
    fn test_required_when_override() {
        let rule = Rule::new()
            .required_when(|r| r.get("has_discount").and_then(Value::as_bool) == Some(true));

        let without = record(&[("has_discount", json!(false))]);
        assert!(validate_field("discount_code", &rule, &without, None).is_ok());

        let with = record(&[("has_discount", json!(true))]);
        assert!(validate_field("discount_code", &rule, &with, None).is_err());
    }

    #[test]
    fn test_cross_field_equals() {
        let rule = Rule::new().equals("password");
        let mismatch = record(&[
            ("password", json!("hunter2")),
            ("password_confirmation", json!("hunter3")),
        ]);

        let err = validate_field("password_confirmation", &rule, &mismatch, None).unwrap_err();
        assert_eq!(err.code, "equals");

        let matching = record(&[
            ("password", json!("hunter2")),
            ("password_confirmation", json!("hunter2")),
        ]);
        assert!(validate_field("password_confirmation", &rule, &matching, None).is_ok());
    }

    #[test]
    fn test_array_elements_validated_recursively() {
        let rule = Rule::new().each(Rule::new().of_type(DataType::String).min(2.0));
        let bad = record(&[("tags", json!(["ok", "x"]))]);

        let err = validate_field("tags", &rule, &bad, None).unwrap_err();
        assert_eq!(err.field, "tags");
        assert_eq!(err.code, "min");

        let good = record(&[("tags", json!(["ok", "also"]))]);
        assert!(validate_field("tags", &rule, &good, None).is_ok());
    }

    #[test]
    fn test_custom_check_reason_is_surfaced() {
        let rule = Rule::new().custom(|value, _record| {
            if value.as_str().map_or(false, |s| s.starts_with("tmp_")) {
                Err("temporary names are not allowed".to_string())
            } else {
                Ok(())
            }
        });
        let data = record(&[("name", json!("tmp_thing"))]);

        let err = validate_field("name", &rule, &data, None).unwrap_err();
        assert_eq!(err.code, "custom");
        assert_eq!(err.message, "temporary names are not allowed");
    }

    #[test]
    fn test_custom_message_overrides_default() {
        let rule = Rule::new().required().message("give us a name");
        let data = record(&[]);

        let err = validate_field("name", &rule, &data, None).unwrap_err();
        assert_eq!(err.message, "give us a name");
    }

    #[test]
    fn test_group_filtering() {
        let rule = Rule::new().required().groups(&["create"]);
        let data = record(&[]);

        let update = vec!["update".to_string()];
        assert!(validate_field("name", &rule, &data, Some(&update)).is_ok());

        let create = vec!["create".to_string()];
        assert!(validate_field("name", &rule, &data, Some(&create)).is_err());
    }

    #[test]
    fn test_validate_record_stops_at_first_failure() {
        let name_rule = Rule::new().required();
        let age_rule = Rule::new().required();
        let data = record(&[]);

        let err = validate_record(
            vec![("name", &name_rule), ("age", &age_rule)],
            &data,
            None,
        )
        .unwrap_err();
        assert_eq!(err.field, "name");
    }
}
