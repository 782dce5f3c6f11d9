//! # relata-validation
//!
//! Declarative field validation for the relata model engine: a per-field
//! [`Rule`] value describing presence, shape, bounds, cross-field, and
//! database-backed checks, plus the synchronous pipeline that evaluates
//! everything not needing storage access.
//!
//! A pass reports at most one failure per field; the first failing check in
//! the fixed order wins. Database-backed checks (`unique`, `exists`,
//! `not_exists`, async custom) are declared here as data and executed by the
//! storage layer after the synchronous pipeline passes.

pub mod engine;
pub mod error;
pub mod format;
pub mod rule;

pub use engine::{validate_field, validate_record};
pub use error::{ValidationError, ValidationResult};
pub use format::Format;
pub use rule::{AsyncCheckFn, AsyncContext, CheckFn, DataType, DbCheck, Predicate, Record, Rule};
