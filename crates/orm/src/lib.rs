//! # relata-orm: schema-driven model engine
//!
//! Models are declared as configuration values — table identity, an
//! ordered field schema with validation rules, soft-delete and timestamp
//! settings, lifecycle hooks, virtual fields — and the engine provides
//! validated, cached, lifecycle-aware CRUD plus a chainable query builder
//! on top of a pluggable storage-adapter contract.
//!
//! Storage drivers implement [`backends::DatabaseAdapter`]; result caching
//! goes through the `relata-cache` adapter contract; declarative field
//! rules come from `relata-validation`.

pub mod backends;
pub mod conditions;
pub mod error;
pub mod fields;
pub mod lifecycle;
pub mod query;
pub mod relations;
pub mod schema;

mod cache;
mod validate;

pub use backends::{
    AdapterTransaction, DatabaseAdapter, ExecuteResult, PoolStatus, Row, SqlDialect,
};
pub use conditions::{Condition, Sort, SortDirection, TrashedVisibility};
pub use error::{ModelError, OrmResult};
pub use fields::Record;
pub use lifecycle::ModelHooks;
pub use query::{ModelQuery, Page, QuerySpec};
pub use schema::{
    FieldDefault, FieldDefinition, FieldType, Model, ModelDefinition, VirtualField,
};

// Re-export the validation surface models are declared with.
pub use relata_validation::{DataType, DbCheck, Format, Rule, ValidationError};
