//! Model definitions and the schema registry
//!
//! A model is declared once as a configuration value: table identity, an
//! ordered field schema, soft-delete and timestamp settings, hooks, and
//! virtual fields. The definition is immutable once built; binding the
//! storage adapter and cache adapter are the only administrative setters.
//!
//! Derived per-model data (the ordered field-name list, the virtual-field
//! name list) is memoized process-wide, keyed by table name. Schemas are
//! static, so the memos are computed at most once and never invalidated.

use crate::backends::{DatabaseAdapter, Row, SqlDialect};
use crate::error::{ModelError, OrmResult};
use crate::lifecycle::ModelHooks;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use relata_cache::CacheAdapter;
use relata_validation::Rule;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Declared storage type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Number,
    BigInt,
    Decimal,
    Boolean,
    Date,
    Timestamp,
    Array,
    Object,
    Json,
    Enum,
    Uuid,
    Text,
    Binary,
    Any,
}

/// Generator invoked when a defaulted field is absent from the input.
pub type DefaultFn = Arc<dyn Fn() -> Value + Send + Sync>;

/// Value transform applied on write (`set`) or read (`get`).
pub type TransformFn = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Computed-on-read accessor for a virtual field.
pub type GetterFn = Arc<dyn Fn(&Row) -> Value + Send + Sync>;

/// Default for an absent field: a fixed value or a generator.
#[derive(Clone)]
pub enum FieldDefault {
    Value(Value),
    Generator(DefaultFn),
}

impl FieldDefault {
    pub fn produce(&self) -> Value {
        match self {
            FieldDefault::Value(v) => v.clone(),
            FieldDefault::Generator(f) => f(),
        }
    }
}

impl fmt::Debug for FieldDefault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldDefault::Value(v) => write!(f, "Value({})", v),
            FieldDefault::Generator(_) => write!(f, "Generator"),
        }
    }
}

/// One field of a model schema.
#[derive(Clone, Default)]
pub struct FieldDefinition {
    pub field_type: Option<FieldType>,
    /// Allowed members for `FieldType::Enum`; must be non-empty there.
    pub enum_values: Vec<Value>,
    pub default: Option<FieldDefault>,
    pub validate: Option<Rule>,
    pub get: Option<TransformFn>,
    pub set: Option<TransformFn>,
}

impl FieldDefinition {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type: Some(field_type),
            ..Self::default()
        }
    }

    pub fn string() -> Self {
        Self::new(FieldType::String)
    }

    pub fn number() -> Self {
        Self::new(FieldType::Number)
    }

    pub fn big_int() -> Self {
        Self::new(FieldType::BigInt)
    }

    pub fn decimal() -> Self {
        Self::new(FieldType::Decimal)
    }

    pub fn boolean() -> Self {
        Self::new(FieldType::Boolean)
    }

    pub fn date() -> Self {
        Self::new(FieldType::Date)
    }

    pub fn timestamp() -> Self {
        Self::new(FieldType::Timestamp)
    }

    pub fn array() -> Self {
        Self::new(FieldType::Array)
    }

    pub fn object() -> Self {
        Self::new(FieldType::Object)
    }

    pub fn json() -> Self {
        Self::new(FieldType::Json)
    }

    pub fn uuid() -> Self {
        Self::new(FieldType::Uuid)
    }

    pub fn text() -> Self {
        Self::new(FieldType::Text)
    }

    pub fn binary() -> Self {
        Self::new(FieldType::Binary)
    }

    pub fn any() -> Self {
        Self::new(FieldType::Any)
    }

    pub fn enumeration(values: Vec<Value>) -> Self {
        Self {
            field_type: Some(FieldType::Enum),
            enum_values: values,
            ..Self::default()
        }
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(FieldDefault::Value(value));
        self
    }

    pub fn default_with<F>(mut self, generator: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.default = Some(FieldDefault::Generator(Arc::new(generator)));
        self
    }

    pub fn validate(mut self, rule: Rule) -> Self {
        self.validate = Some(rule);
        self
    }

    pub fn get<F>(mut self, transform: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.get = Some(Arc::new(transform));
        self
    }

    pub fn set<F>(mut self, transform: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.set = Some(Arc::new(transform));
        self
    }
}

impl fmt::Debug for FieldDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDefinition")
            .field("field_type", &self.field_type)
            .field("enum_values", &self.enum_values)
            .field("default", &self.default)
            .field("has_validate", &self.validate.is_some())
            .finish_non_exhaustive()
    }
}

/// A computed-on-read field resolved against the materialized instance.
#[derive(Clone)]
pub struct VirtualField {
    pub name: String,
    pub getter: GetterFn,
}

impl fmt::Debug for VirtualField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtualField({})", self.name)
    }
}

/// Immutable declaration of a model: identity, schema, and behavior.
#[derive(Clone)]
pub struct ModelDefinition {
    pub table: String,
    pub primary_key: String,
    /// Ordered field schema; iteration order is declaration order.
    pub fields: Vec<(String, FieldDefinition)>,
    pub soft_delete: bool,
    pub deleted_at_column: String,
    pub timestamps: bool,
    pub created_at_column: String,
    pub updated_at_column: String,
    /// TTL for cached query results, seconds. Zero = no expiry.
    pub cache_ttl_seconds: u64,
    pub hooks: Option<Arc<dyn ModelHooks>>,
    pub virtuals: Vec<VirtualField>,
}

impl ModelDefinition {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            primary_key: "id".to_string(),
            fields: Vec::new(),
            soft_delete: false,
            deleted_at_column: "deleted_at".to_string(),
            timestamps: false,
            created_at_column: "created_at".to_string(),
            updated_at_column: "updated_at".to_string(),
            cache_ttl_seconds: 300,
            hooks: None,
            virtuals: Vec::new(),
        }
    }

    pub fn primary_key(mut self, name: impl Into<String>) -> Self {
        self.primary_key = name.into();
        self
    }

    pub fn field(mut self, name: impl Into<String>, definition: FieldDefinition) -> Self {
        self.fields.push((name.into(), definition));
        self
    }

    pub fn soft_delete(mut self) -> Self {
        self.soft_delete = true;
        self
    }

    pub fn soft_delete_column(mut self, column: impl Into<String>) -> Self {
        self.soft_delete = true;
        self.deleted_at_column = column.into();
        self
    }

    pub fn timestamps(mut self) -> Self {
        self.timestamps = true;
        self
    }

    pub fn cache_ttl(mut self, seconds: u64) -> Self {
        self.cache_ttl_seconds = seconds;
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn ModelHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn virtual_field<F>(mut self, name: impl Into<String>, getter: F) -> Self
    where
        F: Fn(&Row) -> Value + Send + Sync + 'static,
    {
        self.virtuals.push(VirtualField {
            name: name.into(),
            getter: Arc::new(getter),
        });
        self
    }

    pub fn field_definition(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, definition)| definition)
    }
}

impl fmt::Debug for ModelDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelDefinition")
            .field("table", &self.table)
            .field("primary_key", &self.primary_key)
            .field("fields", &self.fields.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .field("soft_delete", &self.soft_delete)
            .field("timestamps", &self.timestamps)
            .finish_non_exhaustive()
    }
}

/// A model bound to (at most) one storage adapter and one cache adapter —
/// the configuration object every engine operation receives.
#[derive(Clone)]
pub struct Model {
    def: Arc<ModelDefinition>,
    adapter: Option<Arc<dyn DatabaseAdapter>>,
    cache: Option<Arc<dyn CacheAdapter>>,
}

impl Model {
    /// Wrap a definition, checking its declaration invariants.
    pub fn new(def: ModelDefinition) -> OrmResult<Self> {
        for (name, field) in &def.fields {
            if field.field_type == Some(FieldType::Enum) && field.enum_values.is_empty() {
                return Err(ModelError::Configuration(format!(
                    "enum field '{}' on '{}' declares no enum values",
                    name, def.table
                )));
            }
        }
        Ok(Self {
            def: Arc::new(def),
            adapter: None,
            cache: None,
        })
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn DatabaseAdapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheAdapter>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn definition(&self) -> &ModelDefinition {
        &self.def
    }

    pub fn table(&self) -> &str {
        &self.def.table
    }

    pub fn primary_key(&self) -> &str {
        &self.def.primary_key
    }

    /// The bound adapter, or the error every operation raises without one.
    pub fn adapter(&self) -> OrmResult<&Arc<dyn DatabaseAdapter>> {
        self.adapter
            .as_ref()
            .ok_or_else(|| ModelError::AdapterNotInitialized(self.def.table.clone()))
    }

    pub fn cache(&self) -> Option<&Arc<dyn CacheAdapter>> {
        self.cache.as_ref()
    }

    pub fn dialect(&self) -> SqlDialect {
        self.adapter
            .as_ref()
            .map(|a| a.dialect())
            .unwrap_or(SqlDialect::Sqlite)
    }

    /// Cache tag under which every cached read for this model is stored.
    pub fn cache_tag(&self) -> String {
        format!("model:{}", self.def.table)
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("table", &self.def.table)
            .field("has_adapter", &self.adapter.is_some())
            .field("has_cache", &self.cache.is_some())
            .finish()
    }
}

static SCHEMA_KEYS: Lazy<DashMap<String, Arc<Vec<String>>>> = Lazy::new(DashMap::new);
static VIRTUAL_NAMES: Lazy<DashMap<String, Arc<Vec<String>>>> = Lazy::new(DashMap::new);

/// Ordered field names for a model, memoized per table for the process
/// lifetime.
pub fn schema_keys(model: &Model) -> Arc<Vec<String>> {
    if let Some(hit) = SCHEMA_KEYS.get(model.table()) {
        return hit.clone();
    }
    let keys: Arc<Vec<String>> = Arc::new(
        model
            .definition()
            .fields
            .iter()
            .map(|(name, _)| name.clone())
            .collect(),
    );
    SCHEMA_KEYS.insert(model.table().to_string(), keys.clone());
    keys
}

/// Virtual-field names for a model, memoized like [`schema_keys`].
pub fn virtual_names(model: &Model) -> Arc<Vec<String>> {
    if let Some(hit) = VIRTUAL_NAMES.get(model.table()) {
        return hit.clone();
    }
    let names: Arc<Vec<String>> = Arc::new(
        model
            .definition()
            .virtuals
            .iter()
            .map(|v| v.name.clone())
            .collect(),
    );
    VIRTUAL_NAMES.insert(model.table().to_string(), names.clone());
    names
}
