//! End-to-end engine tests over a scripted mock adapter.
//!
//! The mock pops canned responses in order and records every statement it
//! was handed, so tests can assert both behavior and the exact SQL shapes
//! the engine compiles.

use async_trait::async_trait;
use relata_cache::MemoryCache;
use relata_orm::{
    AdapterTransaction, Condition, DatabaseAdapter, ExecuteResult, FieldDefinition, Model,
    ModelDefinition, ModelError, ModelHooks, OrmResult, PoolStatus, Record, Row, Rule, SqlDialect,
};
use serde_json::{json, Map, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

enum Scripted {
    Rows(Vec<Row>),
    Exec(ExecuteResult),
}

#[derive(Default)]
struct MockAdapter {
    responses: Mutex<VecDeque<Scripted>>,
    log: Mutex<Vec<(String, Vec<Value>)>>,
}

impl MockAdapter {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn script_rows(&self, rows: Vec<Row>) {
        self.responses.lock().unwrap().push_back(Scripted::Rows(rows));
    }

    fn script_exec(&self, affected_rows: u64, insert_id: Option<Value>) {
        self.responses.lock().unwrap().push_back(Scripted::Exec(ExecuteResult {
            affected_rows,
            insert_id,
        }));
    }

    fn statements(&self) -> Vec<(String, Vec<Value>)> {
        self.log.lock().unwrap().clone()
    }

    fn statement_count(&self) -> usize {
        self.log.lock().unwrap().len()
    }
}

#[async_trait]
impl DatabaseAdapter for MockAdapter {
    async fn query(&self, sql: &str, params: &[Value]) -> OrmResult<Vec<Row>> {
        self.log
            .lock()
            .unwrap()
            .push((sql.to_string(), params.to_vec()));
        match self.responses.lock().unwrap().pop_front() {
            Some(Scripted::Rows(rows)) => Ok(rows),
            Some(Scripted::Exec(_)) => panic!("scripted execute, engine issued query: {}", sql),
            None => Ok(vec![]),
        }
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> OrmResult<ExecuteResult> {
        self.log
            .lock()
            .unwrap()
            .push((sql.to_string(), params.to_vec()));
        match self.responses.lock().unwrap().pop_front() {
            Some(Scripted::Exec(result)) => Ok(result),
            Some(Scripted::Rows(_)) => panic!("scripted query, engine issued execute: {}", sql),
            None => Ok(ExecuteResult {
                affected_rows: 1,
                insert_id: None,
            }),
        }
    }

    async fn begin_transaction(&self) -> OrmResult<Box<dyn AdapterTransaction>> {
        Err(ModelError::Storage("mock adapter has no transactions".into()))
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn pool_status(&self) -> PoolStatus {
        PoolStatus::default()
    }

    fn dialect(&self) -> SqlDialect {
        SqlDialect::Sqlite
    }
}

fn record(pairs: &[(&str, Value)]) -> Record {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

fn row(pairs: &[(&str, Value)]) -> Row {
    record(pairs)
}

fn users_definition(table: &str) -> ModelDefinition {
    ModelDefinition::new(table)
        .field("id", FieldDefinition::number())
        .field(
            "name",
            FieldDefinition::string().validate(Rule::new().required().min(2.0)),
        )
        .field(
            "email",
            FieldDefinition::string().validate(Rule::new().required().unique()),
        )
        .field("active", FieldDefinition::boolean().default_value(json!(true)))
        .field("tags", FieldDefinition::array())
}

#[tokio::test]
async fn test_operation_without_adapter_fails_fast() {
    let model = Model::new(ModelDefinition::new("unbound_models")).unwrap();
    let err = model.find_all(Condition::empty()).await.unwrap_err();
    assert!(matches!(err, ModelError::AdapterNotInitialized(_)));
}

#[tokio::test]
async fn test_create_processes_serializes_and_adopts_insert_id() {
    let adapter = MockAdapter::new();
    // unique probe for email, then the insert itself
    adapter.script_rows(vec![]);
    adapter.script_exec(1, Some(json!(7)));

    let model = Model::new(users_definition("create_users"))
        .unwrap()
        .with_adapter(adapter.clone());

    let created = model
        .create(record(&[
            ("name", json!("Ada")),
            ("email", json!("ada@example.com")),
            ("tags", json!("solo")),
        ]))
        .await
        .unwrap();

    // Defaults, coercion, and the generated id are all visible on the
    // returned instance.
    assert_eq!(created.get("id"), Some(&json!(7)));
    assert_eq!(created.get("active"), Some(&json!(true)));
    assert_eq!(created.get("tags"), Some(&json!(["solo"])));

    let statements = adapter.statements();
    let (insert_sql, insert_params) = &statements[1];
    assert!(insert_sql.starts_with("INSERT INTO create_users ("));
    // Storage encoding: bool -> 1, array -> JSON text.
    assert!(insert_params.contains(&json!(1)));
    assert!(insert_params.contains(&json!("[\"solo\"]")));
}

#[tokio::test]
async fn test_sync_validation_aborts_before_any_io() {
    let adapter = MockAdapter::new();
    let model = Model::new(users_definition("validation_users"))
        .unwrap()
        .with_adapter(adapter.clone());

    // name absent: required must win over min, and nothing may hit storage.
    let err = model
        .create(record(&[("email", json!("a@x.com"))]))
        .await
        .unwrap_err();
    match err {
        ModelError::Validation(v) => {
            assert_eq!(v.field, "name");
            assert_eq!(v.code, "required");
        }
        other => panic!("expected validation error, got {:?}", other),
    }
    assert_eq!(adapter.statement_count(), 0);

    // 3-character-minimum violation reports min, not required.
    let err = model
        .create(record(&[("name", json!("A")), ("email", json!("a@x.com"))]))
        .await
        .unwrap_err();
    match err {
        ModelError::Validation(v) => assert_eq!(v.code, "min"),
        other => panic!("expected validation error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unique_on_update_excludes_the_current_row() {
    let adapter = MockAdapter::new();
    let model = Model::new(users_definition("unique_users"))
        .unwrap()
        .with_adapter(adapter.clone());

    // Unchanged email: pre-fetch finds A, probe (excluding A) finds
    // nothing, update proceeds.
    adapter.script_rows(vec![row(&[
        ("id", json!(1)),
        ("name", json!("Ada")),
        ("email", json!("a@x.com")),
    ])]);
    adapter.script_rows(vec![]);
    adapter.script_exec(1, None);

    let affected = model
        .update(1i64, record(&[("email", json!("a@x.com"))]))
        .await
        .unwrap();
    assert_eq!(affected, 1);

    let statements = adapter.statements();
    let (probe_sql, probe_params) = &statements[1];
    assert!(probe_sql.contains("email = ?"));
    assert!(probe_sql.contains("id != ?"));
    assert_eq!(probe_params, &vec![json!("a@x.com"), json!(1)]);

    // Taking B's email: the probe finds B and the update fails tagged to
    // the email field, with no UPDATE issued.
    adapter.script_rows(vec![row(&[
        ("id", json!(1)),
        ("name", json!("Ada")),
        ("email", json!("a@x.com")),
    ])]);
    adapter.script_rows(vec![row(&[("1", json!(1))])]);

    let before = adapter.statement_count();
    let err = model
        .update(1i64, record(&[("email", json!("b@x.com"))]))
        .await
        .unwrap_err();
    match err {
        ModelError::Validation(v) => {
            assert_eq!(v.field, "email");
            assert_eq!(v.code, "unique");
        }
        other => panic!("expected validation error, got {:?}", other),
    }
    // Pre-fetch and probe only; the write never happened.
    assert_eq!(adapter.statement_count(), before + 2);
}

#[tokio::test]
async fn test_update_miss_is_zero_not_error() {
    let adapter = MockAdapter::new();
    adapter.script_rows(vec![]);

    let model = Model::new(users_definition("miss_users"))
        .unwrap()
        .with_adapter(adapter.clone());

    let affected = model
        .update(99i64, record(&[("name", json!("Nobody"))]))
        .await
        .unwrap();
    assert_eq!(affected, 0);
}

#[tokio::test]
async fn test_pagination_shape() {
    let adapter = MockAdapter::new();
    let page_rows: Vec<Row> = (6..=10)
        .map(|i| row(&[("id", json!(i)), ("name", json!(format!("user{}", i)))]))
        .collect();
    adapter.script_rows(page_rows);
    adapter.script_rows(vec![row(&[("total", json!(12))])]);

    let def = ModelDefinition::new("paginated_models")
        .field("id", FieldDefinition::number())
        .field("name", FieldDefinition::string());
    let model = Model::new(def).unwrap().with_adapter(adapter.clone());

    let page = model.paginate(Condition::empty(), 2, 5).await.unwrap();
    assert_eq!(page.data.len(), 5);
    assert_eq!(page.total, 12);
    assert_eq!(page.total_pages, 3);
    assert_eq!(page.page, 2);
    assert_eq!(page.page_size, 5);

    let statements = adapter.statements();
    assert!(statements[0].0.contains("LIMIT 5 OFFSET 5"));
    assert!(statements[1].0.contains("COUNT(*)"));
}

#[tokio::test]
async fn test_soft_delete_scoping_and_lifecycle() {
    let adapter = MockAdapter::new();
    let def = ModelDefinition::new("soft_models")
        .field("id", FieldDefinition::number())
        .field("name", FieldDefinition::string())
        .soft_delete();
    let model = Model::new(def).unwrap().with_adapter(adapter.clone());

    // Default reads exclude trashed rows.
    model.find_all(Condition::empty()).await.unwrap();
    assert!(adapter.statements()[0].0.contains("deleted_at IS NULL"));

    // Soft delete pre-fetches the target and issues an UPDATE that skips
    // already-trashed rows.
    adapter.script_rows(vec![row(&[("id", json!(1)), ("name", json!("a"))])]);
    adapter.script_exec(1, None);
    let affected = model.delete(1i64).await.unwrap();
    assert_eq!(affected, 1);

    let statements = adapter.statements();
    let (delete_sql, _) = &statements[statements.len() - 1];
    assert!(delete_sql.starts_with("UPDATE soft_models SET deleted_at = ?"));
    assert!(delete_sql.contains("deleted_at IS NULL"));

    // Restore touches only trashed rows and clears the column.
    adapter.script_exec(1, None);
    let restored = model.restore(1i64).await.unwrap();
    assert_eq!(restored, 1);
    let statements = adapter.statements();
    let (restore_sql, restore_params) = &statements[statements.len() - 1];
    assert!(restore_sql.contains("deleted_at IS NOT NULL"));
    assert_eq!(restore_params[0], Value::Null);

    // Force delete is a hard DELETE regardless of soft-delete config.
    adapter.script_rows(vec![row(&[("id", json!(1)), ("name", json!("a"))])]);
    adapter.script_exec(1, None);
    let gone = model.force_delete(1i64).await.unwrap();
    assert_eq!(gone, 1);
    let statements = adapter.statements();
    let (force_sql, _) = &statements[statements.len() - 1];
    assert!(force_sql.starts_with("DELETE FROM soft_models"));
}

#[tokio::test]
async fn test_only_trashed_visibility() {
    let adapter = MockAdapter::new();
    let def = ModelDefinition::new("trashed_models")
        .field("id", FieldDefinition::number())
        .soft_delete();
    let model = Model::new(def).unwrap().with_adapter(adapter.clone());

    model.only_trashed().find_all().await.unwrap();
    assert!(adapter.statements()[0].0.contains("deleted_at IS NOT NULL"));

    model.with_trashed().find_all().await.unwrap();
    let with_trashed_sql = &adapter.statements()[1].0;
    assert!(!with_trashed_sql.contains("deleted_at"));
}

#[tokio::test]
async fn test_cache_serves_repeat_reads_and_writes_invalidate() {
    let adapter = MockAdapter::new();
    let def = ModelDefinition::new("cached_reads_models")
        .field("id", FieldDefinition::number())
        .field("name", FieldDefinition::string());
    let model = Model::new(def)
        .unwrap()
        .with_adapter(adapter.clone())
        .with_cache(Arc::new(MemoryCache::new()));

    adapter.script_rows(vec![row(&[("id", json!(1)), ("name", json!("one"))])]);
    let first = model.find_all(Condition::empty()).await.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(adapter.statement_count(), 1);

    // Second read: served from cache, adapter untouched.
    let second = model.find_all(Condition::empty()).await.unwrap();
    assert_eq!(second, first);
    assert_eq!(adapter.statement_count(), 1);

    // A write invalidates the model's tag, so the next read goes live.
    adapter.script_exec(1, Some(json!(2)));
    model
        .create(record(&[("name", json!("two"))]))
        .await
        .unwrap();

    adapter.script_rows(vec![
        row(&[("id", json!(1)), ("name", json!("one"))]),
        row(&[("id", json!(2)), ("name", json!("two"))]),
    ]);
    let third = model.find_all(Condition::empty()).await.unwrap();
    assert_eq!(third.len(), 2);
}

#[tokio::test]
async fn test_distinct_is_idempotent_between_writes() {
    let adapter = MockAdapter::new();
    let def = ModelDefinition::new("distinct_models")
        .field("id", FieldDefinition::number())
        .field("role", FieldDefinition::string());
    let model = Model::new(def)
        .unwrap()
        .with_adapter(adapter.clone())
        .with_cache(Arc::new(MemoryCache::new()));

    adapter.script_rows(vec![
        row(&[("role", json!("admin"))]),
        row(&[("role", json!("editor"))]),
    ]);
    let first = model.distinct("role", Condition::empty()).await.unwrap();
    let second = model.distinct("role", Condition::empty()).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first, vec![json!("admin"), json!("editor")]);
    // The repeat came from the cache.
    assert_eq!(adapter.statement_count(), 1);
}

#[tokio::test]
async fn test_round_trip_create_then_find() {
    let adapter = MockAdapter::new();
    let model = Model::new(users_definition("round_trip_users"))
        .unwrap()
        .with_adapter(adapter.clone());

    adapter.script_rows(vec![]); // unique probe
    adapter.script_exec(1, Some(json!(1)));
    let created = model
        .create(record(&[
            ("name", json!("Ada")),
            ("email", json!("ada@example.com")),
            ("tags", json!(["math", "engines"])),
        ]))
        .await
        .unwrap();

    // The stored row comes back storage-encoded; find must materialize it
    // to the same shape create returned.
    adapter.script_rows(vec![row(&[
        ("id", json!(1)),
        ("name", json!("Ada")),
        ("email", json!("ada@example.com")),
        ("active", json!(1)),
        ("tags", json!("[\"math\",\"engines\"]")),
    ])]);
    let found = model.find_by_id(1i64).await.unwrap().unwrap();

    assert_eq!(found.get("tags"), created.get("tags"));
    assert_eq!(found.get("active"), Some(&json!(true)));
    assert_eq!(found.get("name"), created.get("name"));
}

struct EventLog {
    events: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ModelHooks for EventLog {
    async fn before_validate(&self, _record: &mut Record) -> OrmResult<()> {
        self.events.lock().unwrap().push("before_validate".into());
        Ok(())
    }

    async fn after_validate(&self, _record: &mut Record) -> OrmResult<()> {
        self.events.lock().unwrap().push("after_validate".into());
        Ok(())
    }

    async fn before_create(&self, record: &mut Record) -> OrmResult<()> {
        self.events.lock().unwrap().push("before_create".into());
        // Mutation here must be merged back and reach the INSERT.
        record.insert("slug".to_string(), json!("from-hook"));
        Ok(())
    }

    async fn before_save(&self, _record: &mut Record) -> OrmResult<()> {
        self.events.lock().unwrap().push("before_save".into());
        Ok(())
    }

    async fn after_create(&self, _instance: &Record) -> OrmResult<()> {
        self.events.lock().unwrap().push("after_create".into());
        Ok(())
    }

    async fn after_save(&self, _instance: &Record) -> OrmResult<()> {
        self.events.lock().unwrap().push("after_save".into());
        Ok(())
    }
}

#[tokio::test]
async fn test_create_hook_sequence_and_dirty_merge() {
    let adapter = MockAdapter::new();
    adapter.script_exec(1, Some(json!(1)));

    let events = Arc::new(Mutex::new(Vec::new()));
    let def = ModelDefinition::new("hooked_models")
        .field("id", FieldDefinition::number())
        .field("name", FieldDefinition::string())
        .field("slug", FieldDefinition::string())
        .hooks(Arc::new(EventLog {
            events: events.clone(),
        }));
    let model = Model::new(def).unwrap().with_adapter(adapter.clone());

    let created = model
        .create(record(&[("name", json!("Widget"))]))
        .await
        .unwrap();

    assert_eq!(
        *events.lock().unwrap(),
        vec![
            "before_validate",
            "after_validate",
            "before_create",
            "before_save",
            "after_create",
            "after_save",
        ]
    );

    // The hook's mutation survived the dirty-check merge.
    assert_eq!(created.get("slug"), Some(&json!("from-hook")));
    let (insert_sql, insert_params) = &adapter.statements()[0];
    assert!(insert_sql.contains("slug"));
    assert!(insert_params.contains(&json!("from-hook")));
}

#[tokio::test]
async fn test_timestamps_set_on_create_and_update() {
    let adapter = MockAdapter::new();
    let def = ModelDefinition::new("stamped_models")
        .field("id", FieldDefinition::number())
        .field("name", FieldDefinition::string())
        .timestamps();
    let model = Model::new(def).unwrap().with_adapter(adapter.clone());

    adapter.script_exec(1, Some(json!(1)));
    let created = model.create(record(&[("name", json!("x"))])).await.unwrap();
    assert!(created.contains_key("created_at"));
    assert!(created.contains_key("updated_at"));

    adapter.script_rows(vec![row(&[("1", json!(1))])]); // existence probe
    adapter.script_exec(1, None);
    model
        .update(1i64, record(&[("name", json!("y"))]))
        .await
        .unwrap();
    let statements = adapter.statements();
    let (update_sql, _) = &statements[statements.len() - 1];
    assert!(update_sql.contains("updated_at = ?"));
}

#[tokio::test]
async fn test_upsert_native_and_fallback() {
    let adapter = MockAdapter::new();
    let def = ModelDefinition::new("upsert_models")
        .field("id", FieldDefinition::number())
        .field("email", FieldDefinition::string())
        .field("name", FieldDefinition::string());
    let model = Model::new(def).unwrap().with_adapter(adapter.clone());

    adapter.script_exec(1, None);
    let affected = model
        .upsert(
            record(&[("email", json!("a@x.com")), ("name", json!("a"))]),
            &["email"],
        )
        .await
        .unwrap();
    assert_eq!(affected, 1);
    let (upsert_sql, _) = &adapter.statements()[0];
    assert!(upsert_sql.contains("ON CONFLICT (email) DO UPDATE SET"));

    // Fallback path without a conflict target: find-then-create.
    adapter.script_rows(vec![]); // exists probe misses
    adapter.script_exec(1, Some(json!(5)));
    let affected = model
        .upsert(
            record(&[("id", json!(5)), ("name", json!("fresh"))]),
            &[],
        )
        .await
        .unwrap();
    assert_eq!(affected, 1);
    let statements = adapter.statements();
    assert!(statements[statements.len() - 1].0.starts_with("INSERT INTO"));
}

#[tokio::test]
async fn test_find_or_create_seeds_from_condition() {
    let adapter = MockAdapter::new();
    let def = ModelDefinition::new("foc_models")
        .field("id", FieldDefinition::number())
        .field("email", FieldDefinition::string())
        .field("name", FieldDefinition::string());
    let model = Model::new(def).unwrap().with_adapter(adapter.clone());

    adapter.script_rows(vec![]); // find misses
    adapter.script_exec(1, Some(json!(3)));

    let mut condition = Map::new();
    condition.insert("email".to_string(), json!("new@x.com"));
    let created = model
        .find_or_create(condition, record(&[("name", json!("New"))]))
        .await
        .unwrap();

    assert_eq!(created.get("email"), Some(&json!("new@x.com")));
    assert_eq!(created.get("name"), Some(&json!("New")));
    assert_eq!(created.get("id"), Some(&json!(3)));
}

#[tokio::test]
async fn test_builder_compiles_operators_sort_and_window() {
    let adapter = MockAdapter::new();
    let def = ModelDefinition::new("built_models")
        .field("id", FieldDefinition::number())
        .field("age", FieldDefinition::number())
        .field("name", FieldDefinition::string());
    let model = Model::new(def).unwrap().with_adapter(adapter.clone());

    model
        .query()
        .where_gte("age", 18)
        .where_like("name", "A%")
        .fields(&["id", "name"])
        .sort("age", relata_orm::SortDirection::Desc)
        .limit(10)
        .skip(5)
        .find_all()
        .await
        .unwrap();

    let (sql, params) = &adapter.statements()[0];
    assert!(sql.starts_with("SELECT id, name FROM built_models WHERE"));
    assert!(sql.contains("age >= ?"));
    assert!(sql.contains("name LIKE ?"));
    assert!(sql.contains("ORDER BY age DESC"));
    assert!(sql.contains("LIMIT 10 OFFSET 5"));
    assert_eq!(params, &vec![json!(18), json!("A%")]);
}

#[tokio::test]
async fn test_increment_compiles_in_place_addition() {
    let adapter = MockAdapter::new();
    let def = ModelDefinition::new("counter_models")
        .field("id", FieldDefinition::number())
        .field("visits", FieldDefinition::number());
    let model = Model::new(def).unwrap().with_adapter(adapter.clone());

    adapter.script_exec(1, None);
    let affected = model.increment(1i64, "visits", 3).await.unwrap();
    assert_eq!(affected, 1);

    let (sql, params) = &adapter.statements()[0];
    assert!(sql.starts_with("UPDATE counter_models SET visits = visits + ?"));
    assert_eq!(params[0], json!(3));
}
