//! Relation helpers
//!
//! Thin lookups across models: a relation is just a query against the
//! related model keyed by a foreign-key column, so all caching, scoping,
//! and materialization rules of the related model apply unchanged.

use crate::conditions::Condition;
use crate::error::OrmResult;
use crate::fields::Record;
use crate::schema::Model;
use serde_json::{Map, Value};

impl Model {
    /// The record on the owning side: follow `foreign_key` on `record` to
    /// the related model's primary key.
    pub async fn belongs_to(
        &self,
        related: &Model,
        record: &Record,
        foreign_key: &str,
    ) -> OrmResult<Option<Record>> {
        match record.get(foreign_key) {
            Some(value) if !value.is_null() => {
                related.find(Condition::Id(value.clone())).await
            }
            _ => Ok(None),
        }
    }

    /// One related record holding this record's primary key in
    /// `foreign_key`.
    pub async fn has_one(
        &self,
        related: &Model,
        record: &Record,
        foreign_key: &str,
    ) -> OrmResult<Option<Record>> {
        match self.relation_condition(record, foreign_key) {
            Some(condition) => related.find(condition).await,
            None => Ok(None),
        }
    }

    /// All related records holding this record's primary key in
    /// `foreign_key`.
    pub async fn has_many(
        &self,
        related: &Model,
        record: &Record,
        foreign_key: &str,
    ) -> OrmResult<Vec<Record>> {
        match self.relation_condition(record, foreign_key) {
            Some(condition) => related.find_all(condition).await,
            None => Ok(Vec::new()),
        }
    }

    fn relation_condition(&self, record: &Record, foreign_key: &str) -> Option<Condition> {
        let id = record.get(self.primary_key())?;
        if id.is_null() {
            return None;
        }
        let mut map = Map::new();
        map.insert(foreign_key.to_string(), id.clone());
        Some(Condition::Where(map))
    }
}
