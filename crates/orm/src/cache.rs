//! Result-cache integration
//!
//! Derives deterministic cache keys from the shape of a query — table,
//! normalized condition, sorted field list, sort, skip, limit, and
//! soft-delete visibility — so structurally identical queries collide
//! regardless of how their arguments were assembled. Key derivation is
//! skipped entirely (empty key) when the model has no cache adapter; that
//! is the fast path, not an error.
//!
//! All cache traffic is best-effort: a failed `get` falls through to a
//! live query, and failed `set`/invalidate calls are logged and swallowed.
//! Cache failures never become user-visible errors.

use crate::conditions::{Condition, Sort, TrashedVisibility};
use crate::schema::Model;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde_json::Value;
use tracing::warn;

/// Shape of a read, as far as the cache is concerned.
#[derive(Debug, Clone)]
pub(crate) struct QueryShape<'a> {
    pub condition: &'a Condition,
    pub fields: &'a [String],
    pub sort: Option<&'a Sort>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
    pub visibility: TrashedVisibility,
}

// Fingerprint → derived key. Pure function cache: on overflow we simply
// stop adding entries; no eviction is needed.
static KEY_MEMO: Lazy<DashMap<String, String>> = Lazy::new(DashMap::new);
const KEY_MEMO_CAP: usize = 1000;

/// Derive the cache key for a query, or an empty string when the model has
/// no cache adapter.
pub(crate) fn cache_key(model: &Model, shape: &QueryShape<'_>) -> String {
    if model.cache().is_none() {
        return String::new();
    }

    let fingerprint = fingerprint(model, shape);
    if let Some(hit) = KEY_MEMO.get(&fingerprint) {
        return hit.clone();
    }

    let digest = blake3::hash(fingerprint.as_bytes());
    let key = format!("relata:{}:{}", model.table(), hex::encode(digest.as_bytes()));
    if KEY_MEMO.len() < KEY_MEMO_CAP {
        KEY_MEMO.insert(fingerprint, key.clone());
    }
    key
}

fn fingerprint(model: &Model, shape: &QueryShape<'_>) -> String {
    // Map-backed conditions serialize with sorted keys, so insertion order
    // never leaks into the fingerprint.
    let condition = match shape.condition {
        Condition::Id(scalar) => format!("pk={}", scalar),
        Condition::Where(map) => Value::Object(map.clone()).to_string(),
    };

    let mut fields: Vec<&str> = shape.fields.iter().map(String::as_str).collect();
    fields.sort_unstable();

    format!(
        "{}|{}|{}|{}|{}|{}|{}{}",
        model.table(),
        condition,
        fields.join(","),
        shape.sort.map(|s| s.fingerprint()).unwrap_or_default(),
        shape.skip.map(|n| n.to_string()).unwrap_or_default(),
        shape.limit.map(|n| n.to_string()).unwrap_or_default(),
        u8::from(shape.visibility.include_trashed),
        u8::from(shape.visibility.only_trashed),
    )
}

/// Best-effort read. Failures fall through to a live query.
pub(crate) async fn get(model: &Model, key: &str) -> Option<Value> {
    if key.is_empty() {
        return None;
    }
    let cache = model.cache()?;
    match cache.get(key).await {
        Ok(hit) => hit,
        Err(e) => {
            warn!(table = model.table(), error = %e, "cache get failed; querying live");
            None
        }
    }
}

/// Best-effort write, tagged with the model's table tag.
pub(crate) async fn put(model: &Model, key: &str, value: Value) {
    if key.is_empty() {
        return;
    }
    let cache = match model.cache() {
        Some(cache) => cache,
        None => return,
    };
    let tags = vec![model.cache_tag()];
    if let Err(e) = cache
        .set(key, value, model.definition().cache_ttl_seconds, &tags)
        .await
    {
        warn!(table = model.table(), error = %e, "cache set failed");
    }
}

/// Drop every cached read for this model. Called after each successful
/// write; failures are logged and swallowed.
pub(crate) async fn invalidate(model: &Model) {
    let cache = match model.cache() {
        Some(cache) => cache,
        None => return,
    };
    let tags = vec![model.cache_tag()];
    if let Err(e) = cache.delete_by_tags(&tags).await {
        warn!(table = model.table(), error = %e, "cache invalidation failed");
    }
}
