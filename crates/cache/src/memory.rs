//! In-memory cache backend with tag-based invalidation
//!
//! Entries live in a concurrent map and expire lazily: an expired entry is
//! dropped the next time it is read. A pair of tag indexes (tag -> keys,
//! key -> tags) keeps batch invalidation O(entries under the tag).

use crate::{CacheAdapter, CacheResult};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashSet;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value, ttl_seconds: u64) -> Self {
        let expires_at = if ttl_seconds == 0 {
            None
        } else {
            Some(Instant::now() + Duration::from_secs(ttl_seconds))
        };
        Self { value, expires_at }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.map_or(false, |exp| Instant::now() > exp)
    }
}

/// In-memory tagged cache.
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
    tag_to_keys: DashMap<String, HashSet<String>>,
    key_to_tags: DashMap<String, HashSet<String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            tag_to_keys: DashMap::new(),
            key_to_tags: DashMap::new(),
        }
    }

    fn untag(&self, key: &str) {
        if let Some((_, tags)) = self.key_to_tags.remove(key) {
            for tag in tags {
                if let Some(mut keys) = self.tag_to_keys.get_mut(&tag) {
                    keys.remove(key);
                    if keys.is_empty() {
                        drop(keys);
                        self.tag_to_keys.remove(&tag);
                    }
                }
            }
        }
    }

    fn remove_entry(&self, key: &str) -> bool {
        let existed = self.entries.remove(key).is_some();
        self.untag(key);
        existed
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheAdapter for MemoryCache {
    async fn get(&self, key: &str) -> CacheResult<Option<Value>> {
        let expired = match self.entries.get(key) {
            Some(entry) if entry.is_expired() => true,
            Some(entry) => return Ok(Some(entry.value.clone())),
            None => return Ok(None),
        };
        // Guard is released above; safe to mutate the map now.
        if expired {
            self.remove_entry(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Value, ttl_seconds: u64, tags: &[String]) -> CacheResult<()> {
        // Re-setting a key replaces its tag links too.
        self.untag(key);
        self.entries.insert(key.to_string(), Entry::new(value, ttl_seconds));

        for tag in tags {
            self.tag_to_keys
                .entry(tag.clone())
                .or_insert_with(HashSet::new)
                .insert(key.to_string());
            self.key_to_tags
                .entry(key.to_string())
                .or_insert_with(HashSet::new)
                .insert(tag.clone());
        }
        Ok(())
    }

    async fn delete_by_tags(&self, tags: &[String]) -> CacheResult<u64> {
        let mut removed = 0u64;
        for tag in tags {
            let keys: Vec<String> = match self.tag_to_keys.remove(tag) {
                Some((_, keys)) => keys.into_iter().collect(),
                None => continue,
            };
            for key in keys {
                if self.remove_entry(&key) {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn forget(&self, key: &str) -> CacheResult<bool> {
        Ok(self.remove_entry(key))
    }

    async fn flush(&self) -> CacheResult<()> {
        self.entries.clear();
        self.tag_to_keys.clear();
        self.key_to_tags.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_and_get() {
        let cache = MemoryCache::new();
        cache
            .set("users:1", json!({"id": 1}), 0, &["model:users".to_string()])
            .await
            .unwrap();

        let hit = cache.get("users:1").await.unwrap();
        assert_eq!(hit, Some(json!({"id": 1})));
        assert_eq!(cache.get("users:2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_by_tags_removes_all_tagged_entries() {
        let cache = MemoryCache::new();
        let users = vec!["model:users".to_string()];
        let posts = vec!["model:posts".to_string()];

        cache.set("a", json!(1), 0, &users).await.unwrap();
        cache.set("b", json!(2), 0, &users).await.unwrap();
        cache.set("c", json!(3), 0, &posts).await.unwrap();

        let removed = cache.delete_by_tags(&users).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(cache.get("a").await.unwrap(), None);
        assert_eq!(cache.get("b").await.unwrap(), None);
        assert_eq!(cache.get("c").await.unwrap(), Some(json!(3)));
    }

    #[tokio::test]
    async fn test_reset_key_replaces_tags() {
        let cache = MemoryCache::new();
        cache
            .set("k", json!("old"), 0, &["model:users".to_string()])
            .await
            .unwrap();
        cache
            .set("k", json!("new"), 0, &["model:posts".to_string()])
            .await
            .unwrap();

        // Invalidation by the stale tag must not touch the rewritten entry.
        cache
            .delete_by_tags(&["model:users".to_string()])
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(json!("new")));
    }

    #[tokio::test]
    async fn test_forget_and_flush() {
        let cache = MemoryCache::new();
        cache.set("k", json!(true), 0, &[]).await.unwrap();

        assert!(cache.forget("k").await.unwrap());
        assert!(!cache.forget("k").await.unwrap());

        cache.set("x", json!(1), 0, &[]).await.unwrap();
        cache.flush().await.unwrap();
        assert_eq!(cache.get("x").await.unwrap(), None);
    }
}
