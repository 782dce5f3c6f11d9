//! # relata-cache
//!
//! Result-cache contract for the relata model engine, plus an in-memory
//! reference backend with tag-based invalidation.
//!
//! The engine stores whole query results (JSON values) under deterministic
//! keys and tags every entry with its model's table tag so a single write
//! can invalidate all cached reads for that table.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub mod memory;

pub use memory::MemoryCache;

/// Cache operation errors
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Backend error: {0}")]
    Backend(String),
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// Storage contract consumed by the model engine.
///
/// Implementations own eviction and persistence entirely. `ttl_seconds` of
/// zero means the entry does not expire. Every entry carries the tags it was
/// stored with; `delete_by_tags` removes all entries carrying any of the
/// given tags and returns the number of entries removed.
#[async_trait]
pub trait CacheAdapter: Send + Sync {
    /// Look up a cached value. A miss is `Ok(None)`, not an error.
    async fn get(&self, key: &str) -> CacheResult<Option<Value>>;

    /// Store a value under `key` with the given TTL and tags.
    async fn set(&self, key: &str, value: Value, ttl_seconds: u64, tags: &[String]) -> CacheResult<()>;

    /// Drop every entry tagged with any of `tags`.
    async fn delete_by_tags(&self, tags: &[String]) -> CacheResult<u64>;

    /// Drop a single entry. Returns whether it existed.
    async fn forget(&self, key: &str) -> CacheResult<bool>;

    /// Drop everything.
    async fn flush(&self) -> CacheResult<()>;
}
