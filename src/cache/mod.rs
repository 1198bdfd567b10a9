//! Fast, disposable projections of durable state.
//!
//! Nothing read from here is authoritative. Callers go through
//! [`IdentityCache`], which bounds every round trip with a timeout and turns
//! any backend failure into a miss, so an unreachable cache costs latency
//! and never an error.

use std::time::Duration;

use async_trait::async_trait;

pub mod identity;
pub mod memory;
pub mod redis;

pub use identity::{IdentityCache, IdentitySnapshot, StreakSnapshot};
pub use memory::MemoryCache;
pub use self::redis::RedisCache;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("redis: {0}")]
    Redis(#[from] ::redis::RedisError),
    #[error("cache unavailable")]
    Unavailable,
}

/// Minimal key/value surface the identity layer needs from a cache backend.
#[async_trait]
pub trait CacheClient: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;
    async fn del(&self, key: &str) -> Result<(), CacheError>;
    /// Prepends `value` to a list, keeps the newest `cap` items and refreshes
    /// the list expiry.
    async fn push_capped(
        &self,
        key: &str,
        value: &str,
        cap: usize,
        ttl: Duration,
    ) -> Result<(), CacheError>;
    /// Atomically replaces a list with `values` (newest first) and sets its
    /// expiry. An empty `values` just removes the list.
    async fn replace_list(&self, key: &str, values: &[String], ttl: Duration) -> Result<(), CacheError>;
    /// Newest-first items of a list, at most `limit`.
    async fn range(&self, key: &str, limit: usize) -> Result<Vec<String>, CacheError>;
}
