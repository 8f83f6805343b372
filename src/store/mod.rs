// store/mod.rs - Shared counter store abstraction
//
// The rate limiter and the anomaly monitor keep their windows in a TTL-capable
// key-value store shared by every server instance. Two shapes are needed:
//
// - scalar counters with atomic increment-and-refresh-expiry (anomaly monitor)
// - score-ranged collections (sorted sets keyed by timestamp) for sliding logs
//
// When the store is unreachable callers fall back to the process-local
// structures in `local`, which only see this process's traffic.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub mod local;
pub mod memory;
pub mod postgres;

pub use local::{spawn_local_sweeper, LocalSlidingLog, LocalWindowCounter, LogRejection, WindowSpec};
pub use memory::MemoryCounterStore;
pub use postgres::PgCounterStore;

/// Errors raised by a counter store backend. Never surfaced to HTTP callers.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Counter store unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment a scalar counter and (re)set its expiry.
    /// Returns the post-increment value; a missing or expired key starts at 1.
    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<i64, StoreError>;

    /// Remove a key of either shape.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Add `member` with `score` to the ordered collection at `key`.
    async fn zadd(&self, key: &str, score: i64, member: &str) -> Result<(), StoreError>;

    /// Count members with `min <= score <= max`.
    async fn zcount(&self, key: &str, min: i64, max: i64) -> Result<u64, StoreError>;

    /// Add `member` only while fewer than `limit` members score above
    /// `window_start`. Counting and adding are one atomic step per key.
    /// Returns whether the member was added.
    async fn zadd_within_limit(
        &self,
        key: &str,
        window_start: i64,
        score: i64,
        member: &str,
        limit: u32,
    ) -> Result<bool, StoreError>;

    /// Lowest score with `min <= score <= max`, if any.
    async fn zmin_score(&self, key: &str, min: i64, max: i64) -> Result<Option<i64>, StoreError>;

    /// Remove one member.
    async fn zrem(&self, key: &str, member: &str) -> Result<(), StoreError>;

    /// Remove members with `min <= score <= max`, returning how many were removed.
    async fn zremrangebyscore(&self, key: &str, min: i64, max: i64) -> Result<u64, StoreError>;

    /// Set the expiry of an existing key.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;
}
