// store/postgres.rs - CounterStore on a shared Postgres database
//
// Lets several server instances share rate-limit and anomaly windows without a
// dedicated cache. Scalar counters rely on `INSERT .. ON CONFLICT .. RETURNING`
// for atomic increment; ordered collections are rows keyed by (key, member)
// with a separate expiry row per key. Expiry uses database time.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool};
use tracing::info;

use super::{CounterStore, StoreError};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS guard_counters (
        key TEXT PRIMARY KEY,
        value BIGINT NOT NULL,
        expires_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS guard_window_events (
        key TEXT NOT NULL,
        score BIGINT NOT NULL,
        member TEXT NOT NULL,
        PRIMARY KEY (key, member)
    )",
    "CREATE INDEX IF NOT EXISTS guard_window_events_score ON guard_window_events (key, score)",
    "CREATE TABLE IF NOT EXISTS guard_window_expiry (
        key TEXT PRIMARY KEY,
        expires_at TIMESTAMPTZ NOT NULL
    )",
];

#[derive(Debug, Clone)]
pub struct PgCounterStore {
    pool: PgPool,
}

impl PgCounterStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with a bounded acquire timeout so an unreachable database
    /// surfaces as a `StoreError` quickly instead of stalling requests
    pub async fn connect(url: &str, acquire_timeout: Duration) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await?;
        info!("Connected counter store pool");
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Delete expired counters and collections
    pub async fn sweep(&self) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let counters = sqlx::query("DELETE FROM guard_counters WHERE expires_at <= now()")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let events = sqlx::query(
            "DELETE FROM guard_window_events e USING guard_window_expiry x
             WHERE e.key = x.key AND x.expires_at <= now()",
        )
        .execute(&mut *tx)
        .await?
        .rows_affected();
        sqlx::query("DELETE FROM guard_window_expiry WHERE expires_at <= now()")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(counters + events)
    }
}

/// A collection whose expiry has passed starts over
async fn reset_if_expired(conn: &mut PgConnection, key: &str) -> Result<(), StoreError> {
    let expired = sqlx::query("DELETE FROM guard_window_expiry WHERE key = $1 AND expires_at <= now()")
        .bind(key)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    if expired > 0 {
        sqlx::query("DELETE FROM guard_window_events WHERE key = $1")
            .bind(key)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

async fn insert_member(conn: &mut PgConnection, key: &str, score: i64, member: &str) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO guard_window_events (key, score, member) VALUES ($1, $2, $3)
         ON CONFLICT (key, member) DO UPDATE SET score = EXCLUDED.score",
    )
    .bind(key)
    .bind(score)
    .bind(member)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[async_trait]
impl CounterStore for PgCounterStore {
    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<i64, StoreError> {
        let value: i64 = sqlx::query_scalar(
            "INSERT INTO guard_counters (key, value, expires_at)
             VALUES ($1, 1, now() + make_interval(secs => $2))
             ON CONFLICT (key) DO UPDATE SET
                value = CASE WHEN guard_counters.expires_at <= now() THEN 1
                             ELSE guard_counters.value + 1 END,
                expires_at = EXCLUDED.expires_at
             RETURNING value",
        )
        .bind(key)
        .bind(ttl.as_secs_f64())
        .fetch_one(&self.pool)
        .await?;
        Ok(value)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM guard_counters WHERE key = $1")
            .bind(key)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM guard_window_events WHERE key = $1")
            .bind(key)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM guard_window_expiry WHERE key = $1")
            .bind(key)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn zadd(&self, key: &str, score: i64, member: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        reset_if_expired(&mut *tx, key).await?;
        insert_member(&mut *tx, key, score, member).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn zadd_within_limit(
        &self,
        key: &str,
        window_start: i64,
        score: i64,
        member: &str,
        limit: u32,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        // Writers of one key queue here until this transaction ends
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1)::bigint)")
            .bind(key)
            .execute(&mut *tx)
            .await?;
        reset_if_expired(&mut *tx, key).await?;

        let live: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM guard_window_events WHERE key = $1 AND score > $2",
        )
        .bind(key)
        .bind(window_start)
        .fetch_one(&mut *tx)
        .await?;
        if live >= i64::from(limit) {
            tx.rollback().await?;
            return Ok(false);
        }

        insert_member(&mut *tx, key, score, member).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn zmin_score(&self, key: &str, min: i64, max: i64) -> Result<Option<i64>, StoreError> {
        let lowest: Option<i64> = sqlx::query_scalar(
            "SELECT MIN(e.score) FROM guard_window_events e
             WHERE e.key = $1 AND e.score BETWEEN $2 AND $3
               AND NOT EXISTS (
                   SELECT 1 FROM guard_window_expiry x
                   WHERE x.key = e.key AND x.expires_at <= now()
               )",
        )
        .bind(key)
        .bind(min)
        .bind(max)
        .fetch_one(&self.pool)
        .await?;
        Ok(lowest)
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM guard_window_events WHERE key = $1 AND member = $2")
            .bind(key)
            .bind(member)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn zcount(&self, key: &str, min: i64, max: i64) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM guard_window_events e
             WHERE e.key = $1 AND e.score BETWEEN $2 AND $3
               AND NOT EXISTS (
                   SELECT 1 FROM guard_window_expiry x
                   WHERE x.key = e.key AND x.expires_at <= now()
               )",
        )
        .bind(key)
        .bind(min)
        .bind(max)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }

    async fn zremrangebyscore(&self, key: &str, min: i64, max: i64) -> Result<u64, StoreError> {
        let removed = sqlx::query(
            "DELETE FROM guard_window_events WHERE key = $1 AND score BETWEEN $2 AND $3",
        )
        .bind(key)
        .bind(min)
        .bind(max)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(removed)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let seconds = ttl.as_secs_f64();
        sqlx::query(
            "UPDATE guard_counters SET expires_at = now() + make_interval(secs => $2)
             WHERE key = $1",
        )
        .bind(key)
        .bind(seconds)
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "INSERT INTO guard_window_expiry (key, expires_at)
             SELECT $1, now() + make_interval(secs => $2)
             WHERE EXISTS (SELECT 1 FROM guard_window_events WHERE key = $1)
             ON CONFLICT (key) DO UPDATE SET expires_at = EXCLUDED.expires_at",
        )
        .bind(key)
        .bind(seconds)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
