mod common;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;

use warden_api::config::{AppConfig, WindowLimits};
use warden_api::store::{CounterStore, StoreError};

fn api_limits(per_minute: u32, per_hour: Option<u32>) -> AppConfig {
    let mut config = common::test_config();
    config.rate_limit.api = WindowLimits { per_minute, per_hour };
    config
}

#[tokio::test]
async fn auth_endpoint_limited_per_ip() -> Result<()> {
    let server = common::spawn().await?;

    for _ in 0..5 {
        let res = server.login("alice", "wrong", "198.51.100.10").await?;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    let res = server.login("alice", "wrong", "198.51.100.10").await?;
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(res.headers()["retry-after"], "60");
    let body: Value = res.json().await?;
    assert_eq!(body["code"], "TOO_MANY_REQUESTS");
    assert!(body["message"]
        .as_str()
        .unwrap_or_default()
        .contains("authentication attempts"));

    // Another client address has its own window
    let res = server.login("alice", "wrong", "198.51.100.11").await?;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    // Correct credentials do not bypass the limit
    let res = server.login("alice", "alice-password", "198.51.100.10").await?;
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    Ok(())
}

#[tokio::test]
async fn api_quota_headers_and_minute_window() -> Result<()> {
    let server = common::spawn_with(api_limits(3, None), None).await?;
    let alice = server.token("alice").await?;

    let res = server.get("/mood-diary/1000", Some(&alice)).await?;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["x-ratelimit-limit-minute"], "3");
    assert_eq!(res.headers()["x-ratelimit-remaining"], "2");
    assert!(res.headers().get("x-ratelimit-limit-hour").is_none());

    for _ in 0..2 {
        let res = server.get("/mood-diary/1000", Some(&alice)).await?;
        assert_eq!(res.status(), StatusCode::OK);
    }

    let res = server.get("/mood-diary/1000", Some(&alice)).await?;
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(res.headers()["retry-after"], "60");

    server.clock.advance(Duration::from_secs(61));
    let res = server.get("/mood-diary/1000", Some(&alice)).await?;
    assert_eq!(res.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn api_limit_is_keyed_per_member() -> Result<()> {
    let server = common::spawn_with(api_limits(2, None), None).await?;
    let alice = server.token("alice").await?;
    let bob = server.token("bob").await?;

    for _ in 0..2 {
        assert_eq!(server.get("/mood-diary/1000", Some(&alice)).await?.status(), StatusCode::OK);
    }
    assert_eq!(
        server.get("/mood-diary/1000", Some(&alice)).await?.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
    assert_eq!(server.get("/mood-diary/2000", Some(&bob)).await?.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn hourly_window_outlasts_minute_window() -> Result<()> {
    let server = common::spawn_with(api_limits(100, Some(5)), None).await?;
    let alice = server.token("alice").await?;

    for _ in 0..5 {
        let res = server.get("/medication-schedule/10", Some(&alice)).await?;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()["x-ratelimit-limit-hour"], "5");
    }
    let res = server.get("/medication-schedule/10", Some(&alice)).await?;
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(res.headers()["retry-after"], "3600");

    server.clock.advance(Duration::from_secs(61));
    let res = server.get("/medication-schedule/10", Some(&alice)).await?;
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(res.headers()["retry-after"], "3539");

    server.clock.advance(Duration::from_secs(60 * 60));
    let res = server.get("/medication-schedule/10", Some(&alice)).await?;
    assert_eq!(res.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn rejected_requests_never_reach_the_ownership_gate() -> Result<()> {
    let server = common::spawn_with(api_limits(1, None), None).await?;
    let alice = server.token("alice").await?;

    assert_eq!(server.get("/mood-diary/2000", Some(&alice)).await?.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        server.get("/mood-diary/2000", Some(&alice)).await?.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
    Ok(())
}

#[tokio::test]
async fn health_is_never_limited() -> Result<()> {
    let server = common::spawn_with(api_limits(1, None), None).await?;

    for _ in 0..10 {
        let res = server.get("/health", None).await?;
        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.headers().get("x-ratelimit-remaining").is_none());
    }
    Ok(())
}

#[tokio::test]
async fn disabled_limiter_admits_everything() -> Result<()> {
    let mut config = api_limits(1, None);
    config.rate_limit.enabled = false;
    let server = common::spawn_with(config, None).await?;
    let alice = server.token("alice").await?;

    for _ in 0..5 {
        assert_eq!(server.get("/mood-diary/1000", Some(&alice)).await?.status(), StatusCode::OK);
    }
    Ok(())
}

/// Counter store whose backend is unreachable
struct UnreachableStore;

fn refused<T>() -> Result<T, StoreError> {
    Err(StoreError::Unavailable("connection refused".to_string()))
}

#[async_trait]
impl CounterStore for UnreachableStore {
    async fn incr_with_expiry(&self, _key: &str, _ttl: Duration) -> Result<i64, StoreError> {
        refused()
    }
    async fn delete(&self, _key: &str) -> Result<(), StoreError> {
        refused()
    }
    async fn zadd(&self, _key: &str, _score: i64, _member: &str) -> Result<(), StoreError> {
        refused()
    }
    async fn zcount(&self, _key: &str, _min: i64, _max: i64) -> Result<u64, StoreError> {
        refused()
    }
    async fn zadd_within_limit(
        &self,
        _key: &str,
        _window_start: i64,
        _score: i64,
        _member: &str,
        _limit: u32,
    ) -> Result<bool, StoreError> {
        refused()
    }
    async fn zmin_score(&self, _key: &str, _min: i64, _max: i64) -> Result<Option<i64>, StoreError> {
        refused()
    }
    async fn zrem(&self, _key: &str, _member: &str) -> Result<(), StoreError> {
        refused()
    }
    async fn zremrangebyscore(&self, _key: &str, _min: i64, _max: i64) -> Result<u64, StoreError> {
        refused()
    }
    async fn expire(&self, _key: &str, _ttl: Duration) -> Result<(), StoreError> {
        refused()
    }
}

#[tokio::test]
async fn unreachable_store_falls_back_to_local_limits() -> Result<()> {
    let server = common::spawn_with(api_limits(3, None), Some(Arc::new(UnreachableStore))).await?;
    let alice = server.token("alice").await?;

    for _ in 0..3 {
        assert_eq!(server.get("/mood-diary/1000", Some(&alice)).await?.status(), StatusCode::OK);
    }
    assert_eq!(
        server.get("/mood-diary/1000", Some(&alice)).await?.status(),
        StatusCode::TOO_MANY_REQUESTS
    );

    let res = server.get("/health", None).await?;
    let body: Value = res.json().await?;
    assert_eq!(body["data"]["rate_limit_degraded"], true);
    Ok(())
}
