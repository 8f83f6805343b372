// security/rate_limit.rs - Dual-window sliding log rate limiter
//
// Every endpoint class has a per-minute window and an optional per-hour window.
// Each window is a separate timestamp collection in the shared counter store
// (`rate_limit:{key}:minute`, `rate_limit:{key}:hour`); a request is admitted
// only when every window admits it, and a rejected request is recorded in none
// of them.
//
// When the store fails the limiter switches to process-local logs for
// `degrade_secs`, then retries the store.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::{RateLimitConfig, WindowLimits};
use crate::store::{CounterStore, LocalSlidingLog, LogRejection, StoreError, WindowSpec};

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(60 * 60);

/// Policy family selected per endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointClass {
    Auth,
    Api,
}

/// Outcome of `try_consume`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    /// Refused by `window`, which has room again after `retry_after`
    Rejected {
        window: &'static str,
        retry_after: Duration,
    },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }

    /// Whole seconds for a `Retry-After` header, rounded up
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Admission::Admitted => None,
            Admission::Rejected { retry_after, .. } => Some(retry_after.as_millis().div_ceil(1000).max(1) as u64),
        }
    }
}

fn window(name: &'static str, length: Duration, limit: u32) -> WindowSpec {
    WindowSpec {
        name,
        length_ms: length.as_millis() as i64,
        limit,
    }
}

/// Rejection by `window` whose oldest live entry is `oldest`
fn rejected(window: &WindowSpec, oldest: Option<i64>, now: i64) -> Admission {
    let reopens_at = oldest.unwrap_or(now) + window.length_ms;
    let wait_ms = (reopens_at - now).clamp(1, window.length_ms.max(1));
    Admission::Rejected {
        window: window.name,
        retry_after: Duration::from_millis(wait_ms as u64),
    }
}

/// Quota snapshot rendered into response headers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitInfo {
    pub per_minute: u32,
    pub per_hour: Option<u32>,
    pub remaining: u32,
}

pub fn ip_key(ip: &str) -> String {
    format!("ip:{}", ip)
}

pub fn user_key(member_id: i64) -> String {
    format!("user:{}", member_id)
}

pub fn store_key(key: &str, window: &str) -> String {
    format!("rate_limit:{}:{}", key, window)
}

pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    fallback: Arc<LocalSlidingLog>,
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    degraded_until: AtomicI64,
    last_degraded_log: AtomicI64,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            fallback: Arc::new(LocalSlidingLog::new()),
            config,
            clock,
            degraded_until: AtomicI64::new(0),
            last_degraded_log: AtomicI64::new(i64::MIN),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Local logs used while degraded, for the background sweeper
    pub fn fallback(&self) -> Arc<LocalSlidingLog> {
        self.fallback.clone()
    }

    /// Longest window any class uses
    pub fn max_window(&self) -> Duration {
        if self.config.auth.per_hour.is_some() || self.config.api.per_hour.is_some() {
            HOUR
        } else {
            MINUTE
        }
    }

    pub fn limits(&self, class: EndpointClass) -> WindowLimits {
        match class {
            EndpointClass::Auth => self.config.auth,
            EndpointClass::Api => self.config.api,
        }
    }

    /// Windows for `class`, shortest first
    fn windows(&self, class: EndpointClass) -> Vec<WindowSpec> {
        let limits = self.limits(class);
        let mut windows = vec![window("minute", MINUTE, limits.per_minute)];
        if let Some(limit) = limits.per_hour {
            windows.push(window("hour", HOUR, limit));
        }
        windows
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded_until.load(Ordering::SeqCst) > self.clock.now_millis()
    }

    /// Admit or reject one request for `key`. Windows are checked shortest
    /// first and the first full window rejects; only an admitted request is
    /// recorded, in every window.
    pub async fn try_consume(&self, key: &str, class: EndpointClass) -> Admission {
        let now = self.clock.now_millis();
        let windows = self.windows(class);

        let admission = if self.degraded(now) {
            self.consume_local(key, &windows, now)
        } else {
            match self.consume_shared(key, &windows, now).await {
                Ok(admission) => {
                    self.note_recovered();
                    admission
                }
                Err(e) => {
                    self.enter_degraded(now, &e);
                    self.consume_local(key, &windows, now)
                }
            }
        };

        if let Admission::Rejected { window, retry_after } = admission {
            info!(
                key,
                class = ?class,
                window,
                retry_after_ms = retry_after.as_millis() as u64,
                "Rate limit exceeded"
            );
        }
        admission
    }

    fn consume_local(&self, key: &str, windows: &[WindowSpec], now: i64) -> Admission {
        match self.fallback.try_record(key, now, windows) {
            Ok(()) => Admission::Admitted,
            Err(LogRejection { window, oldest }) => rejected(&window, oldest, now),
        }
    }

    async fn consume_shared(&self, key: &str, windows: &[WindowSpec], now: i64) -> Result<Admission, StoreError> {
        // Read-only pass: a full window rejects before anything is written
        for window in windows {
            let store_key = store_key(key, window.name);
            let window_start = now - window.length_ms;
            self.store.zremrangebyscore(&store_key, 0, window_start).await?;
            let count = self.store.zcount(&store_key, window_start + 1, now).await?;
            if count >= u64::from(window.limit) {
                let oldest = self.store.zmin_score(&store_key, window_start + 1, now).await?;
                return Ok(rejected(window, oldest, now));
            }
        }

        let member = format!("{}-{}", now, Uuid::new_v4().simple());
        let mut recorded: Vec<String> = Vec::with_capacity(windows.len());
        for window in windows {
            let store_key = store_key(key, window.name);
            let window_start = now - window.length_ms;
            let added = self
                .store
                .zadd_within_limit(&store_key, window_start, now, &member, window.limit)
                .await?;
            if !added {
                // Another request took the last slot; undo the earlier windows
                for written in &recorded {
                    self.store.zrem(written, &member).await?;
                }
                let oldest = self.store.zmin_score(&store_key, window_start + 1, now).await?;
                return Ok(rejected(window, oldest, now));
            }
            self.store
                .expire(&store_key, window.length() + Duration::from_secs(1))
                .await?;
            recorded.push(store_key);
        }
        Ok(Admission::Admitted)
    }

    /// Requests left in the shortest window. Read-only.
    pub async fn remaining(&self, key: &str, class: EndpointClass) -> u32 {
        let now = self.clock.now_millis();
        let Some(window) = self.windows(class).into_iter().next() else {
            return 0;
        };
        let store_key = store_key(key, window.name);
        let window_start = now - window.length_ms;

        let count = if self.degraded(now) {
            self.fallback.count(key, &window, now)
        } else {
            match self.store.zcount(&store_key, window_start + 1, now).await {
                Ok(count) => count,
                Err(e) => {
                    self.enter_degraded(now, &e);
                    self.fallback.count(key, &window, now)
                }
            }
        };
        let count = u32::try_from(count).unwrap_or(u32::MAX);
        window.limit.saturating_sub(count)
    }

    pub async fn info(&self, key: &str, class: EndpointClass) -> RateLimitInfo {
        let limits = self.limits(class);
        RateLimitInfo {
            per_minute: limits.per_minute,
            per_hour: limits.per_hour,
            remaining: self.remaining(key, class).await,
        }
    }

    fn degraded(&self, now: i64) -> bool {
        if self.degraded_until.load(Ordering::SeqCst) <= now {
            return false;
        }
        if self.should_log(now) {
            warn!("Rate limiting on local counters until the shared store is retried");
        }
        true
    }

    fn enter_degraded(&self, now: i64, error: &StoreError) {
        let until = now + (self.config.degrade_secs as i64) * 1000;
        self.degraded_until.store(until, Ordering::SeqCst);
        if self.should_log(now) {
            warn!(
                degrade_secs = self.config.degrade_secs,
                "Shared counter store unavailable, falling back to local rate limiting: {}", error
            );
        }
    }

    fn note_recovered(&self) {
        let until = self.degraded_until.load(Ordering::SeqCst);
        if until != 0
            && self
                .degraded_until
                .compare_exchange(until, 0, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            info!("Shared counter store reachable again, leaving degraded rate limiting");
        }
    }

    fn should_log(&self, now: i64) -> bool {
        let interval = (self.config.degraded_log_interval_secs as i64) * 1000;
        let last = self.last_degraded_log.load(Ordering::SeqCst);
        now.saturating_sub(last) >= interval
            && self
                .last_degraded_log
                .compare_exchange(last, now, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::testing::FailingStore;
    use crate::store::MemoryCounterStore;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;

    fn limiter_with(store: Arc<dyn CounterStore>, clock: Arc<ManualClock>) -> RateLimiter {
        RateLimiter::new(store, RateLimitConfig::standard(), clock)
    }

    fn memory_limiter() -> (Arc<ManualClock>, Arc<MemoryCounterStore>, RateLimiter) {
        let clock = ManualClock::shared(1_700_000_000_000);
        let store = Arc::new(MemoryCounterStore::new(clock.clone()));
        let limiter = limiter_with(store.clone(), clock.clone());
        (clock, store, limiter)
    }

    /// Memory store that can be switched off
    struct FlakyStore {
        inner: MemoryCounterStore,
        down: AtomicBool,
    }

    impl FlakyStore {
        fn check(&self) -> Result<(), StoreError> {
            if self.down.load(Ordering::SeqCst) {
                Err(StoreError::Unavailable("timeout".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl CounterStore for FlakyStore {
        async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<i64, StoreError> {
            self.check()?;
            self.inner.incr_with_expiry(key, ttl).await
        }
        async fn delete(&self, key: &str) -> Result<(), StoreError> {
            self.check()?;
            self.inner.delete(key).await
        }
        async fn zadd(&self, key: &str, score: i64, member: &str) -> Result<(), StoreError> {
            self.check()?;
            self.inner.zadd(key, score, member).await
        }
        async fn zcount(&self, key: &str, min: i64, max: i64) -> Result<u64, StoreError> {
            self.check()?;
            self.inner.zcount(key, min, max).await
        }
        async fn zadd_within_limit(
            &self,
            key: &str,
            window_start: i64,
            score: i64,
            member: &str,
            limit: u32,
        ) -> Result<bool, StoreError> {
            self.check()?;
            self.inner.zadd_within_limit(key, window_start, score, member, limit).await
        }
        async fn zmin_score(&self, key: &str, min: i64, max: i64) -> Result<Option<i64>, StoreError> {
            self.check()?;
            self.inner.zmin_score(key, min, max).await
        }
        async fn zrem(&self, key: &str, member: &str) -> Result<(), StoreError> {
            self.check()?;
            self.inner.zrem(key, member).await
        }
        async fn zremrangebyscore(&self, key: &str, min: i64, max: i64) -> Result<u64, StoreError> {
            self.check()?;
            self.inner.zremrangebyscore(key, min, max).await
        }
        async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
            self.check()?;
            self.inner.expire(key, ttl).await
        }
    }

    #[tokio::test]
    async fn fifth_admitted_sixth_rejected_then_window_reopens() {
        let (clock, _store, limiter) = memory_limiter();
        let key = ip_key("203.0.113.9");

        for _ in 0..5 {
            assert!(limiter.try_consume(&key, EndpointClass::Auth).await.is_admitted());
        }
        assert!(!limiter.try_consume(&key, EndpointClass::Auth).await.is_admitted());

        clock.advance(MINUTE);
        assert!(limiter.try_consume(&key, EndpointClass::Auth).await.is_admitted());
    }

    #[tokio::test]
    async fn hourly_cap_rejects_even_when_minute_has_room() {
        let (clock, _store, limiter) = memory_limiter();
        let key = user_key(1);

        for _ in 0..5 {
            for _ in 0..4 {
                assert!(limiter.try_consume(&key, EndpointClass::Auth).await.is_admitted());
            }
            clock.advance(MINUTE);
        }
        assert_eq!(limiter.remaining(&key, EndpointClass::Auth).await, 5);
        assert!(!limiter.try_consume(&key, EndpointClass::Auth).await.is_admitted());
    }

    #[tokio::test]
    async fn hourly_rejection_leaves_minute_window_untouched() {
        let (clock, store, limiter) = memory_limiter();
        let key = user_key(2);

        for _ in 0..5 {
            for _ in 0..4 {
                assert!(limiter.try_consume(&key, EndpointClass::Auth).await.is_admitted());
            }
            clock.advance(MINUTE);
        }

        for _ in 0..3 {
            let admission = limiter.try_consume(&key, EndpointClass::Auth).await;
            assert!(matches!(admission, Admission::Rejected { window: "hour", .. }));
            // Oldest hour entry is five minutes old
            assert_eq!(admission.retry_after_secs(), Some(55 * 60));
        }
        assert_eq!(limiter.remaining(&key, EndpointClass::Auth).await, 5);

        let now = clock.now_millis();
        let minute = store.zcount(&store_key(&key, "minute"), now - 60_000 + 1, now).await.unwrap();
        assert_eq!(minute, 0);
    }

    #[tokio::test]
    async fn hourly_rejection_on_local_counters_leaves_minute_untouched() {
        let clock = ManualClock::shared(1_700_000_000_000);
        let limiter = limiter_with(Arc::new(FailingStore), clock.clone());
        let key = user_key(3);

        for _ in 0..5 {
            for _ in 0..4 {
                assert!(limiter.try_consume(&key, EndpointClass::Auth).await.is_admitted());
            }
            clock.advance(MINUTE);
        }
        for _ in 0..3 {
            assert!(!limiter.try_consume(&key, EndpointClass::Auth).await.is_admitted());
        }
        assert!(limiter.is_degraded());
        assert_eq!(limiter.remaining(&key, EndpointClass::Auth).await, 5);
    }

    #[tokio::test]
    async fn minute_rejection_reports_time_until_oldest_entry_expires() {
        let (clock, _store, limiter) = memory_limiter();
        let key = ip_key("192.0.2.44");

        assert!(limiter.try_consume(&key, EndpointClass::Auth).await.is_admitted());
        clock.advance(Duration::from_secs(20));
        for _ in 0..4 {
            assert!(limiter.try_consume(&key, EndpointClass::Auth).await.is_admitted());
        }

        let admission = limiter.try_consume(&key, EndpointClass::Auth).await;
        assert!(matches!(admission, Admission::Rejected { window: "minute", .. }));
        assert_eq!(admission.retry_after_secs(), Some(40));
    }

    #[tokio::test]
    async fn concurrent_requests_never_exceed_limit() {
        let (_clock, store, limiter) = memory_limiter();
        let limiter = Arc::new(limiter);
        let key = ip_key("203.0.113.200");

        let attempts = (0..64).map(|_| {
            let limiter = limiter.clone();
            let key = key.clone();
            tokio::spawn(async move { limiter.try_consume(&key, EndpointClass::Auth).await })
        });
        let mut admitted = 0;
        for attempt in attempts {
            if attempt.await.unwrap().is_admitted() {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 5);
        let now = 1_700_000_000_000;
        let minute = store.zcount(&store_key(&key, "minute"), 0, now).await.unwrap();
        let hour = store.zcount(&store_key(&key, "hour"), 0, now).await.unwrap();
        assert_eq!((minute, hour), (5, 5));
    }

    #[tokio::test]
    async fn rejected_attempts_are_not_recorded() {
        let (_clock, store, limiter) = memory_limiter();
        let key = ip_key("198.51.100.1");
        for _ in 0..8 {
            limiter.try_consume(&key, EndpointClass::Auth).await;
        }

        let now = 1_700_000_000_000;
        let minute = store.zcount(&store_key(&key, "minute"), 0, now).await.unwrap();
        let hour = store.zcount(&store_key(&key, "hour"), 0, now).await.unwrap();
        assert_eq!((minute, hour), (5, 5));
    }

    #[tokio::test]
    async fn disabled_hour_window_is_skipped() {
        let clock = ManualClock::shared(0);
        let store = Arc::new(MemoryCounterStore::new(clock.clone()));
        let mut config = RateLimitConfig::standard();
        config.api = WindowLimits {
            per_minute: 2,
            per_hour: None,
        };
        let limiter = RateLimiter::new(store.clone(), config, clock.clone());

        clock.set(1_000_000);
        assert!(limiter.try_consume("ip:a", EndpointClass::Api).await.is_admitted());
        assert_eq!(store.zcount("rate_limit:ip:a:hour", 0, i64::MAX).await.unwrap(), 0);
        assert_eq!(limiter.info("ip:a", EndpointClass::Api).await.per_hour, None);
    }

    #[tokio::test]
    async fn remaining_is_read_only() {
        let (_clock, _store, limiter) = memory_limiter();
        let key = ip_key("192.0.2.7");
        limiter.try_consume(&key, EndpointClass::Api).await;
        limiter.try_consume(&key, EndpointClass::Api).await;

        assert_eq!(limiter.remaining(&key, EndpointClass::Api).await, 58);
        assert_eq!(limiter.remaining(&key, EndpointClass::Api).await, 58);
        assert_eq!(
            limiter.info(&key, EndpointClass::Api).await,
            RateLimitInfo {
                per_minute: 60,
                per_hour: Some(1000),
                remaining: 58
            }
        );
    }

    #[tokio::test]
    async fn identities_do_not_share_windows() {
        let (_clock, _store, limiter) = memory_limiter();
        for _ in 0..5 {
            assert!(limiter.try_consume("ip:a", EndpointClass::Auth).await.is_admitted());
        }
        assert!(!limiter.try_consume("ip:a", EndpointClass::Auth).await.is_admitted());
        assert!(limiter.try_consume("ip:b", EndpointClass::Auth).await.is_admitted());
    }

    #[tokio::test]
    async fn store_failure_falls_back_to_local_counts() {
        let clock = ManualClock::shared(1_700_000_000_000);
        let limiter = limiter_with(Arc::new(FailingStore), clock.clone());

        for _ in 0..5 {
            assert!(limiter.try_consume("ip:a", EndpointClass::Auth).await.is_admitted());
        }
        assert!(!limiter.try_consume("ip:a", EndpointClass::Auth).await.is_admitted());
        assert!(limiter.is_degraded());
        assert_eq!(limiter.remaining("ip:a", EndpointClass::Auth).await, 0);
    }

    #[tokio::test]
    async fn store_is_retried_after_degrade_window() {
        let clock = ManualClock::shared(1_700_000_000_000);
        let store = Arc::new(FlakyStore {
            inner: MemoryCounterStore::new(clock.clone()),
            down: AtomicBool::new(true),
        });
        let limiter = limiter_with(store.clone(), clock.clone());

        assert!(limiter.try_consume("ip:a", EndpointClass::Api).await.is_admitted());
        store.down.store(false, Ordering::SeqCst);

        // Still inside the degrade window: the store is not consulted
        assert!(limiter.try_consume("ip:a", EndpointClass::Api).await.is_admitted());
        assert!(store.inner.is_empty());

        clock.advance(Duration::from_secs(301));
        assert!(limiter.try_consume("ip:a", EndpointClass::Api).await.is_admitted());
        assert!(!limiter.is_degraded());
        assert!(!store.inner.is_empty());
    }
}
