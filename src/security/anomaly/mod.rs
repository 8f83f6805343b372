// security/anomaly/mod.rs - Authentication anomaly monitor
//
// Passive observer of authentication outcomes. Failures are counted per
// (origin, identity) in the shared store with a sliding expiry; the count alone
// decides the risk level. A success clears the identity's counter. Access
// denials and other suspicious requests are counted separately per origin.
//
// The monitor never blocks a request. If the store fails, counts continue in
// process-local windows.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::clock::Clock;
use crate::config::AnomalyConfig;
use crate::store::{CounterStore, LocalWindowCounter, StoreError};

pub mod event;
pub mod sink;

pub use event::{EventOutcome, RiskLevel, SecurityEvent, SecurityEventType};
pub use sink::{alert_pipeline, spawn_alert_forwarder, AlertSink, ChannelAlertSink, FanoutAlertSink, LogAlertSink};

const STORE_WARNING_INTERVAL_MS: i64 = 30_000;

/// Who and where an authentication event came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub identity: String,
    pub origin: String,
    pub user_agent: Option<String>,
}

impl AuthContext {
    pub fn new(identity: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            origin: origin.into(),
            user_agent: None,
        }
    }

    pub fn with_user_agent(mut self, user_agent: Option<String>) -> Self {
        self.user_agent = user_agent;
        self
    }
}

/// Outcome of recording one authentication failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureAssessment {
    pub attempt: u32,
    pub risk: RiskLevel,
    pub brute_force: bool,
}

/// Event-sink interface the authentication layer reports into
#[async_trait]
pub trait AuthEventFeed: Send + Sync {
    async fn on_success(&self, ctx: &AuthContext);
    async fn on_failure(&self, ctx: &AuthContext, reason: &str);
    async fn on_access_denied(&self, ctx: &AuthContext, resource: &str, action: &str);
}

pub fn failure_key(origin: &str, identity: &str) -> String {
    format!("auth_failures:{}:{}", origin, identity)
}

pub fn suspicious_key(origin: &str, activity: SecurityEventType) -> String {
    format!("suspicious:{}:{}", origin, activity.as_str())
}

pub struct AnomalyMonitor {
    store: Arc<dyn CounterStore>,
    local_failures: Arc<LocalWindowCounter>,
    local_suspicious: Arc<LocalWindowCounter>,
    sink: Arc<dyn AlertSink>,
    config: AnomalyConfig,
    clock: Arc<dyn Clock>,
    last_store_warning: AtomicI64,
}

impl AnomalyMonitor {
    pub fn new(
        store: Arc<dyn CounterStore>,
        sink: Arc<dyn AlertSink>,
        config: AnomalyConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            local_failures: Arc::new(LocalWindowCounter::new()),
            local_suspicious: Arc::new(LocalWindowCounter::new()),
            sink,
            config,
            clock,
            last_store_warning: AtomicI64::new(i64::MIN),
        }
    }

    pub fn config(&self) -> &AnomalyConfig {
        &self.config
    }

    /// Local fallback counters with their windows, for the background sweeper
    pub fn fallback_counters(&self) -> Vec<(Arc<LocalWindowCounter>, Duration)> {
        vec![
            (self.local_failures.clone(), self.failure_window()),
            (self.local_suspicious.clone(), self.suspicious_window()),
        ]
    }

    fn failure_window(&self) -> Duration {
        Duration::from_secs(self.config.failure_window_secs)
    }

    fn suspicious_window(&self) -> Duration {
        Duration::from_secs(self.config.suspicious_window_secs)
    }

    /// Clear the identity's failure counter
    pub async fn record_success(&self, ctx: &AuthContext) {
        let key = failure_key(&ctx.origin, &ctx.identity);
        let now = self.clock.now_millis();
        if let Err(e) = self.store.delete(&key).await {
            self.store_warning(now, &e);
        }
        self.local_failures.remove(&key);

        self.sink.publish(
            SecurityEvent::new(
                SecurityEventType::AuthenticationSuccess,
                &ctx.origin,
                EventOutcome::Success,
                RiskLevel::Low,
                now,
            )
            .user(&ctx.identity)
            .user_agent(ctx.user_agent.clone())
            .details("Authentication succeeded"),
        );
    }

    /// Count a failure and classify it. At or above the brute-force threshold
    /// a separate attack event follows the failure event.
    pub async fn record_failure(&self, ctx: &AuthContext, reason: &str) -> FailureAssessment {
        let key = failure_key(&ctx.origin, &ctx.identity);
        let now = self.clock.now_millis();
        let attempt = self
            .increment(&key, self.failure_window(), &self.local_failures, now)
            .await;
        let risk = RiskLevel::for_failures(attempt, &self.config);
        let brute_force = attempt >= self.config.brute_force_threshold;

        self.sink.publish(
            SecurityEvent::new(
                SecurityEventType::AuthenticationFailure,
                &ctx.origin,
                EventOutcome::Failure,
                risk,
                now,
            )
            .user(&ctx.identity)
            .user_agent(ctx.user_agent.clone())
            .attempt(attempt)
            .details(format!("Authentication failed: {}", reason)),
        );

        if brute_force {
            self.sink.publish(
                SecurityEvent::new(
                    SecurityEventType::BruteForceAttack,
                    &ctx.origin,
                    EventOutcome::Detected,
                    RiskLevel::Critical,
                    now,
                )
                .user(&ctx.identity)
                .user_agent(ctx.user_agent.clone())
                .attempt(attempt)
                .details(format!(
                    "Brute force attack detected: {} failed attempts within {} minutes",
                    attempt,
                    self.config.failure_window_secs / 60
                )),
            );
        }

        FailureAssessment {
            attempt,
            risk,
            brute_force,
        }
    }

    /// Count an authenticated-but-forbidden request for the caller's origin
    pub async fn record_access_denied(&self, ctx: &AuthContext, resource: &str, action: &str) -> RiskLevel {
        let (count, risk) = self
            .count_suspicious(&ctx.origin, SecurityEventType::AuthorizationDenied)
            .await;
        self.sink.publish(
            SecurityEvent::new(
                SecurityEventType::AuthorizationDenied,
                &ctx.origin,
                EventOutcome::Denied,
                risk,
                self.clock.now_millis(),
            )
            .user(&ctx.identity)
            .user_agent(ctx.user_agent.clone())
            .resource(resource, action)
            .attempt(count)
            .details("Access to resource denied"),
        );
        risk
    }

    /// Count a suspicious request (malformed input, probing) for an origin
    pub async fn track_suspicious_request(&self, origin: &str, path: &str, reason: &str) -> RiskLevel {
        let (count, risk) = self
            .count_suspicious(origin, SecurityEventType::SuspiciousRequest)
            .await;
        self.sink.publish(
            SecurityEvent::new(
                SecurityEventType::SuspiciousRequest,
                origin,
                EventOutcome::Detected,
                risk,
                self.clock.now_millis(),
            )
            .resource(path, "REQUEST")
            .attempt(count)
            .details(reason),
        );
        risk
    }

    async fn count_suspicious(&self, origin: &str, activity: SecurityEventType) -> (u32, RiskLevel) {
        let key = suspicious_key(origin, activity);
        let now = self.clock.now_millis();
        let count = self
            .increment(&key, self.suspicious_window(), &self.local_suspicious, now)
            .await;
        (count, RiskLevel::for_suspicious(count, &self.config))
    }

    async fn increment(&self, key: &str, window: Duration, local: &LocalWindowCounter, now: i64) -> u32 {
        match self.store.incr_with_expiry(key, window).await {
            Ok(count) => u32::try_from(count.max(0)).unwrap_or(u32::MAX),
            Err(e) => {
                self.store_warning(now, &e);
                local.increment_and_get(key, now, window.as_millis() as i64)
            }
        }
    }

    fn store_warning(&self, now: i64, error: &StoreError) {
        let last = self.last_store_warning.load(Ordering::SeqCst);
        if now.saturating_sub(last) >= STORE_WARNING_INTERVAL_MS
            && self
                .last_store_warning
                .compare_exchange(last, now, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            warn!("Shared counter store unavailable, anomaly counts are process-local: {}", error);
        }
    }
}

#[async_trait]
impl AuthEventFeed for AnomalyMonitor {
    async fn on_success(&self, ctx: &AuthContext) {
        self.record_success(ctx).await;
    }

    async fn on_failure(&self, ctx: &AuthContext, reason: &str) {
        self.record_failure(ctx, reason).await;
    }

    async fn on_access_denied(&self, ctx: &AuthContext, resource: &str, action: &str) {
        self.record_access_denied(ctx, resource, action).await;
    }
}
