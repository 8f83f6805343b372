// clock.rs - Millisecond time source shared by the counter windows
//
// Window arithmetic (rate limiter scores, anomaly window starts, store TTLs) is
// done in epoch milliseconds. Components take an `Arc<dyn Clock>` so tests can
// move time forward without sleeping.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub trait Clock: Send + Sync {
    /// Current time in milliseconds since the Unix epoch
    fn now_millis(&self) -> i64;
}

/// Wall clock backed by chrono
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Manually advanced clock for deterministic window tests
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(start_millis),
        }
    }

    pub fn shared(start_millis: i64) -> Arc<Self> {
        Arc::new(Self::new(start_millis))
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }

    pub fn set(&self, millis: i64) {
        self.now.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Default clock used by the server
pub fn system() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}
