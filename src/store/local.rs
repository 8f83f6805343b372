// store/local.rs - Process-local fallback counters
//
// Used while the shared counter store is unreachable. Both structures are
// sharded dashmaps: every read-modify-write holds the shard lock for its key, so
// concurrent requests for the same identity never lose an increment. Counts are
// only visible to this process.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;

use crate::clock::Clock;

/// One window of a multi-window sliding log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSpec {
    pub name: &'static str,
    pub length_ms: i64,
    pub limit: u32,
}

impl WindowSpec {
    pub fn length(&self) -> Duration {
        Duration::from_millis(self.length_ms.max(0) as u64)
    }
}

/// Window that refused an event, with its oldest live timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRejection {
    pub window: WindowSpec,
    pub oldest: Option<i64>,
}

/// Sliding logs of admission timestamps, one per window, per key (rate
/// limiter fallback). All windows of a key live under one map entry.
#[derive(Debug, Default)]
pub struct LocalSlidingLog {
    entries: DashMap<String, HashMap<&'static str, VecDeque<i64>>>,
}

fn trim(log: &mut VecDeque<i64>, window_start: i64) {
    while log.front().is_some_and(|&ts| ts <= window_start) {
        log.pop_front();
    }
}

impl LocalSlidingLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired timestamps from every window, then record `now` in all of
    /// them if each has room. A full window records nothing anywhere.
    pub fn try_record(&self, key: &str, now: i64, windows: &[WindowSpec]) -> Result<(), LogRejection> {
        let mut logs = self.entries.entry(key.to_string()).or_default();
        for window in windows {
            let log = logs.entry(window.name).or_default();
            trim(log, now - window.length_ms);
            if log.len() >= window.limit as usize {
                return Err(LogRejection {
                    window: *window,
                    oldest: log.front().copied(),
                });
            }
        }
        for window in windows {
            logs.entry(window.name).or_default().push_back(now);
        }
        Ok(())
    }

    /// Events recorded for `key` inside `window` ending at `now`
    pub fn count(&self, key: &str, window: &WindowSpec, now: i64) -> u64 {
        let window_start = now - window.length_ms;
        self.entries
            .get(key)
            .and_then(|logs| {
                logs.get(window.name)
                    .map(|log| log.iter().filter(|&&ts| ts > window_start).count() as u64)
            })
            .unwrap_or(0)
    }

    /// Remove keys whose newest event is older than `max_window_ms`
    pub fn sweep(&self, now: i64, max_window_ms: i64) -> usize {
        let before = self.entries.len();
        let cutoff = now - max_window_ms;
        self.entries.retain(|_, logs| {
            logs.values()
                .any(|log| log.back().is_some_and(|&newest| newest > cutoff))
        });
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
struct WindowCount {
    count: u32,
    window_start: i64,
}

/// Count + window start per key (anomaly monitor fallback).
/// The count restarts at 1 once the window has elapsed.
#[derive(Debug, Default)]
pub struct LocalWindowCounter {
    entries: DashMap<String, WindowCount>,
}

impl LocalWindowCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_and_get(&self, key: &str, now: i64, window_ms: i64) -> u32 {
        let mut entry = self.entries.entry(key.to_string()).or_insert(WindowCount {
            count: 0,
            window_start: now,
        });
        if now - entry.window_start > window_ms {
            entry.count = 0;
            entry.window_start = now;
        }
        entry.count += 1;
        entry.count
    }

    pub fn get(&self, key: &str, now: i64, window_ms: i64) -> u32 {
        match self.entries.get(key) {
            Some(entry) if now - entry.window_start <= window_ms => entry.count,
            _ => 0,
        }
    }

    pub fn remove(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn sweep(&self, now: i64, window_ms: i64) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now - entry.window_start <= window_ms);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Periodically reclaim idle fallback entries.
///
/// `sliding` entries are kept for `sliding_window`, `counters` for
/// `counter_window`; both are read through the same clock as the owners.
pub fn spawn_local_sweeper(
    sliding: Arc<LocalSlidingLog>,
    sliding_window: Duration,
    counters: Vec<(Arc<LocalWindowCounter>, Duration)>,
    clock: Arc<dyn Clock>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let now = clock.now_millis();
            let mut removed = sliding.sweep(now, sliding_window.as_millis() as i64);
            for (counter, window) in &counters {
                removed += counter.sweep(now, window.as_millis() as i64);
            }
            if removed > 0 {
                tracing::debug!(removed, "Swept idle local fallback entries");
            }
        }
    })
}
