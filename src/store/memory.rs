// store/memory.rs - In-process CounterStore backed by sharded maps
//
// Used as the shared store for single-instance deployments and in tests. Each
// dashmap shard lock is held for the whole read-modify-write, which gives the
// same per-key atomicity the trait requires from a networked backend.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::task::JoinHandle;

use super::{CounterStore, StoreError};
use crate::clock::Clock;

#[derive(Debug)]
struct ScalarEntry {
    value: i64,
    expires_at: Option<i64>,
}

#[derive(Debug, Default)]
struct OrderedEntry {
    members: BTreeSet<(i64, String)>,
    scores: HashMap<String, i64>,
    expires_at: Option<i64>,
}

impl OrderedEntry {
    fn clear(&mut self) {
        self.members.clear();
        self.scores.clear();
        self.expires_at = None;
    }

    fn in_range(&self, min: i64, max: i64) -> impl Iterator<Item = &(i64, String)> {
        self.members
            .range((min, String::new())..)
            .take_while(move |(score, _)| *score <= max)
    }
}

fn is_expired(expires_at: Option<i64>, now: i64) -> bool {
    matches!(expires_at, Some(at) if at <= now)
}

fn ttl_millis(ttl: Duration) -> i64 {
    ttl.as_millis() as i64
}

pub struct MemoryCounterStore {
    scalars: DashMap<String, ScalarEntry>,
    ordered: DashMap<String, OrderedEntry>,
    clock: Arc<dyn Clock>,
}

impl MemoryCounterStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            scalars: DashMap::new(),
            ordered: DashMap::new(),
            clock,
        }
    }

    /// Drop every expired key. Expired keys are already invisible to reads;
    /// this only reclaims memory.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now_millis();
        let before = self.scalars.len() + self.ordered.len();
        self.scalars.retain(|_, entry| !is_expired(entry.expires_at, now));
        self.ordered
            .retain(|_, entry| !is_expired(entry.expires_at, now) && !entry.members.is_empty());
        before.saturating_sub(self.scalars.len() + self.ordered.len())
    }

    /// Run `sweep` on a fixed interval until the runtime shuts down
    pub fn spawn_sweeper(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let removed = self.sweep();
                if removed > 0 {
                    tracing::debug!(removed, "Swept expired counter keys");
                }
            }
        })
    }

    pub fn len(&self) -> usize {
        self.scalars.len() + self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<i64, StoreError> {
        let now = self.clock.now_millis();
        let mut entry = self.scalars.entry(key.to_string()).or_insert(ScalarEntry {
            value: 0,
            expires_at: None,
        });
        if is_expired(entry.expires_at, now) {
            entry.value = 0;
        }
        entry.value += 1;
        entry.expires_at = Some(now + ttl_millis(ttl));
        Ok(entry.value)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.scalars.remove(key);
        self.ordered.remove(key);
        Ok(())
    }

    async fn zadd(&self, key: &str, score: i64, member: &str) -> Result<(), StoreError> {
        let now = self.clock.now_millis();
        let mut entry = self.ordered.entry(key.to_string()).or_default();
        if is_expired(entry.expires_at, now) {
            entry.clear();
        }
        if let Some(previous) = entry.scores.insert(member.to_string(), score) {
            entry.members.remove(&(previous, member.to_string()));
        }
        entry.members.insert((score, member.to_string()));
        Ok(())
    }

    async fn zcount(&self, key: &str, min: i64, max: i64) -> Result<u64, StoreError> {
        let now = self.clock.now_millis();
        let count = match self.ordered.get(key) {
            Some(entry) if !is_expired(entry.expires_at, now) => entry.in_range(min, max).count(),
            _ => 0,
        };
        Ok(count as u64)
    }

    async fn zadd_within_limit(
        &self,
        key: &str,
        window_start: i64,
        score: i64,
        member: &str,
        limit: u32,
    ) -> Result<bool, StoreError> {
        let now = self.clock.now_millis();
        let mut entry = self.ordered.entry(key.to_string()).or_default();
        if is_expired(entry.expires_at, now) {
            entry.clear();
        }
        let live = entry.in_range(window_start.saturating_add(1), i64::MAX).count();
        if live >= limit as usize {
            return Ok(false);
        }
        if let Some(previous) = entry.scores.insert(member.to_string(), score) {
            entry.members.remove(&(previous, member.to_string()));
        }
        entry.members.insert((score, member.to_string()));
        Ok(true)
    }

    async fn zmin_score(&self, key: &str, min: i64, max: i64) -> Result<Option<i64>, StoreError> {
        let now = self.clock.now_millis();
        let lowest = match self.ordered.get(key) {
            Some(entry) if !is_expired(entry.expires_at, now) => {
                entry.in_range(min, max).next().map(|(score, _)| *score)
            }
            _ => None,
        };
        Ok(lowest)
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<(), StoreError> {
        if let Some(mut entry) = self.ordered.get_mut(key) {
            if let Some(score) = entry.scores.remove(member) {
                entry.members.remove(&(score, member.to_string()));
            }
        }
        Ok(())
    }

    async fn zremrangebyscore(&self, key: &str, min: i64, max: i64) -> Result<u64, StoreError> {
        let Some(mut entry) = self.ordered.get_mut(key) else {
            return Ok(0);
        };
        let doomed: Vec<(i64, String)> = entry.in_range(min, max).cloned().collect();
        for item in &doomed {
            entry.members.remove(item);
            entry.scores.remove(&item.1);
        }
        Ok(doomed.len() as u64)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let expires_at = Some(self.clock.now_millis() + ttl_millis(ttl));
        if let Some(mut entry) = self.scalars.get_mut(key) {
            entry.expires_at = expires_at;
        }
        if let Some(mut entry) = self.ordered.get_mut(key) {
            entry.expires_at = expires_at;
        }
        Ok(())
    }
}
