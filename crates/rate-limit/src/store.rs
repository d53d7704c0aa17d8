use chrono::{DateTime, Utc};
use creatorgate_common::GateResult;
use dashmap::DashMap;

use crate::fixed_window::{self, CounterEntry, Quota, WindowSnapshot};

/// Identifies one counter: a policy and the identity it is applied to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    pub policy: String,
    pub key: String,
}

impl CounterKey {
    pub fn new(policy: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            policy: policy.into(),
            key: key.into(),
        }
    }
}

/// Storage for fixed-window counters.
///
/// `acquire` must run the check and the increment as one atomic step per
/// key. A shared-cache implementation needs an atomic
/// increment-with-expiry primitive (plus a bounded timeout, reported as
/// [`GateError::BackendUnavailable`](creatorgate_common::GateError)) to keep
/// that guarantee across processes.
pub trait CounterStore: Send + Sync {
    /// Run one admission attempt against the counter for `key`, creating it
    /// on first use.
    fn acquire(
        &self,
        key: &CounterKey,
        quota: &Quota,
        now: DateTime<Utc>,
    ) -> GateResult<WindowSnapshot>;

    /// Current state of a counter, if one exists.
    fn get(&self, key: &CounterKey) -> GateResult<Option<CounterEntry>>;

    /// Drop a counter. Returns `true` if it existed.
    fn reset(&self, key: &CounterKey) -> GateResult<bool>;

    /// Remove every stale counter. Returns how many were removed.
    fn sweep(&self, now: DateTime<Utc>) -> usize;

    /// Number of counters currently held.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-process counter store.
///
/// `DashMap` shards its locks, so an `acquire` only contends with requests
/// whose keys hash to the same shard.
#[derive(Default)]
pub struct MemoryStore {
    counters: DashMap<CounterKey, CounterEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CounterStore for MemoryStore {
    fn acquire(
        &self,
        key: &CounterKey,
        quota: &Quota,
        now: DateTime<Utc>,
    ) -> GateResult<WindowSnapshot> {
        // The entry guard holds the shard write lock until it drops.
        let mut entry = self
            .counters
            .entry(key.clone())
            .or_insert_with(|| CounterEntry::new(now, quota.window));

        Ok(fixed_window::admit(entry.value_mut(), quota, now))
    }

    fn get(&self, key: &CounterKey) -> GateResult<Option<CounterEntry>> {
        Ok(self.counters.get(key).map(|entry| entry.value().clone()))
    }

    fn reset(&self, key: &CounterKey) -> GateResult<bool> {
        Ok(self.counters.remove(key).is_some())
    }

    fn sweep(&self, now: DateTime<Utc>) -> usize {
        let before = self.counters.len();
        self.counters.retain(|_key, entry| !entry.is_stale(now));
        let removed = before.saturating_sub(self.counters.len());

        tracing::debug!(
            removed,
            remaining = self.counters.len(),
            "counter sweep complete"
        );

        removed
    }

    fn len(&self) -> usize {
        self.counters.len()
    }
}
