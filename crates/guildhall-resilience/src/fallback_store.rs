// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bounded in-memory counter store used while the shared cache is down.
//!
//! Each key holds a counter that expires `window` after it was created;
//! increments inside the window do not extend it. The store never holds more
//! than `max_entries` keys. When a new key arrives at capacity:
//!
//! 1. all expired entries are removed;
//! 2. if still at capacity, the oldest 10% of entries by insertion order are
//!    removed (approximate LRU, no access-time bookkeeping).
//!
//! Nothing is persisted; a restart starts empty.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::metrics::ResilienceMetrics;

/// Default capacity.
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

#[derive(Debug, Clone)]
struct RateLimitEntry {
    count: u64,
    expires_at: Instant,
    /// Insertion order, used for capacity eviction.
    seq: u64,
}

impl RateLimitEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Bounded, self-expiring key -> counter map.
pub struct MemoryFallbackStore {
    entries: HashMap<String, RateLimitEntry>,
    max_entries: usize,
    next_seq: u64,
    metrics: Option<ResilienceMetrics>,
}

impl Default for MemoryFallbackStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl MemoryFallbackStore {
    /// Create an empty store holding at most `max_entries` keys.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            max_entries: max_entries.max(1),
            next_seq: 0,
            metrics: None,
        }
    }

    /// Export size and evictions through `metrics`.
    pub fn with_metrics(mut self, metrics: ResilienceMetrics) -> Self {
        metrics.set_fallback_entries(self.entries.len());
        self.metrics = Some(metrics);
        self
    }

    /// Increment the counter for `key`, starting a new window if the key is
    /// missing or expired. Returns the new count.
    pub fn increment(&mut self, key: &str, window: Duration) -> u64 {
        let now = Instant::now();

        if let Some(entry) = self.entries.get_mut(key)
            && entry.is_live(now)
        {
            entry.count += 1;
            return entry.count;
        }

        if !self.entries.contains_key(key) && self.entries.len() >= self.max_entries {
            self.evict(now);
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            key.to_string(),
            RateLimitEntry {
                count: 1,
                expires_at: now + window,
                seq,
            },
        );
        self.publish_size();
        1
    }

    /// Current count for `key`, 0 if missing or expired.
    pub fn get_count(&self, key: &str) -> u64 {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.count)
            .unwrap_or(0)
    }

    /// Whole seconds until `key` expires (rounded up), 0 if missing or expired.
    pub fn get_ttl(&self, key: &str) -> u64 {
        let now = Instant::now();
        match self.entries.get(key).filter(|e| e.is_live(now)) {
            Some(entry) => {
                let remaining = entry.expires_at - now;
                let secs = remaining.as_secs();
                if remaining.subsec_nanos() > 0 {
                    secs + 1
                } else {
                    secs
                }
            }
            None => 0,
        }
    }

    /// Number of stored entries, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Capacity.
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn purge_expired(&mut self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.is_live(now));
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!(removed, remaining = self.entries.len(), "Purged expired fallback entries");
            self.publish_size();
        }
        removed
    }

    fn evict(&mut self, now: Instant) {
        self.entries.retain(|_, e| e.is_live(now));
        if self.entries.len() < self.max_entries {
            self.publish_size();
            return;
        }

        let to_remove = (self.entries.len() / 10).max(1);
        let mut by_age: Vec<(u64, String)> = self
            .entries
            .iter()
            .map(|(k, e)| (e.seq, k.clone()))
            .collect();
        by_age.sort_unstable_by_key(|(seq, _)| *seq);

        for (_, key) in by_age.into_iter().take(to_remove) {
            self.entries.remove(&key);
        }

        debug!(
            evicted = to_remove,
            remaining = self.entries.len(),
            "Fallback store at capacity, evicted oldest entries"
        );
        if let Some(metrics) = &self.metrics {
            metrics.add_fallback_evictions(to_remove);
        }
        self.publish_size();
    }

    fn publish_size(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.set_fallback_entries(self.entries.len());
        }
    }
}
