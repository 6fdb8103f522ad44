//! Time-bounded memoization of search results.
//!
//! Entries are keyed by the normalized query text and `k`, expire after a
//! fixed TTL and are dropped lazily on the next lookup of the same key.
//! An optional entry bound evicts the oldest insertion first.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::types::SearchHit;

/// Collapses whitespace runs, trims and lowercases a query.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    query: String,
    k: usize,
}

impl CacheKey {
    fn new(query: &str, k: usize) -> Self {
        Self {
            query: normalize_query(query),
            k,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    results: Vec<SearchHit>,
    inserted: Instant,
    /// Matches the insertion-order record that owns this entry
    generation: u64,
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries removed because they outlived the TTL
    pub expirations: u64,
    /// Entries removed to respect the size bound
    pub evictions: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<CacheKey, CacheEntry>,
    /// Insertion order; stale records are skipped on eviction
    order: VecDeque<(CacheKey, u64)>,
    next_generation: u64,
    stats: CacheStats,
}

/// Search result cache shared by all callers of one service.
#[derive(Debug)]
pub struct SearchCache {
    ttl: Duration,
    /// 0 means unbounded
    max_entries: usize,
    state: Mutex<CacheState>,
}

impl SearchCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached results for `(query, k)` if present and younger than the TTL.
    pub fn get(&self, query: &str, k: usize) -> Option<Vec<SearchHit>> {
        self.get_at(query, k, Instant::now())
    }

    pub(crate) fn get_at(&self, query: &str, k: usize, now: Instant) -> Option<Vec<SearchHit>> {
        let key = CacheKey::new(query, k);
        let mut state = self.state.lock();

        let fresh = match state.entries.get(&key) {
            None => {
                state.stats.misses += 1;
                return None;
            }
            Some(entry) => now.saturating_duration_since(entry.inserted) < self.ttl,
        };

        if fresh {
            state.stats.hits += 1;
            return state.entries.get(&key).map(|entry| entry.results.clone());
        }

        state.entries.remove(&key);
        state.stats.expirations += 1;
        state.stats.misses += 1;
        tracing::debug!(query = %key.query, k, "cache entry expired");
        None
    }

    /// Stores results for `(query, k)`, replacing any previous entry.
    pub fn put(&self, query: &str, k: usize, results: Vec<SearchHit>) {
        self.put_at(query, k, results, Instant::now());
    }

    pub(crate) fn put_at(&self, query: &str, k: usize, results: Vec<SearchHit>, now: Instant) {
        let key = CacheKey::new(query, k);
        let mut state = self.state.lock();

        let generation = state.next_generation;
        state.next_generation += 1;
        state.order.push_back((key.clone(), generation));
        state.entries.insert(
            key,
            CacheEntry {
                results,
                inserted: now,
                generation,
            },
        );

        if self.max_entries > 0 {
            while state.entries.len() > self.max_entries {
                let Some((oldest, generation)) = state.order.pop_front() else {
                    break;
                };
                let current = state
                    .entries
                    .get(&oldest)
                    .is_some_and(|e| e.generation == generation);
                if current {
                    state.entries.remove(&oldest);
                    state.stats.evictions += 1;
                }
            }
        }

        // Keep the order queue from growing without bound on overwrites
        if state.order.len() > state.entries.len().saturating_mul(2).max(16) {
            let CacheState { entries, order, .. } = &mut *state;
            order.retain(|(key, generation)| {
                entries.get(key).is_some_and(|e| e.generation == *generation)
            });
        }
    }

    /// Removes every expired entry and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    pub(crate) fn purge_expired_at(&self, now: Instant) -> usize {
        let mut state = self.state.lock();
        let before = state.entries.len();
        let ttl = self.ttl;
        state
            .entries
            .retain(|_, entry| now.saturating_duration_since(entry.inserted) < ttl);
        let removed = before - state.entries.len();

        if removed > 0 {
            state.stats.expirations += removed as u64;
            let CacheState { entries, order, .. } = &mut *state;
            order.retain(|(key, generation)| {
                entries.get(key).is_some_and(|e| e.generation == *generation)
            });
            tracing::info!(removed, "cleared expired cache entries");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.order.clear();
    }

    pub fn stats(&self) -> CacheStats {
        self.state.lock().stats
    }
}
