//! LRU cache for inference results.
//!
//! Results are keyed by a deterministic hash of the input ids, the sampling
//! parameters, and the model version, so a repeated prompt with identical
//! settings skips the backend entirely. Recency is tracked with a monotonic
//! clock and an ordered index, so eviction always removes the globally
//! least-recently-used entry without scanning.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};

use crate::backend::RunResult;
use crate::config::{SamplingMode, SamplingParams};

/// Deterministic cache key over `(input ids, sampling params, model version)`.
///
/// Float parameters are hashed by their exact bit patterns, so two keys are
/// equal precisely when every run-relevant input is identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey(u64);

impl CacheKey {
    /// Derive the key for one generation call.
    pub fn new(input_ids: &[u32], params: &SamplingParams, model_version: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        input_ids.hash(&mut hasher);
        params.temperature.to_bits().hash(&mut hasher);
        let mode = match params.mode {
            SamplingMode::TopK => 0u8,
            SamplingMode::TopP => 1u8,
        };
        mode.hash(&mut hasher);
        params.top_k.hash(&mut hasher);
        params.top_p.to_bits().hash(&mut hasher);
        model_version.hash(&mut hasher);
        Self(hasher.finish())
    }
}

/// Cache occupancy and traffic counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of live entries.
    pub entries: usize,
    /// Maximum number of entries.
    pub capacity: usize,
    /// Lookups that found an entry.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
}

#[derive(Debug)]
struct CacheSlot {
    result: RunResult,
    stamp: u64,
}

/// LRU cache of sampling-ready inference results.
#[derive(Debug)]
pub struct ResultCache {
    capacity: usize,
    entries: HashMap<CacheKey, CacheSlot>,
    recency: BTreeMap<u64, CacheKey>,
    clock: u64,
    hits: u64,
    misses: u64,
}

/// Default maximum number of cached results.
pub const DEFAULT_CACHE_CAPACITY: usize = 20;

impl ResultCache {
    /// Create a cache holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            recency: BTreeMap::new(),
            clock: 0,
            hits: 0,
            misses: 0,
        }
    }

    /// Look up a result, refreshing its recency on a hit.
    ///
    /// Callers get a copy, never a view into cache storage.
    pub fn get(&mut self, key: &CacheKey) -> Option<RunResult> {
        let clock = self.next_stamp();
        match self.entries.get_mut(key) {
            Some(slot) => {
                self.recency.remove(&slot.stamp);
                slot.stamp = clock;
                self.recency.insert(clock, *key);
                self.hits += 1;
                Some(slot.result.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Insert or overwrite a result.
    ///
    /// A new key at capacity evicts the least-recently-used entry first; an
    /// existing key is overwritten in place without evicting.
    pub fn set(&mut self, key: CacheKey, result: RunResult) {
        if self.capacity == 0 {
            return;
        }
        let stamp = self.next_stamp();
        if let Some(slot) = self.entries.get_mut(&key) {
            self.recency.remove(&slot.stamp);
            *slot = CacheSlot { result, stamp };
            self.recency.insert(stamp, key);
            return;
        }
        if self.entries.len() >= self.capacity {
            if let Some((_, oldest)) = self.recency.pop_first() {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(key, CacheSlot { result, stamp });
        self.recency.insert(stamp, key);
    }

    /// Drop every entry computed under a different model version.
    ///
    /// Used when the model is reloaded: logits from another model are
    /// meaningless.
    pub fn invalidate_for_version(&mut self, current_version: &str) {
        let stale: Vec<(CacheKey, u64)> = self
            .entries
            .iter()
            .filter(|(_, slot)| slot.result.model_version != current_version)
            .map(|(key, slot)| (*key, slot.stamp))
            .collect();
        for (key, stamp) in stale {
            self.entries.remove(&key);
            self.recency.remove(&stamp);
        }
    }

    /// Drop all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
    }

    /// Current occupancy and traffic counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            capacity: self.capacity,
            hits: self.hits,
            misses: self.misses,
        }
    }

    fn next_stamp(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}
