//! Entry Store - Budgeted LRU Storage
//!
//! Key/value storage for cached upstream responses with a global byte budget.
//!
//! # Design
//!
//! - One mutex guards the entry map, the LRU index, the group index and the budget
//!   counter, so every mutation updates `current_size` in the same critical section
//! - The LRU index is a `BTreeMap` ordered by (last access stamp, creation stamp);
//!   eviction pops from the front
//! - Eviction runs synchronously inside `put`: after `put` returns,
//!   `current_size <= max_size`
//! - An expiry index ordered by deadline makes reaping proportional to what expired
//! - Scans over all entries walk the key-ordered map in chunks of `SCAN_CHUNK`,
//!   taking the lock once per chunk
//! - Cold storage is never called with the lock held. Payloads live under
//!   `key#generation`, so a write that loses a race is detected and undone, and
//!   removals queued under the lock run after it is released

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, trace, warn};

use super::clock::{Clock, SystemClock};
use super::cold::{ColdStorage, InMemoryColdStorage};
use super::compression::{CompressionAlgorithm, CompressionManager};
use super::entry::{CacheEntry, EntryMetadata, Location, LruKey, StoredEntry, Tier};
use super::metrics::CacheMetrics;
use crate::error::{Error, Result};

/// Entries visited per lock acquisition by full scans
pub(crate) const SCAN_CHUNK: usize = 1024;

/// Cold storage key of one generation of an entry
pub(crate) fn cold_key(key: &str, generation: u64) -> String {
    format!("{}#{}", key, generation)
}

// =============================================================================
// Key Patterns
// =============================================================================

/// Shell-style glob over cache keys (`*`, `?`, `[...]`), anchored at both ends
#[derive(Debug, Clone)]
pub struct KeyPattern {
    glob: String,
    regex: Regex,
}

impl KeyPattern {
    /// Compile a glob
    pub fn new(glob: &str) -> Result<Self> {
        let mut out = String::with_capacity(glob.len() * 2 + 2);
        out.push('^');

        let chars: Vec<char> = glob.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            match chars[i] {
                '*' => out.push_str(".*"),
                '?' => out.push('.'),
                '[' => match chars[i + 1..].iter().position(|&c| c == ']') {
                    Some(offset) if offset > 0 => {
                        let class = &chars[i + 1..i + 1 + offset];
                        out.push('[');
                        for (n, &c) in class.iter().enumerate() {
                            match c {
                                '!' | '^' if n == 0 => out.push('^'),
                                '\\' | '[' | '&' | '~' | '^' => {
                                    out.push('\\');
                                    out.push(c);
                                }
                                _ => out.push(c),
                            }
                        }
                        out.push(']');
                        i += offset + 1;
                    }
                    _ => out.push_str(&regex::escape("[")),
                },
                c => out.push_str(&regex::escape(&c.to_string())),
            }
            i += 1;
        }
        out.push('$');

        let regex = Regex::new(&out).map_err(|e| Error::InvalidPattern {
            pattern: glob.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            glob: glob.to_string(),
            regex,
        })
    }

    /// Check whether a key matches
    #[inline]
    pub fn matches(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }

    /// Original glob text
    pub fn as_str(&self) -> &str {
        &self.glob
    }
}

// =============================================================================
// Configuration & Reports
// =============================================================================

/// Entry store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Global byte budget
    pub max_size_bytes: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: super::DEFAULT_MAX_SIZE_BYTES,
        }
    }
}

/// Global budget as of a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BudgetSnapshot {
    pub max_size_bytes: u64,
    pub current_size_bytes: u64,
}

/// Result of a successful `put`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutOutcome {
    /// Keys evicted (oldest first) to make room
    pub evicted: Vec<String>,
    /// Whether an entry with the same key was replaced
    pub replaced: bool,
}

/// Per-tier occupancy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierCounts {
    pub hot_count: usize,
    pub hot_bytes: u64,
    pub cold_count: usize,
    /// Logical size of cold entries (what they count against the budget)
    pub cold_logical_bytes: u64,
    /// Compressed bytes actually held by cold storage
    pub cold_stored_bytes: u64,
}

/// Hot entry selected for demotion
#[derive(Debug, Clone)]
pub(crate) struct DemotionCandidate {
    pub key: String,
    pub generation: u64,
    pub payload: Bytes,
}

// =============================================================================
// Entry Store
// =============================================================================

#[derive(Default)]
struct StoreInner {
    entries: BTreeMap<String, StoredEntry>,
    lru: BTreeMap<LruKey, String>,
    /// (expires_at, generation) -> key
    expiry: BTreeMap<(DateTime<Utc>, u64), String>,
    groups: HashMap<String, HashSet<String>>,
    current_size: u64,
    counts: TierCounts,
    /// Cold payloads of removed entries, dropped once the lock is released
    cold_garbage: Vec<String>,
}

/// Budgeted key/value store with LRU eviction
pub struct EntryStore {
    inner: Mutex<StoreInner>,
    max_size: AtomicU64,
    stamp: AtomicU64,
    clock: Arc<dyn Clock>,
    cold: Arc<dyn ColdStorage>,
    compression: Arc<CompressionManager>,
    metrics: Arc<CacheMetrics>,
}

impl EntryStore {
    /// Create a store with all collaborators supplied
    pub fn new(
        config: StoreConfig,
        clock: Arc<dyn Clock>,
        cold: Arc<dyn ColdStorage>,
        compression: Arc<CompressionManager>,
        metrics: Arc<CacheMetrics>,
    ) -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            max_size: AtomicU64::new(config.max_size_bytes),
            stamp: AtomicU64::new(0),
            clock,
            cold,
            compression,
            metrics,
        }
    }

    /// Store with in-memory cold storage and the system clock
    pub fn in_memory(max_size_bytes: u64) -> Self {
        Self::with_clock(max_size_bytes, Arc::new(SystemClock))
    }

    /// Store with in-memory cold storage and a custom clock
    pub fn with_clock(max_size_bytes: u64, clock: Arc<dyn Clock>) -> Self {
        Self::new(
            StoreConfig { max_size_bytes },
            clock,
            Arc::new(InMemoryColdStorage::new()),
            Arc::new(CompressionManager::new()),
            Arc::new(CacheMetrics::new()),
        )
    }

    #[inline]
    fn next_stamp(&self) -> u64 {
        self.stamp.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Clock used for timestamps
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Metrics shared with the store
    pub fn metrics(&self) -> &Arc<CacheMetrics> {
        &self.metrics
    }

    /// Codec used for cold payloads
    pub fn compression(&self) -> &Arc<CompressionManager> {
        &self.compression
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Look up a live entry, recording the access.
    ///
    /// Expired entries are removed and reported as a miss. Cold payloads are read
    /// and decompressed outside the store lock; an unreadable cold payload drops the
    /// entry and is reported as a miss.
    pub fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let now = self.clock.now();

        let (meta, location, generation) = {
            let mut inner = self.inner.lock();
            let Some(expired) = inner.entries.get(key).map(|e| e.meta.is_expired(now)) else {
                drop(inner);
                self.metrics.record_miss();
                trace!(key, "cache miss");
                return Ok(None);
            };

            if expired {
                self.remove_locked(&mut inner, key);
                self.release(inner);
                self.metrics.record_expiration(1);
                self.metrics.record_miss();
                trace!(key, "expired entry removed on read");
                return Ok(None);
            }

            let stamp = self.next_stamp();
            let inner = &mut *inner;
            let Some(stored) = inner.entries.get_mut(key) else {
                return Err(Error::Internal(format!("entry {} vanished under lock", key)));
            };
            inner.lru.remove(&stored.lru_key());
            stored.access_stamp = stamp;
            stored.meta.access_count += 1;
            stored.meta.last_access_at = now;
            inner.lru.insert(stored.lru_key(), key.to_string());
            (
                stored.meta.clone(),
                stored.location.clone(),
                stored.created_stamp,
            )
        };

        let value = match location {
            Location::Hot(bytes) => bytes,
            Location::Cold { algorithm, .. } => match self.read_cold(key, generation, algorithm)? {
                Some(bytes) => bytes,
                None => {
                    self.metrics.record_miss();
                    return Ok(None);
                }
            },
        };

        self.metrics.record_hit();
        Ok(Some(CacheEntry::new(meta, value, generation)))
    }

    fn read_cold(
        &self,
        key: &str,
        generation: u64,
        algorithm: CompressionAlgorithm,
    ) -> Result<Option<Bytes>> {
        let stored = match self.cold.get(&cold_key(key, generation))? {
            Some(stored) => stored,
            None => {
                // Promoted or deleted since the lock was released
                let inner = self.inner.lock();
                return Ok(match inner.entries.get(key) {
                    Some(e) if e.created_stamp == generation => match &e.location {
                        Location::Hot(bytes) => Some(bytes.clone()),
                        Location::Cold { .. } => None,
                    },
                    _ => None,
                });
            }
        };

        match self.compression.decompress(&stored, algorithm) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) => {
                warn!(key, generation, error = %e, "dropping unreadable cold entry");
                self.delete_generation(key, generation);
                Ok(None)
            }
        }
    }

    /// Metadata of a live entry without recording an access
    pub fn peek(&self, key: &str) -> Option<EntryMetadata> {
        let now = self.clock.now();
        let inner = self.inner.lock();
        inner
            .entries
            .get(key)
            .filter(|e| !e.meta.is_expired(now))
            .map(|e| e.meta.clone())
    }

    /// Check whether a live entry exists
    pub fn contains(&self, key: &str) -> bool {
        self.peek(key).is_some()
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Insert or replace an entry.
    ///
    /// Evicts least-recently-used entries until the new entry fits. An entry larger
    /// than the whole budget is rejected and leaves the store unchanged.
    pub fn put(
        &self,
        key: &str,
        value: Bytes,
        size_bytes: u64,
        group: &str,
        ttl: Duration,
    ) -> Result<PutOutcome> {
        if ttl.is_zero() {
            return Err(Error::Config(format!("TTL for {} must be positive", key)));
        }
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| Error::Config(format!("TTL for {} out of range: {}", key, e)))?;

        let max = self.max_size.load(Ordering::Acquire);
        if size_bytes > max {
            self.metrics.record_rejected_insert();
            warn!(key, size_bytes, max, "rejecting entry larger than budget");
            return Err(Error::EntryTooLarge {
                key: key.to_string(),
                size: size_bytes,
                max,
            });
        }

        let now = self.clock.now();
        let mut outcome = PutOutcome::default();

        let mut inner = self.inner.lock();
        outcome.replaced = self.remove_locked(&mut inner, key).is_some();

        while inner.current_size + size_bytes > max {
            let Some(victim) = inner.lru.values().next().cloned() else {
                break;
            };
            self.remove_locked(&mut inner, &victim);
            outcome.evicted.push(victim);
        }

        let stamp = self.next_stamp();
        let stored = StoredEntry {
            meta: EntryMetadata {
                key: key.to_string(),
                group: group.to_string(),
                size_bytes,
                created_at: now,
                expires_at: now + ttl,
                last_access_at: now,
                access_count: 1,
                tier: Tier::Hot,
            },
            location: Location::Hot(value),
            created_stamp: stamp,
            access_stamp: stamp,
        };
        self.insert_locked(&mut inner, stored);
        self.release(inner);

        if !outcome.evicted.is_empty() {
            self.metrics.record_evictions(outcome.evicted.len() as u64);
            debug!(
                key,
                evicted = outcome.evicted.len(),
                "evicted LRU entries to fit new entry"
            );
        }

        Ok(outcome)
    }

    /// Remove an entry
    pub fn delete(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        let removed = self.remove_locked(&mut inner, key).is_some();
        self.release(inner);
        removed
    }

    /// Remove an entry only if it still has the given generation
    pub(crate) fn delete_generation(&self, key: &str, generation: u64) -> bool {
        let mut inner = self.inner.lock();
        let current = inner
            .entries
            .get(key)
            .is_some_and(|e| e.created_stamp == generation);
        let removed = current && self.remove_locked(&mut inner, key).is_some();
        self.release(inner);
        removed
    }

    /// Remove every entry in a group
    pub fn delete_by_group(&self, group: &str) -> usize {
        let mut inner = self.inner.lock();
        let keys: Vec<String> = match inner.groups.get(group) {
            Some(keys) => keys.iter().cloned().collect(),
            None => return 0,
        };
        let removed = keys
            .iter()
            .filter(|k| self.remove_locked(&mut inner, k).is_some())
            .count();
        self.release(inner);
        removed
    }

    /// Remove every entry whose key matches a glob.
    ///
    /// Matching and deletion both proceed in bounded chunks; entries inserted while
    /// the scan runs may or may not be removed.
    pub fn delete_by_pattern(&self, glob: &str) -> Result<usize> {
        let pattern = KeyPattern::new(glob)?;
        Ok(self
            .matching_keys(&pattern)
            .chunks(SCAN_CHUNK)
            .map(|chunk| self.delete_keys(chunk))
            .sum())
    }

    /// Remove a batch of keys in one critical section
    pub fn delete_keys(&self, keys: &[String]) -> usize {
        let mut inner = self.inner.lock();
        let removed = keys
            .iter()
            .filter(|k| self.remove_locked(&mut inner, k).is_some())
            .count();
        self.release(inner);
        removed
    }

    /// Remove everything in one pass
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let cold_keys: Vec<String> = inner
            .entries
            .values()
            .filter(|e| matches!(e.location, Location::Cold { .. }))
            .map(|e| cold_key(&e.meta.key, e.created_stamp))
            .collect();
        let cleared = inner.entries.len();
        let mut garbage = std::mem::take(&mut *inner).cold_garbage;
        drop(inner);

        garbage.extend(cold_keys);
        self.drop_cold(garbage);
        cleared
    }

    /// Remove up to `limit` expired entries, earliest deadline first
    pub fn reap_expired(&self, limit: usize) -> usize {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let expired: Vec<String> = inner
            .expiry
            .range(..=(now, u64::MAX))
            .take(limit)
            .map(|(_, key)| key.clone())
            .collect();
        let reaped = expired
            .iter()
            .filter(|k| self.remove_locked(&mut inner, k).is_some())
            .count();
        self.release(inner);

        if reaped > 0 {
            self.metrics.record_expiration(reaped as u64);
            debug!(reaped, "reaped expired entries");
        }
        reaped
    }

    /// Remove entries of `group` created more than `max_age` ago
    pub fn rotate_group(&self, group: &str, max_age: chrono::Duration) -> usize {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let stale: Vec<String> = match inner.groups.get(group) {
            Some(keys) => keys
                .iter()
                .filter(|k| {
                    inner
                        .entries
                        .get(k.as_str())
                        .is_some_and(|e| e.meta.age(now) > max_age)
                })
                .cloned()
                .collect(),
            None => return 0,
        };
        let rotated = stale
            .iter()
            .filter(|k| self.remove_locked(&mut inner, k).is_some())
            .count();
        self.release(inner);
        rotated
    }

    /// Change the budget, evicting LRU entries if it shrank. Returns the eviction count.
    pub fn set_max_size(&self, max_size_bytes: u64) -> usize {
        let mut inner = self.inner.lock();
        self.max_size.store(max_size_bytes, Ordering::Release);

        let mut evicted = 0;
        while inner.current_size > max_size_bytes {
            let Some(victim) = inner.lru.values().next().cloned() else {
                break;
            };
            self.remove_locked(&mut inner, &victim);
            evicted += 1;
        }
        self.release(inner);

        if evicted > 0 {
            self.metrics.record_evictions(evicted as u64);
            debug!(evicted, max_size_bytes, "budget reduced");
        }
        evicted
    }

    // -------------------------------------------------------------------------
    // Key selection for maintenance passes
    // -------------------------------------------------------------------------

    /// Up to `limit` keys, least recently used first
    pub fn lru_keys(&self, limit: usize) -> Vec<String> {
        let inner = self.inner.lock();
        inner.lru.values().take(limit).cloned().collect()
    }

    /// Up to `limit` keys of a group
    pub fn group_keys(&self, group: &str, limit: usize) -> Vec<String> {
        let inner = self.inner.lock();
        inner
            .groups
            .get(group)
            .map(|keys| keys.iter().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    /// Number of entries in a group
    pub fn group_len(&self, group: &str) -> usize {
        self.inner.lock().groups.get(group).map_or(0, HashSet::len)
    }

    /// Keys matching a glob, in key order
    pub fn matching_keys(&self, pattern: &KeyPattern) -> Vec<String> {
        self.scan(|key, _| pattern.matches(key).then(|| key.to_string()))
    }

    /// Number of keys matching a glob
    pub fn count_matching(&self, pattern: &KeyPattern) -> usize {
        self.scan(|key, _| pattern.matches(key).then_some(())).len()
    }

    /// Metadata of every stored entry, in key order
    pub fn entries_metadata(&self) -> Vec<EntryMetadata> {
        self.scan(|_, stored| Some(stored.meta.clone()))
    }

    /// Visit every entry in key order, `SCAN_CHUNK` entries per lock acquisition.
    ///
    /// Not a snapshot: entries inserted or removed between chunks may or may not be
    /// seen.
    fn scan<T, F>(&self, mut visit: F) -> Vec<T>
    where
        F: FnMut(&str, &StoredEntry) -> Option<T>,
    {
        let mut out = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let inner = self.inner.lock();
            let range = match &cursor {
                Some(after) => inner
                    .entries
                    .range::<str, _>((Bound::Excluded(after.as_str()), Bound::Unbounded)),
                None => inner.entries.range::<str, _>(..),
            };

            let mut visited = 0;
            let mut last = None;
            for (key, stored) in range.take(SCAN_CHUNK) {
                visited += 1;
                if let Some(item) = visit(key.as_str(), stored) {
                    out.push(item);
                }
                last = Some(key);
            }
            if visited < SCAN_CHUNK {
                return out;
            }
            cursor = last.cloned();
        }
    }

    // -------------------------------------------------------------------------
    // Tier transitions
    // -------------------------------------------------------------------------

    /// Payload of a hot entry, with the generation it belongs to
    pub(crate) fn hot_payload(&self, key: &str) -> Option<DemotionCandidate> {
        let inner = self.inner.lock();
        let stored = inner.entries.get(key)?;
        match &stored.location {
            Location::Hot(bytes) => Some(DemotionCandidate {
                key: key.to_string(),
                generation: stored.created_stamp,
                payload: bytes.clone(),
            }),
            Location::Cold { .. } => None,
        }
    }

    /// Swap a hot payload for its compressed cold copy.
    ///
    /// The copy is written before the lock is taken. Returns false, and removes the
    /// copy again, when the entry was deleted, replaced or already demoted since it
    /// was selected.
    pub(crate) fn complete_demotion(
        &self,
        key: &str,
        generation: u64,
        compressed: Bytes,
        algorithm: CompressionAlgorithm,
    ) -> Result<bool> {
        let cold_key = cold_key(key, generation);
        let stored_bytes = compressed.len() as u64;
        self.cold.put(&cold_key, compressed)?;

        let demoted = {
            let mut inner = self.inner.lock();
            let inner = &mut *inner;
            match inner.entries.get_mut(key) {
                Some(stored)
                    if stored.created_stamp == generation
                        && matches!(stored.location, Location::Hot(_)) =>
                {
                    stored.location = Location::Cold {
                        algorithm,
                        stored_bytes,
                    };
                    stored.meta.tier = Tier::Cold;

                    let size = stored.meta.size_bytes;
                    inner.counts.hot_count -= 1;
                    inner.counts.hot_bytes -= size;
                    inner.counts.cold_count += 1;
                    inner.counts.cold_logical_bytes += size;
                    inner.counts.cold_stored_bytes += stored_bytes;
                    true
                }
                _ => false,
            }
        };

        if !demoted {
            self.drop_cold(vec![cold_key]);
        }
        Ok(demoted)
    }

    /// Move a cold entry back to the hot location
    pub(crate) fn promote(&self, key: &str, generation: u64, value: Bytes) -> bool {
        {
            let mut inner = self.inner.lock();
            let inner = &mut *inner;
            let Some(stored) = inner.entries.get_mut(key) else {
                return false;
            };
            if stored.created_stamp != generation {
                return false;
            }
            let Location::Cold { stored_bytes, .. } = stored.location else {
                return false;
            };

            stored.location = Location::Hot(value);
            stored.meta.tier = Tier::Hot;

            let size = stored.meta.size_bytes;
            inner.counts.cold_count -= 1;
            inner.counts.cold_logical_bytes -= size;
            inner.counts.cold_stored_bytes -= stored_bytes;
            inner.counts.hot_count += 1;
            inner.counts.hot_bytes += size;
        }

        self.drop_cold(vec![cold_key(key, generation)]);
        true
    }

    /// Generation of a stored entry
    pub(crate) fn generation(&self, key: &str) -> Option<u64> {
        self.inner.lock().entries.get(key).map(|e| e.created_stamp)
    }

    // -------------------------------------------------------------------------
    // Accounting
    // -------------------------------------------------------------------------

    /// Number of stored entries (including expired ones not yet reaped)
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Number of entries that have not expired
    pub fn live_len(&self) -> usize {
        let now = self.clock.now();
        let inner = self.inner.lock();
        let expired = inner.expiry.range(..=(now, u64::MAX)).count();
        inner.entries.len().saturating_sub(expired)
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes counted against the budget
    pub fn current_size(&self) -> u64 {
        self.inner.lock().current_size
    }

    /// Configured budget
    pub fn max_size(&self) -> u64 {
        self.max_size.load(Ordering::Acquire)
    }

    /// Budget snapshot taken under the lock
    pub fn budget(&self) -> BudgetSnapshot {
        let inner = self.inner.lock();
        BudgetSnapshot {
            max_size_bytes: self.max_size.load(Ordering::Acquire),
            current_size_bytes: inner.current_size,
        }
    }

    /// Per-tier counts
    pub fn tier_counts(&self) -> TierCounts {
        self.inner.lock().counts
    }

    /// Sum of entry sizes by full scan. Diagnostic only; the budget never uses it.
    pub fn recount_size(&self) -> u64 {
        let inner = self.inner.lock();
        inner.entries.values().map(|e| e.meta.size_bytes).sum()
    }

    // -------------------------------------------------------------------------
    // Locked helpers
    // -------------------------------------------------------------------------

    /// Unlock, then drop the cold payloads queued while the lock was held
    fn release(&self, mut inner: MutexGuard<'_, StoreInner>) {
        let garbage = std::mem::take(&mut inner.cold_garbage);
        drop(inner);
        self.drop_cold(garbage);
    }

    fn drop_cold(&self, cold_keys: Vec<String>) {
        for cold_key in cold_keys {
            if let Err(e) = self.cold.remove(&cold_key) {
                warn!(key = %cold_key, error = %e, "failed to remove cold payload");
            }
        }
    }

    fn insert_locked(&self, inner: &mut StoreInner, stored: StoredEntry) {
        let key = stored.meta.key.clone();
        let size = stored.meta.size_bytes;

        inner.lru.insert(stored.lru_key(), key.clone());
        inner
            .expiry
            .insert((stored.meta.expires_at, stored.created_stamp), key.clone());
        inner
            .groups
            .entry(stored.meta.group.clone())
            .or_default()
            .insert(key.clone());
        inner.current_size += size;
        inner.counts.hot_count += 1;
        inner.counts.hot_bytes += size;
        inner.entries.insert(key, stored);
    }

    fn remove_locked(&self, inner: &mut StoreInner, key: &str) -> Option<StoredEntry> {
        let stored = inner.entries.remove(key)?;
        let size = stored.meta.size_bytes;

        inner.lru.remove(&stored.lru_key());
        inner
            .expiry
            .remove(&(stored.meta.expires_at, stored.created_stamp));
        if let Some(keys) = inner.groups.get_mut(&stored.meta.group) {
            keys.remove(key);
            if keys.is_empty() {
                inner.groups.remove(&stored.meta.group);
            }
        }
        inner.current_size -= size;

        match stored.location {
            Location::Hot(_) => {
                inner.counts.hot_count -= 1;
                inner.counts.hot_bytes -= size;
            }
            Location::Cold { stored_bytes, .. } => {
                inner.counts.cold_count -= 1;
                inner.counts.cold_logical_bytes -= size;
                inner.counts.cold_stored_bytes -= stored_bytes;
                inner.cold_garbage.push(cold_key(key, stored.created_stamp));
            }
        }

        Some(stored)
    }
}

// =============================================================================
// Tests
// =============================================================================


// =============================================================================
// Property Tests
// =============================================================================
