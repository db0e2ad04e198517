//! Hot/Cold Tier Manager
//!
//! Classifies entries by access frequency and moves rarely read payloads into
//! compressed cold storage. Lookups stay transparent: the entry store keeps the key,
//! metadata and budget charge of a cold entry, only the payload moves.
//!
//! # Migration pass
//!
//! 1. Claim the `All` scope so no flush runs over the same entries
//! 2. Select hot entries past the grace period whose frequency is below the floor,
//!    reading metadata in chunks
//! 3. Fetch and compress each payload outside the store lock
//! 4. Swap it in if the entry still has the generation it was selected with
//!
//! A payload that fails to compress is skipped and counted; the pass continues.

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::entry::{CacheEntry, EntryMetadata, Tier};
use super::flush::{FlushScope, ScopeLocks};
use super::store::EntryStore;
use crate::error::{Error, Result};

// =============================================================================
// Thresholds
// =============================================================================

/// Named access-frequency floor separating hot from cold entries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HotCutoff {
    VeryHigh,
    High,
    #[default]
    Medium,
    Low,
}

impl HotCutoff {
    /// Minimum accesses per hour for an entry to stay hot
    pub fn floor(&self) -> f64 {
        match self {
            HotCutoff::VeryHigh => 100.0,
            HotCutoff::High => 50.0,
            HotCutoff::Medium => 10.0,
            HotCutoff::Low => 3.0,
        }
    }

    /// Configuration name
    pub fn as_str(&self) -> &'static str {
        match self {
            HotCutoff::VeryHigh => "very_high",
            HotCutoff::High => "high",
            HotCutoff::Medium => "medium",
            HotCutoff::Low => "low",
        }
    }
}

impl std::fmt::Display for HotCutoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HotCutoff {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "very_high" => Ok(HotCutoff::VeryHigh),
            "high" => Ok(HotCutoff::High),
            "medium" => Ok(HotCutoff::Medium),
            "low" => Ok(HotCutoff::Low),
            other => Err(Error::Config(format!(
                "unknown hot cache threshold '{}' (expected very_high, high, medium or low)",
                other
            ))),
        }
    }
}

/// Tiering policy
#[derive(Debug, Clone, PartialEq)]
pub struct TierThresholds {
    /// Frequency floor for the hot tier
    pub hot_cutoff: HotCutoff,
    /// Whether migration passes and promotions actually move data
    pub auto_migration_enabled: bool,
    /// Entries younger than this are never demoted
    pub migration_grace: Duration,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            hot_cutoff: HotCutoff::Medium,
            auto_migration_enabled: true,
            migration_grace: Duration::from_secs(60),
        }
    }
}

// =============================================================================
// Reports
// =============================================================================

/// Outcome of one migration pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MigrationReport {
    /// Hot entries considered
    pub examined: usize,
    /// Hot entries that classify cold
    pub cold_candidates: usize,
    /// Entries moved to cold storage
    pub migrated: usize,
    /// Candidates replaced or deleted while being compressed
    pub skipped: usize,
    /// Candidates whose compression or cold write failed
    pub failed: usize,
    /// False when the pass only classified
    pub auto_migration_enabled: bool,
    pub elapsed: Duration,
}

/// Two-tier occupancy and policy report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TwoTierStats {
    pub hot_count: usize,
    pub hot_bytes: u64,
    pub cold_count: usize,
    pub cold_logical_bytes: u64,
    pub cold_stored_bytes: u64,
    /// Logical over stored bytes of the cold tier (1.0 when empty)
    pub compression_ratio: f64,
    /// Hot entries currently below the floor
    pub hot_below_floor: usize,
    /// Cold entries currently above the floor
    pub cold_above_floor: usize,
    pub hot_cutoff: HotCutoff,
    pub access_floor_per_hour: f64,
    pub auto_migration_enabled: bool,
    pub promotions: u64,
    pub demotions: u64,
}

// =============================================================================
// Tier Manager
// =============================================================================

/// Moves entries between the hot and cold tiers
pub struct TierManager {
    store: Arc<EntryStore>,
    locks: Arc<ScopeLocks>,
    thresholds: RwLock<TierThresholds>,
}

impl TierManager {
    pub fn new(store: Arc<EntryStore>, locks: Arc<ScopeLocks>, thresholds: TierThresholds) -> Self {
        Self {
            store,
            locks,
            thresholds: RwLock::new(thresholds),
        }
    }

    /// Current policy
    pub fn thresholds(&self) -> TierThresholds {
        self.thresholds.read().clone()
    }

    pub fn set_hot_cutoff(&self, cutoff: HotCutoff) {
        self.thresholds.write().hot_cutoff = cutoff;
    }

    pub fn set_auto_migration(&self, enabled: bool) {
        self.thresholds.write().auto_migration_enabled = enabled;
    }

    pub fn set_thresholds(&self, thresholds: TierThresholds) {
        *self.thresholds.write() = thresholds;
    }

    /// Tier an entry belongs in at `now`
    pub fn classify(&self, meta: &EntryMetadata, now: DateTime<Utc>) -> Tier {
        classify_with(self.thresholds.read().hot_cutoff, meta, now)
    }

    /// Run one migration pass
    pub fn migrate(&self) -> Result<MigrationReport> {
        let _guard = self.locks.try_acquire(FlushScope::All)?;
        let start = Instant::now();
        let thresholds = self.thresholds();
        let now = self.store.clock().now();
        let grace = chrono::Duration::from_std(thresholds.migration_grace)
            .map_err(|e| Error::Config(format!("migration grace out of range: {}", e)))?;

        let demotable = |meta: &EntryMetadata| {
            !meta.is_expired(now)
                && meta.age(now) >= grace
                && classify_with(thresholds.hot_cutoff, meta, now) == Tier::Cold
        };

        let hot: Vec<_> = self
            .store
            .entries_metadata()
            .into_iter()
            .filter(|m| m.tier == Tier::Hot)
            .collect();

        let candidates: Vec<String> = hot
            .iter()
            .filter(|m| demotable(m))
            .map(|m| m.key.clone())
            .collect();

        let mut report = MigrationReport {
            examined: hot.len(),
            cold_candidates: candidates.len(),
            auto_migration_enabled: thresholds.auto_migration_enabled,
            ..Default::default()
        };

        if !thresholds.auto_migration_enabled {
            report.elapsed = start.elapsed();
            debug!(
                cold_candidates = report.cold_candidates,
                "auto migration disabled, classification only"
            );
            return Ok(report);
        }

        let metrics = self.store.metrics();
        for key in &candidates {
            // Gone, replaced by a fresh entry or already cold since selection
            let Some(candidate) = self
                .store
                .hot_payload(key)
                .filter(|_| self.store.peek(key).is_some_and(|m| demotable(&m)))
            else {
                report.skipped += 1;
                continue;
            };
            let (compressed, algorithm) = match self.store.compression().compress(&candidate.payload)
            {
                Ok(result) => result,
                Err(e) => {
                    warn!(key = %candidate.key, error = %e, "skipping entry, compression failed");
                    metrics.record_migration_failure();
                    report.failed += 1;
                    continue;
                }
            };

            match self.store.complete_demotion(
                &candidate.key,
                candidate.generation,
                compressed,
                algorithm,
            ) {
                Ok(true) => report.migrated += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    warn!(key = %candidate.key, error = %e, "skipping entry, cold write failed");
                    metrics.record_migration_failure();
                    report.failed += 1;
                }
            }
        }

        metrics.record_demotions(report.migrated as u64);
        report.elapsed = start.elapsed();
        info!(
            examined = report.examined,
            migrated = report.migrated,
            skipped = report.skipped,
            failed = report.failed,
            "migration pass finished"
        );
        Ok(report)
    }

    /// Promote a cold entry that was just read if it has become hot again.
    ///
    /// Returns true when the entry moved.
    pub fn maybe_promote(&self, entry: &CacheEntry) -> bool {
        if entry.tier() != Tier::Cold {
            return false;
        }
        let thresholds = self.thresholds.read().clone();
        if !thresholds.auto_migration_enabled {
            return false;
        }

        let now = self.store.clock().now();
        if classify_with(thresholds.hot_cutoff, &entry.metadata, now) != Tier::Hot {
            return false;
        }

        let promoted = self.store.promote(
            &entry.metadata.key,
            entry.generation(),
            entry.value().clone(),
        );
        if promoted {
            self.store.metrics().record_promotion();
            debug!(key = %entry.metadata.key, "entry promoted to hot tier");
        }
        promoted
    }

    /// Occupancy and classification of both tiers
    pub fn stats(&self) -> TwoTierStats {
        let thresholds = self.thresholds();
        let now = self.store.clock().now();
        let counts = self.store.tier_counts();

        let mut hot_below_floor = 0;
        let mut cold_above_floor = 0;
        for meta in self.store.entries_metadata() {
            match (meta.tier, classify_with(thresholds.hot_cutoff, &meta, now)) {
                (Tier::Hot, Tier::Cold) => hot_below_floor += 1,
                (Tier::Cold, Tier::Hot) => cold_above_floor += 1,
                _ => {}
            }
        }

        let compression_ratio = if counts.cold_stored_bytes == 0 {
            1.0
        } else {
            counts.cold_logical_bytes as f64 / counts.cold_stored_bytes as f64
        };

        let metrics = self.store.metrics();
        TwoTierStats {
            hot_count: counts.hot_count,
            hot_bytes: counts.hot_bytes,
            cold_count: counts.cold_count,
            cold_logical_bytes: counts.cold_logical_bytes,
            cold_stored_bytes: counts.cold_stored_bytes,
            compression_ratio,
            hot_below_floor,
            cold_above_floor,
            hot_cutoff: thresholds.hot_cutoff,
            access_floor_per_hour: thresholds.hot_cutoff.floor(),
            auto_migration_enabled: thresholds.auto_migration_enabled,
            promotions: metrics.promotions(),
            demotions: metrics.demotions(),
        }
    }
}

fn classify_with(cutoff: HotCutoff, meta: &EntryMetadata, now: DateTime<Utc>) -> Tier {
    if meta.access_frequency(now) >= cutoff.floor() {
        Tier::Hot
    } else {
        Tier::Cold
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::{Clock, ManualClock};
    use crate::cache::cold::InMemoryColdStorage;
    use crate::cache::compression::{
        CompressionAlgorithm, CompressionConfig, CompressionManager, Compressor, Lz4Compressor,
    };
    use crate::cache::metrics::CacheMetrics;
    use crate::cache::store::{StoreConfig, SCAN_CHUNK};
    use assert_matches::assert_matches;
    use bytes::Bytes;

    const HOUR: Duration = Duration::from_secs(3600);

    /// Fails on payloads starting with "bad"
    struct PickyCompressor(Lz4Compressor);

    impl Compressor for PickyCompressor {
        fn algorithm(&self) -> CompressionAlgorithm {
            self.0.algorithm()
        }

        fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
            if data.starts_with(b"bad") {
                return Err(Error::CompressionFailed {
                    algorithm: "LZ4".into(),
                    reason: "rejected".into(),
                });
            }
            self.0.compress(data)
        }

        fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
            self.0.decompress(data)
        }
    }

    fn setup(compression: CompressionManager) -> (TierManager, Arc<EntryStore>, ManualClock) {
        let clock = ManualClock::default();
        let store = Arc::new(EntryStore::new(
            StoreConfig {
                max_size_bytes: 10 * 1024 * 1024,
            },
            Arc::new(clock.clone()),
            Arc::new(InMemoryColdStorage::new()),
            Arc::new(compression),
            Arc::new(CacheMetrics::new()),
        ));
        let manager = TierManager::new(
            Arc::clone(&store),
            Arc::new(ScopeLocks::new()),
            TierThresholds::default(),
        );
        (manager, store, clock)
    }

    fn payload(tag: &str) -> Bytes {
        let mut data = tag.as_bytes().to_vec();
        data.extend(std::iter::repeat(b'x').take(2048));
        Bytes::from(data)
    }

    fn put(store: &EntryStore, key: &str, value: Bytes) {
        let size = value.len() as u64;
        store.put(key, value, size, "products", HOUR).unwrap();
    }

    #[test]
    fn test_cutoff_floors_and_names() {
        assert_eq!(HotCutoff::VeryHigh.floor(), 100.0);
        assert_eq!(HotCutoff::High.floor(), 50.0);
        assert_eq!(HotCutoff::Medium.floor(), 10.0);
        assert_eq!(HotCutoff::Low.floor(), 3.0);
        assert_eq!(HotCutoff::default(), HotCutoff::Medium);

        assert_eq!("very_high".parse::<HotCutoff>().unwrap(), HotCutoff::VeryHigh);
        assert_eq!(HotCutoff::Low.to_string(), "low");
        assert_matches!("lukewarm".parse::<HotCutoff>(), Err(Error::Config(_)));
    }

    #[test]
    fn test_classify_by_frequency() {
        let (manager, store, clock) = setup(CompressionManager::new());
        put(&store, "k", payload("v"));
        for _ in 0..11 {
            store.get("k").unwrap();
        }

        let meta = store.peek("k").unwrap();
        assert_eq!(meta.access_count, 12);
        assert_eq!(manager.classify(&meta, clock.now()), Tier::Hot);

        // 12 accesses over 4 hours is 3 per hour
        let later = clock.now() + chrono::Duration::hours(4);
        assert_eq!(manager.classify(&meta, later), Tier::Cold);

        manager.set_hot_cutoff(HotCutoff::Low);
        assert_eq!(manager.classify(&meta, later), Tier::Hot);
    }

    #[test]
    fn test_migrate_demotes_cold_entries() {
        let (manager, store, clock) = setup(CompressionManager::new());
        put(&store, "hot", payload("hot"));
        put(&store, "cold-1", payload("one"));
        put(&store, "cold-2", payload("two"));
        for _ in 0..20 {
            store.get("hot").unwrap();
        }
        clock.advance(chrono::Duration::minutes(2));
        let size_before = store.current_size();

        let report = manager.migrate().unwrap();
        assert_eq!(report.examined, 3);
        assert_eq!(report.cold_candidates, 2);
        assert_eq!(report.migrated, 2);
        assert_eq!(report.failed, 0);

        // Budget charge is logical and unchanged by tiering
        assert_eq!(store.current_size(), size_before);
        let counts = store.tier_counts();
        assert_eq!(counts.hot_count, 1);
        assert_eq!(counts.cold_count, 2);
        assert!(counts.cold_stored_bytes < counts.cold_logical_bytes);

        let entry = store.get("cold-1").unwrap().unwrap();
        assert_eq!(entry.tier(), Tier::Cold);
        assert_eq!(entry.value(), &payload("one"));
    }

    #[test]
    fn test_migrate_covers_every_scan_chunk() {
        let (manager, store, clock) = setup(CompressionManager::new());
        let n = SCAN_CHUNK + 10;
        for i in 0..n {
            put(&store, &format!("articulo:{:05}", i), payload("a"));
        }
        clock.advance(chrono::Duration::minutes(2));

        let report = manager.migrate().unwrap();
        assert_eq!(report.examined, n);
        assert_eq!(report.migrated, n);
        assert_eq!(store.tier_counts().cold_count, n);
        assert_eq!(manager.stats().cold_count, n);
    }

    #[test]
    fn test_migrate_respects_grace_period() {
        let (manager, store, _clock) = setup(CompressionManager::new());
        put(&store, "fresh", payload("fresh"));

        let report = manager.migrate().unwrap();
        assert_eq!(report.cold_candidates, 0);
        assert_eq!(report.migrated, 0);
        assert_eq!(store.tier_counts().cold_count, 0);
    }

    #[test]
    fn test_migrate_classifies_only_when_disabled() {
        let (manager, store, clock) = setup(CompressionManager::new());
        manager.set_auto_migration(false);
        put(&store, "a", payload("a"));
        clock.advance(chrono::Duration::minutes(5));

        let report = manager.migrate().unwrap();
        assert!(!report.auto_migration_enabled);
        assert_eq!(report.cold_candidates, 1);
        assert_eq!(report.migrated, 0);
        assert_eq!(store.tier_counts().cold_count, 0);
    }

    #[test]
    fn test_compression_failure_skips_entry() {
        let compression = CompressionManager::with_compressor(
            CompressionConfig {
                min_size_bytes: 0,
                level: 4,
            },
            Arc::new(PickyCompressor(Lz4Compressor::with_level(4))),
        );
        let (manager, store, clock) = setup(compression);
        put(&store, "good", payload("good"));
        put(&store, "bad", payload("bad"));
        clock.advance(chrono::Duration::minutes(2));

        let report = manager.migrate().unwrap();
        assert_eq!(report.migrated, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(store.peek("bad").unwrap().tier, Tier::Hot);
        assert_eq!(store.peek("good").unwrap().tier, Tier::Cold);
        assert_eq!(store.metrics().snapshot().migration_failures, 1);
    }

    #[test]
    fn test_promotion_after_frequency_recovers() {
        let (manager, store, clock) = setup(CompressionManager::new());
        put(&store, "k", payload("k"));
        clock.advance(chrono::Duration::minutes(2));
        assert_eq!(manager.migrate().unwrap().migrated, 1);

        let mut promoted = false;
        for _ in 0..12 {
            let entry = store.get("k").unwrap().unwrap();
            assert_eq!(entry.value(), &payload("k"));
            promoted |= manager.maybe_promote(&entry);
        }

        assert!(promoted);
        assert_eq!(store.peek("k").unwrap().tier, Tier::Hot);
        assert_eq!(store.tier_counts().cold_count, 0);
        assert_eq!(store.metrics().promotions(), 1);
    }

    #[test]
    fn test_no_promotion_when_auto_migration_disabled() {
        let (manager, store, clock) = setup(CompressionManager::new());
        put(&store, "k", payload("k"));
        clock.advance(chrono::Duration::minutes(2));
        manager.migrate().unwrap();
        manager.set_auto_migration(false);

        for _ in 0..12 {
            let entry = store.get("k").unwrap().unwrap();
            assert!(!manager.maybe_promote(&entry));
        }
        assert_eq!(store.peek("k").unwrap().tier, Tier::Cold);
    }

    #[test]
    fn test_migration_refused_while_flush_holds_scope() {
        let (manager, store, clock) = setup(CompressionManager::new());
        put(&store, "k", payload("k"));
        clock.advance(chrono::Duration::minutes(2));

        let _flush = manager
            .locks
            .try_acquire(FlushScope::Group("products".into()))
            .unwrap();
        assert_matches!(manager.migrate(), Err(Error::ScopeBusy { .. }));
        assert_eq!(store.tier_counts().cold_count, 0);
    }

    #[test]
    fn test_two_tier_stats() {
        let (manager, store, clock) = setup(CompressionManager::new());
        put(&store, "a", payload("a"));
        put(&store, "b", payload("b"));
        clock.advance(chrono::Duration::minutes(2));

        let before = manager.stats();
        assert_eq!(before.hot_count, 2);
        assert_eq!(before.hot_below_floor, 2);
        assert_eq!(before.compression_ratio, 1.0);

        manager.migrate().unwrap();
        let after = manager.stats();
        assert_eq!(after.cold_count, 2);
        assert_eq!(after.hot_below_floor, 0);
        assert_eq!(after.demotions, 2);
        assert!(after.compression_ratio > 1.0);
        assert_eq!(after.access_floor_per_hour, 10.0);
    }
}
