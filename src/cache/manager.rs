//! Cache Manager - Response Cache Facade
//!
//! Single entry point for callers: get-or-populate, invalidation, policy changes,
//! statistics and maintenance. Constructed once and shared as `Arc<CacheManager>`.
//!
//! # Population
//!
//! A miss spawns one population task per key and parks a shared handle to it in
//! the in-flight table. Callers missing on the same key join that handle instead
//! of calling upstream again. The task stores the value, then removes its marker,
//! so a caller that finds no marker either sees the stored value or starts a new
//! population. The marker is removed by a drop guard, so a population that panics
//! fails its waiters and leaves the key free for the next caller. The task runs to
//! completion even if every waiter goes away.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::clock::{Clock, SystemClock};
use super::cold::{ColdStorage, InMemoryColdStorage};
use super::compression::CompressionManager;
use super::entry::CacheEntry;
use super::flush::{FlushController, FlushReport, FlushScope, ScopeLocks};
use super::metrics::{CacheMetrics, MetricsSnapshot};
use super::store::{EntryStore, PutOutcome, StoreConfig};
use super::tier::{HotCutoff, MigrationReport, TierManager, TwoTierStats};
use super::{BATCH_GROUP, REAP_BATCH_SIZE};
use crate::calibration::{AutoConfigReport, AutoConfigurator};
use crate::config::{CacheSettings, OperationConfig, OperationRegistry, SegmentFlushSettings};
use crate::error::{Error, Result};

const MB: u64 = 1024 * 1024;

type PopulationOutput = std::result::Result<(Bytes, bool), String>;
type Population = Shared<BoxFuture<'static, PopulationOutput>>;

/// Removes a key from the in-flight table when the population task ends
struct InFlightMarker {
    in_flight: Arc<DashMap<String, Population>>,
    key: String,
}

impl Drop for InFlightMarker {
    fn drop(&mut self) {
        self.in_flight.remove(&self.key);
    }
}

// =============================================================================
// Results
// =============================================================================

/// Outcome of `get_or_populate`
#[derive(Debug, Clone)]
pub enum Lookup {
    /// Served from the cache
    Hit(CacheEntry),
    /// Computed by a population (this caller's or one it joined)
    Populated {
        value: Bytes,
        /// False when the value could not be stored (e.g. larger than the budget)
        cached: bool,
        /// True when this caller joined a population already in flight
        coalesced: bool,
    },
    /// Cache or operation disabled; computed without storing
    Bypassed(Bytes),
}

impl Lookup {
    pub fn value(&self) -> &Bytes {
        match self {
            Lookup::Hit(entry) => entry.value(),
            Lookup::Populated { value, .. } | Lookup::Bypassed(value) => value,
        }
    }

    pub fn into_value(self) -> Bytes {
        match self {
            Lookup::Hit(entry) => entry.into_value(),
            Lookup::Populated { value, .. } | Lookup::Bypassed(value) => value,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit(_))
    }
}

/// Headline cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub count: usize,
    pub total_size_bytes: u64,
    pub max_size_bytes: u64,
    pub hot_count: usize,
    pub cold_count: usize,
    /// Populations currently in flight
    pub in_flight: usize,
    pub metrics: MetricsSnapshot,
}

/// Outcome of one maintenance pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct MaintenanceReport {
    pub reaped: usize,
    pub rotated: usize,
    /// None when auto-migration is off or the scope was busy
    pub migration: Option<MigrationReport>,
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for `CacheManager`
pub struct CacheManagerBuilder {
    settings: CacheSettings,
    clock: Arc<dyn Clock>,
    cold: Arc<dyn ColdStorage>,
    compression: Arc<CompressionManager>,
    migration_grace: Option<Duration>,
}

impl Default for CacheManagerBuilder {
    fn default() -> Self {
        Self {
            settings: CacheSettings::default(),
            clock: Arc::new(SystemClock),
            cold: Arc::new(InMemoryColdStorage::new()),
            compression: Arc::new(CompressionManager::new()),
            migration_grace: None,
        }
    }
}

impl CacheManagerBuilder {
    pub fn settings(mut self, settings: CacheSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn cold_storage(mut self, cold: Arc<dyn ColdStorage>) -> Self {
        self.cold = cold;
        self
    }

    pub fn compression(mut self, compression: Arc<CompressionManager>) -> Self {
        self.compression = compression;
        self
    }

    /// Minimum age before an entry may be demoted
    pub fn migration_grace(mut self, grace: Duration) -> Self {
        self.migration_grace = Some(grace);
        self
    }

    pub fn build(self) -> Result<CacheManager> {
        self.settings.validate()?;

        let metrics = Arc::new(CacheMetrics::new());
        let store = Arc::new(EntryStore::new(
            StoreConfig {
                max_size_bytes: self.settings.max_size_bytes(),
            },
            self.clock,
            self.cold,
            self.compression,
            Arc::clone(&metrics),
        ));
        let locks = Arc::new(ScopeLocks::new());

        let mut thresholds = self.settings.tier_thresholds();
        if let Some(grace) = self.migration_grace {
            thresholds.migration_grace = grace;
        }

        Ok(CacheManager {
            enabled: AtomicBool::new(self.settings.enabled),
            tiers: TierManager::new(Arc::clone(&store), Arc::clone(&locks), thresholds),
            flusher: FlushController::new(
                Arc::clone(&store),
                Arc::clone(&locks),
                self.settings.flush_config(),
            ),
            operations: OperationRegistry::from_settings(&self.settings),
            in_flight: Arc::new(DashMap::new()),
            batch_max_age: RwLock::new(self.settings.batch_max_age()),
            store,
            metrics,
        })
    }
}

// =============================================================================
// Cache Manager
// =============================================================================

/// Response cache facade
pub struct CacheManager {
    enabled: AtomicBool,
    store: Arc<EntryStore>,
    tiers: TierManager,
    flusher: FlushController,
    operations: OperationRegistry,
    in_flight: Arc<DashMap<String, Population>>,
    batch_max_age: RwLock<chrono::Duration>,
    metrics: Arc<CacheMetrics>,
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

impl CacheManager {
    /// Manager with in-memory cold storage and the system clock
    pub fn new(settings: CacheSettings) -> Result<Self> {
        Self::builder().settings(settings).build()
    }

    pub fn builder() -> CacheManagerBuilder {
        CacheManagerBuilder::default()
    }

    // -------------------------------------------------------------------------
    // Lookups
    // -------------------------------------------------------------------------

    /// Return the cached value for `key`, or compute it with `populate`.
    ///
    /// Concurrent misses on the same key share one `populate` call; misses on
    /// different keys proceed independently. `populate` is only invoked by the
    /// caller that starts a population.
    pub async fn get_or_populate<F, Fut>(
        &self,
        key: &str,
        group: &str,
        operation: &str,
        populate: F,
    ) -> Result<Lookup>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes>> + Send + 'static,
    {
        let policy = self.operations.get(operation);
        if !self.is_enabled() || !policy.enabled {
            self.metrics.record_bypass();
            let value = populate().await.map_err(|e| Error::Populate {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
            return Ok(Lookup::Bypassed(value));
        }

        if let Some(entry) = self.lookup(key)? {
            return Ok(Lookup::Hit(entry));
        }

        let runtime = Handle::try_current()
            .map_err(|e| Error::Internal(format!("population needs a tokio runtime: {}", e)))?;
        let (population, coalesced) = match self.in_flight.entry(key.to_string()) {
            Entry::Occupied(existing) => (existing.get().clone(), true),
            Entry::Vacant(slot) => {
                // A population may have finished between the miss and here
                if let Some(entry) = self.store.get(key)? {
                    return Ok(Lookup::Hit(entry));
                }
                let population =
                    self.start_population(&runtime, key, group, policy.ttl(), populate());
                slot.insert(population.clone());
                (population, false)
            }
        };

        if coalesced {
            self.metrics.record_coalesced_wait();
            debug!(key, "joined in-flight population");
        }

        match population.await {
            Ok((value, cached)) => Ok(Lookup::Populated {
                value,
                cached,
                coalesced,
            }),
            Err(reason) => Err(Error::Populate {
                key: key.to_string(),
                reason,
            }),
        }
    }

    fn start_population<Fut>(
        &self,
        runtime: &Handle,
        key: &str,
        group: &str,
        ttl: Duration,
        populate: Fut,
    ) -> Population
    where
        Fut: Future<Output = Result<Bytes>> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let marker = InFlightMarker {
            in_flight: Arc::clone(&self.in_flight),
            key: key.to_string(),
        };
        let key = key.to_string();
        let group = group.to_string();

        let task = runtime.spawn(async move {
            let _marker = marker;
            let start = Instant::now();
            match populate.await {
                Ok(value) => {
                    store.metrics().record_population(start.elapsed());
                    let size = value.len() as u64;
                    let cached = match store.put(&key, value.clone(), size, &group, ttl) {
                        Ok(_) => true,
                        Err(e) => {
                            warn!(key = %key, error = %e, "populated value not cached");
                            false
                        }
                    };
                    Ok((value, cached))
                }
                Err(e) => {
                    store.metrics().record_population_failure();
                    warn!(key = %key, error = %e, "population failed");
                    Err(e.to_string())
                }
            }
        });

        let metrics = Arc::clone(&self.metrics);
        async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    metrics.record_population_failure();
                    warn!(error = %e, "population task did not complete");
                    Err(if e.is_panic() {
                        "population panicked".to_string()
                    } else {
                        e.to_string()
                    })
                }
            }
        }
        .boxed()
        .shared()
    }

    fn lookup(&self, key: &str) -> Result<Option<CacheEntry>> {
        let entry = self.store.get(key)?;
        if let Some(entry) = &entry {
            self.tiers.maybe_promote(entry);
        }
        Ok(entry)
    }

    /// Cached entry for `key`; always a miss while the cache is disabled
    pub fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        if !self.is_enabled() {
            return Ok(None);
        }
        self.lookup(key)
    }

    /// Store a value with the TTL of `operation`
    pub fn put(&self, key: &str, value: Bytes, group: &str, operation: &str) -> Result<PutOutcome> {
        if !self.is_enabled() {
            return Err(Error::CacheDisabled);
        }
        let policy = self.operations.get(operation);
        let size = value.len() as u64;
        self.store.put(key, value, size, group, policy.ttl())
    }

    // -------------------------------------------------------------------------
    // Invalidation
    // -------------------------------------------------------------------------

    /// Remove one entry
    pub fn invalidate(&self, key: &str) -> bool {
        self.store.delete(key)
    }

    /// Clear every entry; may need re-invoking when `completed` is false
    pub fn clear_all(&self) -> Result<FlushReport> {
        self.flusher.flush(FlushScope::All)
    }

    /// Clear one group
    pub fn clear_group(&self, group: &str) -> Result<FlushReport> {
        self.flusher.flush(FlushScope::Group(group.to_string()))
    }

    /// Clear keys matching a glob
    pub fn clear_pattern(&self, glob: &str) -> Result<FlushReport> {
        self.flusher.flush(FlushScope::Pattern(glob.to_string()))
    }

    /// Alias of `clear_group` used by the sync engine
    pub fn invalidate_group(&self, group: &str) -> Result<FlushReport> {
        self.clear_group(group)
    }

    // -------------------------------------------------------------------------
    // Policy
    // -------------------------------------------------------------------------

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Toggle the whole cache; stored entries are kept
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
        info!(enabled, "cache toggled");
    }

    pub fn operation(&self, operation: &str) -> OperationConfig {
        self.operations.get(operation)
    }

    pub fn operations(&self) -> &OperationRegistry {
        &self.operations
    }

    pub fn set_operation_enabled(&self, operation: &str, enabled: bool) -> OperationConfig {
        info!(operation, enabled, "operation cache toggled");
        self.operations.set_enabled(operation, enabled)
    }

    /// Set the TTL used for new entries of an operation
    pub fn configure_ttl(&self, operation: &str, ttl_seconds: u64) -> Result<OperationConfig> {
        let config = self.operations.configure_ttl(operation, ttl_seconds)?;
        info!(operation, ttl_seconds, "operation TTL configured");
        Ok(config)
    }

    pub fn reset_operation(&self, operation: &str) -> OperationConfig {
        self.operations.reset(operation)
    }

    pub fn set_hot_cutoff(&self, cutoff: HotCutoff) {
        self.tiers.set_hot_cutoff(cutoff);
    }

    pub fn set_auto_migration(&self, enabled: bool) {
        self.tiers.set_auto_migration(enabled);
    }

    /// Calibrate operation TTLs from live probes
    pub async fn auto_configure_all(
        &self,
        configurator: &AutoConfigurator,
    ) -> Result<AutoConfigReport> {
        configurator.auto_configure(&self.operations).await
    }

    /// Apply new settings to the running cache
    pub fn apply_settings(&self, settings: &CacheSettings) -> Result<()> {
        settings.validate()?;

        self.set_enabled(settings.enabled);
        let evicted = self.store.set_max_size(settings.max_size_bytes());
        self.flusher.set_config(settings.flush_config());

        let mut thresholds = settings.tier_thresholds();
        thresholds.migration_grace = self.tiers.thresholds().migration_grace;
        self.tiers.set_thresholds(thresholds);
        *self.batch_max_age.write() = settings.batch_max_age();

        for (name, op) in &settings.operations {
            self.operations.set_enabled(name, op.enabled);
            // An unchanged TTL keeps its calibration record
            if self.operations.get(name).ttl_seconds != op.ttl_seconds {
                self.operations.configure_ttl(name, op.ttl_seconds)?;
            }
        }

        info!(evicted, "settings applied");
        Ok(())
    }

    /// Current settings, including every known operation
    pub fn export_settings(&self) -> CacheSettings {
        let flush = self.flusher.config();
        let thresholds = self.tiers.thresholds();
        let mut settings = CacheSettings {
            enabled: self.is_enabled(),
            operations: BTreeMap::new(),
            global_max_size_mb: self.store.max_size() / MB,
            hot_cache_threshold: thresholds.hot_cutoff,
            auto_migration_enabled: thresholds.auto_migration_enabled,
            segment_flush: SegmentFlushSettings {
                threshold_entries: flush.trigger_threshold_entries,
                segment_size: flush.segment_size,
                max_time_seconds: flush.max_wall_clock.as_secs(),
            },
            batch_max_age_hours: self.batch_max_age.read().num_hours() as u64,
        };
        self.operations.export_into(&mut settings);
        settings
    }

    // -------------------------------------------------------------------------
    // Statistics
    // -------------------------------------------------------------------------

    /// Headline statistics.
    ///
    /// `count` is the number of live entries. Sizes and the per-tier counts are
    /// physical and include expired entries not yet reaped, which still hold budget.
    pub fn get_stats(&self) -> CacheStats {
        let budget = self.store.budget();
        let counts = self.store.tier_counts();
        CacheStats {
            enabled: self.is_enabled(),
            count: self.store.live_len(),
            total_size_bytes: budget.current_size_bytes,
            max_size_bytes: budget.max_size_bytes,
            hot_count: counts.hot_count,
            cold_count: counts.cold_count,
            in_flight: self.in_flight.len(),
            metrics: self.metrics.snapshot(),
        }
    }

    pub fn get_two_tier_stats(&self) -> TwoTierStats {
        self.tiers.stats()
    }

    pub fn metrics(&self) -> &Arc<CacheMetrics> {
        &self.metrics
    }

    pub fn store(&self) -> &Arc<EntryStore> {
        &self.store
    }

    // -------------------------------------------------------------------------
    // Maintenance
    // -------------------------------------------------------------------------

    /// Run one hot/cold migration pass
    pub fn trigger_migration(&self) -> Result<MigrationReport> {
        self.tiers.migrate()
    }

    /// Drop batch entries older than the rotation window
    pub fn rotate_batches(&self) -> usize {
        let max_age = *self.batch_max_age.read();
        let rotated = self.store.rotate_group(BATCH_GROUP, max_age);
        if rotated > 0 {
            self.metrics.record_rotated(rotated as u64);
            info!(rotated, "rotated batch entries");
        }
        rotated
    }

    /// Reap expired entries, rotate batches and migrate cold entries
    pub fn run_maintenance(&self) -> MaintenanceReport {
        let reaped = self.store.reap_expired(REAP_BATCH_SIZE);
        let rotated = self.rotate_batches();

        let migration = if self.tiers.thresholds().auto_migration_enabled {
            match self.tiers.migrate() {
                Ok(report) => Some(report),
                Err(Error::ScopeBusy { scope }) => {
                    debug!(%scope, "migration skipped, scope busy");
                    None
                }
                Err(e) => {
                    warn!(error = %e, "migration pass failed");
                    None
                }
            }
        } else {
            None
        };

        MaintenanceReport {
            reaped,
            rotated,
            migration,
        }
    }

    /// Run maintenance every `every` until `token` is cancelled
    #[instrument(skip(self, token))]
    pub fn spawn_maintenance(
        self: &Arc<Self>,
        every: Duration,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            tick.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        info!("maintenance task stopped");
                        break;
                    }
                    _ = tick.tick() => {
                        let manager = Arc::clone(&manager);
                        match tokio::task::spawn_blocking(move || manager.run_maintenance()).await {
                            Ok(report) => debug!(
                                reaped = report.reaped,
                                rotated = report.rotated,
                                migrated = report.migration.as_ref().map_or(0, |m| m.migrated),
                                "maintenance pass"
                            ),
                            Err(e) => warn!(error = %e, "maintenance pass panicked"),
                        }
                    }
                }
            }
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
