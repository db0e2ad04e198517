//! Cache Metrics Collection
//!
//! Lock-free counters for monitoring cache health.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Cache metrics collector
#[derive(Debug, Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
    evictions: AtomicU64,
    rejected_inserts: AtomicU64,

    populations: AtomicU64,
    population_failures: AtomicU64,
    coalesced_waits: AtomicU64,
    bypassed: AtomicU64,

    promotions: AtomicU64,
    demotions: AtomicU64,
    migration_failures: AtomicU64,

    flushed_entries: AtomicU64,
    rotated_entries: AtomicU64,

    // Exponential moving average, microseconds
    populate_latency_us: AtomicU64,
}

impl CacheMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_expiration(&self, count: u64) {
        self.expirations.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_rejected_insert(&self) {
        self.rejected_inserts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_population(&self, duration: Duration) {
        self.populations.fetch_add(1, Ordering::Relaxed);
        self.update_latency_ema(&self.populate_latency_us, duration);
    }

    pub fn record_population_failure(&self) {
        self.population_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_coalesced_wait(&self) {
        self.coalesced_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bypass(&self) {
        self.bypassed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_promotion(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_demotions(&self, count: u64) {
        self.demotions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_migration_failure(&self) {
        self.migration_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flushed(&self, count: u64) {
        self.flushed_entries.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_rotated(&self, count: u64) {
        self.rotated_entries.fetch_add(count, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn promotions(&self) -> u64 {
        self.promotions.load(Ordering::Relaxed)
    }

    pub fn demotions(&self) -> u64 {
        self.demotions.load(Ordering::Relaxed)
    }

    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    fn update_latency_ema(&self, target: &AtomicU64, duration: Duration) {
        let new_us = duration.as_micros() as u64;
        let alpha = 0.1;

        loop {
            let current = target.load(Ordering::Relaxed);
            let updated = if current == 0 {
                new_us
            } else {
                ((1.0 - alpha) * current as f64 + alpha * new_us as f64) as u64
            };

            if target
                .compare_exchange_weak(current, updated, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
    }

    pub fn populate_latency(&self) -> Duration {
        Duration::from_micros(self.populate_latency_us.load(Ordering::Relaxed))
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            hits: self.hits(),
            misses: self.misses(),
            hit_ratio: self.hit_ratio(),
            expirations: self.expirations.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            rejected_inserts: self.rejected_inserts.load(Ordering::Relaxed),
            populations: self.populations.load(Ordering::Relaxed),
            population_failures: self.population_failures.load(Ordering::Relaxed),
            coalesced_waits: self.coalesced_waits.load(Ordering::Relaxed),
            bypassed: self.bypassed.load(Ordering::Relaxed),
            promotions: self.promotions(),
            demotions: self.demotions(),
            migration_failures: self.migration_failures.load(Ordering::Relaxed),
            flushed_entries: self.flushed_entries.load(Ordering::Relaxed),
            rotated_entries: self.rotated_entries.load(Ordering::Relaxed),
            populate_latency: self.populate_latency(),
        }
    }

    /// Reset all counters
    pub fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.expirations,
            &self.evictions,
            &self.rejected_inserts,
            &self.populations,
            &self.population_failures,
            &self.coalesced_waits,
            &self.bypassed,
            &self.promotions,
            &self.demotions,
            &self.migration_failures,
            &self.flushed_entries,
            &self.rotated_entries,
            &self.populate_latency_us,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Snapshot of all cache metrics
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,
    pub expirations: u64,
    pub evictions: u64,
    pub rejected_inserts: u64,
    pub populations: u64,
    pub population_failures: u64,
    pub coalesced_waits: u64,
    pub bypassed: u64,
    pub promotions: u64,
    pub demotions: u64,
    pub migration_failures: u64,
    pub flushed_entries: u64,
    pub rotated_entries: u64,
    pub populate_latency: Duration,
}

// =============================================================================
// Tests
// =============================================================================
