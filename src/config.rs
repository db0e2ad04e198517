//! Cache Configuration
//!
//! Typed settings for the response cache, loaded from YAML or from the flat
//! key/value pairs the admin layer persists, and the per-operation policy registry.
//!
//! ```yaml
//! cache:
//!   enabled: true
//!   globalMaxSizeMB: 200
//!   hotCacheThreshold: high
//!   autoMigrationEnabled: true
//!   segmentFlush:
//!     thresholdEntries: 1000
//!     segmentSize: 500
//!     maxTimeSeconds: 30
//!   batchMaxAgeHours: 6
//!   operations:
//!     GetArticulosWS:
//!       enabled: true
//!       ttlSeconds: 7200
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::{FlushConfig, HotCutoff, TierThresholds};
use crate::error::{Error, Result};

/// TTL given to operations nobody has configured yet
pub const DEFAULT_OPERATION_TTL_SECS: u64 = 3600;

const MAX_SIZE_MB_RANGE: (u64, u64) = (50, 5000);
const THRESHOLD_ENTRIES_RANGE: (usize, usize) = (100, 10_000);
const SEGMENT_SIZE_RANGE: (usize, usize) = (10, 2000);
const MAX_TIME_SECS_RANGE: (u64, u64) = (5, 300);
const BATCH_MAX_AGE_HOURS_RANGE: (u64, u64) = (1, 24);

// =============================================================================
// Settings
// =============================================================================

/// Per-operation settings as persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OperationSettings {
    pub enabled: bool,
    pub ttl_seconds: u64,
}

impl Default for OperationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: DEFAULT_OPERATION_TTL_SECS,
        }
    }
}

/// Segmented flush settings as persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SegmentFlushSettings {
    pub threshold_entries: usize,
    pub segment_size: usize,
    pub max_time_seconds: u64,
}

impl Default for SegmentFlushSettings {
    fn default() -> Self {
        Self {
            threshold_entries: 1000,
            segment_size: 500,
            max_time_seconds: 30,
        }
    }
}

/// Complete cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheSettings {
    /// Global switch; disabling bypasses the cache without deleting entries
    pub enabled: bool,
    /// Operation name -> settings
    pub operations: BTreeMap<String, OperationSettings>,
    /// Global budget in MB
    #[serde(rename = "globalMaxSizeMB")]
    pub global_max_size_mb: u64,
    pub hot_cache_threshold: HotCutoff,
    pub auto_migration_enabled: bool,
    pub segment_flush: SegmentFlushSettings,
    /// Rotation window of the batch group
    pub batch_max_age_hours: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            operations: BTreeMap::new(),
            global_max_size_mb: 100,
            hot_cache_threshold: HotCutoff::Medium,
            auto_migration_enabled: true,
            segment_flush: SegmentFlushSettings::default(),
            batch_max_age_hours: 6,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    #[serde(default)]
    cache: CacheSettings,
}

impl CacheSettings {
    /// Parse a YAML document with a top-level `cache:` key
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let file: SettingsFile = serde_yaml::from_str(yaml)?;
        file.cache.validate()?;
        Ok(file.cache)
    }

    /// Load a YAML settings file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)?;
        debug!(path = %path.display(), "loaded cache settings");
        Self::from_yaml_str(&yaml)
    }

    /// Build settings from persisted `cache.*` key/value pairs.
    ///
    /// Keys outside the `cache.` namespace are ignored; unknown `cache.` keys are
    /// logged and ignored.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut settings = Self::default();
        for (key, value) in pairs {
            settings.apply_pair(key.as_ref(), value.as_ref())?;
        }
        settings.validate()?;
        Ok(settings)
    }

    fn apply_pair(&mut self, key: &str, value: &str) -> Result<()> {
        let Some(rest) = key.strip_prefix("cache.") else {
            return Ok(());
        };

        match rest {
            "enabled" => self.enabled = parse_bool(key, value)?,
            "globalMaxSizeMB" => self.global_max_size_mb = parse_num(key, value)?,
            "hotCacheThreshold" => self.hot_cache_threshold = value.parse()?,
            "autoMigrationEnabled" => self.auto_migration_enabled = parse_bool(key, value)?,
            "segmentFlush.thresholdEntries" => {
                self.segment_flush.threshold_entries = parse_num(key, value)?
            }
            "segmentFlush.segmentSize" => self.segment_flush.segment_size = parse_num(key, value)?,
            "segmentFlush.maxTimeSeconds" => {
                self.segment_flush.max_time_seconds = parse_num(key, value)?
            }
            "batchMaxAgeHours" => self.batch_max_age_hours = parse_num(key, value)?,
            _ => match rest
                .strip_prefix("operations.")
                .and_then(|op| op.rsplit_once('.'))
            {
                Some((operation, field)) if !operation.is_empty() => {
                    let entry = self.operations.entry(operation.to_string()).or_default();
                    match field {
                        "enabled" => entry.enabled = parse_bool(key, value)?,
                        "ttlSeconds" => entry.ttl_seconds = parse_num(key, value)?,
                        _ => warn!(key, "ignoring unknown operation setting"),
                    }
                }
                _ => warn!(key, "ignoring unknown cache setting"),
            },
        }
        Ok(())
    }

    /// Check every value against its allowed range
    pub fn validate(&self) -> Result<()> {
        check_range("globalMaxSizeMB", self.global_max_size_mb, MAX_SIZE_MB_RANGE)?;
        check_range(
            "segmentFlush.thresholdEntries",
            self.segment_flush.threshold_entries,
            THRESHOLD_ENTRIES_RANGE,
        )?;
        check_range(
            "segmentFlush.segmentSize",
            self.segment_flush.segment_size,
            SEGMENT_SIZE_RANGE,
        )?;
        check_range(
            "segmentFlush.maxTimeSeconds",
            self.segment_flush.max_time_seconds,
            MAX_TIME_SECS_RANGE,
        )?;
        check_range(
            "batchMaxAgeHours",
            self.batch_max_age_hours,
            BATCH_MAX_AGE_HOURS_RANGE,
        )?;

        for (name, op) in &self.operations {
            if op.ttl_seconds == 0 {
                return Err(Error::Config(format!(
                    "operations.{}.ttlSeconds must be positive",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Flatten into persisted `cache.*` key/value pairs
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            ("cache.enabled".to_string(), self.enabled.to_string()),
            (
                "cache.globalMaxSizeMB".to_string(),
                self.global_max_size_mb.to_string(),
            ),
            (
                "cache.hotCacheThreshold".to_string(),
                self.hot_cache_threshold.to_string(),
            ),
            (
                "cache.autoMigrationEnabled".to_string(),
                self.auto_migration_enabled.to_string(),
            ),
            (
                "cache.segmentFlush.thresholdEntries".to_string(),
                self.segment_flush.threshold_entries.to_string(),
            ),
            (
                "cache.segmentFlush.segmentSize".to_string(),
                self.segment_flush.segment_size.to_string(),
            ),
            (
                "cache.segmentFlush.maxTimeSeconds".to_string(),
                self.segment_flush.max_time_seconds.to_string(),
            ),
            (
                "cache.batchMaxAgeHours".to_string(),
                self.batch_max_age_hours.to_string(),
            ),
        ];

        for (name, op) in &self.operations {
            pairs.push((
                format!("cache.operations.{}.enabled", name),
                op.enabled.to_string(),
            ));
            pairs.push((
                format!("cache.operations.{}.ttlSeconds", name),
                op.ttl_seconds.to_string(),
            ));
        }
        pairs
    }

    /// Render as a YAML document with a top-level `cache:` key
    pub fn to_yaml(&self) -> Result<String> {
        #[derive(Serialize)]
        struct Out<'a> {
            cache: &'a CacheSettings,
        }
        Ok(serde_yaml::to_string(&Out { cache: self })?)
    }

    /// Global budget in bytes
    pub fn max_size_bytes(&self) -> u64 {
        self.global_max_size_mb * 1024 * 1024
    }

    pub fn flush_config(&self) -> FlushConfig {
        FlushConfig {
            trigger_threshold_entries: self.segment_flush.threshold_entries,
            segment_size: self.segment_flush.segment_size,
            max_wall_clock: Duration::from_secs(self.segment_flush.max_time_seconds),
        }
    }

    pub fn tier_thresholds(&self) -> TierThresholds {
        TierThresholds {
            hot_cutoff: self.hot_cache_threshold,
            auto_migration_enabled: self.auto_migration_enabled,
            ..Default::default()
        }
    }

    pub fn batch_max_age(&self) -> chrono::Duration {
        chrono::Duration::hours(self.batch_max_age_hours as i64)
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::Config(format!(
            "{}: expected a boolean, got '{}'",
            key, other
        ))),
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{}: expected a number, got '{}'", key, value)))
}

fn check_range<T: PartialOrd + std::fmt::Display>(name: &str, value: T, range: (T, T)) -> Result<()> {
    if value < range.0 || value > range.1 {
        return Err(Error::Config(format!(
            "{} = {} is outside {}..={}",
            name, value, range.0, range.1
        )));
    }
    Ok(())
}

// =============================================================================
// Operation Policy
// =============================================================================

/// Cache policy of one upstream operation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationConfig {
    pub operation_name: String,
    pub enabled: bool,
    pub ttl_seconds: u64,
    /// Set when the TTL came from a latency calibration
    pub auto_configured: bool,
    pub last_measurement_at: Option<DateTime<Utc>>,
    pub measured_latency_seconds: Option<f64>,
    pub session_used: Option<u32>,
}

impl OperationConfig {
    pub fn new(operation_name: &str, ttl_seconds: u64) -> Self {
        Self {
            operation_name: operation_name.to_string(),
            enabled: true,
            ttl_seconds,
            auto_configured: false,
            last_measurement_at: None,
            measured_latency_seconds: None,
            session_used: None,
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

/// Operation name -> policy; records are created lazily and reset, never removed
#[derive(Debug)]
pub struct OperationRegistry {
    configs: DashMap<String, OperationConfig>,
    default_ttl_seconds: u64,
}

impl Default for OperationRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_OPERATION_TTL_SECS)
    }
}

impl OperationRegistry {
    pub fn new(default_ttl_seconds: u64) -> Self {
        Self {
            configs: DashMap::new(),
            default_ttl_seconds,
        }
    }

    /// Registry seeded with the operations listed in `settings`
    pub fn from_settings(settings: &CacheSettings) -> Self {
        let registry = Self::default();
        for (name, op) in &settings.operations {
            let mut config = OperationConfig::new(name, op.ttl_seconds);
            config.enabled = op.enabled;
            registry.configs.insert(name.clone(), config);
        }
        registry
    }

    /// Policy of an operation, creating it with the default TTL on first use
    pub fn get(&self, operation: &str) -> OperationConfig {
        self.configs
            .entry(operation.to_string())
            .or_insert_with(|| OperationConfig::new(operation, self.default_ttl_seconds))
            .clone()
    }

    /// Policy of an operation if it has been created
    pub fn peek(&self, operation: &str) -> Option<OperationConfig> {
        self.configs.get(operation).map(|c| c.clone())
    }

    pub fn set_enabled(&self, operation: &str, enabled: bool) -> OperationConfig {
        self.update(operation, |c| c.enabled = enabled)
    }

    /// Set a TTL by hand; clears the auto-configured flag
    pub fn configure_ttl(&self, operation: &str, ttl_seconds: u64) -> Result<OperationConfig> {
        if ttl_seconds == 0 {
            return Err(Error::Config(format!(
                "TTL for {} must be positive",
                operation
            )));
        }
        Ok(self.update(operation, |c| {
            c.ttl_seconds = ttl_seconds;
            c.auto_configured = false;
        }))
    }

    /// Store the outcome of a latency calibration
    pub fn record_calibration(
        &self,
        operation: &str,
        ttl_seconds: u64,
        latency_seconds: f64,
        session: u32,
        measured_at: DateTime<Utc>,
    ) -> OperationConfig {
        self.update(operation, |c| {
            c.ttl_seconds = ttl_seconds;
            c.auto_configured = true;
            c.last_measurement_at = Some(measured_at);
            c.measured_latency_seconds = Some(latency_seconds);
            c.session_used = Some(session);
        })
    }

    /// Restore the default policy of an operation
    pub fn reset(&self, operation: &str) -> OperationConfig {
        let config = OperationConfig::new(operation, self.default_ttl_seconds);
        self.configs.insert(operation.to_string(), config.clone());
        config
    }

    /// All policies, sorted by operation name
    pub fn snapshot(&self) -> Vec<OperationConfig> {
        let mut all: Vec<_> = self.configs.iter().map(|c| c.value().clone()).collect();
        all.sort_by(|a, b| a.operation_name.cmp(&b.operation_name));
        all
    }

    /// Write every policy into `settings.operations`
    pub fn export_into(&self, settings: &mut CacheSettings) {
        for config in self.snapshot() {
            settings.operations.insert(
                config.operation_name,
                OperationSettings {
                    enabled: config.enabled,
                    ttl_seconds: config.ttl_seconds,
                },
            );
        }
    }

    fn update<F>(&self, operation: &str, f: F) -> OperationConfig
    where
        F: FnOnce(&mut OperationConfig),
    {
        let mut entry = self
            .configs
            .entry(operation.to_string())
            .or_insert_with(|| OperationConfig::new(operation, self.default_ttl_seconds));
        f(entry.value_mut());
        entry.value().clone()
    }
}

// =============================================================================
// Tests
// =============================================================================
