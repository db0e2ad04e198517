//! TTL Calibrator
//!
//! Turns a measured upstream latency into a recommended TTL:
//! `clamp(round(base_ttl(operation) * factor(latency)), 60, 86400)`.
//!
//! The factor table caches fast operations longer and slow ones shorter. It is a
//! policy value, so it can be replaced per calibrator.

use std::collections::HashMap;

use serde::Serialize;

use super::operation;
use crate::error::{Error, Result};

/// Shortest TTL a calibration can recommend
pub const MIN_TTL_SECS: u64 = 60;

/// Longest TTL a calibration can recommend
pub const MAX_TTL_SECS: u64 = 86_400;

/// Latencies strictly below `below_seconds` get `factor`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatencyBand {
    pub below_seconds: f64,
    pub factor: f64,
}

/// Ordered latency bands plus the factor for anything slower
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencyFactorTable {
    bands: Vec<LatencyBand>,
    slowest_factor: f64,
}

impl Default for LatencyFactorTable {
    fn default() -> Self {
        Self {
            bands: vec![
                LatencyBand {
                    below_seconds: 0.5,
                    factor: 2.0,
                },
                LatencyBand {
                    below_seconds: 1.0,
                    factor: 1.0,
                },
                LatencyBand {
                    below_seconds: 2.0,
                    factor: 0.8,
                },
            ],
            slowest_factor: 0.5,
        }
    }
}

impl LatencyFactorTable {
    /// Build a table; bands must have strictly increasing bounds and positive factors
    pub fn new(bands: Vec<LatencyBand>, slowest_factor: f64) -> Result<Self> {
        let valid_factor = |f: f64| f.is_finite() && f > 0.0;

        if !valid_factor(slowest_factor) {
            return Err(Error::Config(format!(
                "latency factor {} must be positive",
                slowest_factor
            )));
        }
        for (i, band) in bands.iter().enumerate() {
            if !valid_factor(band.factor) || !band.below_seconds.is_finite() {
                return Err(Error::Config(format!("invalid latency band {:?}", band)));
            }
            if i > 0 && band.below_seconds <= bands[i - 1].below_seconds {
                return Err(Error::Config(
                    "latency bands must have increasing bounds".to_string(),
                ));
            }
        }
        Ok(Self {
            bands,
            slowest_factor,
        })
    }

    /// Multiplier for a measured latency
    pub fn factor(&self, latency_seconds: f64) -> f64 {
        self.bands
            .iter()
            .find(|band| latency_seconds < band.below_seconds)
            .map_or(self.slowest_factor, |band| band.factor)
    }
}

/// Recommends TTLs from measured latency
#[derive(Debug, Clone)]
pub struct TtlCalibrator {
    table: LatencyFactorTable,
    base_overrides: HashMap<String, u64>,
}

impl Default for TtlCalibrator {
    fn default() -> Self {
        Self::new(LatencyFactorTable::default())
    }
}

impl TtlCalibrator {
    pub fn new(table: LatencyFactorTable) -> Self {
        Self {
            table,
            base_overrides: HashMap::new(),
        }
    }

    /// Override the catalog base TTL of one operation
    pub fn with_base_ttl(mut self, operation: &str, secs: u64) -> Self {
        self.base_overrides.insert(operation.to_string(), secs);
        self
    }

    pub fn table(&self) -> &LatencyFactorTable {
        &self.table
    }

    pub fn base_ttl(&self, operation: &str) -> u64 {
        self.base_overrides
            .get(operation)
            .copied()
            .unwrap_or_else(|| operation::base_ttl(operation))
    }

    /// Recommended TTL in seconds
    pub fn calibrate(&self, operation: &str, latency_seconds: f64) -> u64 {
        let raw = (self.base_ttl(operation) as f64 * self.table.factor(latency_seconds)).round();
        (raw as u64).clamp(MIN_TTL_SECS, MAX_TTL_SECS)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_reference_calibrations() {
        let calibrator = TtlCalibrator::default();
        assert_eq!(calibrator.calibrate("GetArticulosWS", 0.3), 7200);
        assert_eq!(calibrator.calibrate("GetArticulosWS", 1.5), 2880);
        // 86400 * 2.0 clamped
        assert_eq!(calibrator.calibrate("GetCategoriasWS", 0.1), 86_400);
    }

    #[test]
    fn test_band_boundaries() {
        let table = LatencyFactorTable::default();
        assert_eq!(table.factor(0.0), 2.0);
        assert_eq!(table.factor(0.499), 2.0);
        assert_eq!(table.factor(0.5), 1.0);
        assert_eq!(table.factor(1.0), 0.8);
        assert_eq!(table.factor(1.999), 0.8);
        assert_eq!(table.factor(2.0), 0.5);
        assert_eq!(table.factor(30.0), 0.5);
    }

    #[test]
    fn test_clamps_to_minimum() {
        let calibrator = TtlCalibrator::default().with_base_ttl("Tiny", 100);
        // 100 * 0.5 = 50
        assert_eq!(calibrator.calibrate("Tiny", 5.0), MIN_TTL_SECS);
    }

    #[test]
    fn test_unknown_operation_uses_default_base() {
        let calibrator = TtlCalibrator::default();
        assert_eq!(calibrator.calibrate("GetUnknownWS", 0.7), 3600);
    }

    #[test]
    fn test_custom_table() {
        let table = LatencyFactorTable::new(
            vec![LatencyBand {
                below_seconds: 1.0,
                factor: 0.5,
            }],
            3.0,
        )
        .unwrap();
        let calibrator = TtlCalibrator::new(table);
        assert_eq!(calibrator.calibrate("GetStockArticulosWS", 0.2), 150);
        assert_eq!(calibrator.calibrate("GetStockArticulosWS", 4.0), 900);
    }

    #[test]
    fn test_invalid_tables_rejected() {
        let band = |below_seconds, factor| LatencyBand {
            below_seconds,
            factor,
        };
        assert_matches!(
            LatencyFactorTable::new(vec![band(1.0, 1.0), band(0.5, 2.0)], 0.5),
            Err(Error::Config(_))
        );
        assert_matches!(
            LatencyFactorTable::new(vec![band(1.0, -1.0)], 0.5),
            Err(Error::Config(_))
        );
        assert_matches!(LatencyFactorTable::new(vec![], 0.0), Err(Error::Config(_)));
    }
}
