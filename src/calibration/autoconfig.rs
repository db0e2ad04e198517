//! Auto-Configuration Workflow
//!
//! 1. Resolve a working session (abort with `NoValidSession` if none works)
//! 2. Probe every operation sequentially, each under its own timeout
//! 3. Write the calibrated TTL of each successful probe into the registry
//! 4. Report failed probes as unavailable and leave their policy untouched

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};

use super::operation;
use super::probe::{probe_with_timeout, LatencyProbe, ProbeFailure, ProbeReport};
use super::session::{SessionResolution, SessionResolver, DEFAULT_SESSION_CANDIDATES};
use super::ttl::TtlCalibrator;
use crate::config::OperationRegistry;
use crate::error::{Error, Result};

/// Auto-configuration options
#[derive(Debug, Clone)]
pub struct AutoConfigOptions {
    /// Session identifiers in priority order
    pub session_candidates: Vec<u32>,
    /// Hard limit per probe
    pub probe_timeout: Duration,
    /// Operations to calibrate
    pub operations: Vec<String>,
}

impl Default for AutoConfigOptions {
    fn default() -> Self {
        Self {
            session_candidates: DEFAULT_SESSION_CANDIDATES.to_vec(),
            probe_timeout: Duration::from_secs(15),
            operations: operation::names().into_iter().map(String::from).collect(),
        }
    }
}

// =============================================================================
// Reports
// =============================================================================

/// An operation whose TTL was recalibrated
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibratedOperation {
    pub operation: String,
    pub latency_seconds: f64,
    pub previous_ttl_seconds: u64,
    pub ttl_seconds: u64,
}

/// An operation left unchanged because its probe failed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnavailableOperation {
    pub operation: String,
    pub reason: String,
    pub failure: Option<ProbeFailure>,
}

/// Outcome of an auto-configuration run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutoConfigReport {
    pub session: u32,
    pub configured: Vec<CalibratedOperation>,
    pub unavailable: Vec<UnavailableOperation>,
    pub measured_at: DateTime<Utc>,
    pub elapsed: Duration,
}

/// Connectivity report over every operation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticReport {
    pub session: Option<u32>,
    pub session_attempts: Vec<ProbeReport>,
    pub operations: Vec<ProbeReport>,
    pub healthy: usize,
    pub failed: usize,
    pub generated_at: DateTime<Utc>,
}

impl DiagnosticReport {
    /// Session found and every operation answered
    pub fn all_healthy(&self) -> bool {
        self.session.is_some() && self.failed == 0
    }
}

// =============================================================================
// Auto Configurator
// =============================================================================

/// Calibrates operation TTLs from live latency measurements
pub struct AutoConfigurator {
    probe: Arc<dyn LatencyProbe>,
    resolver: SessionResolver,
    calibrator: TtlCalibrator,
    options: AutoConfigOptions,
}

impl AutoConfigurator {
    pub fn new(probe: Arc<dyn LatencyProbe>, calibrator: TtlCalibrator, options: AutoConfigOptions) -> Self {
        let resolver = SessionResolver::new(Arc::clone(&probe), options.probe_timeout);
        Self {
            probe,
            resolver,
            calibrator,
            options,
        }
    }

    pub fn options(&self) -> &AutoConfigOptions {
        &self.options
    }

    pub fn calibrator(&self) -> &TtlCalibrator {
        &self.calibrator
    }

    async fn resolve_session(&self) -> SessionResolution {
        self.resolver.resolve(&self.options.session_candidates).await
    }

    async fn probe_all(&self, session: u32) -> Vec<ProbeReport> {
        let mut reports = Vec::with_capacity(self.options.operations.len());
        for operation in &self.options.operations {
            reports.push(
                probe_with_timeout(
                    self.probe.as_ref(),
                    operation,
                    session,
                    self.options.probe_timeout,
                )
                .await,
            );
        }
        reports
    }

    /// Calibrate every operation and persist the results into `registry`
    #[instrument(skip(self, registry))]
    pub async fn auto_configure(&self, registry: &OperationRegistry) -> Result<AutoConfigReport> {
        let start = Instant::now();
        let resolution = self.resolve_session().await;
        let session = resolution.session.ok_or_else(|| Error::NoValidSession {
            tried: resolution.tried(),
        })?;

        let measured_at = Utc::now();
        let mut configured = Vec::new();
        let mut unavailable = Vec::new();

        for report in self.probe_all(session).await {
            if report.success {
                let ttl = self
                    .calibrator
                    .calibrate(&report.operation, report.latency_seconds);
                let previous = registry.get(&report.operation).ttl_seconds;
                registry.record_calibration(
                    &report.operation,
                    ttl,
                    report.latency_seconds,
                    session,
                    measured_at,
                );
                info!(
                    operation = %report.operation,
                    latency_seconds = report.latency_seconds,
                    previous,
                    ttl,
                    "calibrated TTL"
                );
                configured.push(CalibratedOperation {
                    operation: report.operation,
                    latency_seconds: report.latency_seconds,
                    previous_ttl_seconds: previous,
                    ttl_seconds: ttl,
                });
            } else {
                let reason = report
                    .error_reason()
                    .unwrap_or_else(|| "unknown failure".to_string());
                warn!(operation = %report.operation, %reason, "operation unavailable, TTL unchanged");
                unavailable.push(UnavailableOperation {
                    operation: report.operation,
                    reason,
                    failure: report.failure,
                });
            }
        }

        Ok(AutoConfigReport {
            session,
            configured,
            unavailable,
            measured_at,
            elapsed: start.elapsed(),
        })
    }

    /// Probe every operation without changing configuration
    #[instrument(skip(self))]
    pub async fn diagnose(&self) -> DiagnosticReport {
        let resolution = self.resolve_session().await;
        let operations = match resolution.session {
            Some(session) => self.probe_all(session).await,
            None => Vec::new(),
        };
        let healthy = operations.iter().filter(|r| r.success).count();

        DiagnosticReport {
            session: resolution.session,
            session_attempts: resolution.attempts,
            failed: operations.len() - healthy,
            healthy,
            operations,
            generated_at: Utc::now(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Session 2 works; per-operation scripted latency or failure
    struct ScriptedProbe {
        outcomes: HashMap<&'static str, std::result::Result<f64, ProbeFailure>>,
        calls: Mutex<Vec<(String, u32)>>,
    }

    #[async_trait]
    impl LatencyProbe for ScriptedProbe {
        async fn probe(&self, operation: &str, session: u32) -> ProbeReport {
            self.calls.lock().push((operation.to_string(), session));
            if session != 2 {
                return ProbeReport::failed(
                    operation,
                    session,
                    Duration::ZERO,
                    Some(200),
                    ProbeFailure::ErrorCode {
                        code: 12,
                        description: None,
                    },
                );
            }
            match self.outcomes.get(operation) {
                Some(Ok(latency)) => ProbeReport::succeeded(
                    operation,
                    session,
                    Duration::from_secs_f64(*latency),
                    200,
                ),
                Some(Err(ProbeFailure::Timeout { .. })) => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    ProbeReport::succeeded(operation, session, Duration::ZERO, 200)
                }
                Some(Err(failure)) => {
                    ProbeReport::failed(operation, session, Duration::ZERO, Some(500), failure.clone())
                }
                None => ProbeReport::succeeded(operation, session, Duration::from_millis(700), 200),
            }
        }
    }

    fn configurator(
        outcomes: Vec<(&'static str, std::result::Result<f64, ProbeFailure>)>,
        operations: &[&str],
    ) -> (AutoConfigurator, Arc<ScriptedProbe>) {
        let probe = Arc::new(ScriptedProbe {
            outcomes: outcomes.into_iter().collect(),
            calls: Mutex::new(Vec::new()),
        });
        let options = AutoConfigOptions {
            operations: operations.iter().map(|s| s.to_string()).collect(),
            probe_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        (
            AutoConfigurator::new(probe.clone(), TtlCalibrator::default(), options),
            probe,
        )
    }

    #[tokio::test]
    async fn test_auto_configure_persists_successes() {
        let (auto, _) = configurator(
            vec![
                ("GetArticulosWS", Ok(0.3)),
                ("GetCategoriasWS", Ok(0.1)),
                ("GetStockArticulosWS", Err(ProbeFailure::HttpStatus { status: 502 })),
            ],
            &["GetArticulosWS", "GetCategoriasWS", "GetStockArticulosWS"],
        );
        let registry = OperationRegistry::default();
        registry.configure_ttl("GetStockArticulosWS", 120).unwrap();

        let report = auto.auto_configure(&registry).await.unwrap();
        assert_eq!(report.session, 2);
        assert_eq!(report.configured.len(), 2);
        assert_eq!(report.unavailable.len(), 1);
        assert_eq!(report.unavailable[0].reason, "HTTP status 502");

        let articles = registry.get("GetArticulosWS");
        assert_eq!(articles.ttl_seconds, 7200);
        assert!(articles.auto_configured);
        assert_eq!(articles.session_used, Some(2));
        assert!((articles.measured_latency_seconds.unwrap() - 0.3).abs() < 1e-6);
        assert_eq!(registry.get("GetCategoriasWS").ttl_seconds, 86_400);

        // Failed probe leaves the existing policy alone
        let stock = registry.get("GetStockArticulosWS");
        assert_eq!(stock.ttl_seconds, 120);
        assert!(!stock.auto_configured);
    }

    #[tokio::test]
    async fn test_session_failure_aborts() {
        let (auto, probe) = configurator(vec![], &["GetArticulosWS"]);
        let auto = AutoConfigurator::new(
            probe.clone(),
            TtlCalibrator::default(),
            AutoConfigOptions {
                session_candidates: vec![18, 1],
                ..auto.options().clone()
            },
        );
        let registry = OperationRegistry::default();

        assert_matches!(
            auto.auto_configure(&registry).await,
            Err(Error::NoValidSession { tried }) if tried == vec![18, 1]
        );
        assert!(registry.snapshot().is_empty());
        assert_eq!(probe.calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_probes_run_sequentially_after_session() {
        let (auto, probe) = configurator(vec![], &["GetArticulosWS", "GetCategoriasWS"]);
        auto.auto_configure(&OperationRegistry::default()).await.unwrap();

        let calls = probe.calls.lock().clone();
        let sessions: Vec<u32> = calls.iter().map(|(_, s)| *s).collect();
        assert_eq!(sessions, vec![18, 1, 2, 2, 2]);
        assert_eq!(calls[3].0, "GetArticulosWS");
        assert_eq!(calls[4].0, "GetCategoriasWS");
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_probe_does_not_block_others() {
        let (auto, _) = configurator(
            vec![
                ("GetArticulosWS", Err(ProbeFailure::Timeout { after_ms: 0 })),
                ("GetCondicionesTarifaWS", Ok(2.5)),
            ],
            &["GetArticulosWS", "GetCondicionesTarifaWS"],
        );
        let registry = OperationRegistry::default();

        let report = auto.auto_configure(&registry).await.unwrap();
        assert_eq!(report.unavailable.len(), 1);
        assert_matches!(
            report.unavailable[0].failure,
            Some(ProbeFailure::Timeout { after_ms: 5000 })
        );
        // 900 * 0.5
        assert_eq!(registry.get("GetCondicionesTarifaWS").ttl_seconds, 450);
    }

    #[tokio::test]
    async fn test_diagnose() {
        let (auto, _) = configurator(
            vec![("GetStockArticulosWS", Err(ProbeFailure::MissingErrorCode))],
            &["GetArticulosWS", "GetStockArticulosWS"],
        );

        let report = auto.diagnose().await;
        assert_eq!(report.session, Some(2));
        assert_eq!(report.session_attempts.len(), 3);
        assert_eq!(report.healthy, 1);
        assert_eq!(report.failed, 1);
        assert!(!report.all_healthy());

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["operations"][1]["failure"]["kind"], "missing_error_code");
    }

    #[tokio::test]
    async fn test_diagnose_without_session() {
        let (auto, probe) = configurator(vec![], &["GetArticulosWS"]);
        let auto = AutoConfigurator::new(
            probe,
            TtlCalibrator::default(),
            AutoConfigOptions {
                session_candidates: vec![5],
                ..auto.options().clone()
            },
        );

        let report = auto.diagnose().await;
        assert_eq!(report.session, None);
        assert!(report.operations.is_empty());
        assert!(!report.all_healthy());
    }
}
