//! Session Resolver
//!
//! Upstream session identifiers are pre-shared, so resolution is a linear probe of
//! the candidates against a lightweight operation, stopping at the first one that
//! returns an error-free envelope. There is no retry: a failing candidate list is a
//! configuration problem.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::operation::SESSION_PROBE_OPERATION;
use super::probe::{probe_with_timeout, LatencyProbe, ProbeReport};

/// Session candidates tried when none are configured
pub const DEFAULT_SESSION_CANDIDATES: [u32; 3] = [18, 1, 2];

/// Outcome of a resolution, with every attempt made
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionResolution {
    pub session: Option<u32>,
    pub attempts: Vec<ProbeReport>,
}

impl SessionResolution {
    /// Candidates that were probed, in order
    pub fn tried(&self) -> Vec<u32> {
        self.attempts.iter().map(|a| a.session).collect()
    }
}

/// Finds a working session identifier
pub struct SessionResolver {
    probe: Arc<dyn LatencyProbe>,
    reference_operation: String,
    probe_timeout: Duration,
}

impl SessionResolver {
    pub fn new(probe: Arc<dyn LatencyProbe>, probe_timeout: Duration) -> Self {
        Self {
            probe,
            reference_operation: SESSION_PROBE_OPERATION.to_string(),
            probe_timeout,
        }
    }

    /// Probe a different operation than the default
    pub fn with_reference_operation(mut self, operation: &str) -> Self {
        self.reference_operation = operation.to_string();
        self
    }

    /// Try candidates in order; stop at the first success
    #[instrument(skip(self))]
    pub async fn resolve(&self, candidates: &[u32]) -> SessionResolution {
        let mut attempts = Vec::new();

        for &session in candidates {
            let report = probe_with_timeout(
                self.probe.as_ref(),
                &self.reference_operation,
                session,
                self.probe_timeout,
            )
            .await;

            let success = report.success;
            if !success {
                debug!(session, reason = ?report.error_reason(), "session candidate rejected");
            }
            attempts.push(report);

            if success {
                info!(session, "resolved upstream session");
                return SessionResolution {
                    session: Some(session),
                    attempts,
                };
            }
        }

        warn!(?candidates, "no candidate session works");
        SessionResolution {
            session: None,
            attempts,
        }
    }

    /// First working session, if any
    pub async fn resolve_session(&self, candidates: &[u32]) -> Option<u32> {
        self.resolve(candidates).await.session
    }
}

// =============================================================================
// Tests
// =============================================================================
