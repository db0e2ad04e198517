//! Latency Probe
//!
//! Measures the round trip of one calibration request against an upstream
//! operation. A probe only counts as successful when the transport worked, the
//! status is 200, the body is the expected JSON envelope and its embedded error
//! code is the success value. Anything else is a typed failure.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use super::operation;
use crate::error::{Error, Result};

// =============================================================================
// Probe Outcome
// =============================================================================

/// Why a probe did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeFailure {
    /// Connection, DNS or transfer error
    Network { message: String },
    /// No answer within the probe timeout
    Timeout { after_ms: u64 },
    /// Status other than 200
    HttpStatus { status: u16 },
    /// Body is not the expected JSON object
    MalformedBody { message: String },
    /// Envelope lacks a numeric error code
    MissingErrorCode,
    /// Upstream reported an error
    ErrorCode {
        code: i64,
        description: Option<String>,
    },
}

impl std::fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeFailure::Network { message } => write!(f, "network error: {}", message),
            ProbeFailure::Timeout { after_ms } => write!(f, "timed out after {}ms", after_ms),
            ProbeFailure::HttpStatus { status } => write!(f, "HTTP status {}", status),
            ProbeFailure::MalformedBody { message } => write!(f, "malformed body: {}", message),
            ProbeFailure::MissingErrorCode => write!(f, "response has no error code"),
            ProbeFailure::ErrorCode {
                code,
                description: Some(d),
            } => write!(f, "upstream error {}: {}", code, d),
            ProbeFailure::ErrorCode { code, .. } => write!(f, "upstream error {}", code),
        }
    }
}

/// Result of one probe
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeReport {
    pub operation: String,
    pub session: u32,
    pub success: bool,
    /// Wall-clock round trip measured by the caller
    pub latency_seconds: f64,
    pub http_status: Option<u16>,
    pub failure: Option<ProbeFailure>,
}

impl ProbeReport {
    pub fn succeeded(operation: &str, session: u32, latency: Duration, http_status: u16) -> Self {
        Self {
            operation: operation.to_string(),
            session,
            success: true,
            latency_seconds: latency.as_secs_f64(),
            http_status: Some(http_status),
            failure: None,
        }
    }

    pub fn failed(
        operation: &str,
        session: u32,
        latency: Duration,
        http_status: Option<u16>,
        failure: ProbeFailure,
    ) -> Self {
        Self {
            operation: operation.to_string(),
            session,
            success: false,
            latency_seconds: latency.as_secs_f64(),
            http_status,
            failure: Some(failure),
        }
    }

    /// Human readable failure reason
    pub fn error_reason(&self) -> Option<String> {
        self.failure.as_ref().map(ToString::to_string)
    }
}

// =============================================================================
// Probe Trait
// =============================================================================

/// Issues calibration requests against upstream operations
#[async_trait]
pub trait LatencyProbe: Send + Sync {
    /// Probe one operation with a session identifier. Never fails: failures are
    /// reported in the returned `ProbeReport`.
    async fn probe(&self, operation: &str, session: u32) -> ProbeReport;
}

/// Run a probe under a hard timeout
pub async fn probe_with_timeout(
    probe: &dyn LatencyProbe,
    operation: &str,
    session: u32,
    timeout: Duration,
) -> ProbeReport {
    let start = Instant::now();
    match tokio::time::timeout(timeout, probe.probe(operation, session)).await {
        Ok(report) => report,
        Err(_) => {
            warn!(operation, session, ?timeout, "probe timed out");
            ProbeReport::failed(
                operation,
                session,
                start.elapsed(),
                None,
                ProbeFailure::Timeout {
                    after_ms: timeout.as_millis() as u64,
                },
            )
        }
    }
}

/// Check a response body against the envelope contract.
///
/// `error_code_path` names the nested fields leading to the error code; code `0`
/// is success. The code may be a JSON number or a numeric string.
pub fn evaluate_envelope(
    body: &[u8],
    error_code_path: &[String],
) -> std::result::Result<(), ProbeFailure> {
    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| ProbeFailure::MalformedBody {
            message: e.to_string(),
        })?;
    if !value.is_object() {
        return Err(ProbeFailure::MalformedBody {
            message: "expected a JSON object".to_string(),
        });
    }

    let Some((code_field, parents)) = error_code_path.split_last() else {
        return Err(ProbeFailure::MissingErrorCode);
    };
    let mut parent = &value;
    for segment in parents {
        parent = parent
            .get(segment)
            .ok_or(ProbeFailure::MissingErrorCode)?;
    }

    let code = parent
        .get(code_field)
        .and_then(|c| {
            c.as_i64()
                .or_else(|| c.as_str().and_then(|s| s.trim().parse().ok()))
        })
        .ok_or(ProbeFailure::MissingErrorCode)?;

    if code != 0 {
        let description = parent
            .get("Descripcion")
            .and_then(|d| d.as_str())
            .filter(|d| !d.is_empty())
            .map(str::to_string);
        return Err(ProbeFailure::ErrorCode { code, description });
    }
    Ok(())
}

// =============================================================================
// HTTP Probe
// =============================================================================

/// Configuration of the HTTP probe
#[derive(Debug, Clone)]
pub struct HttpProbeConfig {
    /// Web-service base URL; operations are appended as path segments
    pub base_url: String,
    /// Per-request timeout
    pub timeout: Duration,
    /// Query parameter carrying the session identifier
    pub session_param: String,
    /// Fields leading to the envelope error code
    pub error_code_path: Vec<String>,
}

impl Default for HttpProbeConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/WcfServiceLibraryVerial".to_string(),
            timeout: Duration::from_secs(15),
            session_param: "x".to_string(),
            error_code_path: vec!["InfoError".to_string(), "Codigo".to_string()],
        }
    }
}

/// Probes operations over HTTP with `GET {base}/{operation}?x={session}&...`
pub struct HttpLatencyProbe {
    config: HttpProbeConfig,
    client: Client,
}

impl HttpLatencyProbe {
    pub fn new(config: HttpProbeConfig) -> Result<Arc<Self>> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Arc::new(Self { config, client }))
    }

    pub fn config(&self) -> &HttpProbeConfig {
        &self.config
    }

    fn request_url(&self, operation: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), operation)
    }

    fn query(&self, operation: &str, session: u32) -> Vec<(String, String)> {
        let mut query = vec![(self.config.session_param.clone(), session.to_string())];
        if let Some(op) = operation::find(operation) {
            query.extend(op.probe_params(Utc::now().date_naive()));
        }
        query
    }
}

#[async_trait]
impl LatencyProbe for HttpLatencyProbe {
    #[instrument(skip(self))]
    async fn probe(&self, operation: &str, session: u32) -> ProbeReport {
        let url = self.request_url(operation);
        let query = self.query(operation, session);

        let start = Instant::now();
        let response = match self.client.get(&url).query(&query).send().await {
            Ok(response) => response,
            Err(e) => {
                let failure = if e.is_timeout() {
                    ProbeFailure::Timeout {
                        after_ms: self.config.timeout.as_millis() as u64,
                    }
                } else {
                    ProbeFailure::Network {
                        message: e.to_string(),
                    }
                };
                debug!(%failure, "probe request failed");
                return ProbeReport::failed(operation, session, start.elapsed(), None, failure);
            }
        };

        let status = response.status();
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                return ProbeReport::failed(
                    operation,
                    session,
                    start.elapsed(),
                    Some(status.as_u16()),
                    ProbeFailure::Network {
                        message: e.to_string(),
                    },
                );
            }
        };
        let latency = start.elapsed();

        if status != StatusCode::OK {
            return ProbeReport::failed(
                operation,
                session,
                latency,
                Some(status.as_u16()),
                ProbeFailure::HttpStatus {
                    status: status.as_u16(),
                },
            );
        }

        match evaluate_envelope(&body, &self.config.error_code_path) {
            Ok(()) => {
                debug!(latency_ms = latency.as_millis() as u64, "probe succeeded");
                ProbeReport::succeeded(operation, session, latency, status.as_u16())
            }
            Err(failure) => {
                debug!(%failure, "probe rejected");
                ProbeReport::failed(operation, session, latency, Some(status.as_u16()), failure)
            }
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
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn path() -> Vec<String> {
        vec!["InfoError".into(), "Codigo".into()]
    }

    /// Serve `count` requests with a fixed response, returning the base URL and
    /// the captured request lines
    async fn serve(
        status_line: &'static str,
        body: &'static str,
        count: usize,
    ) -> (String, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let mut request_lines = Vec::new();
            for _ in 0..count {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = vec![0u8; 8192];
                let mut read = 0;
                loop {
                    let n = socket.read(&mut buf[read..]).await.unwrap();
                    read += n;
                    if n == 0 || buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                let request = String::from_utf8_lossy(&buf[..read]).to_string();
                request_lines.push(request.lines().next().unwrap_or_default().to_string());

                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status_line,
                    body.len(),
                    body
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
            }
            request_lines
        });

        (format!("http://{}", addr), handle)
    }

    fn probe_for(base_url: String) -> Arc<HttpLatencyProbe> {
        HttpLatencyProbe::new(HttpProbeConfig {
            base_url,
            timeout: Duration::from_secs(5),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_envelope_success() {
        let body = br#"{"InfoError":{"Codigo":0,"Descripcion":""},"Paises":[]}"#;
        assert!(evaluate_envelope(body, &path()).is_ok());

        let string_code = br#"{"InfoError":{"Codigo":"0"}}"#;
        assert!(evaluate_envelope(string_code, &path()).is_ok());
    }

    #[test]
    fn test_envelope_error_code() {
        let body = br#"{"InfoError":{"Codigo":12,"Descripcion":"Sesion no valida"}}"#;
        assert_eq!(
            evaluate_envelope(body, &path()),
            Err(ProbeFailure::ErrorCode {
                code: 12,
                description: Some("Sesion no valida".into()),
            })
        );
    }

    #[test]
    fn test_envelope_malformed_or_missing() {
        assert_matches!(
            evaluate_envelope(b"<html>oops</html>", &path()),
            Err(ProbeFailure::MalformedBody { .. })
        );
        assert_matches!(
            evaluate_envelope(b"[1,2,3]", &path()),
            Err(ProbeFailure::MalformedBody { .. })
        );
        assert_eq!(
            evaluate_envelope(br#"{"Paises":[]}"#, &path()),
            Err(ProbeFailure::MissingErrorCode)
        );
        assert_eq!(
            evaluate_envelope(br#"{"InfoError":{"Codigo":null}}"#, &path()),
            Err(ProbeFailure::MissingErrorCode)
        );
    }

    #[test]
    fn test_failure_display() {
        assert_eq!(
            ProbeFailure::HttpStatus { status: 503 }.to_string(),
            "HTTP status 503"
        );
        assert_eq!(
            ProbeFailure::ErrorCode {
                code: 3,
                description: None
            }
            .to_string(),
            "upstream error 3"
        );
    }

    #[tokio::test]
    async fn test_http_probe_success() {
        let (base, server) = serve("200 OK", r#"{"InfoError":{"Codigo":0}}"#, 1).await;
        let probe = probe_for(base);

        let report = probe.probe("GetStockArticulosWS", 18).await;
        assert!(report.success, "{:?}", report);
        assert_eq!(report.http_status, Some(200));
        assert!(report.latency_seconds >= 0.0);

        let lines = server.await.unwrap();
        assert!(lines[0].starts_with("GET /GetStockArticulosWS?x=18&id_articulo=0 "));
    }

    #[tokio::test]
    async fn test_http_probe_non_200() {
        let (base, _server) = serve("500 Internal Server Error", "{}", 1).await;
        let report = probe_for(base).probe("GetPaisesWS", 1).await;

        assert!(!report.success);
        assert_eq!(report.http_status, Some(500));
        assert_eq!(report.failure, Some(ProbeFailure::HttpStatus { status: 500 }));
    }

    #[tokio::test]
    async fn test_http_probe_error_code_is_failure() {
        let (base, _server) = serve("200 OK", r#"{"InfoError":{"Codigo":-1}}"#, 1).await;
        let report = probe_for(base).probe("GetPaisesWS", 1).await;

        assert!(!report.success);
        assert_matches!(report.failure, Some(ProbeFailure::ErrorCode { code: -1, .. }));
    }

    #[tokio::test]
    async fn test_http_probe_network_failure() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let report = probe_for(format!("http://{}", addr)).probe("GetPaisesWS", 1).await;
        assert!(!report.success);
        assert_matches!(report.failure, Some(ProbeFailure::Network { .. }));
    }

    struct StalledProbe;

    #[async_trait]
    impl LatencyProbe for StalledProbe {
        async fn probe(&self, operation: &str, session: u32) -> ProbeReport {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            ProbeReport::succeeded(operation, session, Duration::ZERO, 200)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_with_timeout() {
        let report =
            probe_with_timeout(&StalledProbe, "GetArticulosWS", 2, Duration::from_secs(10)).await;
        assert!(!report.success);
        assert_eq!(report.failure, Some(ProbeFailure::Timeout { after_ms: 10_000 }));
    }
}
