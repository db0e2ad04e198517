//! TTL Calibration
//!
//! Measures upstream latency and turns it into per-operation cache TTLs.
//!
//! ```text
//! SessionResolver ──▶ LatencyProbe ──▶ TtlCalibrator ──▶ OperationRegistry
//!  (first working      (one request,     (base TTL ×         (auto-configured
//!   session id)         strict gate)      latency factor)     policy)
//! ```

pub mod autoconfig;
pub mod operation;
pub mod probe;
pub mod session;
pub mod ttl;

pub use autoconfig::{
    AutoConfigOptions, AutoConfigReport, AutoConfigurator, CalibratedOperation, DiagnosticReport,
    UnavailableOperation,
};
pub use operation::{UpstreamOperation, CATALOG, DEFAULT_BASE_TTL_SECS};
pub use probe::{
    HttpLatencyProbe, HttpProbeConfig, LatencyProbe, ProbeFailure, ProbeReport,
};
pub use session::{SessionResolution, SessionResolver, DEFAULT_SESSION_CANDIDATES};
pub use ttl::{LatencyBand, LatencyFactorTable, TtlCalibrator, MAX_TTL_SECS, MIN_TTL_SECS};
