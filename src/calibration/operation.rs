//! Upstream Operation Catalog
//!
//! Known ERP web-service operations, the parameters a calibration request needs,
//! and the base TTL reflecting how often each operation's data changes upstream.

use std::collections::HashMap;

use chrono::{Duration, NaiveDate};
use once_cell::sync::Lazy;

/// Base TTL for operations missing from the catalog
pub const DEFAULT_BASE_TTL_SECS: u64 = 3600;

/// Lightweight operation used to validate session identifiers
pub const SESSION_PROBE_OPERATION: &str = "GetPaisesWS";

/// Value of a calibration request parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamValue {
    /// Literal value
    Fixed(&'static str),
    /// Today's date
    Today,
    /// Date a number of days in the past
    DaysAgo(i64),
}

impl ParamValue {
    fn render(&self, today: NaiveDate) -> String {
        match self {
            ParamValue::Fixed(v) => (*v).to_string(),
            ParamValue::Today => today.format("%Y-%m-%d").to_string(),
            ParamValue::DaysAgo(days) => (today - Duration::days(*days))
                .format("%Y-%m-%d")
                .to_string(),
        }
    }
}

/// One upstream operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpstreamOperation {
    pub name: &'static str,
    pub description: &'static str,
    /// TTL before latency adjustment
    pub base_ttl_secs: u64,
    pub params: &'static [(&'static str, ParamValue)],
}

impl UpstreamOperation {
    /// Query parameters of a calibration request issued on `today`
    pub fn probe_params(&self, today: NaiveDate) -> Vec<(String, String)> {
        self.params
            .iter()
            .map(|(name, value)| ((*name).to_string(), value.render(today)))
            .collect()
    }
}

/// Every operation the cache knows how to calibrate
pub static CATALOG: &[UpstreamOperation] = &[
    UpstreamOperation {
        name: "GetPaisesWS",
        description: "countries",
        base_ttl_secs: 86_400,
        params: &[],
    },
    UpstreamOperation {
        name: "GetCategoriasWS",
        description: "catalog categories",
        base_ttl_secs: 86_400,
        params: &[],
    },
    UpstreamOperation {
        name: "GetCategoriasWebWS",
        description: "web categories",
        base_ttl_secs: 86_400,
        params: &[],
    },
    UpstreamOperation {
        name: "GetColeccionesWS",
        description: "collections",
        base_ttl_secs: 43_200,
        params: &[],
    },
    UpstreamOperation {
        name: "GetArticulosWS",
        description: "articles",
        base_ttl_secs: 3600,
        params: &[("fecha", ParamValue::DaysAgo(1))],
    },
    UpstreamOperation {
        name: "GetNumArticulosWS",
        description: "article count",
        base_ttl_secs: 1800,
        params: &[("fecha", ParamValue::DaysAgo(30))],
    },
    UpstreamOperation {
        name: "GetImagenesArticulosWS",
        description: "article images",
        base_ttl_secs: 7200,
        params: &[
            ("id_articulo", ParamValue::Fixed("1")),
            ("numpixelsladomenor", ParamValue::Fixed("100")),
        ],
    },
    UpstreamOperation {
        name: "GetCondicionesTarifaWS",
        description: "price conditions",
        base_ttl_secs: 900,
        params: &[
            ("id_articulo", ParamValue::Fixed("0")),
            ("id_cliente", ParamValue::Fixed("0")),
            ("id_tarifa", ParamValue::Fixed("0")),
            ("fecha", ParamValue::Today),
        ],
    },
    UpstreamOperation {
        name: "GetStockArticulosWS",
        description: "stock levels",
        base_ttl_secs: 300,
        params: &[("id_articulo", ParamValue::Fixed("0"))],
    },
    UpstreamOperation {
        name: "GetHistorialPedidosWS",
        description: "order history",
        base_ttl_secs: 1800,
        params: &[
            ("fechadesde", ParamValue::DaysAgo(30)),
            ("fechahasta", ParamValue::Today),
        ],
    },
];

static BY_NAME: Lazy<HashMap<&'static str, &'static UpstreamOperation>> =
    Lazy::new(|| CATALOG.iter().map(|op| (op.name, op)).collect());

/// Look up an operation by name
pub fn find(name: &str) -> Option<&'static UpstreamOperation> {
    BY_NAME.get(name).copied()
}

/// Base TTL of an operation, falling back to the default for unknown names
pub fn base_ttl(name: &str) -> u64 {
    find(name).map_or(DEFAULT_BASE_TTL_SECS, |op| op.base_ttl_secs)
}

/// Names of all catalog operations, in catalog order
pub fn names() -> Vec<&'static str> {
    CATALOG.iter().map(|op| op.name).collect()
}

// =============================================================================
// Tests
// =============================================================================
