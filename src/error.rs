//! Error types for the ERP response cache

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the response cache
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client error
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML (de)serialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    // =========================================================================
    // Cache Errors
    // =========================================================================
    /// A single entry larger than the whole budget
    #[error("Entry {key} is too large: {size} bytes exceeds budget of {max} bytes")]
    EntryTooLarge { key: String, size: u64, max: u64 },

    /// Cache is globally disabled
    #[error("Cache is disabled")]
    CacheDisabled,

    /// The caller-supplied populate function failed
    #[error("Population of {key} failed: {reason}")]
    Populate { key: String, reason: String },

    /// A maintenance pass already holds an overlapping scope
    #[error("Maintenance already running over overlapping scope: {scope}")]
    ScopeBusy { scope: String },

    /// Invalid glob pattern
    #[error("Invalid key pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Cold storage backend failure
    #[error("Cold storage error: {0}")]
    ColdStorage(String),

    // =========================================================================
    // Compression Errors
    // =========================================================================
    /// Compression failed
    #[error("Compression with {algorithm} failed: {reason}")]
    CompressionFailed { algorithm: String, reason: String },

    /// Decompression failed
    #[error("Decompression with {algorithm} failed: {reason}")]
    DecompressionFailed { algorithm: String, reason: String },

    // =========================================================================
    // Calibration Errors
    // =========================================================================
    /// No candidate session produced a valid response
    #[error("No valid upstream session among candidates {tried:?}")]
    NoValidSession { tried: Vec<u32> },
}

// =============================================================================
// Tests
// =============================================================================
