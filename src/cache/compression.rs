//! Cold Tier Compression
//!
//! LZ4 compression for payloads demoted to the cold tier. Payloads that are too
//! small, or that do not shrink, are stored as-is.
//!
//! # Example
//!
//! ```
//! use erpcache::cache::compression::{CompressionAlgorithm, CompressionManager};
//!
//! let manager = CompressionManager::new();
//!
//! let data = b"{\"Articulos\":[{\"Id\":1},{\"Id\":1},{\"Id\":1},{\"Id\":1}]}".repeat(64);
//! let (compressed, algorithm) = manager.compress(&data).unwrap();
//! assert_eq!(algorithm, CompressionAlgorithm::Lz4);
//!
//! let decompressed = manager.decompress(&compressed, algorithm).unwrap();
//! assert_eq!(decompressed.as_ref(), data.as_slice());
//! ```

use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;

use crate::error::{Error, Result};

// =============================================================================
// Compression Algorithm
// =============================================================================

/// Supported compression algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    /// Stored verbatim
    None,
    /// LZ4 block compression
    #[default]
    Lz4,
}

impl CompressionAlgorithm {
    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            CompressionAlgorithm::None => "none",
            CompressionAlgorithm::Lz4 => "lz4",
        }
    }
}

impl std::fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// =============================================================================
// Compression Configuration
// =============================================================================

/// Configuration for cold-tier compression
#[derive(Debug, Clone)]
pub struct CompressionConfig {
    /// Payloads smaller than this are stored uncompressed
    pub min_size_bytes: u64,
    /// LZ4 high-compression level
    pub level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            min_size_bytes: 256,
            level: 4,
        }
    }
}

// =============================================================================
// Compressor Trait
// =============================================================================

/// Trait for compression implementations
pub trait Compressor: Send + Sync {
    /// Get the algorithm identifier
    fn algorithm(&self) -> CompressionAlgorithm;

    /// Compress data
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decompress data
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// LZ4 compressor
pub struct Lz4Compressor {
    level: i32,
}

impl Lz4Compressor {
    /// Create with custom compression level
    pub fn with_level(level: i32) -> Self {
        Self { level }
    }
}

impl Default for Lz4Compressor {
    fn default() -> Self {
        Self::with_level(CompressionConfig::default().level)
    }
}

impl Compressor for Lz4Compressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::Lz4
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        // Size prefix lets decompress size its buffer
        lz4::block::compress(
            data,
            Some(lz4::block::CompressionMode::HIGHCOMPRESSION(self.level)),
            true,
        )
        .map_err(|e| Error::CompressionFailed {
            algorithm: "LZ4".into(),
            reason: e.to_string(),
        })
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4::block::decompress(data, None).map_err(|e| Error::DecompressionFailed {
            algorithm: "LZ4".into(),
            reason: e.to_string(),
        })
    }
}

// =============================================================================
// Compression Manager
// =============================================================================

/// Compresses payloads on demotion and restores them on cold hits
pub struct CompressionManager {
    config: CompressionConfig,
    compressor: Arc<dyn Compressor>,
}

impl CompressionManager {
    /// LZ4 with default settings
    pub fn new() -> Self {
        Self::with_config(CompressionConfig::default())
    }

    /// LZ4 with custom settings
    pub fn with_config(config: CompressionConfig) -> Self {
        let compressor = Arc::new(Lz4Compressor::with_level(config.level));
        Self { config, compressor }
    }

    /// Use a specific compressor implementation
    pub fn with_compressor(config: CompressionConfig, compressor: Arc<dyn Compressor>) -> Self {
        Self { config, compressor }
    }

    /// Compress a payload.
    ///
    /// Returns (stored_bytes, algorithm_used). A compressor failure is returned to
    /// the caller so the migration pass can skip the entry.
    pub fn compress(&self, data: &[u8]) -> Result<(Bytes, CompressionAlgorithm)> {
        if (data.len() as u64) < self.config.min_size_bytes {
            return Ok((Bytes::copy_from_slice(data), CompressionAlgorithm::None));
        }

        let compressed = self.compressor.compress(data)?;
        if compressed.len() < data.len() {
            Ok((Bytes::from(compressed), self.compressor.algorithm()))
        } else {
            Ok((Bytes::copy_from_slice(data), CompressionAlgorithm::None))
        }
    }

    /// Restore a stored payload
    pub fn decompress(&self, data: &[u8], algorithm: CompressionAlgorithm) -> Result<Bytes> {
        match algorithm {
            CompressionAlgorithm::None => Ok(Bytes::copy_from_slice(data)),
            alg if alg == self.compressor.algorithm() => {
                Ok(Bytes::from(self.compressor.decompress(data)?))
            }
            CompressionAlgorithm::Lz4 => Ok(Bytes::from(
                Lz4Compressor::with_level(self.config.level).decompress(data)?,
            )),
        }
    }

    /// Get configuration
    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }
}

impl Default for CompressionManager {
    fn default() -> Self {
        Self::new()
    }
}
