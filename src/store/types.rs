//! Bar store types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// A single OHLCV record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bar {
    /// Archive symbol (e.g., "MCL")
    pub symbol: String,
    /// Bar open time
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: u64,
}

/// Cache occupancy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Partition files parsed and held in memory
    pub files: usize,
    /// Total bars across cached partitions
    pub bars: usize,
}

/// Bar store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Requested symbol has no partition in the archive
    #[error(
        "symbol '{symbol}' not available in archive (available symbols: [{}])",
        .available.join(", ")
    )]
    SymbolNotAvailable {
        symbol: String,
        available: Vec<String>,
    },
    /// Archive root does not exist or is not a directory
    #[error("archive root {0:?} is not a directory")]
    ArchiveMissing(PathBuf),
    /// A partition file could not be read
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
