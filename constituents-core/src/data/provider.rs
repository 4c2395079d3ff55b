//! Fetcher trait and structured error types.
//!
//! The HoldingsFetcher trait abstracts over the two ways a provider hands out
//! holdings (direct CSV download, browser-triggered spreadsheet download) so
//! the pipeline can drive either one and tests can substitute fixtures.

use crate::domain::{FundSpec, ProviderKind};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, warn};

/// Provider-specific tabular blob, exactly as fetched.
///
/// Cells are trimmed strings; rows may have different widths because
/// preamble and footer lines are mixed in with the holdings.
#[derive(Debug, Clone, PartialEq)]
pub struct RawHoldingsTable {
    pub fund: String,
    pub provider: ProviderKind,
    /// URL or file the table was read from.
    pub source: String,
    pub rows: Vec<Vec<String>>,
}

impl RawHoldingsTable {
    /// Widest row in the table.
    pub fn width(&self) -> usize {
        self.rows.iter().map(|r| r.len()).max().unwrap_or(0)
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&str> {
        self.rows.get(row).and_then(|r| r.get(col)).map(|c| c.as_str())
    }
}

/// Structured error types for pipeline operations.
///
/// These are designed to be displayable in CLI output and log lines.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("reference data unavailable: {0}")]
    DataUnavailable(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("no download for '{fund}' appeared within {waited_secs}s")]
    FetchTimeout { fund: String, waited_secs: u64 },

    #[error("cannot pick a download for '{fund}': {} matching files", .candidates.len())]
    AmbiguousFile {
        fund: String,
        candidates: Vec<PathBuf>,
    },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("corrupt weight matrix {}: {reason} (fix or remove it manually)", .path.display())]
    CorruptState { path: PathBuf, reason: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("no usable holdings for '{fund}': {reason}")]
    EmptySnapshot { fund: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl DataError {
    /// Fatal errors abort the whole run; everything else fails one fund.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DataError::DataUnavailable(_))
    }
}

/// Trait for holdings sources (direct download, browser download, fixtures).
///
/// Implementations only produce raw tables. Normalization and storage sit
/// above this trait.
pub trait HoldingsFetcher: Send + Sync {
    /// Human-readable name of this fetcher.
    fn name(&self) -> &str;

    fn provider(&self) -> ProviderKind;

    /// Funds this fetcher is configured for, in processing order.
    fn funds(&self) -> &[FundSpec];

    /// Retrieve the raw holdings table for one fund.
    fn fetch(&self, fund: &FundSpec) -> Result<RawHoldingsTable, DataError>;
}

/// Progress callback for multi-fund runs.
pub trait FundProgress: Send {
    /// Called when starting to process a fund.
    fn on_start(&self, fund: &str, index: usize, total: usize);

    /// Called when a fund finishes, successfully or not.
    fn on_complete(&self, fund: &str, index: usize, total: usize, outcome: Result<(), &DataError>);

    /// Called when the entire batch is done.
    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize);
}

/// Progress reporter that emits tracing events.
pub struct LogProgress;

impl FundProgress for LogProgress {
    fn on_start(&self, fund: &str, index: usize, total: usize) {
        info!("[{}/{}] processing {fund}", index + 1, total);
    }

    fn on_complete(&self, fund: &str, _index: usize, _total: usize, outcome: Result<(), &DataError>) {
        match outcome {
            Ok(()) => info!("{fund}: ok"),
            Err(e) => warn!("{fund}: failed: {e}"),
        }
    }

    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize) {
        info!("run complete: {succeeded}/{total} funds succeeded, {failed} failed");
    }
}
