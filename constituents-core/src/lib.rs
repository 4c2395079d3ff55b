//! Constituents core — ETF holdings ingestion.
//!
//! Fetches daily holdings files from fund providers, normalizes them into
//! per-fund snapshots keyed by permanent security identifiers, and keeps a
//! date-indexed weight matrix per fund:
//! - Provider fetchers (direct CSV download, browser-triggered spreadsheet)
//! - Per-provider normalization strategies
//! - Ticker → permaticker identity join
//! - Snapshot store and weight matrix store
//! - Sequential pipeline with per-fund failure isolation

pub mod config;
pub mod data;
pub mod domain;

pub use config::{ConfigError, PipelineConfig};
pub use data::{DataError, HoldingsFetcher};
pub use domain::{DailySnapshot, FundSpec, NormalizedHolding, ProviderKind, TickerIdentity};
