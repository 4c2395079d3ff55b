//! Holdings ingestion: fetch, normalize, join, persist.

pub mod ishares;
pub mod join;
pub mod matrix;
pub mod normalize;
pub mod pipeline;
pub mod provider;
pub mod reference;
pub mod snapshot;
pub mod spdr;

pub use ishares::{decode_csv_payload, ISharesFetcher};
pub use join::{join_identities, JoinResult};
pub use matrix::{FundWeightMatrix, MatrixStore, MergeOutcome, WeightVector};
pub use normalize::{
    normalize, strategy_for, HeaderLocation, ISharesLayout, NormalizationStrategy, SpdrLayout,
};
pub use pipeline::{
    process_fund, run_pipeline, update_from_snapshots, update_fund_from_snapshots, BatchSummary,
    FundReport, PipelineSummary, UpdateReport, UpdateSummary,
};
pub use provider::{DataError, FundProgress, HoldingsFetcher, LogProgress, RawHoldingsTable};
pub use reference::TickerIdentityTable;
pub use snapshot::{SnapshotMeta, SnapshotStore};
pub use spdr::{CommandTrigger, DownloadTrigger, SpdrFetcher};
