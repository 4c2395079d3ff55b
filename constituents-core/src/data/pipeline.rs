//! Pipeline orchestrator — runs funds one at a time with progress reporting.
//!
//! Per fund: fetch → normalize → identity join → snapshot → matrix merge.
//! A failure in any step fails that fund only; snapshots and matrices of
//! funds already processed stay committed. The one run-wide failure is an
//! unreadable ticker reference file.

use super::join::join_identities;
use super::matrix::{MatrixStore, MergeOutcome, WeightVector};
use super::normalize::{normalize, strategy_for};
use super::provider::{DataError, FundProgress, HoldingsFetcher};
use super::reference::TickerIdentityTable;
use super::snapshot::SnapshotStore;
use crate::config::PipelineConfig;
use crate::domain::FundSpec;
use chrono::NaiveDate;
use std::path::PathBuf;
use tracing::warn;

/// What happened to one fund in a fetch run.
#[derive(Debug, Clone)]
pub struct FundReport {
    pub fund: String,
    pub as_of: NaiveDate,
    pub snapshot_path: PathBuf,
    pub holdings: usize,
    pub unmatched: Vec<String>,
    pub merge: MergeOutcome,
}

/// What happened to one fund when replaying stored snapshots.
#[derive(Debug, Clone)]
pub struct UpdateReport {
    pub fund: String,
    pub snapshots_seen: usize,
    pub appended: Vec<NaiveDate>,
    /// Snapshots with no identified holdings, left out of the matrix.
    pub unusable: Vec<NaiveDate>,
}

/// Summary of a multi-fund operation.
#[derive(Debug)]
pub struct BatchSummary<T> {
    pub total: usize,
    pub reports: Vec<T>,
    pub errors: Vec<(String, DataError)>,
}

impl<T> BatchSummary<T> {
    fn new(total: usize) -> Self {
        Self {
            total,
            reports: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn succeeded(&self) -> usize {
        self.reports.len()
    }

    pub fn failed(&self) -> usize {
        self.errors.len()
    }

    pub fn all_succeeded(&self) -> bool {
        self.errors.is_empty()
    }
}

pub type PipelineSummary = BatchSummary<FundReport>;
pub type UpdateSummary = BatchSummary<UpdateReport>;

/// Process a single fund end to end.
pub fn process_fund(
    fetcher: &dyn HoldingsFetcher,
    fund: &FundSpec,
    identities: &TickerIdentityTable,
    snapshots: &SnapshotStore,
    matrices: &MatrixStore,
) -> Result<FundReport, DataError> {
    let raw = fetcher.fetch(fund)?;
    let strategy = strategy_for(fund.provider);
    let snapshot = normalize(&raw, strategy.as_ref())?;
    let joined = join_identities(snapshot, identities);

    let snapshot_path = snapshots.write(&joined.snapshot)?;
    let vector = WeightVector::from_snapshot(&joined.snapshot)?;
    let merge = matrices.merge(&fund.name, &vector)?;

    Ok(FundReport {
        fund: fund.name.clone(),
        as_of: joined.snapshot.as_of,
        snapshot_path,
        holdings: joined.snapshot.holdings.len(),
        unmatched: joined.unmatched,
        merge,
    })
}

/// Run every fund of every fetcher, sequentially.
///
/// Returns `Err` only for run-wide failures (the reference file); per-fund
/// failures are collected in the summary.
pub fn run_pipeline(
    config: &PipelineConfig,
    fetchers: &[&dyn HoldingsFetcher],
    progress: &dyn FundProgress,
) -> Result<PipelineSummary, DataError> {
    let identities = TickerIdentityTable::load(&config.reference_file)?;
    let snapshots = SnapshotStore::new(config.snapshot_root());
    let matrices = MatrixStore::new(config.matrix_root());

    let total = fetchers.iter().map(|f| f.funds().len()).sum();
    let mut summary = PipelineSummary::new(total);
    let mut index = 0;

    for fetcher in fetchers {
        for fund in fetcher.funds() {
            progress.on_start(&fund.name, index, total);
            let result = process_fund(*fetcher, fund, &identities, &snapshots, &matrices);
            progress.on_complete(&fund.name, index, total, result.as_ref().map(|_| ()));
            index += 1;

            match result {
                Ok(report) => summary.reports.push(report),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => summary.errors.push((fund.name.clone(), e)),
            }
        }
    }

    progress.on_batch_complete(summary.succeeded(), summary.failed(), total);
    Ok(summary)
}

/// Replay stored snapshots of one fund into its matrix, oldest first.
///
/// Snapshots dated on or before the matrix's latest row are not read. A
/// snapshot with no identified holdings is logged and passed over; an
/// unreadable snapshot or matrix fails the fund.
pub fn update_fund_from_snapshots(
    fund: &str,
    snapshots: &SnapshotStore,
    matrices: &MatrixStore,
) -> Result<UpdateReport, DataError> {
    let files = snapshots.list(fund)?;
    let mut latest = matrices.load(fund)?.and_then(|m| m.latest_date());
    let mut appended = Vec::new();
    let mut unusable = Vec::new();

    for (date, path) in &files {
        if latest.is_some_and(|l| *date <= l) {
            continue;
        }
        let snapshot = snapshots.read(path)?;
        let vector = match WeightVector::from_snapshot(&snapshot) {
            Ok(vector) => vector,
            Err(e @ DataError::EmptySnapshot { .. }) => {
                warn!("{fund}: skipping {}: {e}", path.display());
                unusable.push(*date);
                continue;
            }
            Err(e) => return Err(e),
        };
        if let MergeOutcome::Appended { date, .. } = matrices.merge(fund, &vector)? {
            appended.push(date);
            latest = Some(date);
        }
    }

    Ok(UpdateReport {
        fund: fund.to_string(),
        snapshots_seen: files.len(),
        appended,
        unusable,
    })
}

/// Rebuild or extend every fund's matrix from the snapshots on disk.
pub fn update_from_snapshots(
    config: &PipelineConfig,
    progress: &dyn FundProgress,
) -> Result<UpdateSummary, DataError> {
    let snapshots = SnapshotStore::new(config.snapshot_root());
    let matrices = MatrixStore::new(config.matrix_root());

    let funds = snapshots.funds()?;
    let total = funds.len();
    let mut summary = UpdateSummary::new(total);

    for (i, fund) in funds.iter().enumerate() {
        progress.on_start(fund, i, total);
        let result = update_fund_from_snapshots(fund, &snapshots, &matrices);
        progress.on_complete(fund, i, total, result.as_ref().map(|_| ()));

        match result {
            Ok(report) => summary.reports.push(report),
            Err(e) => summary.errors.push((fund.clone(), e)),
        }
    }

    progress.on_batch_complete(summary.succeeded(), summary.failed(), total);
    Ok(summary)
}
