//! Snapshot store: one CSV per (fund, as-of date).
//!
//! Layout: `{root}/{fund}/{fund}_{YYYY-MM-DD}.csv` plus `{root}/{fund}/meta.json`
//!
//! - Atomic writes (write to .tmp, rename into place); rewriting the same
//!   (fund, date) overwrites the previous file
//! - Columns: the provider's columns, then `permanent_id`, `normalized_weight`
//! - Metadata sidecar per fund (last written date, hash, unmatched tickers)

use super::normalize::strategy_for;
use super::provider::DataError;
use crate::domain::{snapshot_stem, DailySnapshot, NormalizedHolding, ProviderKind};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

const PERMANENT_ID: &str = "permanent_id";
const NORMALIZED_WEIGHT: &str = "normalized_weight";

/// Metadata sidecar describing the last snapshot written for a fund.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub fund: String,
    pub provider: ProviderKind,
    pub as_of: NaiveDate,
    pub row_count: usize,
    pub unmatched_tickers: Vec<String>,
    pub data_hash: String,
    pub written_at: chrono::NaiveDateTime,
}

/// The snapshot store.
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for a fund: `{root}/{fund}/`
    pub fn fund_dir(&self, fund: &str) -> PathBuf {
        self.root.join(fund)
    }

    /// `{root}/{fund}/{fund}_{YYYY-MM-DD}.csv`
    pub fn path_for(&self, fund: &str, as_of: NaiveDate) -> PathBuf {
        self.fund_dir(fund)
            .join(format!("{}.csv", snapshot_stem(fund, as_of)))
    }

    fn meta_path(&self, fund: &str) -> PathBuf {
        self.fund_dir(fund).join("meta.json")
    }

    /// Persist a snapshot, replacing any earlier file for the same date.
    pub fn write(&self, snapshot: &DailySnapshot) -> Result<PathBuf, DataError> {
        let dir = self.fund_dir(&snapshot.fund);
        fs::create_dir_all(&dir)
            .map_err(|e| DataError::Storage(format!("failed to create dir: {e}")))?;

        let bytes = snapshot_to_csv(snapshot)?;
        let path = self.path_for(&snapshot.fund, snapshot.as_of);
        write_atomic(&path, &bytes)?;

        let meta = SnapshotMeta {
            fund: snapshot.fund.clone(),
            provider: snapshot.provider,
            as_of: snapshot.as_of,
            row_count: snapshot.holdings.len(),
            unmatched_tickers: snapshot
                .unidentified_tickers()
                .into_iter()
                .map(String::from)
                .collect(),
            data_hash: blake3::hash(&bytes).to_hex().to_string(),
            written_at: chrono::Local::now().naive_local(),
        };
        let meta_json = serde_json::to_string_pretty(&meta)
            .map_err(|e| DataError::Storage(format!("meta serialization: {e}")))?;
        write_atomic(&self.meta_path(&snapshot.fund), meta_json.as_bytes())?;

        info!("saved holdings for {} ({}) to {}", snapshot.fund, snapshot.as_of, path.display());
        Ok(path)
    }

    /// Read a snapshot file back. Fund and date come from the file name.
    pub fn read(&self, path: &Path) -> Result<DailySnapshot, DataError> {
        let (fund, as_of) = parse_file_name(path).ok_or_else(|| {
            DataError::Parse(format!("{} is not a snapshot file name", path.display()))
        })?;
        let file = fs::File::open(path)
            .map_err(|e| DataError::Parse(format!("open {}: {e}", path.display())))?;
        snapshot_from_csv(file, &fund, as_of)
            .map_err(|e| DataError::Parse(format!("{}: {e}", path.display())))
    }

    /// Snapshot files for a fund, oldest as-of date first.
    pub fn list(&self, fund: &str) -> Result<Vec<(NaiveDate, PathBuf)>, DataError> {
        let dir = self.fund_dir(fund);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let entries =
            fs::read_dir(&dir).map_err(|e| DataError::Storage(format!("read dir: {e}")))?;

        let mut found = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| DataError::Storage(format!("dir entry: {e}")))?;
            let path = entry.path();
            if let Some((name, date)) = parse_file_name(&path) {
                if name == fund {
                    found.push((date, path));
                }
            }
        }
        found.sort();
        Ok(found)
    }

    /// Funds that have a snapshot directory, sorted by name.
    pub fn funds(&self) -> Result<Vec<String>, DataError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let entries =
            fs::read_dir(&self.root).map_err(|e| DataError::Storage(format!("read dir: {e}")))?;
        let mut funds = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| DataError::Storage(format!("dir entry: {e}")))?;
            if entry.path().is_dir() {
                funds.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        funds.sort();
        Ok(funds)
    }

    pub fn meta(&self, fund: &str) -> Option<SnapshotMeta> {
        let content = fs::read_to_string(self.meta_path(fund)).ok()?;
        serde_json::from_str(&content).ok()
    }
}

/// Write to `{path}.tmp` and rename into place.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), DataError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp_path = PathBuf::from(tmp);

    fs::write(&tmp_path, bytes)
        .map_err(|e| DataError::Storage(format!("write {}: {e}", tmp_path.display())))?;
    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        DataError::Storage(format!("atomic rename failed: {e}"))
    })
}

/// `{fund}_{YYYY-MM-DD}.csv` → (fund, date)
fn parse_file_name(path: &Path) -> Option<(String, NaiveDate)> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(".csv")?;
    let (fund, date) = stem.rsplit_once('_')?;
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    Some((fund.to_string(), date))
}

// ── CSV helpers ──────────────────────────────────────────────────────

fn snapshot_to_csv(snapshot: &DailySnapshot) -> Result<Vec<u8>, DataError> {
    let map_err = |e: csv::Error| DataError::Storage(format!("snapshot CSV: {e}"));
    let mut writer = csv::Writer::from_writer(Vec::new());

    let mut header: Vec<&str> = snapshot.columns.iter().map(|c| c.as_str()).collect();
    header.extend([PERMANENT_ID, NORMALIZED_WEIGHT]);
    writer.write_record(&header).map_err(map_err)?;

    for holding in &snapshot.holdings {
        let mut record: Vec<String> = holding.fields.clone();
        record.resize(snapshot.columns.len(), String::new());
        record.push(holding.permanent_id.clone().unwrap_or_default());
        record.push(holding.normalized_weight.to_string());
        writer.write_record(&record).map_err(map_err)?;
    }

    writer
        .into_inner()
        .map_err(|e| DataError::Storage(format!("snapshot CSV flush: {e}")))
}

fn snapshot_from_csv<R: std::io::Read>(
    reader: R,
    fund: &str,
    as_of: NaiveDate,
) -> Result<DailySnapshot, String> {
    let mut rdr = csv::Reader::from_reader(reader);
    let header: Vec<String> = rdr
        .headers()
        .map_err(|e| format!("header: {e}"))?
        .iter()
        .map(String::from)
        .collect();

    let n = header.len();
    if n < 3 || header[n - 2] != PERMANENT_ID || header[n - 1] != NORMALIZED_WEIGHT {
        return Err(format!(
            "expected trailing '{PERMANENT_ID}' and '{NORMALIZED_WEIGHT}' columns"
        ));
    }
    let columns = header[..n - 2].to_vec();

    let provider = ProviderKind::ALL
        .into_iter()
        .find(|p| columns.iter().any(|c| c == p.value_column()))
        .ok_or("no market value or weight column")?;
    let strategy = strategy_for(provider);
    let ticker_idx = columns
        .iter()
        .position(|c| c == "ticker")
        .ok_or("no ticker column")?;
    let value_idx = columns
        .iter()
        .position(|c| c == provider.value_column())
        .ok_or("no value column")?;

    let mut holdings = Vec::new();
    for (i, record) in rdr.records().enumerate() {
        let record = record.map_err(|e| format!("row {i}: {e}"))?;
        let fields: Vec<String> = record.iter().take(n - 2).map(String::from).collect();
        let value = strategy
            .parse_value(&fields[value_idx])
            .map_err(|e| format!("row {i}: {e}"))?
            .ok_or_else(|| format!("row {i}: missing value"))?;
        let permanent_id = Some(record[n - 2].trim())
            .filter(|id| !id.is_empty())
            .map(String::from);
        let normalized_weight = record[n - 1]
            .trim()
            .parse::<f64>()
            .map_err(|e| format!("row {i}: bad normalized_weight: {e}"))?;

        holdings.push(NormalizedHolding {
            ticker: fields[ticker_idx].clone(),
            value,
            permanent_id,
            normalized_weight,
            fields,
        });
    }

    Ok(DailySnapshot {
        fund: fund.to_string(),
        provider,
        as_of,
        columns,
        holdings,
    })
}
