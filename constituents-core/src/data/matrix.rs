//! Fund weight matrix: dates × permanent ids, one file per fund.
//!
//! Layout: `{root}/{fund}_constits.csv`, header `date,<id>,<id>,...`, one row
//! per as-of date in ascending order, empty cells where a security was not
//! held that day.
//!
//! A new row is merged only when its date is strictly after the newest stored
//! date, so repeated same-day runs leave the file untouched. A file that does
//! not parse is reported as `CorruptState` and never rewritten.

use super::provider::DataError;
use super::snapshot::write_atomic;
use crate::domain::DailySnapshot;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One snapshot reduced to per-identity weights.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightVector {
    pub date: NaiveDate,
    /// (permanent id, weight) in snapshot order; weights sum to 1.0.
    pub weights: Vec<(String, f64)>,
}

impl WeightVector {
    /// Drop holdings without a permanent id and renormalize the rest.
    ///
    /// Holdings sharing an id are summed into one entry.
    pub fn from_snapshot(snapshot: &DailySnapshot) -> Result<Self, DataError> {
        let mut order: Vec<String> = Vec::new();
        let mut totals: HashMap<String, f64> = HashMap::new();

        for holding in &snapshot.holdings {
            let Some(id) = &holding.permanent_id else {
                continue;
            };
            match totals.get_mut(id) {
                Some(total) => *total += holding.value,
                None => {
                    order.push(id.clone());
                    totals.insert(id.clone(), holding.value);
                }
            }
        }

        if order.is_empty() {
            return Err(DataError::EmptySnapshot {
                fund: snapshot.fund.clone(),
                reason: "no holding has a permanent id".into(),
            });
        }

        let sum: f64 = order.iter().map(|id| totals[id]).sum();
        if !sum.is_finite() || sum.abs() < f64::EPSILON {
            return Err(DataError::EmptySnapshot {
                fund: snapshot.fund.clone(),
                reason: format!("identified holdings sum to {sum}"),
            });
        }

        let weights = order
            .into_iter()
            .map(|id| {
                let w = totals[&id] / sum;
                (id, w)
            })
            .collect();

        Ok(Self {
            date: snapshot.as_of,
            weights,
        })
    }
}

/// What a merge did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The row was added; `new_columns` identities appeared for the first time.
    Appended { date: NaiveDate, new_columns: usize },
    /// The row was not newer than `latest`; nothing changed.
    Skipped { date: NaiveDate, latest: NaiveDate },
}

impl MergeOutcome {
    pub fn appended(&self) -> bool {
        matches!(self, MergeOutcome::Appended { .. })
    }
}

/// Accumulated weight history for one fund.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FundWeightMatrix {
    columns: Vec<String>,
    rows: BTreeMap<NaiveDate, HashMap<String, f64>>,
}

impl FundWeightMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vector(vector: &WeightVector) -> Self {
        let mut matrix = Self::new();
        matrix.merge(vector);
        matrix
    }

    /// Permanent ids, in the order they were first seen.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.rows.keys().copied()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.rows.keys().next().copied()
    }

    pub fn latest_date(&self) -> Option<NaiveDate> {
        self.rows.keys().next_back().copied()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn weight(&self, date: NaiveDate, id: &str) -> Option<f64> {
        self.rows.get(&date).and_then(|row| row.get(id)).copied()
    }

    /// Append `vector` as a new row if it is strictly newer than every
    /// stored row; unseen identities become new columns.
    pub fn merge(&mut self, vector: &WeightVector) -> MergeOutcome {
        if let Some(latest) = self.latest_date() {
            if vector.date <= latest {
                return MergeOutcome::Skipped {
                    date: vector.date,
                    latest,
                };
            }
        }

        let mut new_columns = 0;
        for (id, _) in &vector.weights {
            if !self.columns.contains(id) {
                self.columns.push(id.clone());
                new_columns += 1;
            }
        }
        self.rows
            .insert(vector.date, vector.weights.iter().cloned().collect());

        MergeOutcome::Appended {
            date: vector.date,
            new_columns,
        }
    }

    pub fn to_csv(&self) -> Result<Vec<u8>, DataError> {
        let map_err = |e: csv::Error| DataError::Storage(format!("matrix CSV: {e}"));
        let mut writer = csv::Writer::from_writer(Vec::new());

        let header = std::iter::once("date").chain(self.columns.iter().map(|c| c.as_str()));
        writer.write_record(header).map_err(map_err)?;

        for (date, row) in &self.rows {
            let mut record = Vec::with_capacity(self.columns.len() + 1);
            record.push(date.format("%Y-%m-%d").to_string());
            for id in &self.columns {
                record.push(row.get(id).map(|w| w.to_string()).unwrap_or_default());
            }
            writer.write_record(&record).map_err(map_err)?;
        }

        writer
            .into_inner()
            .map_err(|e| DataError::Storage(format!("matrix CSV flush: {e}")))
    }

    /// Parse a matrix file; any deviation from the layout is an error string.
    pub fn from_csv<R: std::io::Read>(reader: R) -> Result<Self, String> {
        let mut rdr = csv::Reader::from_reader(reader);
        let header = rdr.headers().map_err(|e| format!("header: {e}"))?.clone();

        let index_name = header.get(0).ok_or("empty header")?;
        if !(index_name.is_empty() || index_name.eq_ignore_ascii_case("date")) {
            return Err(format!("first column is '{index_name}', expected a date index"));
        }
        let columns: Vec<String> = header.iter().skip(1).map(String::from).collect();
        let mut seen = std::collections::HashSet::new();
        if let Some(dup) = columns.iter().find(|c| !seen.insert(c.as_str())) {
            return Err(format!("duplicate column '{dup}'"));
        }

        let mut rows = BTreeMap::new();
        let mut previous: Option<NaiveDate> = None;
        for (i, record) in rdr.records().enumerate() {
            let record = record.map_err(|e| format!("row {i}: {e}"))?;
            let date = parse_index_date(&record[0])
                .ok_or_else(|| format!("row {i}: bad date '{}'", &record[0]))?;
            if previous.is_some_and(|p| date <= p) {
                return Err(format!("row {i}: date {date} is not after the previous row"));
            }
            previous = Some(date);

            let mut row = HashMap::new();
            for (id, cell) in columns.iter().zip(record.iter().skip(1)) {
                let cell = cell.trim();
                if cell.is_empty() {
                    continue;
                }
                let w = cell
                    .parse::<f64>()
                    .map_err(|e| format!("row {i}, column {id}: {e}"))?;
                row.insert(id.clone(), w);
            }
            rows.insert(date, row);
        }

        Ok(Self { columns, rows })
    }
}

/// Accept `YYYY-MM-DD` and the `YYYY-MM-DD HH:MM:SS` form written by older tools.
fn parse_index_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S").map(|dt| dt.date())
        })
        .ok()
}

/// Weight-matrix files on disk.
pub struct MatrixStore {
    root: PathBuf,
}

impl MatrixStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `{root}/{fund}_constits.csv`
    pub fn path(&self, fund: &str) -> PathBuf {
        self.root.join(format!("{fund}_constits.csv"))
    }

    pub fn exists(&self, fund: &str) -> bool {
        self.path(fund).exists()
    }

    /// `Ok(None)` when the fund has no matrix yet.
    pub fn load(&self, fund: &str) -> Result<Option<FundWeightMatrix>, DataError> {
        let path = self.path(fund);
        if !path.exists() {
            return Ok(None);
        }
        let corrupt = |reason: String| DataError::CorruptState {
            path: path.clone(),
            reason,
        };
        let file = fs::File::open(&path).map_err(|e| corrupt(format!("open: {e}")))?;
        FundWeightMatrix::from_csv(file).map(Some).map_err(corrupt)
    }

    pub fn save(&self, fund: &str, matrix: &FundWeightMatrix) -> Result<PathBuf, DataError> {
        fs::create_dir_all(&self.root)
            .map_err(|e| DataError::Storage(format!("failed to create dir: {e}")))?;
        let path = self.path(fund);
        write_atomic(&path, &matrix.to_csv()?)?;
        Ok(path)
    }

    /// Load, merge and (only when a row was appended) save.
    pub fn merge(&self, fund: &str, vector: &WeightVector) -> Result<MergeOutcome, DataError> {
        let (mut matrix, existed) = match self.load(fund)? {
            Some(m) => (m, true),
            None => (FundWeightMatrix::new(), false),
        };

        let outcome = matrix.merge(vector);
        match outcome {
            MergeOutcome::Appended { date, new_columns } => {
                self.save(fund, &matrix)?;
                if existed {
                    info!("updated holdings matrix for {fund}: +{date}, {new_columns} new ids");
                } else {
                    info!("created holdings matrix for {fund} at {date}");
                }
            }
            MergeOutcome::Skipped { date, latest } => {
                debug!("{fund}: {date} is not after {latest}; matrix unchanged");
            }
        }
        Ok(outcome)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn vector(date: NaiveDate, weights: &[(&str, f64)]) -> WeightVector {
        WeightVector {
            date,
            weights: weights.iter().map(|(id, w)| (id.to_string(), *w)).collect(),
        }
    }

    #[test]
    fn same_day_merge_is_noop() {
        let mut m = FundWeightMatrix::from_vector(&vector(day(1), &[("1", 0.5), ("2", 0.5)]));
        let before = m.clone();

        let outcome = m.merge(&vector(day(1), &[("3", 1.0)]));
        assert_eq!(
            outcome,
            MergeOutcome::Skipped {
                date: day(1),
                latest: day(1)
            }
        );
        assert_eq!(m, before);
    }

    #[test]
    fn older_row_is_rejected() {
        let mut m = FundWeightMatrix::from_vector(&vector(day(5), &[("1", 1.0)]));
        assert!(!m.merge(&vector(day(2), &[("1", 1.0)])).appended());
        assert_eq!(m.row_count(), 1);
    }

    #[test]
    fn newer_row_outer_joins_columns() {
        let mut m = FundWeightMatrix::from_vector(&vector(day(1), &[("1", 0.5), ("2", 0.5)]));
        let outcome = m.merge(&vector(day(2), &[("2", 0.4), ("3", 0.6)]));

        assert_eq!(
            outcome,
            MergeOutcome::Appended {
                date: day(2),
                new_columns: 1
            }
        );
        assert_eq!(m.columns(), &["1", "2", "3"]);
        assert_eq!(m.weight(day(1), "3"), None);
        assert_eq!(m.weight(day(2), "1"), None);
        assert_eq!(m.weight(day(1), "1"), Some(0.5));
        assert_eq!(m.latest_date(), Some(day(2)));
    }

    #[test]
    fn csv_roundtrip_keeps_nulls() {
        let mut m = FundWeightMatrix::from_vector(&vector(day(1), &[("1", 0.25), ("2", 0.75)]));
        m.merge(&vector(day(2), &[("3", 1.0)]));

        let bytes = m.to_csv().unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.starts_with("date,1,2,3\n2024-01-01,0.25,0.75,\n"));

        let parsed = FundWeightMatrix::from_csv(bytes.as_slice()).unwrap();
        assert_eq!(parsed, m);
    }

    #[test]
    fn accepts_pandas_style_index() {
        let text = ",100,200\n2024-01-01 00:00:00,0.5,0.5\n2024-01-02,,1.0\n";
        let m = FundWeightMatrix::from_csv(text.as_bytes()).unwrap();
        assert_eq!(m.row_count(), 2);
        assert_eq!(m.weight(day(2), "100"), None);
    }

    #[test]
    fn rejects_unsorted_or_garbled_files() {
        assert!(FundWeightMatrix::from_csv("date,1\n2024-01-02,1\n2024-01-01,1\n".as_bytes()).is_err());
        assert!(FundWeightMatrix::from_csv("date,1\nyesterday,1\n".as_bytes()).is_err());
        assert!(FundWeightMatrix::from_csv("ticker,1\n2024-01-01,1\n".as_bytes()).is_err());
        assert!(FundWeightMatrix::from_csv("date,1,1\n2024-01-01,1,1\n".as_bytes()).is_err());
        assert!(FundWeightMatrix::from_csv("date,1\n2024-01-01,abc\n".as_bytes()).is_err());
    }

    #[test]
    fn store_merge_creates_then_skips() {
        let dir = tempfile::tempdir().unwrap();
        let store = MatrixStore::new(dir.path());

        assert!(store.merge("iwm", &vector(day(1), &[("1", 1.0)])).unwrap().appended());
        let bytes = fs::read(store.path("iwm")).unwrap();

        assert!(!store.merge("iwm", &vector(day(1), &[("2", 1.0)])).unwrap().appended());
        assert_eq!(fs::read(store.path("iwm")).unwrap(), bytes);

        assert!(store.merge("iwm", &vector(day(2), &[("2", 1.0)])).unwrap().appended());
        assert_eq!(store.load("iwm").unwrap().unwrap().row_count(), 2);
    }

    #[test]
    fn corrupt_file_is_reported_and_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let store = MatrixStore::new(dir.path());
        fs::write(store.path("iwm"), "not,a\nmatrix").unwrap();

        let err = store.merge("iwm", &vector(day(1), &[("1", 1.0)])).unwrap_err();
        assert!(matches!(err, DataError::CorruptState { .. }), "{err}");
        assert_eq!(fs::read_to_string(store.path("iwm")).unwrap(), "not,a\nmatrix");
    }
}
