//! Provider layouts → `DailySnapshot`.
//!
//! Every provider file buries its table between preamble and footer rows and
//! states its as-of date in its own format. A `NormalizationStrategy` knows
//! one layout; `normalize` runs the shared steps in two passes: first classify
//! and parse the data rows, then compute the weights over the kept rows.

use super::provider::{DataError, RawHoldingsTable};
use crate::domain::{DailySnapshot, NormalizedHolding, ProviderKind};
use chrono::NaiveDate;

/// Position of the true header row in a raw table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderLocation {
    pub row: usize,
    /// Number of columns that belong to the holdings table.
    pub width: usize,
}

/// Per-provider parsing rules.
pub trait NormalizationStrategy: Send + Sync {
    fn provider(&self) -> ProviderKind;

    /// Lowercased name of the column carrying the raw value.
    fn value_column(&self) -> &'static str {
        self.provider().value_column()
    }

    /// Find and parse the embedded "as of" date.
    fn parse_as_of(&self, raw: &RawHoldingsTable) -> Result<NaiveDate, DataError>;

    fn locate_header(&self, raw: &RawHoldingsTable) -> Result<HeaderLocation, DataError>;

    /// Whether a row below the header belongs to the holdings table.
    fn is_data_row(&self, row: &[String], header: HeaderLocation) -> bool;

    /// Parse a value cell. `Ok(None)` means the value is missing.
    fn parse_value(&self, cell: &str) -> Result<Option<f64>, DataError>;

    /// Weights summing to 1.0 over `values`.
    fn compute_weights(&self, values: &[f64]) -> Result<Vec<f64>, DataError> {
        normalize_by_sum(values)
    }
}

/// `value / sum(values)` for every value.
pub fn normalize_by_sum(values: &[f64]) -> Result<Vec<f64>, DataError> {
    let total: f64 = values.iter().sum();
    if !total.is_finite() || total.abs() < f64::EPSILON {
        return Err(DataError::Parse(format!(
            "holding values sum to {total}; cannot normalize"
        )));
    }
    Ok(values.iter().map(|v| v / total).collect())
}

/// Strategy for a provider.
pub fn strategy_for(provider: ProviderKind) -> Box<dyn NormalizationStrategy> {
    match provider {
        ProviderKind::IShares => Box::new(ISharesLayout),
        ProviderKind::Spdr => Box::new(SpdrLayout),
    }
}

/// Turn a raw provider table into a snapshot with normalized weights.
pub fn normalize(
    raw: &RawHoldingsTable,
    strategy: &dyn NormalizationStrategy,
) -> Result<DailySnapshot, DataError> {
    if raw.provider != strategy.provider() {
        return Err(DataError::Parse(format!(
            "{} table handed to the {} normalizer",
            raw.provider,
            strategy.provider()
        )));
    }

    let as_of = strategy.parse_as_of(raw)?;
    let header = strategy.locate_header(raw)?;

    let columns: Vec<String> = raw.rows[header.row]
        .iter()
        .take(header.width)
        .map(|c| c.trim().to_lowercase())
        .collect();
    let ticker_idx = column_index(&columns, "ticker")?;
    let value_idx = column_index(&columns, strategy.value_column())?;

    // Pass 1: classify rows and parse their values.
    let mut kept: Vec<(Vec<String>, f64)> = Vec::new();
    for row in &raw.rows[header.row + 1..] {
        if !strategy.is_data_row(row, header) {
            continue;
        }
        let fields: Vec<String> = row.iter().take(header.width).cloned().collect();
        if fields[ticker_idx].trim().is_empty() {
            continue;
        }
        if let Some(value) = strategy.parse_value(&fields[value_idx])? {
            kept.push((fields, value));
        }
    }

    if kept.is_empty() {
        return Err(DataError::EmptySnapshot {
            fund: raw.fund.clone(),
            reason: "no holdings rows after the header".into(),
        });
    }

    // Pass 2: weights over the retained rows.
    let values: Vec<f64> = kept.iter().map(|(_, v)| *v).collect();
    let weights = strategy.compute_weights(&values)?;

    let holdings = kept
        .into_iter()
        .zip(weights)
        .map(|((fields, value), normalized_weight)| NormalizedHolding {
            ticker: fields[ticker_idx].trim().to_string(),
            value,
            permanent_id: None,
            normalized_weight,
            fields,
        })
        .collect();

    Ok(DailySnapshot {
        fund: raw.fund.clone(),
        provider: raw.provider,
        as_of,
        columns,
        holdings,
    })
}

fn column_index(columns: &[String], name: &str) -> Result<usize, DataError> {
    columns.iter().position(|c| c == name).ok_or_else(|| {
        DataError::Parse(format!("header has no '{name}' column: {columns:?}"))
    })
}

fn is_missing(cell: &str) -> bool {
    let cell = cell.trim();
    cell.is_empty() || cell == "-"
}

// ── iShares ──────────────────────────────────────────────────────────

/// iShares CSV: `Fund Holdings as of,"Jan 05, 2024"` in the preamble, the
/// table is every row of full width, values are market values with
/// thousands separators.
pub struct ISharesLayout;

impl ISharesLayout {
    const DATE_FORMAT: &'static str = "%b %d, %Y";
}

impl NormalizationStrategy for ISharesLayout {
    fn provider(&self) -> ProviderKind {
        ProviderKind::IShares
    }

    fn parse_as_of(&self, raw: &RawHoldingsTable) -> Result<NaiveDate, DataError> {
        let row = raw
            .rows
            .iter()
            .find(|r| r.len() >= 2 && r[0].to_lowercase().contains("as of"))
            .ok_or_else(|| DataError::Parse("no 'as of' row in iShares preamble".into()))?;
        let text = row[1].trim();
        NaiveDate::parse_from_str(text, Self::DATE_FORMAT).map_err(|e| {
            DataError::Parse(format!("unrecognised iShares as-of date '{text}': {e}"))
        })
    }

    fn locate_header(&self, raw: &RawHoldingsTable) -> Result<HeaderLocation, DataError> {
        let width = raw.width();
        raw.rows
            .iter()
            .position(|r| r.len() == width && r.iter().any(|c| c.eq_ignore_ascii_case("ticker")))
            .map(|row| HeaderLocation { row, width })
            .ok_or_else(|| DataError::Parse("no full-width header row with a Ticker column".into()))
    }

    fn is_data_row(&self, row: &[String], header: HeaderLocation) -> bool {
        row.len() == header.width
    }

    fn parse_value(&self, cell: &str) -> Result<Option<f64>, DataError> {
        if is_missing(cell) {
            return Ok(None);
        }
        let cleaned = cell.trim().replace(',', "");
        cleaned
            .parse::<f64>()
            .map(Some)
            .map_err(|e| DataError::Parse(format!("bad market value '{cell}': {e}")))
    }
}

// ── SPDR ─────────────────────────────────────────────────────────────

/// SPDR spreadsheet: `As of 05-Jan-2024` in the preamble, header row holds
/// Ticker and Weight, the first eight columns form the table, weights are
/// percentages.
pub struct SpdrLayout;

impl SpdrLayout {
    const DATE_FORMAT: &'static str = "%d-%b-%Y";
    const TABLE_COLUMNS: usize = 8;
}

impl NormalizationStrategy for SpdrLayout {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Spdr
    }

    fn parse_as_of(&self, raw: &RawHoldingsTable) -> Result<NaiveDate, DataError> {
        let cell = raw
            .rows
            .iter()
            .flatten()
            .find(|c| c.to_lowercase().starts_with("as of"))
            .ok_or_else(|| DataError::Parse("no 'As of' cell in SPDR preamble".into()))?;
        let text = cell.get("as of".len()..).unwrap_or_default().trim();
        NaiveDate::parse_from_str(text, Self::DATE_FORMAT)
            .map_err(|e| DataError::Parse(format!("unrecognised SPDR as-of date '{text}': {e}")))
    }

    fn locate_header(&self, raw: &RawHoldingsTable) -> Result<HeaderLocation, DataError> {
        raw.rows
            .iter()
            .position(|r| {
                r.iter().any(|c| c.eq_ignore_ascii_case("ticker"))
                    && r.iter().any(|c| c.eq_ignore_ascii_case("weight"))
            })
            .map(|row| HeaderLocation {
                row,
                width: raw.rows[row].len().min(Self::TABLE_COLUMNS),
            })
            .ok_or_else(|| DataError::Parse("no header row with Ticker and Weight".into()))
    }

    fn is_data_row(&self, row: &[String], header: HeaderLocation) -> bool {
        row.len() >= header.width && row[..header.width].iter().all(|c| !c.trim().is_empty())
    }

    fn parse_value(&self, cell: &str) -> Result<Option<f64>, DataError> {
        if is_missing(cell) {
            return Ok(None);
        }
        let cleaned = cell.trim().trim_end_matches('%');
        cleaned
            .parse::<f64>()
            .map(Some)
            .map_err(|e| DataError::Parse(format!("bad weight '{cell}': {e}")))
    }
}
