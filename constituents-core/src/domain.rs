//! Domain types shared by every stage of the holdings pipeline.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which provider published a fund's holdings file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// BlackRock iShares: CSV payload over HTTP, reports market value.
    IShares,
    /// State Street SPDR: spreadsheet download, reports percent weight.
    Spdr,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 2] = [ProviderKind::IShares, ProviderKind::Spdr];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::IShares => "ishares",
            ProviderKind::Spdr => "spdr",
        }
    }

    /// Lowercased name of the column holding the provider's raw value.
    pub fn value_column(&self) -> &'static str {
        match self {
            ProviderKind::IShares => "market value",
            ProviderKind::Spdr => "weight",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ishares" => Ok(ProviderKind::IShares),
            "spdr" => Ok(ProviderKind::Spdr),
            other => Err(format!("unknown provider '{other}' (expected ishares or spdr)")),
        }
    }
}

/// A fund to track and where its holdings come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundSpec {
    /// Storage name of the fund, e.g. `iwm` or `xlk`.
    pub name: String,
    pub provider: ProviderKind,
    pub url: String,
}

/// One row of the ticker reference table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TickerIdentity {
    pub ticker: String,
    pub permanent_id: String,
}

/// A single holding after normalization (and, later, identity join).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedHolding {
    pub ticker: String,
    /// Market value or percent weight, depending on the provider.
    pub value: f64,
    pub permanent_id: Option<String>,
    pub normalized_weight: f64,
    /// Every provider column for this row, aligned with `DailySnapshot::columns`.
    pub fields: Vec<String>,
}

/// One fund's holdings on one as-of date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySnapshot {
    pub fund: String,
    pub provider: ProviderKind,
    pub as_of: NaiveDate,
    /// Lowercased provider column names, in the provider's order.
    pub columns: Vec<String>,
    pub holdings: Vec<NormalizedHolding>,
}

impl DailySnapshot {
    /// `{fund}_{YYYY-MM-DD}`, the deterministic name of the snapshot file.
    pub fn file_stem(&self) -> String {
        snapshot_stem(&self.fund, self.as_of)
    }

    pub fn weight_sum(&self) -> f64 {
        self.holdings.iter().map(|h| h.normalized_weight).sum()
    }

    /// Tickers that did not resolve to a permanent identifier.
    pub fn unidentified_tickers(&self) -> Vec<&str> {
        self.holdings
            .iter()
            .filter(|h| h.permanent_id.is_none())
            .map(|h| h.ticker.as_str())
            .collect()
    }
}

pub fn snapshot_stem(fund: &str, as_of: NaiveDate) -> String {
    format!("{fund}_{}", as_of.format("%Y-%m-%d"))
}
