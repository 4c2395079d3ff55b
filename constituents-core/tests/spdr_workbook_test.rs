//! SPDR spreadsheet path using the frozen SPY workbook fixture.

use chrono::NaiveDate;
use constituents_core::config::PipelineConfig;
use constituents_core::data::spdr::read_workbook;
use constituents_core::data::{
    normalize, DataError, DownloadTrigger, HoldingsFetcher, SpdrFetcher, SpdrLayout,
};
use constituents_core::domain::{FundSpec, ProviderKind};
use std::path::{Path, PathBuf};

fn fixture() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/spdr_spy.xlsx")
}

fn spy() -> FundSpec {
    FundSpec {
        name: "spy".into(),
        provider: ProviderKind::Spdr,
        url: "https://example.com/holdings-daily-us-en-spy.xlsx".into(),
    }
}

#[test]
fn workbook_cells_render_as_text() {
    let table = read_workbook(&spy(), &fixture()).unwrap();

    assert_eq!(table.provider, ProviderKind::Spdr);
    assert_eq!(table.cell(2, 1), Some("As of 05-Jan-2024"));
    assert_eq!(table.cell(4, 4), Some("Weight"));
    assert_eq!(table.cell(5, 1), Some("AAPL"));
    assert_eq!(table.cell(5, 2), Some("037833100"));

    let weight: f64 = table.cell(5, 4).unwrap().parse().unwrap();
    assert_eq!(weight, 7.0);
    assert_eq!(table.cell(8, 3), Some(""), "empty SEDOL cell");
}

#[test]
fn workbook_normalizes_to_renormalized_weights() {
    let table = read_workbook(&spy(), &fixture()).unwrap();
    let snapshot = normalize(&table, &SpdrLayout).unwrap();

    assert_eq!(
        snapshot.as_of,
        NaiveDate::from_ymd_opt(2024, 1, 5).unwrap()
    );
    assert_eq!(snapshot.columns.len(), 8);
    assert_eq!(snapshot.columns[1], "ticker");
    assert_eq!(snapshot.columns[4], "weight");

    let tickers: Vec<&str> = snapshot.holdings.iter().map(|h| h.ticker.as_str()).collect();
    assert_eq!(tickers, vec!["AAPL", "MSFT", "NVDA"], "cash row has an empty cell");

    let total = 7.0 + 6.5 + 3.5;
    assert!((snapshot.holdings[0].normalized_weight - 7.0 / total).abs() < 1e-9);
    assert!((snapshot.holdings[2].normalized_weight - 3.5 / total).abs() < 1e-9);
    assert!((snapshot.weight_sum() - 1.0).abs() < 1e-9);
}

/// Drops a copy of the fixture into the download dir, like a browser would.
struct CopyFixture;

impl DownloadTrigger for CopyFixture {
    fn trigger(&self, _url: &str, download_dir: &Path) -> Result<(), DataError> {
        std::fs::copy(fixture(), download_dir.join("holdings-daily-us-en-spy.xlsx"))
            .map_err(|e| DataError::Storage(e.to_string()))?;
        Ok(())
    }
}

#[test]
fn fetcher_reads_and_consumes_the_download() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = PipelineConfig {
        download_dir: dir.path().to_path_buf(),
        download_timeout_secs: 5,
        poll_interval_ms: 10,
        ..PipelineConfig::default()
    };
    config.spdr.funds = vec!["SPY".into()];

    let fetcher = SpdrFetcher::new(&config, Box::new(CopyFixture));
    let fund = fetcher.funds()[0].clone();
    assert_eq!(fund.name, "spy");

    let table = fetcher.fetch(&fund).unwrap();
    let snapshot = normalize(&table, &SpdrLayout).unwrap();

    assert_eq!(snapshot.holdings.len(), 3);
    assert!(!dir.path().join("holdings-daily-us-en-spy.xlsx").exists());
}
