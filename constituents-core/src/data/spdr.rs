//! SPDR browser-triggered spreadsheet fetcher.
//!
//! SPDR holdings are published as `.xlsx` files that a browser session has to
//! download. The fetcher makes the download deterministic: matching files are
//! removed from the download directory before the browser is triggered, then
//! the directory is polled until exactly one fresh file appears.
//!
//! Layout of a fund's file name: `holdings-daily-us-en-{ticker}.xlsx`, with a
//! ` (n)` suffix when the browser de-duplicates.

use super::provider::{DataError, HoldingsFetcher, RawHoldingsTable};
use crate::config::PipelineConfig;
use crate::domain::{FundSpec, ProviderKind};
use calamine::{open_workbook_auto, Reader};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Something that makes a browser fetch `url` into `download_dir`.
pub trait DownloadTrigger: Send + Sync {
    fn trigger(&self, url: &str, download_dir: &Path) -> Result<(), DataError>;
}

/// Opens each URL by launching a configured browser command.
///
/// Browser processes are kept alive until the trigger is dropped so
/// downloads in flight are not cut short.
pub struct CommandTrigger {
    program: String,
    args: Vec<String>,
    children: Mutex<Vec<Child>>,
}

impl CommandTrigger {
    pub fn new(command: &[String]) -> Result<Self, DataError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| DataError::Config("browser_command is empty".into()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            children: Mutex::new(Vec::new()),
        })
    }
}

impl DownloadTrigger for CommandTrigger {
    fn trigger(&self, url: &str, download_dir: &Path) -> Result<(), DataError> {
        let dir = download_dir.display().to_string();
        let args: Vec<String> = self
            .args
            .iter()
            .map(|a| a.replace("{download_dir}", &dir))
            .collect();

        let child = Command::new(&self.program)
            .args(&args)
            .arg(url)
            .current_dir(download_dir)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| DataError::Network(format!("failed to launch '{}': {e}", self.program)))?;

        match self.children.lock() {
            Ok(mut children) => children.push(child),
            Err(poisoned) => poisoned.into_inner().push(child),
        }
        Ok(())
    }
}

impl Drop for CommandTrigger {
    fn drop(&mut self) {
        let children = match self.children.get_mut() {
            Ok(children) => children,
            Err(poisoned) => poisoned.into_inner(),
        };
        for child in children.iter_mut() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// SPDR holdings fetcher.
pub struct SpdrFetcher {
    funds: Vec<FundSpec>,
    download_dir: PathBuf,
    timeout: Duration,
    poll_interval: Duration,
    trigger: Box<dyn DownloadTrigger>,
}

impl SpdrFetcher {
    pub fn new(config: &PipelineConfig, trigger: Box<dyn DownloadTrigger>) -> Self {
        Self {
            funds: config.fund_specs(ProviderKind::Spdr),
            download_dir: config.download_dir.clone(),
            timeout: config.download_timeout(),
            poll_interval: config.poll_interval(),
            trigger,
        }
    }

    /// Clear stale downloads, trigger the browser, and wait for the file.
    pub fn acquire(&self, fund: &FundSpec) -> Result<PathBuf, DataError> {
        fs::create_dir_all(&self.download_dir).map_err(|e| {
            DataError::Storage(format!(
                "create download dir {}: {e}",
                self.download_dir.display()
            ))
        })?;

        let stem = download_stem(fund);
        self.clear_stale(&stem)?;
        self.trigger.trigger(&fund.url, &self.download_dir)?;

        let started = Instant::now();
        loop {
            let mut found = self.matching_files(&stem, false)?;
            match found.len() {
                0 => {}
                1 => return Ok(found.remove(0)),
                _ => {
                    found.sort();
                    return Err(DataError::AmbiguousFile {
                        fund: fund.name.clone(),
                        candidates: found,
                    });
                }
            }

            if started.elapsed() >= self.timeout {
                return Err(DataError::FetchTimeout {
                    fund: fund.name.clone(),
                    waited_secs: self.timeout.as_secs(),
                });
            }
            std::thread::sleep(self.poll_interval);
        }
    }

    /// Remove every file (complete or partial) left over for this fund.
    fn clear_stale(&self, stem: &str) -> Result<(), DataError> {
        for path in self.matching_files(stem, true)? {
            debug!("removing stale download {}", path.display());
            fs::remove_file(&path).map_err(|e| {
                DataError::Storage(format!("remove stale download {}: {e}", path.display()))
            })?;
        }
        Ok(())
    }

    fn matching_files(&self, stem: &str, include_partial: bool) -> Result<Vec<PathBuf>, DataError> {
        let entries = fs::read_dir(&self.download_dir).map_err(|e| {
            DataError::Storage(format!("read download dir {}: {e}", self.download_dir.display()))
        })?;

        let mut matches = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| DataError::Storage(format!("dir entry: {e}")))?;
            let name = entry.file_name().to_string_lossy().to_string();
            let hit = if include_partial {
                belongs_to(&name, stem)
            } else {
                is_complete_download(&name, stem)
            };
            if hit && entry.path().is_file() {
                matches.push(entry.path());
            }
        }
        Ok(matches)
    }
}

impl HoldingsFetcher for SpdrFetcher {
    fn name(&self) -> &str {
        "spdr_browser"
    }

    fn provider(&self) -> ProviderKind {
        ProviderKind::Spdr
    }

    fn funds(&self) -> &[FundSpec] {
        &self.funds
    }

    fn fetch(&self, fund: &FundSpec) -> Result<RawHoldingsTable, DataError> {
        let path = self.acquire(fund)?;
        let table = read_workbook(fund, &path)?;
        if let Err(e) = fs::remove_file(&path) {
            warn!("could not remove consumed download {}: {e}", path.display());
        }
        Ok(table)
    }
}

/// File stem the provider uses for a fund, taken from the download URL.
pub fn download_stem(fund: &FundSpec) -> String {
    let last = fund
        .url
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .split(['?', '#'])
        .next()
        .unwrap_or_default();
    match last.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => format!("holdings-daily-us-en-{}", fund.name),
    }
}

/// Any file of this fund, including partial downloads like `stem.xlsx.crdownload`.
fn belongs_to(name: &str, stem: &str) -> bool {
    name.strip_prefix(stem)
        .is_some_and(|rest| rest.starts_with('.') || rest.starts_with(" ("))
}

/// `stem.xlsx` or the browser's de-duplicated `stem (n).xlsx`.
fn is_complete_download(name: &str, stem: &str) -> bool {
    let Some(base) = name.strip_suffix(".xlsx") else {
        return false;
    };
    base == stem || base.starts_with(&format!("{stem} ("))
}

/// Read the first worksheet of a spreadsheet into raw rows.
pub fn read_workbook(fund: &FundSpec, path: &Path) -> Result<RawHoldingsTable, DataError> {
    let mut workbook = open_workbook_auto(path)
        .map_err(|e| DataError::Parse(format!("cannot open {}: {e}", path.display())))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| DataError::Parse(format!("{} has no worksheets", path.display())))?
        .map_err(|e| DataError::Parse(format!("cannot read {}: {e}", path.display())))?;

    let rows = range
        .rows()
        .map(|row| row.iter().map(|cell| cell.to_string().trim().to_string()).collect())
        .collect();

    Ok(RawHoldingsTable {
        fund: fund.name.clone(),
        provider: fund.provider,
        source: path.display().to_string(),
        rows,
    })
}
