//! Pipeline configuration.
//!
//! Everything the fetchers and stores need is carried explicitly in a
//! `PipelineConfig`, usually loaded from a TOML file. API keys can be
//! injected through `CONSTITUENTS_<PROVIDER>_API_KEY` instead of the file.

use crate::domain::{FundSpec, ProviderKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const MAX_RETRIES: u32 = 10;

const DEFAULT_SPDR_URL_TEMPLATE: &str = "https://www.ssga.com/us/en/intermediary/etfs/library-content/products/fund-data/etfs/us/holdings-daily-us-en-{ticker}.xlsx";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// An iShares fund and the URL its holdings CSV is posted from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ISharesFund {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ISharesSection {
    pub funds: Vec<ISharesFund>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpdrSection {
    /// Download URL with a `{ticker}` placeholder.
    pub url_template: String,
    pub funds: Vec<String>,
}

impl Default for SpdrSection {
    fn default() -> Self {
        Self {
            url_template: DEFAULT_SPDR_URL_TEMPLATE.to_string(),
            funds: Vec::new(),
        }
    }
}

/// Complete configuration for a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Root under which snapshots and weight matrices are stored.
    pub storage_root: PathBuf,
    /// Ticker reference file (SHARADAR TICKERS layout).
    pub reference_file: PathBuf,
    /// Directory the browser saves spreadsheet downloads into.
    pub download_dir: PathBuf,
    pub request_timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    /// Program and arguments used to open a download URL in a browser.
    /// `{download_dir}` in an argument is replaced with `download_dir`.
    pub browser_command: Vec<String>,
    /// Provider name (`ishares`, `spdr`) to API key.
    pub api_keys: BTreeMap<String, String>,
    pub ishares: ISharesSection,
    pub spdr: SpdrSection,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("data"),
            reference_file: PathBuf::from("data/SHARADAR_TICKERS.csv"),
            download_dir: dirs::download_dir().unwrap_or_else(|| PathBuf::from("downloads")),
            request_timeout_secs: 30,
            download_timeout_secs: 60,
            poll_interval_ms: 500,
            max_retries: 3,
            retry_base_delay_ms: 500,
            browser_command: Vec::new(),
            api_keys: BTreeMap::new(),
            ishares: ISharesSection::default(),
            spdr: SpdrSection::default(),
        }
    }
}

impl PipelineConfig {
    /// Load a config from a TOML file, then apply environment API keys.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml(&content)?;
        config.apply_env_api_keys();
        Ok(config)
    }

    /// Parse and validate a config from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Config with the stock fund list filled in.
    pub fn default_funds() -> Self {
        let ishares = [
            ("iwm", "239710/ishares-russell-2000-etf", "IWM"),
            ("iwb", "239707/ishares-russell-1000-etf", "IWB"),
            ("iwv", "239714/ishares-russell-3000-etf", "IWV"),
        ]
        .into_iter()
        .map(|(name, product, file)| ISharesFund {
            name: name.to_string(),
            url: format!(
                "https://www.ishares.com/us/products/{product}/1467271812596.ajax\
                 ?fileType=csv&fileName={file}_holdings&dataType=fund"
            ),
        })
        .collect();

        let spdr = vec![
            "spy", "xlb", "xlc", "xle", "xlf", "xli", "xlk", "xlp", "xlre", "xlu", "xlv", "xly",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        Self {
            browser_command: vec!["google-chrome".into(), "--start-maximized".into()],
            ishares: ISharesSection { funds: ishares },
            spdr: SpdrSection {
                funds: spdr,
                ..SpdrSection::default()
            },
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid("request_timeout_secs must be > 0".into()));
        }
        if self.download_timeout_secs == 0 {
            return Err(ConfigError::Invalid("download_timeout_secs must be > 0".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be > 0".into()));
        }
        if self.max_retries > MAX_RETRIES {
            return Err(ConfigError::Invalid(format!(
                "max_retries must be at most {MAX_RETRIES}"
            )));
        }

        let mut seen = HashSet::new();
        let names = self
            .ishares
            .funds
            .iter()
            .map(|f| f.name.as_str())
            .chain(self.spdr.funds.iter().map(|t| t.as_str()));
        for name in names {
            if name.is_empty() || name.contains(['/', '\\', '.']) {
                return Err(ConfigError::Invalid(format!("invalid fund name '{name}'")));
            }
            if !seen.insert(name.to_ascii_lowercase()) {
                return Err(ConfigError::Invalid(format!("fund '{name}' is configured twice")));
            }
        }

        if let Some(fund) = self.ishares.funds.iter().find(|f| f.url.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!("iShares fund '{}' has no url", fund.name)));
        }

        if !self.spdr.funds.is_empty() {
            if !self.spdr.url_template.contains("{ticker}") {
                return Err(ConfigError::Invalid(
                    "spdr.url_template must contain {ticker}".into(),
                ));
            }
            if self.browser_command.is_empty() {
                return Err(ConfigError::Invalid(
                    "SPDR funds need a browser_command to trigger downloads".into(),
                ));
            }
        }

        Ok(())
    }

    /// Override `api_keys` from `CONSTITUENTS_<PROVIDER>_API_KEY`.
    pub fn apply_env_api_keys(&mut self) {
        for kind in ProviderKind::ALL {
            let var = format!("CONSTITUENTS_{}_API_KEY", kind.as_str().to_ascii_uppercase());
            if let Ok(key) = std::env::var(&var) {
                if !key.trim().is_empty() {
                    self.api_keys.insert(kind.as_str().to_string(), key);
                }
            }
        }
    }

    pub fn api_key(&self, provider: ProviderKind) -> Option<&str> {
        self.api_keys.get(provider.as_str()).map(|k| k.as_str())
    }

    /// Configured funds for one provider, in configuration order.
    pub fn fund_specs(&self, provider: ProviderKind) -> Vec<FundSpec> {
        match provider {
            ProviderKind::IShares => self
                .ishares
                .funds
                .iter()
                .map(|f| FundSpec {
                    name: f.name.to_ascii_lowercase(),
                    provider,
                    url: f.url.clone(),
                })
                .collect(),
            ProviderKind::Spdr => self
                .spdr
                .funds
                .iter()
                .map(|ticker| {
                    let ticker = ticker.to_ascii_lowercase();
                    FundSpec {
                        url: self.spdr.url_template.replace("{ticker}", &ticker),
                        name: ticker,
                        provider,
                    }
                })
                .collect(),
        }
    }

    /// Keep only the named funds (case-insensitive); an empty list keeps all.
    pub fn retain_funds(&mut self, names: &[String]) {
        if names.is_empty() {
            return;
        }
        let wanted: HashSet<String> = names.iter().map(|n| n.to_ascii_lowercase()).collect();
        self.ishares
            .funds
            .retain(|f| wanted.contains(&f.name.to_ascii_lowercase()));
        self.spdr
            .funds
            .retain(|t| wanted.contains(&t.to_ascii_lowercase()));
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    /// `{storage_root}/constituents`, one directory of snapshots per fund.
    pub fn snapshot_root(&self) -> PathBuf {
        self.storage_root.join("constituents")
    }

    /// `{storage_root}/fundamentals`, one weight matrix file per fund.
    pub fn matrix_root(&self) -> PathBuf {
        self.storage_root.join("fundamentals")
    }
}
