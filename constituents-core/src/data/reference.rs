//! Ticker identity table loader.
//!
//! Reads a SHARADAR-style TICKERS file and keeps the ticker → permaticker
//! mapping for listed securities. Rows missing any of the required columns
//! are dropped, identical rows collapse, and a ticker claimed by two
//! permatickers keeps its first one.

use super::provider::DataError;
use crate::domain::TickerIdentity;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct ReferenceRow {
    permaticker: Option<String>,
    ticker: Option<String>,
    name: Option<String>,
    exchange: Option<String>,
    isdelisted: Option<String>,
    category: Option<String>,
    cusips: Option<String>,
}

impl ReferenceRow {
    /// The identity this row contributes, if it is complete and listed.
    fn into_identity(self) -> Option<TickerIdentity> {
        let present = |f: &Option<String>| f.as_deref().is_some_and(|v| !v.trim().is_empty());
        if ![
            &self.name,
            &self.exchange,
            &self.isdelisted,
            &self.category,
            &self.cusips,
        ]
        .into_iter()
        .all(present)
        {
            return None;
        }
        if self.isdelisted.as_deref().map(str::trim) != Some("N") {
            return None;
        }
        let ticker = self.ticker?.trim().to_string();
        let permanent_id = self.permaticker?.trim().to_string();
        if ticker.is_empty() || permanent_id.is_empty() {
            return None;
        }
        Some(TickerIdentity {
            ticker,
            permanent_id,
        })
    }
}

/// Read-only ticker → permanent identifier lookup.
#[derive(Debug, Clone, Default)]
pub struct TickerIdentityTable {
    by_ticker: HashMap<String, String>,
}

impl TickerIdentityTable {
    /// Load the reference file. Any failure here is fatal for the run.
    pub fn load(path: &Path) -> Result<Self, DataError> {
        let file = File::open(path).map_err(|e| {
            DataError::DataUnavailable(format!("cannot open ticker reference {}: {e}", path.display()))
        })?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, DataError> {
        let mut rdr = csv::Reader::from_reader(reader);
        let mut by_ticker: HashMap<String, String> = HashMap::new();
        let mut conflicts = 0usize;

        for result in rdr.deserialize::<ReferenceRow>() {
            let row = result.map_err(|e| {
                DataError::DataUnavailable(format!("malformed ticker reference: {e}"))
            })?;
            let Some(identity) = row.into_identity() else {
                continue;
            };
            match by_ticker.get(&identity.ticker) {
                None => {
                    by_ticker.insert(identity.ticker, identity.permanent_id);
                }
                Some(existing) if *existing == identity.permanent_id => {}
                Some(existing) => {
                    debug!(
                        "ticker {} maps to {existing} and {}; keeping {existing}",
                        identity.ticker, identity.permanent_id
                    );
                    conflicts += 1;
                }
            }
        }

        if conflicts > 0 {
            warn!("{conflicts} listed tickers map to more than one permaticker; kept first");
        }
        if by_ticker.is_empty() {
            return Err(DataError::DataUnavailable(
                "ticker reference has no listed securities".into(),
            ));
        }

        Ok(Self { by_ticker })
    }

    pub fn from_identities(identities: impl IntoIterator<Item = TickerIdentity>) -> Self {
        let mut by_ticker = HashMap::new();
        for identity in identities {
            by_ticker
                .entry(identity.ticker)
                .or_insert(identity.permanent_id);
        }
        Self { by_ticker }
    }

    pub fn lookup(&self, ticker: &str) -> Option<&str> {
        self.by_ticker.get(ticker.trim()).map(|id| id.as_str())
    }

    pub fn len(&self) -> usize {
        self.by_ticker.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_ticker.is_empty()
    }
}
