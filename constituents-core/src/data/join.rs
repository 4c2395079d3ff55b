//! Identity join: attach permanent identifiers to a snapshot's holdings.

use super::reference::TickerIdentityTable;
use crate::domain::DailySnapshot;
use std::collections::HashSet;
use tracing::warn;

/// A snapshot after the left join, plus the tickers that did not resolve.
#[derive(Debug, Clone)]
pub struct JoinResult {
    pub snapshot: DailySnapshot,
    /// Unmatched tickers in first-seen order, without duplicates.
    pub unmatched: Vec<String>,
}

/// Left-join holdings onto the identity table by ticker.
///
/// Every holding is kept; unmatched ones get `permanent_id = None` and are
/// reported in `unmatched`.
pub fn join_identities(mut snapshot: DailySnapshot, table: &TickerIdentityTable) -> JoinResult {
    let mut unmatched = Vec::new();
    let mut seen = HashSet::new();

    for holding in &mut snapshot.holdings {
        holding.permanent_id = table.lookup(&holding.ticker).map(String::from);
        if holding.permanent_id.is_none() && seen.insert(holding.ticker.clone()) {
            unmatched.push(holding.ticker.clone());
        }
    }

    if !unmatched.is_empty() {
        warn!(
            "{} {}: {} of {} tickers have no permanent id: {}",
            snapshot.fund,
            snapshot.as_of,
            unmatched.len(),
            snapshot.holdings.len(),
            unmatched.join(", ")
        );
    }

    JoinResult { snapshot, unmatched }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NormalizedHolding, ProviderKind, TickerIdentity};
    use chrono::NaiveDate;

    fn holding(ticker: &str, weight: f64) -> NormalizedHolding {
        NormalizedHolding {
            ticker: ticker.into(),
            value: weight,
            permanent_id: None,
            normalized_weight: weight,
            fields: vec![ticker.into(), weight.to_string()],
        }
    }

    fn snapshot() -> DailySnapshot {
        DailySnapshot {
            fund: "iwm".into(),
            provider: ProviderKind::IShares,
            as_of: NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
            columns: vec!["ticker".into(), "market value".into()],
            holdings: vec![holding("AAPL", 0.5), holding("ZZZZ", 0.3), holding("MSFT", 0.2)],
        }
    }

    fn table() -> TickerIdentityTable {
        TickerIdentityTable::from_identities([
            TickerIdentity {
                ticker: "AAPL".into(),
                permanent_id: "199059".into(),
            },
            TickerIdentity {
                ticker: "MSFT".into(),
                permanent_id: "194506".into(),
            },
        ])
    }

    #[test]
    fn unmatched_tickers_are_kept_and_reported() {
        let joined = join_identities(snapshot(), &table());

        assert_eq!(joined.snapshot.holdings.len(), 3);
        assert_eq!(joined.unmatched, vec!["ZZZZ".to_string()]);
        assert_eq!(joined.snapshot.holdings[1].permanent_id, None);
        assert_eq!(
            joined.snapshot.holdings[0].permanent_id.as_deref(),
            Some("199059")
        );
    }

    #[test]
    fn repeated_unmatched_ticker_reported_once() {
        let mut snap = snapshot();
        snap.holdings.push(holding("ZZZZ", 0.0));
        let joined = join_identities(snap, &table());
        assert_eq!(joined.unmatched.len(), 1);
        assert_eq!(joined.snapshot.unidentified_tickers(), vec!["ZZZZ", "ZZZZ"]);
    }
}
