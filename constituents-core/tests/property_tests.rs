//! Property tests for normalization and matrix merge invariants.
//!
//! Uses proptest to verify:
//! 1. Normalized weights sum to 1 for any positive holdings
//! 2. Weight vectors sum to 1 over identified holdings only
//! 3. Merging the same snapshot twice changes nothing
//! 4. A matrix only ever grows forward in time

use chrono::NaiveDate;
use constituents_core::data::normalize::normalize_by_sum;
use constituents_core::data::{FundWeightMatrix, MergeOutcome, WeightVector};
use constituents_core::domain::{DailySnapshot, NormalizedHolding, ProviderKind};
use proptest::prelude::*;

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_value() -> impl Strategy<Value = f64> {
    (0.01..1_000_000.0_f64).prop_map(|v| (v * 100.0).round() / 100.0)
}

/// (ticker index, value, identified?) rows.
fn arb_holdings() -> impl Strategy<Value = Vec<(u8, f64, bool)>> {
    prop::collection::vec((0u8..40, arb_value(), prop::bool::weighted(0.8)), 1..60)
}

fn arb_date() -> impl Strategy<Value = NaiveDate> {
    (0i64..2000).prop_map(|offset| {
        NaiveDate::from_ymd_opt(2018, 1, 1).unwrap() + chrono::Duration::days(offset)
    })
}

fn snapshot(as_of: NaiveDate, rows: &[(u8, f64, bool)]) -> DailySnapshot {
    let total: f64 = rows.iter().map(|(_, v, _)| v).sum();
    DailySnapshot {
        fund: "iwm".into(),
        provider: ProviderKind::IShares,
        as_of,
        columns: vec!["ticker".into(), "market value".into()],
        holdings: rows
            .iter()
            .map(|(t, v, identified)| NormalizedHolding {
                ticker: format!("T{t}"),
                value: *v,
                permanent_id: identified.then(|| format!("{}", 100_000 + *t as u32)),
                normalized_weight: v / total,
                fields: vec![format!("T{t}"), v.to_string()],
            })
            .collect(),
    }
}

proptest! {
    #[test]
    fn normalized_weights_sum_to_one(values in prop::collection::vec(arb_value(), 1..200)) {
        let weights = normalize_by_sum(&values).unwrap();
        let sum: f64 = weights.iter().sum();
        prop_assert!((sum - 1.0).abs() < 1e-9, "sum = {sum}");
        prop_assert!(weights.iter().all(|w| *w > 0.0 && *w <= 1.0));
    }

    #[test]
    fn weight_vector_sums_to_one_over_identified(rows in arb_holdings(), as_of in arb_date()) {
        let snap = snapshot(as_of, &rows);
        match WeightVector::from_snapshot(&snap) {
            Ok(vector) => {
                let sum: f64 = vector.weights.iter().map(|(_, w)| w).sum();
                prop_assert!((sum - 1.0).abs() < 1e-9, "sum = {sum}");
                let mut ids: Vec<&str> = vector.weights.iter().map(|(id, _)| id.as_str()).collect();
                let n = ids.len();
                ids.sort();
                ids.dedup();
                prop_assert_eq!(ids.len(), n, "ids must be unique");
            }
            Err(_) => prop_assert!(rows.iter().all(|(_, _, identified)| !identified)),
        }
    }

    #[test]
    fn merging_twice_is_a_no_op(rows in arb_holdings(), as_of in arb_date()) {
        prop_assume!(rows.iter().any(|(_, _, identified)| *identified));
        let vector = WeightVector::from_snapshot(&snapshot(as_of, &rows)).unwrap();

        let mut matrix = FundWeightMatrix::new();
        prop_assert!(matrix.merge(&vector).appended());
        let once = matrix.clone();

        let second = matrix.merge(&vector);
        prop_assert!(matches!(second, MergeOutcome::Skipped { .. }), "expected MergeOutcome::Skipped");
        prop_assert_eq!(matrix, once);
    }

    #[test]
    fn matrix_dates_only_move_forward(
        rows in arb_holdings(),
        dates in prop::collection::vec(arb_date(), 1..20),
    ) {
        prop_assume!(rows.iter().any(|(_, _, identified)| *identified));
        let mut matrix = FundWeightMatrix::new();
        let mut newest: Option<NaiveDate> = None;

        for date in dates {
            let vector = WeightVector::from_snapshot(&snapshot(date, &rows)).unwrap();
            let outcome = matrix.merge(&vector);
            let expect_append = newest.map_or(true, |n| date > n);
            prop_assert_eq!(outcome.appended(), expect_append);
            if expect_append {
                newest = Some(date);
            }
            prop_assert_eq!(matrix.latest_date(), newest);
        }

        let stored: Vec<NaiveDate> = matrix.dates().collect();
        prop_assert!(stored.windows(2).all(|w| w[0] < w[1]));
    }
}
