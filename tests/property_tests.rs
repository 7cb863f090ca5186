//! Property-based tests for the batch allocation planner.
//!
//! These tests use proptest to verify invariants across a wide range of
//! shelf layouts, helping to catch edge cases that unit tests might miss.

use std::collections::{HashMap, HashSet};

use chrono::{Duration, NaiveDate};
use proptest::prelude::*;
use uuid::Uuid;

use feria_api::services::allocation::{plan_fefo, BatchSnapshot};

// Strategies for generating shelf layouts
fn snapshot_strategy() -> impl Strategy<Value = BatchSnapshot> {
    (0i64..60, 0i64..30, -5i32..50).prop_map(|(expires_in, produced_ago, available)| {
        let base = NaiveDate::from_ymd_opt(2025, 1, 1).expect("valid base date");
        BatchSnapshot {
            batch_id: Uuid::new_v4(),
            expiration_date: base + Duration::days(expires_in),
            production_date: base - Duration::days(produced_ago),
            available,
        }
    })
}

fn shelf_strategy() -> impl Strategy<Value = Vec<BatchSnapshot>> {
    prop::collection::vec(snapshot_strategy(), 0..12)
}

fn by_id(shelf: &[BatchSnapshot]) -> HashMap<Uuid, &BatchSnapshot> {
    shelf.iter().map(|b| (b.batch_id, b)).collect()
}

// Property: a plan covers the request exactly, or reports the true shortfall
proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    #[test]
    fn plans_cover_the_request_or_report_the_shortfall(
        requested in 1i32..200,
        shelf in shelf_strategy(),
    ) {
        let sellable: i32 = shelf.iter().map(|b| b.available.max(0)).sum();
        match plan_fefo(requested, &shelf) {
            Ok(plan) => {
                prop_assert!(requested <= sellable, "plan succeeded beyond the shelf");
                prop_assert_eq!(plan.total, requested);
                let allocated: i32 = plan.allocations.iter().map(|a| a.quantity).sum();
                prop_assert_eq!(allocated, requested);
            }
            Err(short) => {
                prop_assert!(requested > sellable, "shortfall despite enough stock");
                prop_assert_eq!(short.requested, requested);
                prop_assert_eq!(short.available, sellable);
            }
        }
    }
}

// Property: allocations stay within each batch and never double-draw
proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn allocations_respect_batch_bounds(
        requested in 1i32..200,
        shelf in shelf_strategy(),
    ) {
        if let Ok(plan) = plan_fefo(requested, &shelf) {
            let snapshots = by_id(&shelf);
            let mut seen = HashSet::new();
            for alloc in &plan.allocations {
                let snapshot = snapshots[&alloc.batch_id];
                prop_assert!(alloc.quantity > 0, "empty allocation for {}", alloc.batch_id);
                prop_assert!(
                    alloc.quantity <= snapshot.available,
                    "batch {} overdrawn: {} of {}",
                    alloc.batch_id,
                    alloc.quantity,
                    snapshot.available
                );
                prop_assert!(seen.insert(alloc.batch_id), "batch {} drawn twice", alloc.batch_id);
            }
        }
    }

    #[test]
    fn earlier_expirations_drain_before_later_ones(
        requested in 1i32..200,
        shelf in shelf_strategy(),
    ) {
        if let Ok(plan) = plan_fefo(requested, &shelf) {
            let snapshots = by_id(&shelf);
            let keys: Vec<(NaiveDate, NaiveDate)> = plan
                .allocations
                .iter()
                .map(|a| {
                    let b = snapshots[&a.batch_id];
                    (b.expiration_date, b.production_date)
                })
                .collect();
            for pair in keys.windows(2) {
                prop_assert!(
                    pair[0] <= pair[1],
                    "drew {:?} before the older {:?}",
                    pair[0],
                    pair[1]
                );
            }

            // A fresher lot is only touched once the older one is drained.
            for alloc in plan.allocations.iter().rev().skip(1) {
                prop_assert_eq!(alloc.quantity, snapshots[&alloc.batch_id].available);
            }
        }
    }
}
