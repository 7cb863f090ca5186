//! Batch Allocation Planner
//!
//! Pure planning logic that decides which batches cover a requested quantity.
//! Batches are consumed oldest-expiry-first so stock closest to its date
//! leaves the shelf before fresher lots.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The slice of a batch the planner needs to make its decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSnapshot {
    pub batch_id: Uuid,
    pub expiration_date: NaiveDate,
    pub production_date: NaiveDate,
    /// Units not already held by an active reservation.
    pub available: i32,
}

/// One batch's contribution to a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchAllocation {
    pub batch_id: Uuid,
    pub quantity: i32,
}

/// A complete covering of the requested quantity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationPlan {
    pub allocations: Vec<BatchAllocation>,
    pub total: i32,
}

/// Raised when the batches cannot cover the request. Carries how much
/// actually was available so callers can report the shortfall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationShortfall {
    pub requested: i32,
    pub available: i32,
}

/// Plans an allocation of `requested` units across `batches`.
///
/// Ordering is expiration date ascending, production date ascending on ties.
/// Batches with nothing available are skipped. The plan never allocates more
/// than a batch has available and never splits beyond what is needed.
pub fn plan_fefo(
    requested: i32,
    batches: &[BatchSnapshot],
) -> Result<AllocationPlan, AllocationShortfall> {
    debug_assert!(requested > 0);

    let mut ordered: Vec<&BatchSnapshot> = batches.iter().filter(|b| b.available > 0).collect();
    ordered.sort_by_key(|b| (b.expiration_date, b.production_date));

    let mut allocations = Vec::new();
    let mut remaining = requested;

    for batch in &ordered {
        if remaining == 0 {
            break;
        }
        let take = remaining.min(batch.available);
        allocations.push(BatchAllocation {
            batch_id: batch.batch_id,
            quantity: take,
        });
        remaining -= take;
    }

    if remaining > 0 {
        return Err(AllocationShortfall {
            requested,
            available: ordered.iter().map(|b| b.available).sum(),
        });
    }

    Ok(AllocationPlan {
        allocations,
        total: requested,
    })
}
