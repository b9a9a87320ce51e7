//! Compiled execution plans and their lock-free publication.
//!
//! A plan is an immutable artifact of one ordering pass: per-stage item id
//! vectors already sorted by topological rank, plus per-item awaited-by
//! lists the scheduler uses for wakeups. Plans are published through an
//! atomic pointer swap; every message run takes a stable snapshot at entry
//! and keeps it for its whole life, so a re-order never changes a run
//! mid-flight.

use std::sync::Arc;

use arc_swap::ArcSwap;

use sievecache_core::{ItemId, Stage};

/// Immutable output of one ordering pass.
#[derive(Debug)]
pub struct ExecutionPlan {
    epoch: u64,
    /// Enabled item ids per stage, in dispatch order.
    stages: [Vec<ItemId>; Stage::RUN_ORDER.len()],
    /// For each item id, the enabled items waiting on it.
    awaited_by: Vec<Vec<ItemId>>,
    /// Membership mask over item ids.
    members: Vec<bool>,
}

impl ExecutionPlan {
    pub(crate) fn new(
        epoch: u64,
        stages: [Vec<ItemId>; Stage::RUN_ORDER.len()],
        awaited_by: Vec<Vec<ItemId>>,
    ) -> Self {
        let mut members = vec![false; awaited_by.len()];
        for stage in &stages {
            for &id in stage {
                if let Some(slot) = members.get_mut(id as usize) {
                    *slot = true;
                }
            }
        }
        Self {
            epoch,
            stages,
            awaited_by,
            members,
        }
    }

    /// Monotonic counter distinguishing ordering passes.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Item ids of one stage in dispatch order.
    #[must_use]
    pub fn stage_items(&self, stage: Stage) -> &[ItemId] {
        &self.stages[stage.index()]
    }

    /// Enabled items waiting on `id`.
    #[must_use]
    pub fn awaited_by(&self, id: ItemId) -> &[ItemId] {
        self.awaited_by
            .get(id as usize)
            .map_or(&[], Vec::as_slice)
    }

    /// Whether `id` participates in this plan (enabled at compile time).
    #[must_use]
    pub fn contains(&self, id: ItemId) -> bool {
        self.members.get(id as usize).copied().unwrap_or(false)
    }

    /// Total number of schedulable items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.iter().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Atomic publication cell for the current plan.
///
/// Readers pay one atomic load for a stable snapshot; the maintenance path
/// swaps in a freshly compiled plan without blocking them.
#[derive(Debug)]
pub(crate) struct PlanCell {
    inner: ArcSwap<ExecutionPlan>,
}

impl PlanCell {
    pub(crate) fn new(plan: ExecutionPlan) -> Self {
        Self {
            inner: ArcSwap::from_pointee(plan),
        }
    }

    /// Stable snapshot for one message run.
    pub(crate) fn load(&self) -> Arc<ExecutionPlan> {
        self.inner.load_full()
    }

    /// Publish a new plan; in-flight runs keep their snapshots.
    pub(crate) fn publish(&self, plan: ExecutionPlan) {
        self.inner.store(Arc::new(plan));
    }
}
