//! Dependency graph resolution and stage-aware topological ordering.
//!
//! Resolution runs once, at finalization, on the still-mutable item set:
//! it binds virtual aliases to their parents, rewrites textual dependencies
//! to callback targets (preserving the alias for scheduling gates), rejects
//! cross-stage edges, and breaks cycles by disabling the weakest
//! participant.
//!
//! Ordering runs at finalization and again on every frequency-peak trigger:
//! Kahn's algorithm per stage, popping from a priority queue keyed by
//! (priority, smoothed frequency, id) so hot, high-priority symbols surface
//! first among those currently free of unsatisfied dependencies. The result
//! is an immutable [`ExecutionPlan`] the scheduler consumes.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use tracing::{debug, warn};

use sievecache_core::{CacheError, CacheResult, ItemId, Stage};

use crate::item::{CacheItem, DepEdge};
use crate::plan::ExecutionPlan;
use crate::registry::PendingDep;

/// Resolve the dependency graph in place.
///
/// Returns recoverable findings (unbound parents, broken cycles) as
/// diagnostics; unknown names and cross-stage edges are hard errors.
pub(crate) fn resolve_graph(
    items: &mut [CacheItem],
    by_name: &HashMap<String, ItemId>,
    pending: &[PendingDep],
) -> CacheResult<Vec<CacheError>> {
    let mut diagnostics = Vec::new();
    bind_virtuals(items, by_name, &mut diagnostics);
    resolve_pending(items, by_name, pending)?;
    check_stages(items)?;
    break_cycles(items, &mut diagnostics);
    Ok(diagnostics)
}

/// Bind each virtual alias to its parent callback and adopt its stage.
///
/// An alias whose parent is missing, virtual, or self-referential (an
/// unfulfilled placeholder) is disabled and reported; the rest of the cache
/// keeps working without it. Every bound alias gains an implicit dependency
/// on its parent so the alias is only evaluated once the parent is terminal.
fn bind_virtuals(
    items: &mut [CacheItem],
    by_name: &HashMap<String, ItemId>,
    diagnostics: &mut Vec<CacheError>,
) {
    let mut bindings: Vec<(usize, Option<ItemId>)> = Vec::new();
    for (idx, item) in items.iter().enumerate() {
        let Some(parent_name) = item.parent_name() else {
            continue;
        };
        let parent = by_name
            .get(parent_name)
            .copied()
            .filter(|&pid| pid as usize != idx && !items[pid as usize].is_virtual());
        bindings.push((idx, parent));
    }

    for (idx, parent) in bindings {
        match parent {
            Some(pid) => {
                let stage = items[pid as usize].stage();
                let parent_name = items[pid as usize].name().to_owned();
                let id = items[idx].id();
                items[idx].bind_parent(pid);
                items[idx].set_stage(stage);
                push_edge(
                    items,
                    id,
                    DepEdge {
                        target: pid,
                        symbolic_name: parent_name,
                        alias: None,
                    },
                );
            }
            None => {
                let child = items[idx].name().to_owned();
                let parent = items[idx]
                    .parent_name()
                    .unwrap_or_default()
                    .to_owned();
                warn!(symbol = %child, parent = %parent, "virtual symbol has no usable parent; disabling");
                items[idx].force_disable();
                diagnostics.push(CacheError::UnknownParent { child, parent });
            }
        }
    }
}

/// Rewrite textual dependencies to callback-to-callback edges.
///
/// A dependency declared *from* a virtual alias attaches to the alias's
/// parent. A dependency *on* a virtual alias targets the alias's parent
/// with the alias retained for result gating; if the alias never bound,
/// the edge targets the disabled alias so dependents cascade-skip.
fn resolve_pending(
    items: &mut [CacheItem],
    by_name: &HashMap<String, ItemId>,
    pending: &[PendingDep],
) -> CacheResult<()> {
    for dep in pending {
        let from_id = by_name
            .get(&dep.from)
            .copied()
            .ok_or_else(|| CacheError::UnknownSymbol {
                name: dep.from.clone(),
            })?;
        let to_id = by_name
            .get(&dep.to)
            .copied()
            .ok_or_else(|| CacheError::UnknownDependency {
                from: dep.from.clone(),
                to: dep.to.clone(),
            })?;

        let from_eff = if items[from_id as usize].is_virtual() {
            match items[from_id as usize].parent() {
                Some(pid) => pid,
                None => {
                    debug!(from = %dep.from, to = %dep.to, "dropping dependency from unbound alias");
                    continue;
                }
            }
        } else {
            from_id
        };

        let (to_eff, alias) = if items[to_id as usize].is_virtual() {
            match items[to_id as usize].parent() {
                Some(pid) => (pid, Some(to_id)),
                // Unbound alias: keep the disabled alias as the target so
                // the dependent sees a terminal skip and cascades.
                None => (to_id, Some(to_id)),
            }
        } else {
            (to_id, None)
        };

        if from_eff == to_eff {
            warn!(from = %dep.from, to = %dep.to, "dependency collapses to itself; ignoring");
            continue;
        }
        push_edge(
            items,
            from_eff,
            DepEdge {
                target: to_eff,
                symbolic_name: dep.to.clone(),
                alias,
            },
        );
    }
    Ok(())
}

/// Insert a dependency edge plus its reverse edge, deduplicating exact
/// `(target, alias)` repeats.
fn push_edge(items: &mut [CacheItem], from: ItemId, edge: DepEdge) {
    let existing = items[from as usize]
        .deps
        .iter()
        .any(|e| e.target == edge.target && e.alias == edge.alias);
    if existing {
        return;
    }
    let target = edge.target;
    items[from as usize].deps.push(edge);
    items[target as usize].rdeps.push(from);
}

/// Reject any dependency edge crossing stage partitions.
fn check_stages(items: &[CacheItem]) -> CacheResult<()> {
    for item in items {
        for edge in &item.deps {
            let target = &items[edge.target as usize];
            if item.stage() != target.stage() {
                return Err(CacheError::CrossStageEdge {
                    from: item.name().into(),
                    from_stage: item.stage(),
                    to: edge.symbolic_name.clone(),
                    to_stage: target.stage(),
                });
            }
        }
    }
    Ok(())
}

/// Break dependency cycles by disabling the lowest-priority participant
/// (ties broken toward the highest id), repeating until the graph is
/// acyclic. Each break is reported as a diagnostic.
fn break_cycles(items: &mut [CacheItem], diagnostics: &mut Vec<CacheError>) {
    for stage in Stage::RUN_ORDER {
        loop {
            let members: Vec<ItemId> = items
                .iter()
                .filter(|item| item.enabled() && item.stage() == stage)
                .map(|item| item.id())
                .collect();
            let Some(cycle) = find_cycle(items, &members) else {
                break;
            };
            let victim = cycle
                .iter()
                .copied()
                .min_by(|&a, &b| {
                    items[a as usize]
                        .priority()
                        .cmp(&items[b as usize].priority())
                        .then(b.cmp(&a))
                })
                .expect("cycle is never empty");
            let names: Vec<String> = cycle
                .iter()
                .map(|&id| items[id as usize].name().to_owned())
                .collect();
            let disabled = items[victim as usize].name().to_owned();
            warn!(cycle = ?names, disabled = %disabled, "breaking dependency cycle");
            items[victim as usize].force_disable();
            diagnostics.push(CacheError::DependencyCycle {
                cycle: names,
                disabled,
            });
        }
    }
}

/// Depth-first search for one cycle among `members`, following dependency
/// edges between enabled items. Returns the cycle's ids in edge order.
fn find_cycle(items: &[CacheItem], members: &[ItemId]) -> Option<Vec<ItemId>> {
    const WHITE: u8 = 0;
    const GRAY: u8 = 1;
    const BLACK: u8 = 2;

    let mut color = vec![WHITE; items.len()];
    for &start in members {
        if color[start as usize] != WHITE {
            continue;
        }
        let mut stack: Vec<(ItemId, usize)> = vec![(start, 0)];
        color[start as usize] = GRAY;
        while let Some(frame) = stack.last_mut() {
            let (id, next_idx) = (frame.0, frame.1);
            let deps = &items[id as usize].deps;
            if let Some(edge) = deps.get(next_idx) {
                frame.1 += 1;
                let target = edge.target;
                if !items[target as usize].enabled() {
                    continue;
                }
                match color[target as usize] {
                    WHITE => {
                        color[target as usize] = GRAY;
                        stack.push((target, 0));
                    }
                    GRAY => {
                        let pos = stack
                            .iter()
                            .position(|&(node, _)| node == target)
                            .expect("gray node is on the stack");
                        return Some(stack[pos..].iter().map(|&(node, _)| node).collect());
                    }
                    _ => {}
                }
            } else {
                color[id as usize] = BLACK;
                stack.pop();
            }
        }
    }
    None
}

/// Heap key: higher priority first, then higher smoothed frequency, then
/// lower id.
#[derive(Debug, PartialEq, Eq)]
struct OrderKey {
    priority: i32,
    freq_milli: u64,
    id: ItemId,
}

impl OrderKey {
    fn for_item(item: &CacheItem) -> Self {
        Self {
            priority: item.priority(),
            freq_milli: (item.stats().frequency().max(0.0) * 1_000.0) as u64,
            id: item.id(),
        }
    }
}

impl Ord for OrderKey {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .cmp(&other.priority)
            .then(self.freq_milli.cmp(&other.freq_milli))
            .then(other.id.cmp(&self.id))
    }
}

impl PartialOrd for OrderKey {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

/// Kahn's algorithm per stage over the enabled items.
///
/// Assigns dense `order` ranks and compiles the immutable per-stage plan.
/// Runs on the frozen item set, so ranks are stored through the items'
/// atomic order words.
pub(crate) fn compute_order(items: &[Arc<CacheItem>], epoch: u64) -> ExecutionPlan {
    let mut stages: [Vec<ItemId>; Stage::RUN_ORDER.len()] = Default::default();

    for stage in Stage::RUN_ORDER {
        let members: Vec<ItemId> = items
            .iter()
            .filter(|item| item.enabled() && item.stage() == stage)
            .map(|item| item.id())
            .collect();

        let mut indegree: HashMap<ItemId, usize> = HashMap::with_capacity(members.len());
        for &id in &members {
            let blocking = items[id as usize]
                .deps()
                .iter()
                .filter(|edge| items[edge.target as usize].enabled())
                .count();
            indegree.insert(id, blocking);
        }

        let mut heap: BinaryHeap<OrderKey> = members
            .iter()
            .filter(|&&id| indegree[&id] == 0)
            .map(|&id| OrderKey::for_item(&items[id as usize]))
            .collect();

        let mut ordered = Vec::with_capacity(members.len());
        while let Some(key) = heap.pop() {
            let id = key.id;
            items[id as usize].set_order(ordered.len() as u32);
            ordered.push(id);
            for &dependent in items[id as usize].rdeps() {
                if let Some(remaining) = indegree.get_mut(&dependent) {
                    if *remaining > 0 {
                        *remaining -= 1;
                        if *remaining == 0 {
                            heap.push(OrderKey::for_item(&items[dependent as usize]));
                        }
                    }
                }
            }
        }

        if ordered.len() < members.len() {
            // Post-break leftovers mean a cycle slipped through; append them
            // deterministically rather than dropping symbols.
            let mut leftovers: Vec<ItemId> = members
                .iter()
                .copied()
                .filter(|id| !ordered.contains(id))
                .collect();
            warn!(stage = %stage, count = leftovers.len(), "ordering left unsatisfied items; appending");
            leftovers.sort_unstable();
            for id in leftovers {
                items[id as usize].set_order(ordered.len() as u32);
                ordered.push(id);
            }
        }

        stages[stage.index()] = ordered;
    }

    let mut awaited_by: Vec<Vec<ItemId>> = vec![Vec::new(); items.len()];
    for item in items {
        if !item.enabled() {
            continue;
        }
        awaited_by[item.id() as usize] = item
            .rdeps()
            .iter()
            .copied()
            .filter(|&dependent| items[dependent as usize].enabled())
            .collect();
    }

    ExecutionPlan::new(epoch, stages, awaited_by)
}
