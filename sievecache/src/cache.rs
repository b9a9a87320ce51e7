//! The frozen symbol cache.
//!
//! [`SymbolCache`] is the read-mostly artifact a [`SymbolRegistry`] freezes
//! into: the dense item vector, the name index, and the atomically
//! published execution plan. After freezing, the only mutable state is the
//! per-item atomic words (order, enabled), the shared statistics, appended
//! conditions, and the plan pointer itself.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use sievecache_core::{
    CacheConfig, CacheError, CacheResult, ItemId, MessageView, SettingsId,
};

use crate::item::CacheItem;
use crate::plan::PlanCell;
use crate::registry::SymbolRegistry;
use crate::resolver;
use crate::scheduler::RunHandle;
use crate::snapshot::{self, SnapshotRecord};

/// Shared, frozen cache state referenced by every run.
#[derive(Debug)]
pub(crate) struct CacheCore {
    pub(crate) config: CacheConfig,
    pub(crate) items: Vec<Arc<CacheItem>>,
    pub(crate) by_name: HashMap<String, ItemId>,
    pub(crate) plan: PlanCell,
    pub(crate) started: Instant,
    epoch: AtomicU64,
    save_counter: AtomicU64,
}

/// Report of one maintenance tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TickReport {
    /// Plan epoch after the tick.
    pub epoch: u64,
    /// Items whose rate peaked this interval.
    pub peaks: usize,
    /// Whether a new plan was compiled and published.
    pub reordered: bool,
}

/// The finalized symbol cache.
#[derive(Debug)]
pub struct SymbolCache {
    core: Arc<CacheCore>,
    diagnostics: Vec<CacheError>,
}

impl SymbolCache {
    pub(crate) fn build(registry: SymbolRegistry, config: CacheConfig) -> CacheResult<Self> {
        let SymbolRegistry {
            mut items,
            by_name,
            pending_deps,
        } = registry;

        let diagnostics = resolver::resolve_graph(&mut items, &by_name, &pending_deps)?;
        let items: Vec<Arc<CacheItem>> = items.into_iter().map(Arc::new).collect();

        let mut save_counter = 0;
        if let Some(path) = config.snapshot_path.clone() {
            save_counter = seed_from_snapshot(&items, &by_name, &path);
        }

        let plan = resolver::compute_order(&items, 0);
        info!(
            symbols = items.len(),
            enabled = plan.len(),
            diagnostics = diagnostics.len(),
            "symbol cache finalized"
        );

        Ok(Self {
            core: Arc::new(CacheCore {
                config,
                items,
                by_name,
                plan: PlanCell::new(plan),
                started: Instant::now(),
                epoch: AtomicU64::new(0),
                save_counter: AtomicU64::new(save_counter),
            }),
            diagnostics,
        })
    }

    /// Recoverable resolution findings: unbound virtual parents and broken
    /// dependency cycles. The named items are disabled.
    #[must_use]
    pub fn diagnostics(&self) -> &[CacheError] {
        &self.diagnostics
    }

    /// Number of registered symbols, disabled ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.core.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.core.items.is_empty()
    }

    /// Look up an item by name.
    #[must_use]
    pub fn item_by_name(&self, name: &str) -> Option<&Arc<CacheItem>> {
        let id = self.core.by_name.get(name)?;
        self.core.items.get(*id as usize)
    }

    /// Look up an item by dense id.
    #[must_use]
    pub fn item(&self, id: ItemId) -> Option<&Arc<CacheItem>> {
        self.core.items.get(id as usize)
    }

    /// Iterate all registered items in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<CacheItem>> {
        self.core.items.iter()
    }

    /// Epoch of the currently published plan.
    #[must_use]
    pub fn plan_epoch(&self) -> u64 {
        self.core.plan.load().epoch()
    }

    pub(crate) fn maintenance_interval_ms(&self) -> u64 {
        self.core.config.tick_interval_ms
    }

    /// Schedule one message run against the current plan snapshot.
    ///
    /// `deadline` bounds the run from now; when absent, the configured
    /// default applies. Idempotent symbols run regardless of the deadline.
    #[must_use]
    pub fn schedule(
        &self,
        message: Arc<dyn MessageView>,
        settings_id: Option<SettingsId>,
        deadline: Option<Duration>,
    ) -> RunHandle {
        let deadline = deadline
            .or_else(|| {
                self.core
                    .config
                    .default_deadline_ms
                    .map(Duration::from_millis)
            })
            .map(|limit| Instant::now() + limit);
        RunHandle::new(Arc::clone(&self.core), message, settings_id, deadline)
    }

    /// Recompute the topological order from current statistics and publish
    /// a fresh plan. In-flight runs keep their snapshots.
    pub fn reorder(&self) -> u64 {
        let epoch = self.core.epoch.fetch_add(1, Ordering::Relaxed) + 1;
        let plan = resolver::compute_order(&self.core.items, epoch);
        debug!(epoch, enabled = plan.len(), "published reordered plan");
        self.core.plan.publish(plan);
        epoch
    }

    /// Fold one interval of statistics into the smoothed frequencies,
    /// detect peaks, and re-order the plan when any item peaked.
    ///
    /// Also saves the stats snapshot when persistence is configured.
    pub fn maintenance_tick(&self) -> TickReport {
        let config = &self.core.config;
        let interval = Duration::from_millis(config.tick_interval_ms);
        let peak_allowed =
            self.core.started.elapsed() >= Duration::from_secs(config.peak_time_floor_secs);

        let mut peaks = 0;
        for item in &self.core.items {
            if item.stats().tick(
                interval,
                config.frequency_alpha,
                config.peak_factor,
                peak_allowed,
            ) {
                debug!(symbol = item.name(), "frequency peak detected");
                peaks += 1;
            }
        }

        let reordered = peaks > 0;
        let epoch = if reordered {
            self.reorder()
        } else {
            self.core.plan.load().epoch()
        };

        if let Some(path) = config.snapshot_path.clone()
            && let Err(e) = self.save_snapshot_to(&path)
        {
            warn!(path = %path.display(), error = %e, "failed to save stats snapshot");
        }

        TickReport {
            epoch,
            peaks,
            reordered,
        }
    }

    /// Save the stats snapshot to the configured path.
    pub fn save_snapshot(&self) -> CacheResult<()> {
        let Some(path) = self.core.config.snapshot_path.clone() else {
            return Err(CacheError::InvalidConfig {
                detail: "snapshot_path is not configured".into(),
            });
        };
        self.save_snapshot_to(&path)
    }

    /// Save the stats snapshot to an explicit path.
    pub fn save_snapshot_to(&self, path: &Path) -> CacheResult<()> {
        let counter = self.core.save_counter.fetch_add(1, Ordering::Relaxed) + 1;
        let records: Vec<SnapshotRecord> = self
            .core
            .items
            .iter()
            .filter(|item| !item.is_virtual())
            .map(|item| {
                let stats = item.stats().snapshot();
                SnapshotRecord {
                    name: item.name().to_owned(),
                    hits: stats.hits,
                    misses: stats.misses,
                    total_time_ns: stats.total_time_ns,
                    frequency: stats.frequency,
                }
            })
            .collect();
        snapshot::write_snapshot(path, counter, &records)?;
        debug!(path = %path.display(), records = records.len(), counter, "stats snapshot saved");
        Ok(())
    }
}

/// Seed item statistics from a snapshot file, ignoring unreadable or stale
/// files. Returns the loaded save counter (zero on a cold start).
fn seed_from_snapshot(
    items: &[Arc<CacheItem>],
    by_name: &HashMap<String, ItemId>,
    path: &Path,
) -> u64 {
    if !path.exists() {
        return 0;
    }
    match snapshot::read_snapshot(path) {
        Ok(file) => {
            let mut seeded = 0;
            for record in &file.records {
                if let Some(&id) = by_name.get(&record.name) {
                    let stats = items[id as usize].stats();
                    stats.seed_counters(record.hits, record.misses, record.total_time_ns);
                    stats.seed_frequency(record.frequency);
                    seeded += 1;
                }
            }
            info!(
                path = %path.display(),
                seeded,
                records = file.records.len(),
                counter = file.save_counter,
                "seeded ordering from stats snapshot"
            );
            file.save_counter
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unusable stats snapshot");
            0
        }
    }
}
