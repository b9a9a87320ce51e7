//! Background maintenance.
//!
//! Hosts either call [`SymbolCache::maintenance_tick`] from their own event
//! loop, or spawn the detached ticker here. The ticker wakes on the
//! configured cadence, folds statistics into the smoothed frequencies, and
//! republishes the plan when a frequency peak calls for it. Stopping the
//! handle (or dropping it) joins the thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, trace};

use crate::cache::SymbolCache;

/// How often the ticker checks for shutdown between ticks.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Handle on the background maintenance thread.
pub struct MaintenanceHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl MaintenanceHandle {
    /// Signal the ticker and wait for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                debug!("maintenance thread exited with a panic");
            }
        }
    }
}

impl Drop for MaintenanceHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl SymbolCache {
    /// Spawn the background maintenance ticker.
    ///
    /// The thread runs [`SymbolCache::maintenance_tick`] on the configured
    /// cadence until the returned handle is stopped or dropped.
    #[must_use]
    pub fn spawn_maintenance(self: &Arc<Self>) -> MaintenanceHandle {
        let cache = Arc::clone(self);
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let interval = Duration::from_millis(cache.maintenance_interval_ms());
        let spawned = std::thread::Builder::new()
            .name("sievecache-maintenance".into())
            .spawn(move || {
                debug!(interval_ms = interval.as_millis() as u64, "maintenance ticker started");
                let mut waited = Duration::ZERO;
                while !stop_flag.load(Ordering::Relaxed) {
                    std::thread::sleep(STOP_POLL_INTERVAL.min(interval));
                    waited += STOP_POLL_INTERVAL.min(interval);
                    if waited < interval {
                        continue;
                    }
                    waited = Duration::ZERO;
                    let report = cache.maintenance_tick();
                    trace!(
                        epoch = report.epoch,
                        peaks = report.peaks,
                        reordered = report.reordered,
                        "maintenance tick"
                    );
                }
                debug!("maintenance ticker stopped");
            });
        let thread = match spawned {
            Ok(thread) => Some(thread),
            Err(e) => {
                tracing::error!(error = %e, "failed to spawn maintenance thread");
                None
            }
        };
        MaintenanceHandle { stop, thread }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sievecache_core::{CacheConfig, NoOpCallback, SymbolFlags, SymbolKind};

    use crate::registry::SymbolRegistry;

    #[test]
    fn ticker_starts_and_stops_cleanly() {
        let mut registry = SymbolRegistry::new();
        registry
            .register_callback(
                "IDLE",
                SymbolKind::Filter,
                SymbolFlags::empty(),
                0,
                Arc::new(NoOpCallback),
                None,
            )
            .unwrap();
        let cache = Arc::new(
            registry
                .finalize(CacheConfig::default().with_tick_interval_ms(50))
                .unwrap(),
        );
        let handle = cache.spawn_maintenance();
        std::thread::sleep(std::time::Duration::from_millis(120));
        handle.stop();
        // The plan may or may not have re-ordered; what matters is a clean
        // join and a consistent epoch afterwards.
        let _ = cache.plan_epoch();
    }
}
