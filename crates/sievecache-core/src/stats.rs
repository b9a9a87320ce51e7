//! Per-symbol execution statistics.
//!
//! Every cache item shares one [`ItemStats`] with all message runs touching
//! it. Counter updates are single-word atomic increments with relaxed
//! ordering; readers snapshot without locking and tolerate monotonic drift.
//!
//! The smoothed frequency is an exponentially weighted moving average folded
//! on each maintenance tick. A tick whose raw interval rate exceeds the
//! smoothed average by the configured factor counts as a frequency peak;
//! peaks feed back into topological ordering.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Lock-free execution counters shared between the cache and its runs.
#[derive(Debug, Default)]
pub struct ItemStats {
    hits: AtomicU64,
    misses: AtomicU64,
    skips: AtomicU64,
    total_time_ns: AtomicU64,
    /// Hit count observed at the previous maintenance tick.
    last_count: AtomicU64,
    /// Smoothed hit rate in hits/second, stored as f64 bits.
    frequency_bits: AtomicU64,
    /// Number of frequency peaks detected over the cache lifetime.
    peaks: AtomicU32,
}

/// Point-in-time copy of one item's counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ItemStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub skips: u64,
    pub total_time_ns: u64,
    pub frequency: f64,
    pub peaks: u32,
}

impl ItemStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a produced result and the callback's elapsed time.
    pub fn record_hit(&self, elapsed: Duration) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.add_time(elapsed);
    }

    /// Record an evaluation that produced nothing.
    pub fn record_miss(&self, elapsed: Duration) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.add_time(elapsed);
    }

    /// Record a skip; no callback time is attributed.
    pub fn record_skip(&self) {
        self.skips.fetch_add(1, Ordering::Relaxed);
    }

    fn add_time(&self, elapsed: Duration) {
        let ns = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.total_time_ns.fetch_add(ns, Ordering::Relaxed);
    }

    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn skips(&self) -> u64 {
        self.skips.load(Ordering::Relaxed)
    }

    /// Total number of terminal outcomes recorded.
    #[must_use]
    pub fn evaluations(&self) -> u64 {
        self.hits() + self.misses() + self.skips()
    }

    /// Smoothed hit rate in hits/second.
    #[must_use]
    pub fn frequency(&self) -> f64 {
        f64::from_bits(self.frequency_bits.load(Ordering::Relaxed))
    }

    /// Number of frequency peaks detected so far.
    #[must_use]
    pub fn peaks(&self) -> u32 {
        self.peaks.load(Ordering::Relaxed)
    }

    /// Seed the smoothed frequency, typically from a stats snapshot file.
    pub fn seed_frequency(&self, frequency: f64) {
        self.frequency_bits
            .store(frequency.to_bits(), Ordering::Relaxed);
    }

    /// Seed absolute counters from a snapshot record.
    ///
    /// `last_count` follows `hits` so the first tick after a warm start does
    /// not see the whole historical hit count as one interval.
    pub fn seed_counters(&self, hits: u64, misses: u64, total_time_ns: u64) {
        self.hits.store(hits, Ordering::Relaxed);
        self.misses.store(misses, Ordering::Relaxed);
        self.last_count.store(hits, Ordering::Relaxed);
        self.total_time_ns.store(total_time_ns, Ordering::Relaxed);
    }

    /// Fold one maintenance interval into the smoothed frequency.
    ///
    /// Computes the raw hit rate since the previous tick, updates the EWMA
    /// with factor `alpha`, and reports whether the raw rate counts as a
    /// peak. Peak detection is suppressed while `peak_allowed` is false
    /// (cache younger than the configured time floor).
    pub fn tick(
        &self,
        interval: Duration,
        alpha: f64,
        peak_factor: f64,
        peak_allowed: bool,
    ) -> bool {
        let hits = self.hits();
        let last = self.last_count.swap(hits, Ordering::Relaxed);
        let delta = hits.saturating_sub(last);
        let secs = interval.as_secs_f64();
        if secs <= 0.0 {
            return false;
        }
        let rate = delta as f64 / secs;

        let smoothed = self.frequency();
        let peak = peak_allowed && smoothed > 0.0 && rate > peak_factor * smoothed;
        if peak {
            self.peaks.fetch_add(1, Ordering::Relaxed);
        }

        let next = if smoothed == 0.0 {
            rate
        } else {
            smoothed + alpha * (rate - smoothed)
        };
        self.frequency_bits.store(next.to_bits(), Ordering::Relaxed);
        peak
    }

    #[must_use]
    pub fn snapshot(&self) -> ItemStatsSnapshot {
        ItemStatsSnapshot {
            hits: self.hits(),
            misses: self.misses(),
            skips: self.skips(),
            total_time_ns: self.total_time_ns.load(Ordering::Relaxed),
            frequency: self.frequency(),
            peaks: self.peaks(),
        }
    }
}
