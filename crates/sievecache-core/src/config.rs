//! Configuration for the symbol cache.
//!
//! [`CacheConfig`] contains the tuning knobs for maintenance cadence,
//! frequency smoothing, peak detection, and snapshot persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, CacheResult};

/// Configuration for the symbol cache.
///
/// All fields have sensible defaults. Override selectively via the builder
/// helpers, a partial TOML file, or environment variables.
///
/// # Environment Variable Overrides
///
/// | Variable                          | Field                  | Default  |
/// |-----------------------------------|------------------------|----------|
/// | `SIEVECACHE_TICK_INTERVAL_MS`     | `tick_interval_ms`     | `10000`  |
/// | `SIEVECACHE_FREQUENCY_ALPHA`      | `frequency_alpha`      | `0.25`   |
/// | `SIEVECACHE_PEAK_FACTOR`          | `peak_factor`          | `2.0`    |
/// | `SIEVECACHE_PEAK_TIME_FLOOR_SECS` | `peak_time_floor_secs` | `60`     |
/// | `SIEVECACHE_DEFAULT_DEADLINE_MS`  | `default_deadline_ms`  | unset    |
/// | `SIEVECACHE_SNAPSHOT_PATH`        | `snapshot_path`        | unset    |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maintenance tick cadence in milliseconds.
    /// Default: 10000.
    pub tick_interval_ms: u64,

    /// EWMA factor applied to the per-tick hit rate (0.0–1.0].
    /// Default: 0.25.
    pub frequency_alpha: f64,

    /// A tick whose raw rate exceeds `peak_factor ×` the smoothed rate
    /// counts as a frequency peak and triggers re-ordering. Must be > 1.
    /// Default: 2.0.
    pub peak_factor: f64,

    /// Peaks are suppressed until the cache has been alive this long, so
    /// start-up bursts do not reorder the plan.
    /// Default: 60.
    pub peak_time_floor_secs: u64,

    /// Deadline applied to runs scheduled without an explicit one, in
    /// milliseconds. Unset means no implicit deadline.
    pub default_deadline_ms: Option<u64>,

    /// Where the stats snapshot is saved and loaded. Unset disables
    /// persistence.
    pub snapshot_path: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 10_000,
            frequency_alpha: 0.25,
            peak_factor: 2.0,
            peak_time_floor_secs: 60,
            default_deadline_ms: None,
            snapshot_path: None,
        }
    }
}

impl CacheConfig {
    /// Load a partial TOML file over the defaults.
    ///
    /// Falls back to `Default::default()` if the file does not exist or
    /// cannot be parsed; a parse failure is logged, never fatal.
    #[must_use]
    pub fn from_file(path: &Path) -> Self {
        std::fs::read_to_string(path).map_or_else(
            |_| Self::default(),
            |contents| match toml::from_str::<Self>(&contents) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "failed to parse cache config, using defaults"
                    );
                    Self::default()
                }
            },
        )
    }

    /// Load overrides from environment variables.
    ///
    /// Only overrides fields for which environment variables are set.
    /// Invalid values are silently ignored (current values are kept).
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("SIEVECACHE_TICK_INTERVAL_MS")
            && let Ok(ms) = val.parse::<u64>()
            && ms > 0
        {
            self.tick_interval_ms = ms;
        }
        if let Ok(val) = std::env::var("SIEVECACHE_FREQUENCY_ALPHA")
            && let Ok(alpha) = val.parse::<f64>()
            && (0.0..=1.0).contains(&alpha)
            && alpha > 0.0
        {
            self.frequency_alpha = alpha;
        }
        if let Ok(val) = std::env::var("SIEVECACHE_PEAK_FACTOR")
            && let Ok(factor) = val.parse::<f64>()
            && factor > 1.0
        {
            self.peak_factor = factor;
        }
        if let Ok(val) = std::env::var("SIEVECACHE_PEAK_TIME_FLOOR_SECS")
            && let Ok(secs) = val.parse::<u64>()
        {
            self.peak_time_floor_secs = secs;
        }
        if let Ok(val) = std::env::var("SIEVECACHE_DEFAULT_DEADLINE_MS")
            && let Ok(ms) = val.parse::<u64>()
            && ms > 0
        {
            self.default_deadline_ms = Some(ms);
        }
        if let Ok(val) = std::env::var("SIEVECACHE_SNAPSHOT_PATH")
            && !val.is_empty()
        {
            self.snapshot_path = Some(PathBuf::from(val));
        }
        self
    }

    /// Set the maintenance tick cadence.
    #[must_use]
    pub fn with_tick_interval_ms(mut self, ms: u64) -> Self {
        self.tick_interval_ms = ms;
        self
    }

    /// Set the implicit run deadline.
    #[must_use]
    pub fn with_default_deadline_ms(mut self, ms: u64) -> Self {
        self.default_deadline_ms = Some(ms);
        self
    }

    /// Set the snapshot persistence path.
    #[must_use]
    pub fn with_snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }

    /// Check value ranges.
    pub fn validate(&self) -> CacheResult<()> {
        if self.tick_interval_ms == 0 {
            return Err(CacheError::InvalidConfig {
                detail: "tick_interval_ms must be positive".into(),
            });
        }
        if !(self.frequency_alpha > 0.0 && self.frequency_alpha <= 1.0) {
            return Err(CacheError::InvalidConfig {
                detail: format!(
                    "frequency_alpha must be in (0, 1], got {}",
                    self.frequency_alpha
                ),
            });
        }
        if !(self.peak_factor > 1.0) {
            return Err(CacheError::InvalidConfig {
                detail: format!("peak_factor must be > 1, got {}", self.peak_factor),
            });
        }
        if self.default_deadline_ms == Some(0) {
            return Err(CacheError::InvalidConfig {
                detail: "default_deadline_ms must be positive when set".into(),
            });
        }
        Ok(())
    }
}
