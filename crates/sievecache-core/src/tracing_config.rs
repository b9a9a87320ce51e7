//! Tracing conventions for the symbol cache.
//!
//! The cache emits structured `tracing` events throughout; this module pins
//! the target prefix and the standard span and field names so hosts can
//! filter and query them consistently. Consumers bring their own
//! subscriber; the library never installs one.

/// Target prefix used by all sievecache tracing spans and events.
///
/// Consumers can use this to filter cache logs:
/// ```text
/// RUST_LOG=sievecache=debug
/// ```
pub const TARGET_PREFIX: &str = "sievecache";

/// Standard tracing span names used across the cache.
pub mod span_names {
    /// Finalization: virtual binding, dependency resolution, ordering.
    pub const FINALIZE: &str = "sievecache::finalize";
    /// One topological ordering pass (initial or peak-triggered).
    pub const REORDER: &str = "sievecache::reorder";
    /// One message run from schedule to terminal state.
    pub const SCAN: &str = "sievecache::scan";
    /// One stage within a message run.
    pub const STAGE: &str = "sievecache::stage";
    /// One maintenance tick.
    pub const TICK: &str = "sievecache::tick";
    /// Stats snapshot save.
    pub const SNAPSHOT_SAVE: &str = "sievecache::snapshot_save";
    /// Stats snapshot load.
    pub const SNAPSHOT_LOAD: &str = "sievecache::snapshot_load";
}

/// Standard structured field names used in tracing events.
pub mod field_names {
    /// Symbol name.
    pub const SYMBOL: &str = "symbol";
    /// Dense item id.
    pub const ITEM_ID: &str = "item_id";
    /// Stage name.
    pub const STAGE: &str = "stage";
    /// Message identifier.
    pub const MESSAGE_ID: &str = "message_id";
    /// Settings id applied to the run.
    pub const SETTINGS_ID: &str = "settings_id";
    /// Terminal outcome of an item.
    pub const OUTCOME: &str = "outcome";
    /// Plan epoch.
    pub const EPOCH: &str = "epoch";
}
