//! # sievecache
//!
//! The symbol cache of a mail-scanning pipeline: an in-process registry,
//! dependency resolver, and per-message scheduler for named "symbols",
//! the predicates and effects evaluated against every scanned message.
//!
//! Symbols register with a priority, an execution stage, dependencies on
//! other symbols, and per-message setting-id filters. Finalization resolves
//! virtual aliases, validates the dependency graph, and compiles a
//! stage-partitioned topological plan that honors priority and measured
//! frequency. Each message then runs as a cooperative state machine over a
//! stable plan snapshot, with at-most-once evaluation per symbol, async
//! callbacks parked as running, and execution statistics feeding back into
//! the ordering on frequency peaks.
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use sievecache::prelude::*;
//!
//! struct Message(String);
//! impl MessageView for Message {
//!     fn message_id(&self) -> &str { &self.0 }
//!     fn as_any(&self) -> &dyn std::any::Any { self }
//! }
//!
//! let mut registry = SymbolRegistry::new();
//! registry.register_callback(
//!     "SENDER_LISTED",
//!     SymbolKind::Filter,
//!     SymbolFlags::empty(),
//!     10,
//!     Arc::new(|scope: &mut dyn CallbackScope| {
//!         scope.insert_result(SymbolResult::new("SENDER_LISTED", 2.5));
//!     }),
//!     None,
//! ).unwrap();
//!
//! let cache = registry.finalize(CacheConfig::default()).unwrap();
//! let mut run = cache.schedule(Arc::new(Message("m1".into())), None, None);
//! assert_eq!(run.poll(), RunStatus::Done);
//! let results = run.results().unwrap();
//! assert_eq!(results.symbols[0].name, "SENDER_LISTED");
//! ```
//!
//! ## Crate Layout
//!
//! | Crate | Purpose |
//! |-------|---------|
//! | [`sievecache-core`](sievecache_core) | Types, traits, errors, config, id lists, statistics |
//! | `sievecache` | Item model, registry, resolver, plan, scheduler, maintenance, snapshots |

pub mod cache;
pub mod item;
pub mod periodic;
pub mod plan;
pub mod registry;
mod resolver;
pub mod scheduler;
pub mod snapshot;

pub use cache::{SymbolCache, TickReport};
pub use item::{CacheItem, DepEdge};
pub use periodic::MaintenanceHandle;
pub use plan::ExecutionPlan;
pub use registry::SymbolRegistry;
pub use scheduler::{EventOutcome, RunHandle, RunStatus, ScanResults};
pub use snapshot::{SnapshotRecord, StatsSnapshotFile, read_snapshot, write_snapshot};

pub use sievecache_core::{
    Admission, CacheConfig, CacheError, CacheResult, CallbackScope, Condition, ConditionVerdict,
    EventToken, IdList, ItemId, ItemOutcome, ItemStats, ItemStatsSnapshot, MessageView,
    MissReason, NoOpCallback, PreResult, SettingsId, SharedCallback, SharedCondition, SkipReason,
    Stage, SymbolCallback, SymbolFlags, SymbolKind, SymbolResult, UserData,
};

/// Common imports for hosts embedding the cache.
pub mod prelude {
    pub use crate::cache::{SymbolCache, TickReport};
    pub use crate::registry::SymbolRegistry;
    pub use crate::scheduler::{EventOutcome, RunHandle, RunStatus, ScanResults};
    pub use sievecache_core::{
        CacheConfig, CacheError, CacheResult, CallbackScope, ConditionVerdict, IdList,
        ItemOutcome, MessageView, MissReason, PreResult, SkipReason, Stage, SymbolFlags,
        SymbolKind, SymbolResult,
    };
}
