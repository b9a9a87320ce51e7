//! Core traits, types, and error types for the sievecache symbol cache.
//!
//! This crate defines the shared interfaces ([`SymbolCallback`],
//! [`Condition`], [`MessageView`]), plain data types ([`SymbolKind`],
//! [`Stage`], [`ItemOutcome`], [`SymbolResult`]), the setting-id lists,
//! per-symbol atomic statistics, the error taxonomy ([`CacheError`]), and
//! cache configuration used across the workspace.
//!
//! It has minimal external dependencies and is intended to be depended on
//! by every other crate in the workspace.

pub mod config;
pub mod error;
pub mod id_list;
pub mod stats;
pub mod tracing_config;
pub mod traits;
pub mod types;

pub use config::CacheConfig;
pub use error::{CacheError, CacheResult};
pub use id_list::{Admission, IdList, admit};
pub use stats::{ItemStats, ItemStatsSnapshot};
pub use traits::{
    CallbackScope, Condition, MessageView, NoOpCallback, SharedCallback, SharedCondition,
    SymbolCallback, UserData,
};
pub use types::{
    ConditionVerdict, EventToken, ItemId, ItemOutcome, MissReason, PreResult, SettingsId,
    SkipReason, Stage, SymbolFlags, SymbolKind, SymbolResult,
};
