//! Shared plain types for the symbol cache.
//!
//! - [`SymbolKind`]: what a registered symbol is (callback stage, alias, aggregate).
//! - [`Stage`]: the coarse execution partition and its fixed run order.
//! - [`SymbolFlags`]: opaque per-symbol bit carrier with a few cache-interpreted bits.
//! - [`ItemOutcome`]: terminal per-item result of one message run.
//! - [`SymbolResult`]: one produced symbol with its score attachment.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Dense identifier of a cache item, assigned in registration order.
pub type ItemId = u32;

/// Per-message settings id controlling symbol admission.
pub type SettingsId = u32;

/// Opaque token identifying one pending async event within a run.
pub type EventToken = u64;

// ─── Symbol kind ────────────────────────────────────────────────────────────

/// What a registered symbol is.
///
/// The first five kinds are callback symbols pinned to an execution stage.
/// `Classifier` and `Composite` are callback symbols that aggregate over
/// other symbols' outcomes. `Virtual` is an alias with no callback of its
/// own; it routes dependencies to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    /// Executed on the connection stage, before the message body is read.
    ConnFilter,
    /// Executed before all filters.
    PreFilter,
    /// Normal symbol with a callback.
    Filter,
    /// Executed after all filters.
    PostFilter,
    /// Executed last; cannot change the message verdict.
    Idempotent,
    /// Aggregates over its child symbol set.
    Classifier,
    /// Boolean expression over other symbols' outcomes.
    Composite,
    /// Alias with no callback; routes dependencies to its parent.
    Virtual,
}

impl SymbolKind {
    /// Stage partition this kind belongs to.
    ///
    /// `Virtual` nominally sits in the filter partition; once its parent is
    /// bound it adopts the parent's stage.
    #[must_use]
    pub const fn stage(self) -> Stage {
        match self {
            Self::ConnFilter => Stage::Connect,
            Self::PreFilter => Stage::Pre,
            Self::Filter | Self::Composite | Self::Virtual => Stage::Filter,
            Self::Classifier => Stage::Classify,
            Self::PostFilter => Stage::Post,
            Self::Idempotent => Stage::Idempotent,
        }
    }

    /// Whether a score can attach to symbols of this kind.
    #[must_use]
    pub const fn is_scoreable(self) -> bool {
        matches!(
            self,
            Self::Filter | Self::Virtual | Self::Composite | Self::Classifier
        )
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConnFilter => "connfilter",
            Self::PreFilter => "prefilter",
            Self::Filter => "filter",
            Self::PostFilter => "postfilter",
            Self::Idempotent => "idempotent",
            Self::Classifier => "classifier",
            Self::Composite => "composite",
            Self::Virtual => "virtual",
        }
    }
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Stage ──────────────────────────────────────────────────────────────────

/// Coarse execution partition.
///
/// Stages run in the fixed order returned by [`Stage::run_order`]. Dependency
/// edges may not cross stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Connection-time symbols.
    Connect,
    /// Pre-filter symbols.
    Pre,
    /// Filters, composites, and virtual aliases.
    Filter,
    /// Classifiers.
    Classify,
    /// Post-filter symbols.
    Post,
    /// Idempotent symbols; run last, even past the deadline.
    Idempotent,
}

impl Stage {
    /// All stages in execution order.
    pub const RUN_ORDER: [Stage; 6] = [
        Stage::Connect,
        Stage::Pre,
        Stage::Filter,
        Stage::Classify,
        Stage::Post,
        Stage::Idempotent,
    ];

    /// Stages in execution order.
    #[must_use]
    pub const fn run_order() -> [Stage; 6] {
        Self::RUN_ORDER
    }

    /// Dense index of this stage within [`Stage::RUN_ORDER`].
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Connect => 0,
            Self::Pre => 1,
            Self::Filter => 2,
            Self::Classify => 3,
            Self::Post => 4,
            Self::Idempotent => 5,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Pre => "pre",
            Self::Filter => "filter",
            Self::Classify => "classify",
            Self::Post => "post",
            Self::Idempotent => "idempotent",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Flags ──────────────────────────────────────────────────────────────────

bitflags::bitflags! {
    /// Per-symbol flag bits.
    ///
    /// Only `GHOST`, `EMPTY`, `EXPLICIT_DISABLE`, `EXPLICIT_ENABLE` and
    /// `IGNORE_PASSTHROUGH` are interpreted by the cache itself; the rest are
    /// carried opaquely for the host.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SymbolFlags: u32 {
        /// The symbol is never reported in results; side effects still happen.
        const GHOST = 1 << 0;
        /// The symbol may add a score refinement exempt from one-shot limits.
        const FINE = 1 << 1;
        /// The symbol runs even when the message body is empty.
        const EMPTY = 1 << 2;
        /// The symbol is owned by the scripting bridge's coalescing layer.
        const SQUEEZED = 1 << 3;
        /// The enabled gate is pinned off against bulk toggles.
        const EXPLICIT_DISABLE = 1 << 4;
        /// The enabled gate is pinned on against bulk toggles.
        const EXPLICIT_ENABLE = 1 << 5;
        /// Keep running after a pre-result short-circuits the scan.
        const IGNORE_PASSTHROUGH = 1 << 6;
    }
}

// ─── Condition verdict ──────────────────────────────────────────────────────

/// Verdict of a per-symbol condition predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionVerdict {
    /// The symbol may run.
    Pass,
    /// The symbol is denied; counted as evaluated, result suppressed.
    Deny,
    /// The symbol is skipped; not counted as evaluated.
    Skip,
}

// ─── Per-item outcomes ──────────────────────────────────────────────────────

/// Why an evaluated symbol produced no result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissReason {
    /// The callback ran and recorded nothing.
    NoMatch,
    /// A condition predicate denied execution.
    ConditionDenied,
    /// The callback panicked; the run continued without it.
    Panic,
}

/// Why a symbol was skipped without being evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// A condition predicate asked for a skip.
    Condition,
    /// A dependency was not satisfied (alias not produced, or parent panicked).
    Dependency,
    /// The message's settings id forbade execution.
    SettingsDenied,
    /// The run deadline expired before the symbol was dispatched.
    Deadline,
    /// The run was cancelled.
    Cancelled,
    /// The item was disabled (resolver or host).
    Disabled,
    /// A pre-result short-circuited the filter stages.
    Passthrough,
    /// The message is empty and the symbol does not opt into empty scans.
    EmptyMessage,
}

/// Terminal state of one item within one message run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemOutcome {
    /// The callback recorded at least one symbol result.
    Hit,
    /// Evaluated without producing a result.
    Miss(MissReason),
    /// Not evaluated.
    Skip(SkipReason),
}

impl ItemOutcome {
    /// Whether the symbol produced a result.
    #[must_use]
    pub const fn is_hit(self) -> bool {
        matches!(self, Self::Hit)
    }

    /// Whether the item reached this outcome without evaluation.
    #[must_use]
    pub const fn is_skip(self) -> bool {
        matches!(self, Self::Skip(_))
    }
}

// ─── Results ────────────────────────────────────────────────────────────────

/// One produced symbol with its score attachment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolResult {
    /// Name under which the result is reported; may be a virtual alias of the
    /// producing symbol.
    pub name: String,
    /// Score contribution attached to the symbol.
    pub score: f64,
    /// Free-form option strings attached by the callback.
    pub options: Vec<String>,
}

impl SymbolResult {
    /// Result with a score and no options.
    #[must_use]
    pub fn new(name: impl Into<String>, score: f64) -> Self {
        Self {
            name: name.into(),
            score,
            options: Vec::new(),
        }
    }

    /// Attach an option string.
    #[must_use]
    pub fn with_option(mut self, option: impl Into<String>) -> Self {
        self.options.push(option.into());
        self
    }
}

/// Early verdict attached by a connection- or pre-stage callback.
///
/// Once set, filter and classify stage symbols are skipped unless they carry
/// [`SymbolFlags::IGNORE_PASSTHROUGH`]; post and idempotent stages still run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreResult {
    /// Host-defined action, e.g. "reject" or "greylist".
    pub action: String,
    /// Optional operator-facing explanation.
    pub message: Option<String>,
}

impl PreResult {
    #[must_use]
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            message: None,
        }
    }
}
