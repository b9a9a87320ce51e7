//! Trait seams between the symbol cache and its host.
//!
//! - [`MessageView`]: read-only handle on the message under scan.
//! - [`SymbolCallback`]: the work a callback symbol performs.
//! - [`CallbackScope`]: what a callback may do while it runs (record
//!   results, attach a pre-result, register async events).
//! - [`Condition`]: per-symbol admission predicate.
//!
//! All traits are dyn-compatible so hosts can hand the cache
//! `Arc<dyn SymbolCallback>` values produced by a scripting bridge. The
//! cache never inspects message content; callbacks downcast through
//! [`MessageView::as_any`] to reach the host's concrete message type.

use std::any::Any;
use std::sync::Arc;

use crate::types::{ConditionVerdict, EventToken, ItemId, PreResult, SymbolResult};

// ─── Message ────────────────────────────────────────────────────────────────

/// Read-only view of the message under scan.
pub trait MessageView: Send + Sync {
    /// Stable identifier used in logs and diagnostics.
    fn message_id(&self) -> &str;

    /// Whether the message has an empty body. Symbols without the
    /// empty-scan flag are skipped on empty messages.
    fn is_empty(&self) -> bool {
        false
    }

    /// Downcast hook for callbacks that know the host's message type.
    fn as_any(&self) -> &dyn Any;
}

// ─── Callback ───────────────────────────────────────────────────────────────

/// What a callback may do while it runs.
///
/// Implemented by the scheduler; one scope is alive for exactly one
/// invocation. A callback either records results synchronously, or
/// registers async events and returns; the item then stays running until
/// every event is completed or removed through the run handle.
pub trait CallbackScope {
    /// The message under scan.
    fn message(&self) -> &dyn MessageView;

    /// Id of the item being evaluated.
    fn item_id(&self) -> ItemId;

    /// Opaque per-symbol data supplied at registration.
    fn user_data(&self) -> Option<&(dyn Any + Send + Sync)>;

    /// Record a symbol result. The name may be the symbol's own name or one
    /// of its virtual aliases; admission filtering of the named symbol is
    /// applied by the scheduler.
    fn insert_result(&mut self, result: SymbolResult);

    /// Whether a symbol with `name` has been produced so far in this run.
    ///
    /// Composite and classifier callbacks evaluate their expressions over
    /// already-computed children through this. Results suppressed for
    /// downstream consumers (exec-only) are not visible here.
    fn symbol_produced(&self, name: &str) -> bool;

    /// Attach an early verdict that short-circuits the filter stages.
    fn set_pre_result(&mut self, pre_result: PreResult);

    /// Register a pending async event. The returned token is completed or
    /// removed by the host through the run handle.
    fn register_event(&mut self) -> EventToken;

    /// Remove a previously registered event; counts as no hit.
    /// Returns false if the token is unknown or already completed.
    fn remove_event(&mut self, token: EventToken) -> bool;
}

/// The work a callback symbol performs against one message.
pub trait SymbolCallback: Send + Sync {
    fn invoke(&self, scope: &mut dyn CallbackScope);
}

impl<F> SymbolCallback for F
where
    F: Fn(&mut dyn CallbackScope) + Send + Sync,
{
    fn invoke(&self, scope: &mut dyn CallbackScope) {
        self(scope);
    }
}

/// Callback that records nothing; useful in tests and as a placeholder.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpCallback;

impl SymbolCallback for NoOpCallback {
    fn invoke(&self, _scope: &mut dyn CallbackScope) {}
}

// ─── Condition ──────────────────────────────────────────────────────────────

/// Per-symbol admission predicate, evaluated before the callback.
///
/// Pure with respect to the run: it may read message state but must not
/// record results.
pub trait Condition: Send + Sync {
    fn check(&self, message: &dyn MessageView, item_id: ItemId) -> ConditionVerdict;
}

impl<F> Condition for F
where
    F: Fn(&dyn MessageView, ItemId) -> ConditionVerdict + Send + Sync,
{
    fn check(&self, message: &dyn MessageView, item_id: ItemId) -> ConditionVerdict {
        self(message, item_id)
    }
}

/// Shared callback handle as supplied by the host.
pub type SharedCallback = Arc<dyn SymbolCallback>;

/// Shared condition handle as supplied by the host.
pub type SharedCondition = Arc<dyn Condition>;

/// Opaque user data attached to a callback at registration.
pub type UserData = Arc<dyn Any + Send + Sync>;
