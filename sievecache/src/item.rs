//! One cache entry and its dependency edges.
//!
//! A [`CacheItem`] is either a callback symbol (a function plus opaque user
//! data and an ordered condition list) or a virtual alias routing to a
//! parent callback. Identity, kind, flags and the setting-id lists are
//! fixed at registration; dependency edges and the virtual parent binding
//! are filled in during finalization, after which the item is frozen apart
//! from its atomic order/enabled words, appended conditions, and shared
//! statistics.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::RwLock;

use sievecache_core::{
    IdList, ItemId, ItemStats, SharedCallback, SharedCondition, Stage, SymbolFlags, SymbolKind,
    UserData,
};

/// One dependency edge.
///
/// `target` is always a callback item: edges declared against a virtual
/// alias are rewritten to the alias's parent during resolution, with the
/// alias retained in `alias` so the scheduler can gate on "the parent
/// produced that specific alias".
#[derive(Debug, Clone)]
pub struct DepEdge {
    /// Item the edge points at after rewriting.
    pub target: ItemId,
    /// Dependency name as declared in configuration.
    pub symbolic_name: String,
    /// The virtual alias the edge was declared against, if any.
    pub alias: Option<ItemId>,
}

/// Callback-specific state.
pub(crate) struct CallbackData {
    pub(crate) func: SharedCallback,
    pub(crate) user_data: Option<UserData>,
    /// Evaluated in registration order before the callback. Appending is
    /// allowed after freeze, hence the lock.
    pub(crate) conditions: RwLock<Vec<SharedCondition>>,
}

/// Virtual-alias state. The parent is bound once during finalization.
pub(crate) struct VirtualData {
    pub(crate) parent_name: String,
    pub(crate) parent: Option<ItemId>,
}

/// Callback or virtual alias.
pub(crate) enum ItemVariant {
    Callback(CallbackData),
    Virtual(VirtualData),
}

/// One cache entry.
pub struct CacheItem {
    id: ItemId,
    name: String,
    kind: SymbolKind,
    flags: SymbolFlags,
    priority: i32,
    /// Stage partition; virtuals adopt the parent's stage at bind time.
    stage: Stage,
    /// Topological rank, rewritten on every ordering pass.
    order: AtomicU32,
    enabled: AtomicBool,
    pub(crate) specific: ItemVariant,
    pub(crate) allowed_ids: IdList,
    pub(crate) exec_only_ids: IdList,
    pub(crate) forbidden_ids: IdList,
    pub(crate) deps: Vec<DepEdge>,
    /// Reverse edges: ids of items that depend on this one.
    pub(crate) rdeps: Vec<ItemId>,
    stats: Arc<ItemStats>,
}

impl CacheItem {
    pub(crate) fn new_callback(
        id: ItemId,
        name: String,
        priority: i32,
        func: SharedCallback,
        user_data: Option<UserData>,
        kind: SymbolKind,
        flags: SymbolFlags,
    ) -> Self {
        Self {
            id,
            name,
            kind,
            flags,
            priority,
            stage: kind.stage(),
            order: AtomicU32::new(0),
            enabled: AtomicBool::new(true),
            specific: ItemVariant::Callback(CallbackData {
                func,
                user_data,
                conditions: RwLock::new(Vec::new()),
            }),
            allowed_ids: IdList::new(),
            exec_only_ids: IdList::new(),
            forbidden_ids: IdList::new(),
            deps: Vec::new(),
            rdeps: Vec::new(),
            stats: Arc::new(ItemStats::new()),
        }
    }

    pub(crate) fn new_virtual(
        id: ItemId,
        name: String,
        parent_name: String,
        kind: SymbolKind,
        flags: SymbolFlags,
    ) -> Self {
        Self {
            id,
            name,
            kind,
            flags,
            priority: 0,
            stage: kind.stage(),
            order: AtomicU32::new(0),
            enabled: AtomicBool::new(true),
            specific: ItemVariant::Virtual(VirtualData {
                parent_name,
                parent: None,
            }),
            allowed_ids: IdList::new(),
            exec_only_ids: IdList::new(),
            forbidden_ids: IdList::new(),
            deps: Vec::new(),
            rdeps: Vec::new(),
            stats: Arc::new(ItemStats::new()),
        }
    }

    #[must_use]
    pub fn id(&self) -> ItemId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn kind(&self) -> SymbolKind {
        self.kind
    }

    #[must_use]
    pub fn flags(&self) -> SymbolFlags {
        self.flags
    }

    #[must_use]
    pub fn priority(&self) -> i32 {
        self.priority
    }

    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub(crate) fn set_stage(&mut self, stage: Stage) {
        self.stage = stage;
    }

    /// Topological rank within the item's stage, dense from zero.
    #[must_use]
    pub fn order(&self) -> u32 {
        self.order.load(Ordering::Relaxed)
    }

    pub(crate) fn set_order(&self, order: u32) {
        self.order.store(order, Ordering::Relaxed);
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Toggle the enabled gate, honoring the explicit pin flags.
    pub fn set_enabled(&self, on: bool) {
        if on && self.flags.contains(SymbolFlags::EXPLICIT_DISABLE) {
            return;
        }
        if !on && self.flags.contains(SymbolFlags::EXPLICIT_ENABLE) {
            return;
        }
        self.enabled.store(on, Ordering::Relaxed);
    }

    /// Disable regardless of pin flags. Used by the resolver for unbound
    /// virtuals and cycle breaking.
    pub(crate) fn force_disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_virtual(&self) -> bool {
        matches!(self.specific, ItemVariant::Virtual(_))
    }

    /// A callback symbol in the filter stage proper.
    #[must_use]
    pub fn is_filter(&self) -> bool {
        matches!(self.specific, ItemVariant::Callback(_)) && self.kind == SymbolKind::Filter
    }

    /// Whether a score can attach to this symbol.
    #[must_use]
    pub fn is_scoreable(&self) -> bool {
        self.kind.is_scoreable()
    }

    #[must_use]
    pub fn is_ghost(&self) -> bool {
        self.flags.contains(SymbolFlags::GHOST)
    }

    /// Parent item id, once bound. `None` for callbacks and unbound virtuals.
    #[must_use]
    pub fn parent(&self) -> Option<ItemId> {
        match &self.specific {
            ItemVariant::Virtual(v) => v.parent,
            ItemVariant::Callback(_) => None,
        }
    }

    /// Parent name as declared. `None` for callbacks.
    #[must_use]
    pub fn parent_name(&self) -> Option<&str> {
        match &self.specific {
            ItemVariant::Virtual(v) => Some(&v.parent_name),
            ItemVariant::Callback(_) => None,
        }
    }

    pub(crate) fn bind_parent(&mut self, parent: ItemId) {
        if let ItemVariant::Virtual(v) = &mut self.specific {
            v.parent = Some(parent);
        }
    }

    /// Append a condition predicate. Returns false for virtual items, which
    /// cannot carry conditions.
    pub fn add_condition(&self, condition: SharedCondition) -> bool {
        match &self.specific {
            ItemVariant::Callback(data) => {
                data.conditions.write().push(condition);
                true
            }
            ItemVariant::Virtual(_) => false,
        }
    }

    /// Snapshot of the condition list in registration order.
    #[must_use]
    pub(crate) fn conditions(&self) -> Vec<SharedCondition> {
        match &self.specific {
            ItemVariant::Callback(data) => data.conditions.read().clone(),
            ItemVariant::Virtual(_) => Vec::new(),
        }
    }

    pub(crate) fn callback(&self) -> Option<(SharedCallback, Option<UserData>)> {
        match &self.specific {
            ItemVariant::Callback(data) => {
                Some((Arc::clone(&data.func), data.user_data.clone()))
            }
            ItemVariant::Virtual(_) => None,
        }
    }

    #[must_use]
    pub fn stats(&self) -> &Arc<ItemStats> {
        &self.stats
    }

    /// Dependency edges, resolved to callback targets.
    #[must_use]
    pub fn deps(&self) -> &[DepEdge] {
        &self.deps
    }

    /// Ids of items depending on this one.
    #[must_use]
    pub fn rdeps(&self) -> &[ItemId] {
        &self.rdeps
    }
}

impl std::fmt::Debug for CacheItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheItem")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("stage", &self.stage)
            .field("priority", &self.priority)
            .field("order", &self.order())
            .field("enabled", &self.enabled())
            .field("virtual", &self.is_virtual())
            .field("deps", &self.deps.len())
            .field("rdeps", &self.rdeps.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sievecache_core::{ConditionVerdict, MessageView, NoOpCallback};

    use super::*;

    fn callback_item(name: &str, kind: SymbolKind) -> CacheItem {
        CacheItem::new_callback(
            0,
            name.into(),
            0,
            Arc::new(NoOpCallback),
            None,
            kind,
            SymbolFlags::empty(),
        )
    }

    #[test]
    fn callback_classification() {
        let item = callback_item("TEST_FILTER", SymbolKind::Filter);
        assert!(!item.is_virtual());
        assert!(item.is_filter());
        assert!(item.is_scoreable());
        assert!(!item.is_ghost());
        assert!(item.parent().is_none());
        assert_eq!(item.stage(), Stage::Filter);
    }

    #[test]
    fn virtual_classification() {
        let item = CacheItem::new_virtual(
            3,
            "TEST_ALIAS".into(),
            "TEST_FILTER".into(),
            SymbolKind::Virtual,
            SymbolFlags::GHOST,
        );
        assert!(item.is_virtual());
        assert!(!item.is_filter());
        assert!(item.is_scoreable());
        assert!(item.is_ghost());
        assert_eq!(item.parent_name(), Some("TEST_FILTER"));
        assert!(item.parent().is_none());
    }

    #[test]
    fn conditions_rejected_on_virtuals() {
        let item = CacheItem::new_virtual(
            1,
            "ALIAS".into(),
            "PARENT".into(),
            SymbolKind::Virtual,
            SymbolFlags::empty(),
        );
        let accepted = item.add_condition(Arc::new(
            |_: &dyn MessageView, _: ItemId| ConditionVerdict::Pass,
        ));
        assert!(!accepted);
        assert!(item.conditions().is_empty());
    }

    #[test]
    fn conditions_keep_registration_order() {
        let item = callback_item("COND", SymbolKind::Filter);
        assert!(item.add_condition(Arc::new(
            |_: &dyn MessageView, _: ItemId| ConditionVerdict::Pass
        )));
        assert!(item.add_condition(Arc::new(
            |_: &dyn MessageView, _: ItemId| ConditionVerdict::Skip
        )));
        assert_eq!(item.conditions().len(), 2);
    }

    #[test]
    fn explicit_pins_resist_bulk_toggles() {
        let mut item = callback_item("PINNED", SymbolKind::Filter);
        item = {
            // Rebuild with the pin flag; flags are fixed at construction.
            CacheItem::new_callback(
                item.id(),
                item.name().into(),
                item.priority(),
                Arc::new(NoOpCallback),
                None,
                item.kind(),
                SymbolFlags::EXPLICIT_ENABLE,
            )
        };
        item.set_enabled(false);
        assert!(item.enabled());
        // The resolver can still force the gate.
        item.force_disable();
        assert!(!item.enabled());
    }

    #[test]
    fn order_is_atomic_per_pass() {
        let item = callback_item("ORDERED", SymbolKind::Filter);
        item.set_order(7);
        assert_eq!(item.order(), 7);
    }
}
