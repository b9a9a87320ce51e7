//! Symbol registration: the mutable phase of the cache.
//!
//! A [`SymbolRegistry`] accumulates items and textual dependencies from the
//! configuration layer, enforcing name uniqueness and assigning dense ids in
//! registration order. `finalize()` resolves the dependency graph, computes
//! the first execution plan, and freezes everything into a [`SymbolCache`];
//! no registration happens afterwards.

use std::collections::HashMap;

use tracing::{debug, warn};

use sievecache_core::{
    CacheConfig, CacheError, CacheResult, IdList, ItemId, SharedCallback, SharedCondition,
    SymbolFlags, SymbolKind, UserData,
};

use crate::cache::SymbolCache;
use crate::item::CacheItem;

/// A textual dependency declared before the graph exists.
#[derive(Debug, Clone)]
pub(crate) struct PendingDep {
    pub(crate) from: String,
    pub(crate) to: String,
}

/// Accumulates symbol registrations until `finalize()`.
#[derive(Default)]
pub struct SymbolRegistry {
    pub(crate) items: Vec<CacheItem>,
    pub(crate) by_name: HashMap<String, ItemId>,
    pub(crate) pending_deps: Vec<PendingDep>,
}

impl SymbolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Register a callback symbol. Returns its dense id.
    ///
    /// A name collision with a placeholder virtual (one declared as its own
    /// parent) upgrades the placeholder in place, keeping its id and
    /// setting-id lists; any other collision is an error.
    pub fn register_callback(
        &mut self,
        name: &str,
        kind: SymbolKind,
        flags: SymbolFlags,
        priority: i32,
        func: SharedCallback,
        user_data: Option<UserData>,
    ) -> CacheResult<ItemId> {
        if name.is_empty() {
            return Err(CacheError::InvalidConfig {
                detail: "symbol name must not be empty".into(),
            });
        }
        if matches!(kind, SymbolKind::Virtual) {
            return Err(CacheError::InvalidConfig {
                detail: format!("callback symbol {name} cannot be registered as virtual"),
            });
        }

        if let Some(&existing) = self.by_name.get(name) {
            let placeholder = self.items[existing as usize]
                .parent_name()
                .is_some_and(|parent| parent == name);
            if !placeholder {
                return Err(CacheError::DuplicateName { name: name.into() });
            }
            // Deferred binding: the real definition arrived after the name
            // was first seen as a self-parent placeholder.
            debug!(symbol = name, id = existing, "upgrading placeholder virtual");
            let old = std::mem::replace(
                &mut self.items[existing as usize],
                CacheItem::new_callback(
                    existing,
                    name.into(),
                    priority,
                    func,
                    user_data,
                    kind,
                    flags,
                ),
            );
            self.items[existing as usize].allowed_ids = old.allowed_ids;
            self.items[existing as usize].exec_only_ids = old.exec_only_ids;
            self.items[existing as usize].forbidden_ids = old.forbidden_ids;
            return Ok(existing);
        }

        let id = self.next_id();
        debug!(symbol = name, id, kind = %kind, priority, "registered callback symbol");
        self.items.push(CacheItem::new_callback(
            id,
            name.into(),
            priority,
            func,
            user_data,
            kind,
            flags,
        ));
        self.by_name.insert(name.into(), id);
        Ok(id)
    }

    /// Register a virtual alias for `parent_name`. Returns its dense id.
    ///
    /// Re-registering the same alias with the same parent is idempotent;
    /// with a different parent it is an error.
    pub fn register_virtual(
        &mut self,
        name: &str,
        parent_name: &str,
        kind: SymbolKind,
        flags: SymbolFlags,
    ) -> CacheResult<ItemId> {
        if name.is_empty() {
            return Err(CacheError::InvalidConfig {
                detail: "symbol name must not be empty".into(),
            });
        }

        if let Some(&existing) = self.by_name.get(name) {
            let item = &self.items[existing as usize];
            return match item.parent_name() {
                Some(parent) if parent == parent_name => Ok(existing),
                _ => Err(CacheError::DuplicateName { name: name.into() }),
            };
        }

        let id = self.next_id();
        debug!(symbol = name, id, parent = parent_name, "registered virtual symbol");
        self.items.push(CacheItem::new_virtual(
            id,
            name.into(),
            parent_name.into(),
            kind,
            flags,
        ));
        self.by_name.insert(name.into(), id);
        Ok(id)
    }

    /// Declare that `from_name` depends on `to_name`.
    ///
    /// Both names are textual and resolved at finalization, so dependencies
    /// may be declared in any order relative to the symbols themselves.
    pub fn add_dependency(&mut self, from_name: &str, to_name: &str) {
        if from_name == to_name {
            warn!(symbol = from_name, "ignoring self-dependency");
            return;
        }
        self.pending_deps.push(PendingDep {
            from: from_name.into(),
            to: to_name.into(),
        });
    }

    /// Restrict execution to the given setting ids.
    pub fn set_allowed_ids(&mut self, name: &str, ids: IdList) -> CacheResult<()> {
        let item = self.item_mut(name)?;
        item.allowed_ids = ids;
        Ok(())
    }

    /// Forbid execution for the given setting ids.
    pub fn set_forbidden_ids(&mut self, name: &str, ids: IdList) -> CacheResult<()> {
        let item = self.item_mut(name)?;
        item.forbidden_ids = ids;
        Ok(())
    }

    /// Run for side effects only under the given setting ids.
    pub fn set_exec_only_ids(&mut self, name: &str, ids: IdList) -> CacheResult<()> {
        let item = self.item_mut(name)?;
        item.exec_only_ids = ids;
        Ok(())
    }

    /// Attach a condition predicate to a callback symbol.
    pub fn set_condition(&mut self, name: &str, condition: SharedCondition) -> CacheResult<()> {
        let id = self.lookup(name)?;
        if !self.items[id as usize].add_condition(condition) {
            return Err(CacheError::VirtualCondition { name: name.into() });
        }
        Ok(())
    }

    /// Look up a registered symbol id by name.
    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<ItemId> {
        self.by_name.get(name).copied()
    }

    /// Resolve the graph, compute the first plan, and freeze the cache.
    ///
    /// Hard errors (unknown dependency targets, cross-stage edges) fail the
    /// call. Recoverable findings (unbound virtual parents, broken cycles)
    /// disable the offender and are reported through
    /// [`SymbolCache::diagnostics`].
    pub fn finalize(self, config: CacheConfig) -> CacheResult<SymbolCache> {
        config.validate()?;
        SymbolCache::build(self, config)
    }

    fn next_id(&self) -> ItemId {
        ItemId::try_from(self.items.len()).unwrap_or(ItemId::MAX)
    }

    fn lookup(&self, name: &str) -> CacheResult<ItemId> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| CacheError::UnknownSymbol { name: name.into() })
    }

    fn item_mut(&mut self, name: &str) -> CacheResult<&mut CacheItem> {
        let id = self.lookup(name)?;
        Ok(&mut self.items[id as usize])
    }
}
