//! Compact set of small integer setting ids.
//!
//! Symbol admission is filtered per message by three of these lists
//! (allowed, forbidden, exec-only). Almost every list is empty and almost
//! every non-empty list holds a handful of ids, so the representation is an
//! inline array of four slots that spills to a sorted heap vector. The empty
//! check, which is the hot path, is a single length test.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::types::SettingsId;

/// Number of ids stored inline before spilling to the heap.
const INLINE_IDS: usize = 4;

/// Compact set of 32-bit setting ids.
///
/// Kept sorted at all times; membership is a linear scan while inline and a
/// binary search once spilled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdList {
    ids: SmallVec<[SettingsId; INLINE_IDS]>,
}

impl IdList {
    /// An empty list. Empty means "no restriction" for allow/forbid lists.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from any iterator of ids; duplicates collapse.
    pub fn from_ids(ids: impl IntoIterator<Item = SettingsId>) -> Self {
        let mut list = Self::new();
        for id in ids {
            list.insert(id);
        }
        list
    }

    /// Whether no ids are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Number of distinct ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Insert an id; idempotent.
    pub fn insert(&mut self, id: SettingsId) {
        if let Err(pos) = self.ids.binary_search(&id) {
            self.ids.insert(pos, id);
        }
    }

    /// Membership test.
    #[must_use]
    pub fn contains(&self, id: SettingsId) -> bool {
        if self.ids.len() <= INLINE_IDS {
            self.ids.iter().any(|&candidate| candidate == id)
        } else {
            self.ids.binary_search(&id).is_ok()
        }
    }

    /// Remove all ids.
    pub fn clear(&mut self) {
        self.ids.clear();
    }

    /// Iterate ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = SettingsId> + '_ {
        self.ids.iter().copied()
    }
}

impl FromIterator<SettingsId> for IdList {
    fn from_iter<I: IntoIterator<Item = SettingsId>>(iter: I) -> Self {
        Self::from_ids(iter)
    }
}

/// How the three per-symbol id lists admit a message's settings id.
///
/// Precedence: forbidden beats exec-only beats allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The symbol runs and its result is visible.
    Run,
    /// The symbol runs for side effects; its result is suppressed.
    ExecOnly,
    /// The symbol is skipped.
    Denied,
}

/// Evaluate the allow/forbid/exec-only triple against a message's settings id.
///
/// A message without a settings id is unrestricted.
#[must_use]
pub fn admit(
    allowed: &IdList,
    forbidden: &IdList,
    exec_only: &IdList,
    settings_id: Option<SettingsId>,
) -> Admission {
    let Some(id) = settings_id else {
        return Admission::Run;
    };
    if !forbidden.is_empty() && forbidden.contains(id) {
        return Admission::Denied;
    }
    if exec_only.contains(id) {
        return Admission::ExecOnly;
    }
    if !allowed.is_empty() && !allowed.contains(id) {
        return Admission::Denied;
    }
    Admission::Run
}
