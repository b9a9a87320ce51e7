//! Per-message execution: the run state machine.
//!
//! A [`RunHandle`] drives one message through the stages of a plan
//! snapshot. Within a stage, items are visited in plan order (which already
//! encodes priority, frequency, and topology); an item dispatches once its
//! dependency gate opens, runs its conditions, and either completes
//! synchronously or parks as running while async events are outstanding.
//! A stage closes only when every planned item is terminal; the run is
//! single-threaded and cooperative: the host polls, and async completions
//! re-enter the dispatcher on the same worker.
//!
//! Guarantees: at most one evaluation per item per message, no transition
//! out of a terminal state, and causal order along dependency edges.

use std::collections::{HashMap, HashSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use sievecache_core::{
    Admission, CallbackScope, ConditionVerdict, EventToken, ItemId, ItemOutcome, MessageView,
    MissReason, PreResult, SettingsId, SkipReason, Stage, SymbolFlags, SymbolResult, UserData,
    admit,
};

use crate::cache::CacheCore;
use crate::plan::ExecutionPlan;

/// Coarse run status returned by [`RunHandle::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Async work is outstanding or the host must poll again.
    Running,
    /// Every stage closed; results are final.
    Done,
}

/// Completion value for one async event.
#[derive(Debug, Clone)]
pub enum EventOutcome {
    /// The event produced a symbol result.
    Hit(SymbolResult),
    /// The event finished without a hit.
    NoHit,
}

/// Final output of one message run.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ScanResults {
    /// Produced symbols in insertion order, ghost and exec-only excluded.
    pub symbols: Vec<SymbolResult>,
    /// Early verdict, if a connection- or pre-stage callback attached one.
    pub pre_result: Option<PreResult>,
    /// Whether the run was cancelled.
    pub cancelled: bool,
    /// Whether the deadline expired during the run.
    pub deadline_reached: bool,
}

#[derive(Clone, Copy)]
enum RunState {
    /// Not yet dispatched; the dependency gate decides when.
    Pending,
    /// Callback returned with async events outstanding.
    Running { any_hit: bool, since: Instant },
    /// Terminal.
    Done(ItemOutcome),
}

enum Gate {
    Blocked,
    Cascade,
    Ready,
}

struct PendingEvent {
    item: ItemId,
    suppressed: bool,
}

/// One message run over a stable plan snapshot.
pub struct RunHandle {
    core: Arc<CacheCore>,
    plan: Arc<ExecutionPlan>,
    message: Arc<dyn MessageView>,
    settings_id: Option<SettingsId>,
    deadline: Option<Instant>,
    states: Vec<RunState>,
    stage_idx: usize,
    events: HashMap<EventToken, PendingEvent>,
    next_token: EventToken,
    /// Names visible to downstream consumers (alias gates, virtual states).
    produced: HashSet<String>,
    results: Vec<SymbolResult>,
    pre_result: Option<PreResult>,
    cancelled: bool,
    deadline_fired: bool,
    finished: bool,
}

impl RunHandle {
    pub(crate) fn new(
        core: Arc<CacheCore>,
        message: Arc<dyn MessageView>,
        settings_id: Option<SettingsId>,
        deadline: Option<Instant>,
    ) -> Self {
        let plan = core.plan.load();
        let mut states = vec![RunState::Pending; core.items.len()];
        for (id, state) in states.iter_mut().enumerate() {
            if !plan.contains(id as ItemId) {
                *state = RunState::Done(ItemOutcome::Skip(SkipReason::Disabled));
            }
        }
        trace!(
            message_id = message.message_id(),
            settings_id,
            epoch = plan.epoch(),
            items = plan.len(),
            "run created"
        );
        Self {
            core,
            plan,
            message,
            settings_id,
            deadline,
            states,
            stage_idx: 0,
            events: HashMap::new(),
            next_token: 1,
            produced: HashSet::new(),
            results: Vec::new(),
            pre_result: None,
            cancelled: false,
            deadline_fired: false,
            finished: false,
        }
    }

    /// Attempt further dispatch and report the run status.
    pub fn poll(&mut self) -> RunStatus {
        self.advance();
        self.status()
    }

    /// Complete one async event and re-enter the dispatcher.
    ///
    /// Unknown tokens and completions arriving after cancellation are
    /// no-ops, so racing finalizers are harmless.
    pub fn complete_event(&mut self, token: EventToken, outcome: EventOutcome) -> RunStatus {
        if self.finished || self.cancelled {
            self.events.remove(&token);
            return self.status();
        }
        let Some(event) = self.events.remove(&token) else {
            debug!(token, "completion for unknown event token ignored");
            return self.status();
        };
        let id = event.item;
        if let EventOutcome::Hit(result) = outcome
            && self.apply_result(id, event.suppressed, result)
            && let RunState::Running { any_hit, .. } = &mut self.states[id as usize]
        {
            *any_hit = true;
        }
        if let RunState::Running { any_hit, since } = self.states[id as usize] {
            let remaining = self.events.values().filter(|e| e.item == id).count();
            if remaining == 0 {
                let outcome = if any_hit {
                    ItemOutcome::Hit
                } else {
                    ItemOutcome::Miss(MissReason::NoMatch)
                };
                self.finish_item(id, outcome, Some(since.elapsed()));
                self.wake_dependents(id);
            }
        }
        self.advance();
        self.status()
    }

    /// Drop one pending event as if it completed without a hit.
    /// Returns false if the token is unknown.
    pub fn remove_event(&mut self, token: EventToken) -> bool {
        if !self.events.contains_key(&token) {
            return false;
        }
        self.complete_event(token, EventOutcome::NoHit);
        true
    }

    /// Cooperatively cancel the run. All non-terminal items skip and
    /// pending async completions become no-ops.
    pub fn cancel(&mut self) {
        if self.finished {
            return;
        }
        self.cancelled = true;
        self.advance();
    }

    #[must_use]
    pub fn status(&self) -> RunStatus {
        if self.finished {
            RunStatus::Done
        } else {
            RunStatus::Running
        }
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.finished
    }

    /// Number of outstanding async events.
    #[must_use]
    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    /// Terminal outcome of one item, if reached.
    #[must_use]
    pub fn outcome(&self, id: ItemId) -> Option<ItemOutcome> {
        match self.states.get(id as usize)? {
            RunState::Done(outcome) => Some(*outcome),
            _ => None,
        }
    }

    /// Early verdict attached so far, if any.
    #[must_use]
    pub fn pre_result(&self) -> Option<&PreResult> {
        self.pre_result.as_ref()
    }

    /// Final results once the run is done; `None` while running.
    #[must_use]
    pub fn results(&self) -> Option<ScanResults> {
        if !self.finished {
            return None;
        }
        Some(ScanResults {
            symbols: self.results.clone(),
            pre_result: self.pre_result.clone(),
            cancelled: self.cancelled,
            deadline_reached: self.deadline_fired,
        })
    }

    // ─── Dispatch machinery ─────────────────────────────────────────────

    fn advance(&mut self) {
        while !self.finished {
            if self.cancelled {
                self.flush_cancelled();
                return;
            }
            self.check_deadline();

            let stage = Stage::RUN_ORDER[self.stage_idx];
            let plan = Arc::clone(&self.plan);
            let mut progressed = false;
            for &id in plan.stage_items(stage) {
                if matches!(self.states[id as usize], RunState::Pending) {
                    match self.dependency_gate(id) {
                        Gate::Blocked => {}
                        Gate::Cascade => {
                            self.finish_item(
                                id,
                                ItemOutcome::Skip(SkipReason::Dependency),
                                None,
                            );
                            progressed = true;
                        }
                        Gate::Ready => {
                            self.dispatch(id);
                            progressed = true;
                        }
                    }
                }
            }

            if self.stage_closed(stage) {
                trace!(stage = %stage, "stage closed");
                if self.stage_idx + 1 == Stage::RUN_ORDER.len() {
                    self.finished = true;
                    debug!(
                        message_id = self.message.message_id(),
                        symbols = self.results.len(),
                        "run complete"
                    );
                    return;
                }
                self.stage_idx += 1;
                continue;
            }
            if !progressed {
                return;
            }
        }
    }

    /// Targeted wakeup: dispatch items that were waiting on `id` and whose
    /// gate just opened. The general pass in `advance` handles cascades and
    /// stage bookkeeping; this only short-cuts the common completion path.
    fn wake_dependents(&mut self, id: ItemId) {
        self.check_deadline();
        let plan = Arc::clone(&self.plan);
        for &dependent in plan.awaited_by(id) {
            if matches!(self.states[dependent as usize], RunState::Pending)
                && matches!(self.dependency_gate(dependent), Gate::Ready)
            {
                self.dispatch(dependent);
            }
        }
    }

    fn stage_closed(&self, stage: Stage) -> bool {
        self.plan
            .stage_items(stage)
            .iter()
            .all(|&id| matches!(self.states[id as usize], RunState::Done(_)))
    }

    /// Evaluate the dependency edges of `id`.
    ///
    /// Blocked while any edge target is non-terminal. Cascades a skip when
    /// a target panicked or an alias edge's alias was not produced.
    fn dependency_gate(&self, id: ItemId) -> Gate {
        let item = &self.core.items[id as usize];
        for edge in item.deps() {
            let outcome = match self.states[edge.target as usize] {
                RunState::Done(outcome) => outcome,
                _ => return Gate::Blocked,
            };
            if matches!(outcome, ItemOutcome::Miss(MissReason::Panic)) {
                return Gate::Cascade;
            }
            if let Some(alias) = edge.alias {
                let alias_name = self.core.items[alias as usize].name();
                if !self.produced.contains(alias_name) {
                    return Gate::Cascade;
                }
            }
        }
        Gate::Ready
    }

    fn dispatch(&mut self, id: ItemId) {
        let item = Arc::clone(&self.core.items[id as usize]);

        if !item.enabled() {
            self.finish_item(id, ItemOutcome::Skip(SkipReason::Disabled), None);
            return;
        }
        let stage = item.stage();
        if self.deadline_fired && stage != Stage::Idempotent {
            self.finish_item(id, ItemOutcome::Skip(SkipReason::Deadline), None);
            return;
        }
        if self.pre_result.is_some()
            && matches!(stage, Stage::Filter | Stage::Classify)
            && !item.flags().contains(SymbolFlags::IGNORE_PASSTHROUGH)
        {
            self.finish_item(id, ItemOutcome::Skip(SkipReason::Passthrough), None);
            return;
        }
        if self.message.is_empty()
            && matches!(stage, Stage::Filter | Stage::Classify)
            && !item.flags().contains(SymbolFlags::EMPTY)
        {
            self.finish_item(id, ItemOutcome::Skip(SkipReason::EmptyMessage), None);
            return;
        }

        // A virtual alias never runs; its state mirrors whether the parent
        // produced it.
        if item.is_virtual() {
            let outcome = if self.produced.contains(item.name()) {
                ItemOutcome::Hit
            } else {
                ItemOutcome::Miss(MissReason::NoMatch)
            };
            self.finish_item(id, outcome, Some(Duration::ZERO));
            return;
        }

        let suppressed = match admit(
            &item.allowed_ids,
            &item.forbidden_ids,
            &item.exec_only_ids,
            self.settings_id,
        ) {
            Admission::Denied => {
                self.finish_item(id, ItemOutcome::Skip(SkipReason::SettingsDenied), None);
                return;
            }
            Admission::ExecOnly => true,
            Admission::Run => false,
        };

        for condition in item.conditions() {
            match condition.check(self.message.as_ref(), id) {
                ConditionVerdict::Pass => {}
                ConditionVerdict::Skip => {
                    self.finish_item(id, ItemOutcome::Skip(SkipReason::Condition), None);
                    return;
                }
                ConditionVerdict::Deny => {
                    self.finish_item(
                        id,
                        ItemOutcome::Miss(MissReason::ConditionDenied),
                        Some(Duration::ZERO),
                    );
                    return;
                }
            }
        }

        let Some((func, user_data)) = item.callback() else {
            // Non-virtual items always carry a callback; keep the run alive
            // if that ever breaks.
            self.finish_item(id, ItemOutcome::Miss(MissReason::NoMatch), None);
            return;
        };

        let since = Instant::now();
        let mut scope = Scope {
            run: &mut *self,
            item_id: id,
            suppressed,
            user_data,
            recorded: false,
        };
        let panicked = catch_unwind(AssertUnwindSafe(|| func.invoke(&mut scope))).is_err();
        let recorded = scope.recorded;

        if panicked {
            warn!(symbol = item.name(), item_id = id, "callback panicked; continuing run");
            self.events.retain(|_, event| event.item != id);
            self.finish_item(
                id,
                ItemOutcome::Miss(MissReason::Panic),
                Some(since.elapsed()),
            );
            return;
        }

        let outstanding = self.events.values().filter(|e| e.item == id).count();
        if outstanding > 0 {
            trace!(symbol = item.name(), item_id = id, outstanding, "item running async");
            self.states[id as usize] = RunState::Running {
                any_hit: recorded,
                since,
            };
            return;
        }

        let outcome = if recorded {
            ItemOutcome::Hit
        } else {
            ItemOutcome::Miss(MissReason::NoMatch)
        };
        self.finish_item(id, outcome, Some(since.elapsed()));
    }

    /// Transition an item into a terminal state and record its statistics.
    fn finish_item(&mut self, id: ItemId, outcome: ItemOutcome, elapsed: Option<Duration>) {
        if let RunState::Done(previous) = self.states[id as usize] {
            debug_assert!(
                false,
                "item {id} already terminal as {previous:?}, refusing {outcome:?}"
            );
            return;
        }
        let stats = self.core.items[id as usize].stats();
        match outcome {
            ItemOutcome::Hit => stats.record_hit(elapsed.unwrap_or_default()),
            ItemOutcome::Miss(_) => stats.record_miss(elapsed.unwrap_or_default()),
            ItemOutcome::Skip(_) => stats.record_skip(),
        }
        trace!(item_id = id, outcome = ?outcome, "item terminal");
        self.states[id as usize] = RunState::Done(outcome);
    }

    fn check_deadline(&mut self) {
        if self.deadline_fired {
            return;
        }
        let Some(deadline) = self.deadline else {
            return;
        };
        if Instant::now() < deadline {
            return;
        }
        self.deadline_fired = true;
        debug!(message_id = self.message.message_id(), "deadline reached");
        let plan = Arc::clone(&self.plan);
        for stage in Stage::RUN_ORDER {
            if stage == Stage::Idempotent {
                continue;
            }
            for &id in plan.stage_items(stage) {
                if matches!(self.states[id as usize], RunState::Pending) {
                    self.finish_item(id, ItemOutcome::Skip(SkipReason::Deadline), None);
                }
            }
        }
    }

    fn flush_cancelled(&mut self) {
        debug!(message_id = self.message.message_id(), "run cancelled");
        let plan = Arc::clone(&self.plan);
        for stage in Stage::RUN_ORDER {
            for &id in plan.stage_items(stage) {
                if !matches!(self.states[id as usize], RunState::Done(_)) {
                    self.finish_item(id, ItemOutcome::Skip(SkipReason::Cancelled), None);
                }
            }
        }
        self.events.clear();
        self.finished = true;
    }

    /// Record a result produced by `producer`, applying the named symbol's
    /// own admission and reporting filters.
    ///
    /// Returns whether the result counted as recorded for the producer's
    /// hit/miss determination (dropped results do not).
    fn apply_result(&mut self, producer: ItemId, producer_suppressed: bool, result: SymbolResult) -> bool {
        let named = self.core.by_name.get(&result.name).copied();
        let (denied, exec_only, ghost) = match named {
            Some(nid) => {
                let named_item = &self.core.items[nid as usize];
                let admission = admit(
                    &named_item.allowed_ids,
                    &named_item.forbidden_ids,
                    &named_item.exec_only_ids,
                    self.settings_id,
                );
                (
                    admission == Admission::Denied || !named_item.enabled(),
                    admission == Admission::ExecOnly,
                    named_item.is_ghost(),
                )
            }
            None => (false, false, false),
        };
        if denied {
            debug!(
                symbol = %result.name,
                producer,
                settings_id = self.settings_id,
                "dropping result denied by settings"
            );
            return false;
        }
        let suppressed = producer_suppressed || exec_only;
        if !suppressed {
            self.produced.insert(result.name.clone());
            if !ghost {
                self.results.push(result);
            }
        }
        true
    }

    fn apply_pre_result(&mut self, producer: ItemId, pre_result: PreResult) {
        if self.pre_result.is_some() {
            debug!(producer, "pre-result already set; keeping the first");
            return;
        }
        debug!(producer, action = %pre_result.action, "pre-result attached");
        self.pre_result = Some(pre_result);
    }

    fn allocate_event(&mut self, item: ItemId, suppressed: bool) -> EventToken {
        let token = self.next_token;
        self.next_token += 1;
        self.events.insert(token, PendingEvent { item, suppressed });
        token
    }
}

impl std::fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHandle")
            .field("message_id", &self.message.message_id())
            .field("stage", &Stage::RUN_ORDER[self.stage_idx.min(5)])
            .field("pending_events", &self.events.len())
            .field("finished", &self.finished)
            .field("cancelled", &self.cancelled)
            .finish_non_exhaustive()
    }
}

/// Callback-facing view of the run, alive for one invocation.
struct Scope<'r> {
    run: &'r mut RunHandle,
    item_id: ItemId,
    suppressed: bool,
    user_data: Option<UserData>,
    recorded: bool,
}

impl CallbackScope for Scope<'_> {
    fn message(&self) -> &dyn MessageView {
        self.run.message.as_ref()
    }

    fn item_id(&self) -> ItemId {
        self.item_id
    }

    fn user_data(&self) -> Option<&(dyn std::any::Any + Send + Sync)> {
        self.user_data.as_ref().map(|data| data.as_ref())
    }

    fn insert_result(&mut self, result: SymbolResult) {
        if self.run.apply_result(self.item_id, self.suppressed, result) {
            self.recorded = true;
        }
    }

    fn symbol_produced(&self, name: &str) -> bool {
        self.run.produced.contains(name)
    }

    fn set_pre_result(&mut self, pre_result: PreResult) {
        self.run.apply_pre_result(self.item_id, pre_result);
    }

    fn register_event(&mut self) -> EventToken {
        self.run.allocate_event(self.item_id, self.suppressed)
    }

    fn remove_event(&mut self, token: EventToken) -> bool {
        self.run.events.remove(&token).is_some()
    }
}
