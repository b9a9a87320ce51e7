//! Cross-component tests for the symbol cache.
//!
//! These exercise interactions between registration, resolution, planning,
//! and scheduling; individual components have inline `#[cfg(test)]`
//! modules. The focus is on:
//!
//! 1. Priority/dependency interplay in dispatch order
//! 2. Stage partition enforcement and cycle recovery
//! 3. Virtual alias gating of dependents
//! 4. Setting-id admission (allow / forbid / exec-only)
//! 5. Async events, deadlines, cancellation, and panics mid-run
//! 6. Snapshot persistence seeding a warm start

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use proptest::prelude::*;

use sievecache::prelude::*;
use sievecache::{EventToken, ItemId, NoOpCallback, SharedCallback, SymbolResult};

// ═══════════════════════════════════════════════════════════════════════════
// Test helpers
// ═══════════════════════════════════════════════════════════════════════════

struct TestMessage {
    id: String,
    empty: bool,
}

impl TestMessage {
    fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            empty: false,
        })
    }

    fn empty(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            empty: true,
        })
    }
}

impl MessageView for TestMessage {
    fn message_id(&self) -> &str {
        &self.id
    }

    fn is_empty(&self) -> bool {
        self.empty
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Callback that logs its invocation and records its own symbol.
fn hit_callback(name: &str, log: &Arc<Mutex<Vec<String>>>) -> SharedCallback {
    let name = name.to_owned();
    let log = Arc::clone(log);
    Arc::new(move |scope: &mut dyn CallbackScope| {
        log.lock().unwrap().push(name.clone());
        scope.insert_result(SymbolResult::new(name.clone(), 1.0));
    })
}

fn register_filter(
    registry: &mut SymbolRegistry,
    name: &str,
    priority: i32,
    func: SharedCallback,
) {
    registry
        .register_callback(
            name,
            SymbolKind::Filter,
            SymbolFlags::empty(),
            priority,
            func,
            None,
        )
        .unwrap();
}

// ═══════════════════════════════════════════════════════════════════════════
// Ordering and stages
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn dependency_and_priority_define_dispatch_order() {
    init_logging();
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut registry = SymbolRegistry::new();
    register_filter(&mut registry, "A", 10, hit_callback("A", &log));
    register_filter(&mut registry, "B", 0, hit_callback("B", &log));
    registry.add_dependency("B", "A");

    let cache = registry.finalize(CacheConfig::default()).unwrap();
    assert_eq!(cache.item_by_name("A").unwrap().order(), 0);
    assert_eq!(cache.item_by_name("B").unwrap().order(), 1);

    let mut run = cache.schedule(TestMessage::new("m1"), None, None);
    assert_eq!(run.poll(), RunStatus::Done);
    assert_eq!(*log.lock().unwrap(), vec!["A".to_owned(), "B".to_owned()]);

    let results = run.results().unwrap();
    let names: Vec<_> = results.symbols.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["A", "B"]);
}

#[test]
fn cross_stage_dependency_fails_finalize() {
    let mut registry = SymbolRegistry::new();
    registry
        .register_callback(
            "A",
            SymbolKind::PreFilter,
            SymbolFlags::empty(),
            0,
            Arc::new(NoOpCallback),
            None,
        )
        .unwrap();
    register_filter(&mut registry, "B", 0, Arc::new(NoOpCallback));
    registry.add_dependency("A", "B");

    let err = registry.finalize(CacheConfig::default()).unwrap_err();
    match err {
        CacheError::CrossStageEdge { from, to, .. } => {
            assert_eq!(from, "A");
            assert_eq!(to, "B");
        }
        other => panic!("expected CrossStageEdge, got {other:?}"),
    }
}

#[test]
fn cycle_is_broken_by_disabling_the_weakest_member() {
    init_logging();
    let mut registry = SymbolRegistry::new();
    register_filter(&mut registry, "A", 0, Arc::new(NoOpCallback));
    register_filter(&mut registry, "B", 0, Arc::new(NoOpCallback));
    register_filter(&mut registry, "C", 0, Arc::new(NoOpCallback));
    registry.add_dependency("A", "B");
    registry.add_dependency("B", "C");
    registry.add_dependency("C", "A");

    let cache = registry.finalize(CacheConfig::default()).unwrap();
    assert_eq!(cache.diagnostics().len(), 1);
    assert!(matches!(
        &cache.diagnostics()[0],
        CacheError::DependencyCycle { disabled, .. } if disabled == "C"
    ));
    assert!(!cache.item_by_name("C").unwrap().enabled());
    assert!(cache.item_by_name("A").unwrap().enabled());
    assert!(cache.item_by_name("B").unwrap().enabled());

    // The disabled member never runs; the survivors complete normally.
    let mut run = cache.schedule(TestMessage::new("m1"), None, None);
    assert_eq!(run.poll(), RunStatus::Done);
    assert_eq!(
        run.outcome(cache.item_by_name("C").unwrap().id()),
        Some(ItemOutcome::Skip(SkipReason::Disabled))
    );
}

// ═══════════════════════════════════════════════════════════════════════════
// Virtual aliases
// ═══════════════════════════════════════════════════════════════════════════

fn alias_cache(parent_produces_alias: bool, log: &Arc<Mutex<Vec<String>>>) -> SymbolCache {
    let mut registry = SymbolRegistry::new();
    let parent: SharedCallback = Arc::new(move |scope: &mut dyn CallbackScope| {
        scope.insert_result(SymbolResult::new("P", 1.0));
        if parent_produces_alias {
            scope.insert_result(SymbolResult::new("V", 0.5));
        }
    });
    register_filter(&mut registry, "P", 0, parent);
    registry
        .register_virtual("V", "P", SymbolKind::Virtual, SymbolFlags::empty())
        .unwrap();
    register_filter(&mut registry, "D", 0, hit_callback("D", log));
    registry.add_dependency("D", "V");
    registry.finalize(CacheConfig::default()).unwrap()
}

#[test]
fn alias_dependency_cascades_when_alias_not_produced() {
    init_logging();
    let log = Arc::new(Mutex::new(Vec::new()));
    let cache = alias_cache(false, &log);
    let mut run = cache.schedule(TestMessage::new("m1"), None, None);
    assert_eq!(run.poll(), RunStatus::Done);

    let d = cache.item_by_name("D").unwrap().id();
    assert_eq!(run.outcome(d), Some(ItemOutcome::Skip(SkipReason::Dependency)));
    assert!(log.lock().unwrap().is_empty());

    let v = cache.item_by_name("V").unwrap().id();
    assert_eq!(run.outcome(v), Some(ItemOutcome::Miss(MissReason::NoMatch)));
}

#[test]
fn alias_dependency_runs_when_alias_produced() {
    init_logging();
    let log = Arc::new(Mutex::new(Vec::new()));
    let cache = alias_cache(true, &log);
    let mut run = cache.schedule(TestMessage::new("m1"), None, None);
    assert_eq!(run.poll(), RunStatus::Done);

    let d = cache.item_by_name("D").unwrap().id();
    assert_eq!(run.outcome(d), Some(ItemOutcome::Hit));
    assert_eq!(*log.lock().unwrap(), vec!["D".to_owned()]);

    let v = cache.item_by_name("V").unwrap().id();
    assert_eq!(run.outcome(v), Some(ItemOutcome::Hit));
    let results = run.results().unwrap();
    assert!(results.symbols.iter().any(|s| s.name == "V"));
}

#[test]
fn composite_evaluates_over_computed_children() {
    init_logging();
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut registry = SymbolRegistry::new();
    register_filter(&mut registry, "SPF_FAIL", 0, hit_callback("SPF_FAIL", &log));
    register_filter(&mut registry, "DKIM_FAIL", 0, Arc::new(NoOpCallback));
    registry
        .register_callback(
            "AUTH_BROKEN",
            SymbolKind::Composite,
            SymbolFlags::empty(),
            0,
            Arc::new(|scope: &mut dyn CallbackScope| {
                // SPF_FAIL && !DKIM_FAIL
                if scope.symbol_produced("SPF_FAIL") && !scope.symbol_produced("DKIM_FAIL") {
                    scope.insert_result(SymbolResult::new("AUTH_BROKEN", 2.0));
                }
            }),
            None,
        )
        .unwrap();
    registry.add_dependency("AUTH_BROKEN", "SPF_FAIL");
    registry.add_dependency("AUTH_BROKEN", "DKIM_FAIL");

    let cache = registry.finalize(CacheConfig::default()).unwrap();
    let mut run = cache.schedule(TestMessage::new("m1"), None, None);
    assert_eq!(run.poll(), RunStatus::Done);

    let composite = cache.item_by_name("AUTH_BROKEN").unwrap();
    assert_eq!(composite.kind(), SymbolKind::Composite);
    assert_eq!(composite.stage(), Stage::Filter);
    assert_eq!(run.outcome(composite.id()), Some(ItemOutcome::Hit));
    assert!(
        run.results()
            .unwrap()
            .symbols
            .iter()
            .any(|s| s.name == "AUTH_BROKEN")
    );
}

// ═══════════════════════════════════════════════════════════════════════════
// Setting-id admission
// ═══════════════════════════════════════════════════════════════════════════

fn admission_cache(exec_only_seven: bool, invocations: &Arc<AtomicUsize>) -> SymbolCache {
    let mut registry = SymbolRegistry::new();
    let counter = Arc::clone(invocations);
    let callback: SharedCallback = Arc::new(move |scope: &mut dyn CallbackScope| {
        counter.fetch_add(1, Ordering::SeqCst);
        scope.insert_result(SymbolResult::new("X", 3.0));
    });
    register_filter(&mut registry, "X", 0, callback);
    registry.set_allowed_ids("X", IdList::from_ids([7])).unwrap();
    registry.set_forbidden_ids("X", IdList::from_ids([9])).unwrap();
    if exec_only_seven {
        registry.set_exec_only_ids("X", IdList::from_ids([7])).unwrap();
    }
    registry.finalize(CacheConfig::default()).unwrap()
}

#[test]
fn settings_id_gates_execution() {
    init_logging();
    let invocations = Arc::new(AtomicUsize::new(0));
    let cache = admission_cache(false, &invocations);
    let x = cache.item_by_name("X").unwrap().id();

    let mut run = cache.schedule(TestMessage::new("m5"), Some(5), None);
    run.poll();
    assert_eq!(run.outcome(x), Some(ItemOutcome::Skip(SkipReason::SettingsDenied)));

    let mut run = cache.schedule(TestMessage::new("m7"), Some(7), None);
    run.poll();
    assert_eq!(run.outcome(x), Some(ItemOutcome::Hit));
    assert!(run.results().unwrap().symbols.iter().any(|s| s.name == "X"));

    let mut run = cache.schedule(TestMessage::new("m9"), Some(9), None);
    run.poll();
    assert_eq!(run.outcome(x), Some(ItemOutcome::Skip(SkipReason::SettingsDenied)));

    assert_eq!(invocations.load(Ordering::SeqCst), 1);
}

#[test]
fn exec_only_runs_once_and_suppresses_the_symbol() {
    init_logging();
    let invocations = Arc::new(AtomicUsize::new(0));
    let cache = admission_cache(true, &invocations);
    let x = cache.item_by_name("X").unwrap().id();

    let mut run = cache.schedule(TestMessage::new("m7"), Some(7), None);
    assert_eq!(run.poll(), RunStatus::Done);

    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    assert_eq!(run.outcome(x), Some(ItemOutcome::Hit));
    assert!(run.results().unwrap().symbols.is_empty());

    let stats = cache.item_by_name("X").unwrap().stats();
    assert_eq!(stats.hits(), 1);
}

// ═══════════════════════════════════════════════════════════════════════════
// Conditions
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn condition_verdicts_map_to_outcomes() {
    init_logging();
    let invocations = Arc::new(AtomicUsize::new(0));
    let mut registry = SymbolRegistry::new();

    let counter = Arc::clone(&invocations);
    let callback: SharedCallback = Arc::new(move |scope: &mut dyn CallbackScope| {
        counter.fetch_add(1, Ordering::SeqCst);
        scope.insert_result(SymbolResult::new("DENIED", 1.0));
    });
    register_filter(&mut registry, "DENIED", 0, callback);
    registry
        .set_condition(
            "DENIED",
            Arc::new(|_: &dyn MessageView, _: ItemId| ConditionVerdict::Deny),
        )
        .unwrap();

    register_filter(&mut registry, "SKIPPED", 0, Arc::new(NoOpCallback));
    registry
        .set_condition(
            "SKIPPED",
            Arc::new(|_: &dyn MessageView, _: ItemId| ConditionVerdict::Skip),
        )
        .unwrap();

    let cache = registry.finalize(CacheConfig::default()).unwrap();
    let mut run = cache.schedule(TestMessage::new("m1"), None, None);
    assert_eq!(run.poll(), RunStatus::Done);

    let denied = cache.item_by_name("DENIED").unwrap();
    assert_eq!(
        run.outcome(denied.id()),
        Some(ItemOutcome::Miss(MissReason::ConditionDenied))
    );
    // Deny counts as evaluated but the callback never runs.
    assert_eq!(invocations.load(Ordering::SeqCst), 0);
    assert_eq!(denied.stats().misses(), 1);

    let skipped = cache.item_by_name("SKIPPED").unwrap();
    assert_eq!(
        run.outcome(skipped.id()),
        Some(ItemOutcome::Skip(SkipReason::Condition))
    );
    assert_eq!(skipped.stats().skips(), 1);
}

// ═══════════════════════════════════════════════════════════════════════════
// Async events
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn async_dependents_wait_for_event_completion() {
    init_logging();
    let log = Arc::new(Mutex::new(Vec::new()));
    let token_slot: Arc<Mutex<Option<EventToken>>> = Arc::new(Mutex::new(None));

    let mut registry = SymbolRegistry::new();
    let slot = Arc::clone(&token_slot);
    let y_log = Arc::clone(&log);
    let y: SharedCallback = Arc::new(move |scope: &mut dyn CallbackScope| {
        y_log.lock().unwrap().push("Y".into());
        *slot.lock().unwrap() = Some(scope.register_event());
    });
    register_filter(&mut registry, "Y", 0, y);
    register_filter(&mut registry, "Z", 0, hit_callback("Z", &log));
    registry.add_dependency("Z", "Y");

    let cache = registry.finalize(CacheConfig::default()).unwrap();
    let mut run = cache.schedule(TestMessage::new("m1"), None, None);

    // Three turns with the event outstanding: Y runs, Z must not start.
    for _ in 0..3 {
        assert_eq!(run.poll(), RunStatus::Running);
        assert_eq!(*log.lock().unwrap(), vec!["Y".to_owned()]);
    }
    assert_eq!(run.pending_events(), 1);

    // Completion re-enters the dispatcher; Z starts on the next turn.
    let token = token_slot.lock().unwrap().take().unwrap();
    let status = run.complete_event(
        token,
        EventOutcome::Hit(SymbolResult::new("Y", 4.2)),
    );
    assert_eq!(status, RunStatus::Done);
    assert_eq!(*log.lock().unwrap(), vec!["Y".to_owned(), "Z".to_owned()]);

    let y_id = cache.item_by_name("Y").unwrap().id();
    assert_eq!(run.outcome(y_id), Some(ItemOutcome::Hit));
}

#[test]
fn event_completing_without_hit_marks_a_miss() {
    init_logging();
    let token_slot: Arc<Mutex<Option<EventToken>>> = Arc::new(Mutex::new(None));
    let mut registry = SymbolRegistry::new();
    let slot = Arc::clone(&token_slot);
    register_filter(
        &mut registry,
        "LOOKUP",
        0,
        Arc::new(move |scope: &mut dyn CallbackScope| {
            *slot.lock().unwrap() = Some(scope.register_event());
        }),
    );
    let cache = registry.finalize(CacheConfig::default()).unwrap();
    let mut run = cache.schedule(TestMessage::new("m1"), None, None);
    assert_eq!(run.poll(), RunStatus::Running);

    let token = token_slot.lock().unwrap().take().unwrap();
    assert_eq!(run.complete_event(token, EventOutcome::NoHit), RunStatus::Done);
    let id = cache.item_by_name("LOOKUP").unwrap().id();
    assert_eq!(run.outcome(id), Some(ItemOutcome::Miss(MissReason::NoMatch)));
}

#[test]
fn cancellation_flushes_pending_events() {
    init_logging();
    let token_slot: Arc<Mutex<Option<EventToken>>> = Arc::new(Mutex::new(None));
    let mut registry = SymbolRegistry::new();
    let slot = Arc::clone(&token_slot);
    register_filter(
        &mut registry,
        "SLOW",
        0,
        Arc::new(move |scope: &mut dyn CallbackScope| {
            *slot.lock().unwrap() = Some(scope.register_event());
        }),
    );
    register_filter(&mut registry, "AFTER", 0, Arc::new(NoOpCallback));
    registry.add_dependency("AFTER", "SLOW");

    let cache = registry.finalize(CacheConfig::default()).unwrap();
    let mut run = cache.schedule(TestMessage::new("m1"), None, None);
    assert_eq!(run.poll(), RunStatus::Running);

    run.cancel();
    assert!(run.is_done());
    assert_eq!(run.pending_events(), 0);

    let slow = cache.item_by_name("SLOW").unwrap().id();
    let after = cache.item_by_name("AFTER").unwrap().id();
    assert_eq!(run.outcome(slow), Some(ItemOutcome::Skip(SkipReason::Cancelled)));
    assert_eq!(run.outcome(after), Some(ItemOutcome::Skip(SkipReason::Cancelled)));

    // A straggling completion after cancellation is a no-op.
    let token = token_slot.lock().unwrap().take().unwrap();
    let status = run.complete_event(token, EventOutcome::Hit(SymbolResult::new("SLOW", 1.0)));
    assert_eq!(status, RunStatus::Done);
    assert_eq!(run.outcome(slow), Some(ItemOutcome::Skip(SkipReason::Cancelled)));
    assert!(run.results().unwrap().cancelled);
}

// ═══════════════════════════════════════════════════════════════════════════
// Deadlines, passthrough, ghosts, panics
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn deadline_skips_everything_but_idempotent() {
    init_logging();
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut registry = SymbolRegistry::new();
    register_filter(&mut registry, "FILTERED", 0, hit_callback("FILTERED", &log));
    let idempotent_log = Arc::clone(&log);
    registry
        .register_callback(
            "HISTORY",
            SymbolKind::Idempotent,
            SymbolFlags::empty(),
            0,
            Arc::new(move |_: &mut dyn CallbackScope| {
                idempotent_log.lock().unwrap().push("HISTORY".into());
            }),
            None,
        )
        .unwrap();

    let cache = registry.finalize(CacheConfig::default()).unwrap();
    let mut run = cache.schedule(TestMessage::new("m1"), None, Some(Duration::ZERO));
    assert_eq!(run.poll(), RunStatus::Done);

    let filtered = cache.item_by_name("FILTERED").unwrap().id();
    assert_eq!(run.outcome(filtered), Some(ItemOutcome::Skip(SkipReason::Deadline)));
    let history = cache.item_by_name("HISTORY").unwrap().id();
    assert_eq!(
        run.outcome(history),
        Some(ItemOutcome::Miss(MissReason::NoMatch))
    );
    assert_eq!(*log.lock().unwrap(), vec!["HISTORY".to_owned()]);
    assert!(run.results().unwrap().deadline_reached);
}

#[test]
fn pre_result_short_circuits_filters() {
    init_logging();
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut registry = SymbolRegistry::new();
    registry
        .register_callback(
            "EARLY_REJECT",
            SymbolKind::PreFilter,
            SymbolFlags::empty(),
            0,
            Arc::new(|scope: &mut dyn CallbackScope| {
                scope.set_pre_result(PreResult::new("reject"));
            }),
            None,
        )
        .unwrap();
    register_filter(&mut registry, "NORMAL", 0, hit_callback("NORMAL", &log));
    registry
        .register_callback(
            "STUBBORN",
            SymbolKind::Filter,
            SymbolFlags::IGNORE_PASSTHROUGH,
            0,
            hit_callback("STUBBORN", &log),
            None,
        )
        .unwrap();
    registry
        .register_callback(
            "POST",
            SymbolKind::PostFilter,
            SymbolFlags::empty(),
            0,
            hit_callback("POST", &log),
            None,
        )
        .unwrap();

    let cache = registry.finalize(CacheConfig::default()).unwrap();
    let mut run = cache.schedule(TestMessage::new("m1"), None, None);
    assert_eq!(run.poll(), RunStatus::Done);

    let normal = cache.item_by_name("NORMAL").unwrap().id();
    assert_eq!(run.outcome(normal), Some(ItemOutcome::Skip(SkipReason::Passthrough)));
    let invoked = log.lock().unwrap().clone();
    assert!(invoked.contains(&"STUBBORN".to_owned()));
    assert!(invoked.contains(&"POST".to_owned()));
    assert_eq!(
        run.results().unwrap().pre_result,
        Some(PreResult::new("reject"))
    );
}

#[test]
fn ghost_symbols_run_but_never_report() {
    init_logging();
    let mut registry = SymbolRegistry::new();
    registry
        .register_callback(
            "SHADOW",
            SymbolKind::Filter,
            SymbolFlags::GHOST,
            0,
            Arc::new(|scope: &mut dyn CallbackScope| {
                scope.insert_result(SymbolResult::new("SHADOW", 1.0));
            }),
            None,
        )
        .unwrap();
    let cache = registry.finalize(CacheConfig::default()).unwrap();
    let mut run = cache.schedule(TestMessage::new("m1"), None, None);
    run.poll();

    let shadow = cache.item_by_name("SHADOW").unwrap();
    assert_eq!(run.outcome(shadow.id()), Some(ItemOutcome::Hit));
    assert_eq!(shadow.stats().hits(), 1);
    assert!(run.results().unwrap().symbols.is_empty());
}

#[test]
fn panicking_callback_cascades_to_dependents_and_run_continues() {
    init_logging();
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut registry = SymbolRegistry::new();
    register_filter(
        &mut registry,
        "FAULTY",
        0,
        Arc::new(|_: &mut dyn CallbackScope| panic!("callback bug")),
    );
    register_filter(&mut registry, "DEPENDENT", 0, hit_callback("DEPENDENT", &log));
    register_filter(&mut registry, "BYSTANDER", 0, hit_callback("BYSTANDER", &log));
    registry.add_dependency("DEPENDENT", "FAULTY");

    let cache = registry.finalize(CacheConfig::default()).unwrap();
    let mut run = cache.schedule(TestMessage::new("m1"), None, None);
    assert_eq!(run.poll(), RunStatus::Done);

    let faulty = cache.item_by_name("FAULTY").unwrap().id();
    assert_eq!(run.outcome(faulty), Some(ItemOutcome::Miss(MissReason::Panic)));
    let dependent = cache.item_by_name("DEPENDENT").unwrap().id();
    assert_eq!(
        run.outcome(dependent),
        Some(ItemOutcome::Skip(SkipReason::Dependency))
    );
    assert_eq!(*log.lock().unwrap(), vec!["BYSTANDER".to_owned()]);
}

#[test]
fn empty_messages_only_run_opted_in_symbols() {
    init_logging();
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut registry = SymbolRegistry::new();
    register_filter(&mut registry, "BODY_RULE", 0, hit_callback("BODY_RULE", &log));
    registry
        .register_callback(
            "HEADER_RULE",
            SymbolKind::Filter,
            SymbolFlags::EMPTY,
            0,
            hit_callback("HEADER_RULE", &log),
            None,
        )
        .unwrap();

    let cache = registry.finalize(CacheConfig::default()).unwrap();
    let mut run = cache.schedule(TestMessage::empty("m1"), None, None);
    run.poll();

    let body = cache.item_by_name("BODY_RULE").unwrap().id();
    assert_eq!(
        run.outcome(body),
        Some(ItemOutcome::Skip(SkipReason::EmptyMessage))
    );
    assert_eq!(*log.lock().unwrap(), vec!["HEADER_RULE".to_owned()]);
}

// ═══════════════════════════════════════════════════════════════════════════
// Stats and snapshots
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn outcome_counters_balance_per_run() {
    init_logging();
    let mut registry = SymbolRegistry::new();
    register_filter(&mut registry, "HITTER", 0, {
        Arc::new(|scope: &mut dyn CallbackScope| {
            scope.insert_result(SymbolResult::new("HITTER", 1.0));
        })
    });
    register_filter(&mut registry, "MISSER", 0, Arc::new(NoOpCallback));
    register_filter(&mut registry, "GATED", 0, Arc::new(NoOpCallback));
    registry.set_forbidden_ids("GATED", IdList::from_ids([3])).unwrap();

    let cache = registry.finalize(CacheConfig::default()).unwrap();
    let mut run = cache.schedule(TestMessage::new("m1"), Some(3), None);
    assert_eq!(run.poll(), RunStatus::Done);

    for (name, hits, misses, skips) in
        [("HITTER", 1, 0, 0), ("MISSER", 0, 1, 0), ("GATED", 0, 0, 1)]
    {
        let stats = cache.item_by_name(name).unwrap().stats();
        assert_eq!(stats.hits(), hits, "{name} hits");
        assert_eq!(stats.misses(), misses, "{name} misses");
        assert_eq!(stats.skips(), skips, "{name} skips");
        assert_eq!(stats.evaluations(), hits + misses + skips);
    }
}

#[test]
fn terminal_outcomes_never_change_on_further_polls() {
    init_logging();
    let mut registry = SymbolRegistry::new();
    register_filter(&mut registry, "ONCE", 0, {
        Arc::new(|scope: &mut dyn CallbackScope| {
            scope.insert_result(SymbolResult::new("ONCE", 1.0));
        })
    });
    let cache = registry.finalize(CacheConfig::default()).unwrap();
    let mut run = cache.schedule(TestMessage::new("m1"), None, None);
    run.poll();
    let id = cache.item_by_name("ONCE").unwrap().id();
    let first = run.outcome(id);
    for _ in 0..3 {
        assert_eq!(run.poll(), RunStatus::Done);
        assert_eq!(run.outcome(id), first);
    }
    assert_eq!(cache.item_by_name("ONCE").unwrap().stats().evaluations(), 1);
}

#[test]
fn snapshot_seeds_a_warm_start() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stats.svcs");
    let config = CacheConfig::default()
        .with_tick_interval_ms(1_000)
        .with_snapshot_path(&path);

    let build = |config: CacheConfig| {
        let mut registry = SymbolRegistry::new();
        // COLD registers first so only the seeded frequency can outrank it.
        register_filter(&mut registry, "COLD", 0, Arc::new(NoOpCallback));
        register_filter(&mut registry, "WARM", 0, {
            Arc::new(|scope: &mut dyn CallbackScope| {
                scope.insert_result(SymbolResult::new("WARM", 1.0));
            })
        });
        registry.finalize(config).unwrap()
    };

    let cache = build(config.clone());
    for i in 0..5 {
        let mut run = cache.schedule(TestMessage::new(&format!("m{i}")), None, None);
        run.poll();
    }
    let report = cache.maintenance_tick();
    assert_eq!(report.peaks, 0);
    let saved_frequency = cache.item_by_name("WARM").unwrap().stats().frequency();
    assert!(saved_frequency > 0.0);
    cache.save_snapshot().unwrap();

    // A fresh cache over the same configuration seeds bit-for-bit.
    let warm = build(config);
    let seeded = warm.item_by_name("WARM").unwrap().stats();
    assert_eq!(seeded.frequency().to_bits(), saved_frequency.to_bits());
    assert_eq!(seeded.hits(), 5);
    // The hot symbol outranks its cold peer despite equal priority and
    // an earlier-registered rival.
    assert!(
        warm.item_by_name("WARM").unwrap().order()
            < warm.item_by_name("COLD").unwrap().order()
    );
}

#[test]
fn frequency_peak_triggers_reordering() {
    init_logging();
    let mut registry = SymbolRegistry::new();
    register_filter(&mut registry, "STEADY", 0, Arc::new(NoOpCallback));
    register_filter(&mut registry, "BURSTY", 0, Arc::new(NoOpCallback));
    let cache = registry
        .finalize(
            CacheConfig {
                peak_time_floor_secs: 0,
                ..CacheConfig::default()
            }
            .with_tick_interval_ms(1_000),
        )
        .unwrap();
    let epoch_before = cache.plan_epoch();

    let bursty = cache.item_by_name("BURSTY").unwrap().stats();
    bursty.record_hit(Duration::ZERO);
    cache.maintenance_tick();
    for _ in 0..100 {
        bursty.record_hit(Duration::ZERO);
    }
    let report = cache.maintenance_tick();
    assert!(report.peaks >= 1);
    assert!(report.reordered);
    assert!(cache.plan_epoch() > epoch_before);
    assert_eq!(bursty.peaks(), 1);
}

// ═══════════════════════════════════════════════════════════════════════════
// Ordering properties
// ═══════════════════════════════════════════════════════════════════════════

proptest! {
    /// After finalize, every surviving dependency edge respects
    /// `order(target) < order(dependent)` within one stage, whatever the
    /// declared priorities and edges (cycles included).
    #[test]
    fn ordering_invariant_over_random_graphs(
        priorities in proptest::collection::vec(-10i32..10, 2..10),
        raw_edges in proptest::collection::vec((0usize..16, 0usize..16), 0..24),
    ) {
        let n = priorities.len();
        let mut registry = SymbolRegistry::new();
        for (i, &priority) in priorities.iter().enumerate() {
            registry
                .register_callback(
                    &format!("S{i}"),
                    SymbolKind::Filter,
                    SymbolFlags::empty(),
                    priority,
                    Arc::new(NoOpCallback),
                    None,
                )
                .unwrap();
        }
        for &(a, b) in &raw_edges {
            let (a, b) = (a % n, b % n);
            if a != b {
                registry.add_dependency(&format!("S{a}"), &format!("S{b}"));
            }
        }

        let cache = registry.finalize(CacheConfig::default()).unwrap();
        for item in cache.iter() {
            if !item.enabled() {
                continue;
            }
            for edge in item.deps() {
                let target = cache.item(edge.target).unwrap();
                if target.enabled() {
                    prop_assert!(
                        target.order() < item.order(),
                        "{} (order {}) must precede {} (order {})",
                        target.name(), target.order(), item.name(), item.order()
                    );
                    prop_assert_eq!(target.stage(), item.stage());
                }
            }
        }
    }
}
