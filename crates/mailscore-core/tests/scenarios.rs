//! # End-to-End Scenarios
//!
//! Whole-task behavior: scoring, exactly-once continuation under racing
//! completions, composite cycles, late insertions, timeouts and failures.

use mailscore_core::{
    Action, ChainState, Composite, Engine, Flow, Generation, GenerationBuilder, Message, Metric,
    NativeFilter, PendingFilter, ResumePolicy, Scheduler, SchedulerConfig, ScoreError, Task,
};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

type Parked = Arc<Mutex<Vec<PendingFilter>>>;

fn spf_metric(grow: f64) -> Metric {
    Metric::new("default")
        .with_symbol("R_SPF_FAIL", 1.0)
        .with_thresholds(5.0, 10.0)
        .with_grow_factor(grow, None)
}

/// Filter inserting `symbol` `times` times synchronously.
fn repeat_filter(symbol: &'static str, times: usize) -> Arc<NativeFilter> {
    Arc::new(NativeFilter::new(move |task| {
        for _ in 0..times {
            task.insert(symbol, 1.0, &[]);
        }
        Ok(Flow::Completed)
    }))
}

/// Filter that defers and parks its pending handle for the test to complete.
fn parking_filter(symbol: &'static str, parked: &Parked) -> Arc<NativeFilter> {
    let parked = Arc::clone(parked);
    Arc::new(NativeFilter::new(move |task| {
        parked
            .lock()
            .expect("lock")
            .push(task.defer(symbol));
        Ok(Flow::Deferred)
    }))
}

fn take(parked: &Parked) -> Vec<PendingFilter> {
    std::mem::take(&mut *parked.lock().expect("lock"))
}

// =============================================================================
// SCORING
// =============================================================================

#[test]
fn scenario_a_single_insertion() {
    let mut builder = GenerationBuilder::new();
    builder.metric(spf_metric(1.0));
    builder
        .register("R_SPF_FAIL", 1.0, repeat_filter("R_SPF_FAIL", 1))
        .expect("register");
    let task = Task::new(Arc::new(builder.build().expect("build")), Message::new("a"));

    assert_eq!(Scheduler::run(&task), ChainState::Finished);
    let report = task.report().expect("report");
    let verdict = report.verdict("default").expect("verdict");
    assert_eq!(verdict.score, 1.0);
    assert!(!verdict.flagged);
    assert_eq!(verdict.action, None);
}

#[test]
fn scenario_b_growth_flags_without_reject() {
    let mut builder = GenerationBuilder::new();
    builder.metric(spf_metric(2.0));
    builder
        .register("R_SPF_FAIL", 1.0, repeat_filter("R_SPF_FAIL", 3))
        .expect("register");
    let task = Task::new(Arc::new(builder.build().expect("build")), Message::new("b"));

    Scheduler::run(&task);
    let verdict = task
        .report()
        .and_then(|r| r.verdict("default").cloned())
        .expect("verdict");
    let entry = verdict.symbols.get("R_SPF_FAIL").expect("entry");
    assert_eq!(entry.count, 3);
    assert_eq!(verdict.score, 7.0);
    assert!(verdict.flagged);
    assert_eq!(verdict.action, None);
}

#[test]
fn reject_threshold_selects_action() {
    let mut builder = GenerationBuilder::new();
    builder.metric(spf_metric(2.0).with_action(Action::SoftReject));
    builder
        .register("R_SPF_FAIL", 1.0, repeat_filter("R_SPF_FAIL", 4))
        .expect("register");
    let task = Task::new(Arc::new(builder.build().expect("build")), Message::new("r"));

    Scheduler::run(&task);
    let verdict = task
        .report()
        .and_then(|r| r.verdict("default").cloned())
        .expect("verdict");
    // 1 + 2 + 4 + 8
    assert_eq!(verdict.score, 15.0);
    assert_eq!(verdict.action, Some(Action::SoftReject));
}

// =============================================================================
// CONTINUATION
// =============================================================================

fn racing_generation(parked: &Parked, resume: ResumePolicy) -> Arc<Generation> {
    let mut builder = GenerationBuilder::new();
    builder.scheduler(SchedulerConfig {
        resume,
        ..SchedulerConfig::default()
    });
    builder.metric(
        Metric::new("default")
            .with_symbol("ASYNC_ONE", 1.0)
            .with_symbol("ASYNC_TWO", 2.0)
            .with_symbol("BOTH", 10.0),
    );
    builder.composite(Composite::parse("BOTH", "ASYNC_ONE & ASYNC_TWO", Vec::new()).expect("parse"));
    builder
        .register("ASYNC_ONE", 1.0, parking_filter("ASYNC_ONE", parked))
        .expect("register");
    builder
        .register("ASYNC_TWO", 2.0, parking_filter("ASYNC_TWO", parked))
        .expect("register");
    Arc::new(builder.build().expect("build"))
}

#[test]
fn scenario_c_racing_completions_advance_once() {
    let parked: Parked = Arc::default();
    let generation = racing_generation(&parked, ResumePolicy::First);
    let task = Task::new(Arc::clone(&generation), Message::new("c"));

    assert_eq!(Scheduler::run(&task), ChainState::Suspended { outstanding: 2 });
    let pending = take(&parked);
    assert_eq!(pending.len(), 2);

    let barrier = Arc::new(Barrier::new(pending.len()));
    let handles: Vec<_> = pending
        .into_iter()
        .map(|pending| {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let symbol = pending.symbol().to_string();
                pending.task().insert(&symbol, 1.0, &[]);
                barrier.wait();
                pending.complete(Ok(()));
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("join");
    }

    assert!(task.continuation_claimed());
    assert_eq!(generation.composites().passes(), 1);
    assert_eq!(task.outstanding(), 0);
    assert!(task.report().is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn scenario_c_spawned_completions_advance_once() {
    let mut builder = GenerationBuilder::new();
    for (symbol, delay) in [("SLOW_ONE", 5u64), ("SLOW_TWO", 5u64)] {
        builder
            .register(
                symbol,
                1.0,
                Arc::new(NativeFilter::new(move |task| {
                    let timeout = task.generation().scheduler().timeout();
                    task.defer(symbol).spawn(
                        timeout,
                        async move {
                            tokio::time::sleep(Duration::from_millis(delay)).await;
                            Ok(())
                        },
                        move |task, ()| {
                            task.insert(symbol, 1.0, &[]);
                        },
                    )?;
                    Ok(Flow::Deferred)
                })),
            )
            .expect("register");
    }
    let engine = Engine::new(builder.build().expect("build"));
    let generation = engine.snapshot();

    let (task, state, receiver) = engine.start(Message::new("c2"));
    assert!(matches!(state, ChainState::Suspended { .. }));
    let report = receiver.await.expect("report");
    assert!(report.score("default").is_some_and(|s| s >= 1.0));

    for _ in 0..200 {
        if task.outstanding() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(task.outstanding(), 0);
    assert_eq!(generation.composites().passes(), 1);
}

#[test]
fn late_insertion_is_recorded_as_no_op() {
    let parked: Parked = Arc::default();
    let generation = racing_generation(&parked, ResumePolicy::First);
    let task = Task::new(generation, Message::new("late"));
    Scheduler::run(&task);
    let mut pending = take(&parked).into_iter();
    let first = pending.next().expect("first");
    let second = pending.next().expect("second");

    first.task().insert(first.symbol(), 1.0, &[]);
    first.complete(Ok(()));
    let report = task.report().expect("report");
    assert_eq!(report.score("default"), Some(1.0));

    let late = second.task().insert(second.symbol(), 1.0, &[]);
    assert_eq!(late.applied, 0);
    assert_eq!(late.finalized, 1);
    second.complete(Ok(()));

    assert_eq!(task.report(), Some(report));
    let results = task.results();
    assert!(!results.metric("default").expect("metric").contains("ASYNC_TWO"));
}

#[test]
fn all_policy_waits_for_every_completion() {
    let parked: Parked = Arc::default();
    let generation = racing_generation(&parked, ResumePolicy::All);
    let task = Task::new(generation, Message::new("all"));
    Scheduler::run(&task);

    for pending in take(&parked) {
        assert!(!task.is_finished());
        pending.task().insert(pending.symbol(), 1.0, &[]);
        pending.complete(Ok(()));
    }

    let report = task.report().expect("report");
    let verdict = report.verdict("default").expect("verdict");
    assert!(verdict.symbols.contains_key("BOTH"));
    assert_eq!(verdict.score, 13.0);
}

// =============================================================================
// COMPOSITE CYCLES
// =============================================================================

#[test]
fn scenario_d_cyclic_composites_are_skipped() {
    let mut builder = GenerationBuilder::new();
    builder.metric(
        Metric::new("default")
            .with_symbol("X", 1.0)
            .with_symbol("C1", 5.0)
            .with_symbol("C2", 5.0),
    );
    builder.composite(Composite::parse("C1", "C2 | X", Vec::new()).expect("parse"));
    builder.composite(Composite::parse("C2", "C1 & X", Vec::new()).expect("parse"));
    builder.register("X", 1.0, repeat_filter("X", 1)).expect("register");
    let generation = Arc::new(builder.build().expect("build"));
    assert_eq!(generation.composites().cycles().len(), 1);

    let task = Task::new(Arc::clone(&generation), Message::new("d"));
    assert_eq!(Scheduler::run(&task), ChainState::Finished);

    let verdict = task
        .report()
        .and_then(|r| r.verdict("default").cloned())
        .expect("verdict");
    assert!(!verdict.symbols.contains_key("C1"));
    assert!(!verdict.symbols.contains_key("C2"));
    assert_eq!(verdict.score, 1.0);
    assert_eq!(generation.composites().passes(), 1);
}

// =============================================================================
// FAILURES AND TIMEOUTS
// =============================================================================

#[tokio::test]
async fn timed_out_lookup_still_completes_task() {
    let mut builder = GenerationBuilder::new();
    builder.scheduler(SchedulerConfig {
        timeout_ms: 20,
        ..SchedulerConfig::default()
    });
    builder
        .register(
            "NEVER",
            1.0,
            Arc::new(NativeFilter::new(|task| {
                let timeout = task.generation().scheduler().timeout();
                task.defer("NEVER").spawn(
                    timeout,
                    std::future::pending::<Result<(), ScoreError>>(),
                    |task, ()| {
                        task.insert("NEVER", 1.0, &[]);
                    },
                )?;
                Ok(Flow::Deferred)
            })),
        )
        .expect("register");
    let engine = Engine::new(builder.build().expect("build"));

    let report = engine.scan(Message::new("t")).await;
    assert_eq!(report.score("default"), Some(0.0));
}

#[test]
fn spawn_without_runtime_is_contained() {
    let mut builder = GenerationBuilder::new();
    builder
        .register(
            "NEEDS_RUNTIME",
            1.0,
            Arc::new(NativeFilter::new(|task| {
                task.defer("NEEDS_RUNTIME").spawn(
                    Duration::from_millis(10),
                    async { Ok(()) },
                    |_, ()| {},
                )?;
                Ok(Flow::Deferred)
            })),
        )
        .expect("register");
    builder
        .register("AFTER", 2.0, repeat_filter("AFTER", 1))
        .expect("register");
    let task = Task::new(Arc::new(builder.build().expect("build")), Message::new("n"));

    assert_eq!(Scheduler::run(&task), ChainState::Finished);
    assert_eq!(task.report().and_then(|r| r.score("default")), Some(2.0));
}

#[test]
fn total_filter_failure_yields_empty_result() {
    let mut builder = GenerationBuilder::new();
    for symbol in ["BAD_ONE", "BAD_TWO"] {
        builder
            .register(
                symbol,
                1.0,
                Arc::new(NativeFilter::new(move |_| {
                    Err(ScoreError::FilterFailure {
                        symbol: symbol.to_string(),
                        reason: "unavailable".to_string(),
                    })
                })),
            )
            .expect("register");
    }
    let task = Task::new(Arc::new(builder.build().expect("build")), Message::new("f"));

    assert_eq!(Scheduler::run(&task), ChainState::Finished);
    let report = task.report().expect("report");
    let verdict = report.verdict("default").expect("verdict");
    assert_eq!(verdict.score, 0.0);
    assert!(verdict.symbols.is_empty());
}

#[test]
fn dropped_pending_handle_does_not_stall() {
    let parked: Parked = Arc::default();
    let generation = racing_generation(&parked, ResumePolicy::All);
    let task = Task::new(generation, Message::new("drop"));
    Scheduler::run(&task);

    drop(take(&parked));
    assert!(task.is_finished());
    assert_eq!(task.report().and_then(|r| r.score("default")), Some(0.0));
}
