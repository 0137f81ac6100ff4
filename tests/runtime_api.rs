//! Runtime entry points, fairness, tracing, Ref, and the blocking driver.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;
use weft::{
    BlockingScheduler, Effect, LabScheduler, Outcome, Ref, RunResult, Runtime, RuntimeFailure,
    TraceEventKind,
};

fn setup() -> (LabScheduler, Rc<Runtime>) {
    let sched = LabScheduler::new();
    let runtime = Runtime::new(Rc::new(sched.clone()));
    (sched, runtime)
}

#[test]
fn run_sync_completes_pure_chains_inline() {
    let (_sched, runtime) = setup();
    let effect: Effect<u32, String> = Effect::pure(1).map(|n| n + 1).flat_map(Effect::pure);
    match runtime.run_sync(effect) {
        RunResult::Completed(outcome) => assert_eq!(outcome, Outcome::Succeeded(2)),
        RunResult::Pending(_) => panic!("pure chain must not suspend"),
    }
}

#[test]
fn run_sync_returns_handle_across_suspension() {
    let (sched, runtime) = setup();
    let effect: Effect<u32, String> = Effect::sleep(Duration::from_millis(1)).map(|()| 3);
    let handle = match runtime.run_sync(effect) {
        RunResult::Completed(_) => panic!("sleep must suspend"),
        RunResult::Pending(handle) => handle,
    };
    sched.advance(Duration::from_millis(1));
    assert_eq!(handle.try_outcome(), Some(Outcome::Succeeded(3)));
}

#[test]
fn cede_interleaves_ready_fibers() {
    let (sched, runtime) = setup();
    let log = Rc::new(std::cell::RefCell::new(Vec::new()));

    for name in ["a", "b"] {
        let log = log.clone();
        let effect: Effect<(), String> = Effect::delay({
            let log = log.clone();
            move || log.borrow_mut().push(format!("{name}:1"))
        })
        .flat_map(move |()| {
            Effect::cede().flat_map(move |()| {
                Effect::delay(move || log.borrow_mut().push(format!("{name}:2")))
            })
        });
        runtime.spawn(effect);
    }
    sched.run_until_idle();
    assert_eq!(
        *log.borrow(),
        vec!["a:1", "b:1", "a:2", "b:2"],
        "cede lets the other fiber run between steps"
    );
}

#[test]
fn fairness_budget_forces_yields() {
    let sched = LabScheduler::new();
    let runtime = Runtime::builder(Rc::new(sched.clone()))
        .step_budget(16)
        .build();
    let mut effect: Effect<u64, String> = Effect::pure(0);
    for _ in 0..100 {
        effect = effect.map(|n| n + 1);
    }
    let handle = runtime.spawn(effect);
    sched.run_until_idle();
    assert_eq!(handle.try_outcome(), Some(Outcome::Succeeded(100)));
    let yields = runtime
        .trace_snapshot()
        .iter()
        .filter(|event| matches!(event.kind, TraceEventKind::Yielded))
        .count();
    assert!(yields >= 2, "a 200-step chain on a 16-step budget must yield");
}

#[test]
fn trace_records_lifecycle_newest_first() {
    let (sched, runtime) = setup();
    let handle = runtime.spawn(Effect::<u32, String>::pure(1));
    sched.run_until_idle();
    assert_eq!(handle.try_outcome(), Some(Outcome::Succeeded(1)));

    let events = runtime.trace_snapshot();
    assert!(events.len() >= 2);
    // Newest first: completion before spawn.
    assert!(matches!(events[0].kind, TraceEventKind::Completed(_)));
    assert!(
        matches!(events[events.len() - 1].kind, TraceEventKind::Spawned),
        "{events:?}"
    );
    let seqs: Vec<u64> = events.iter().map(|event| event.seq).collect();
    let mut sorted = seqs.clone();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    assert_eq!(seqs, sorted);
}

#[test]
fn trace_can_be_disabled_and_invalidated() {
    let sched = LabScheduler::new();
    let silent = Runtime::builder(Rc::new(sched.clone()))
        .trace_capacity(0)
        .build();
    silent.spawn(Effect::<u32, String>::pure(1));
    sched.run_until_idle();
    assert!(silent.trace_snapshot().is_empty());

    let (sched, runtime) = setup();
    runtime.spawn(Effect::<u32, String>::pure(1));
    sched.run_until_idle();
    runtime.invalidate_trace();
    assert!(runtime.trace_snapshot().is_empty());
    // Recording after invalidation is a no-op, not a panic, at the
    // runtime level.
    runtime.spawn(Effect::<u32, String>::pure(2));
    sched.run_until_idle();
}

#[test]
fn ref_operations_are_atomic_leaves() {
    let (sched, runtime) = setup();
    let counter = Ref::new(0u32);

    let add_two: Effect<u32, String> = {
        let counter = counter.clone();
        let other = counter.clone();
        counter
            .update(|n| *n += 1)
            .flat_map(move |()| other.modify(|n| {
                *n += 1;
                *n
            }))
    };
    let handle = runtime.spawn(add_two);
    sched.run_until_idle();
    assert_eq!(handle.try_outcome(), Some(Outcome::Succeeded(2)));

    let read = runtime.spawn(counter.get::<String>());
    sched.run_until_idle();
    assert_eq!(read.try_outcome(), Some(Outcome::Succeeded(2)));
}

#[test]
fn ref_interleaves_consistently_across_fibers() {
    let (sched, runtime) = setup();
    let shared = Ref::new(0u64);
    let mut handles = Vec::new();
    for _ in 0..4 {
        let cell = shared.clone();
        let mut effect: Effect<(), String> = Effect::unit();
        for _ in 0..25 {
            let cell = cell.clone();
            effect = effect
                .flat_map(move |()| Effect::cede().flat_map(move |()| cell.update(|n| *n += 1)));
        }
        handles.push(runtime.spawn(effect));
    }
    sched.run_until_idle();
    for handle in &handles {
        assert_eq!(handle.try_outcome(), Some(Outcome::Succeeded(())));
    }
    let read = runtime.spawn(shared.get::<String>());
    sched.run_until_idle();
    assert_eq!(read.try_outcome(), Some(Outcome::Succeeded(100)));
}

#[test]
fn unobserved_failures_reach_report_failure() {
    let (sched, runtime) = setup();
    runtime.spawn(Effect::<u32, String>::raise_error("nobody joined".to_string()));
    sched.run_until_idle();
    let failures = sched.failures();
    assert!(
        failures.iter().any(|failure| matches!(
            failure,
            RuntimeFailure::UnobservedError { error, .. } if error.contains("nobody joined")
        )),
        "{failures:?}"
    );
}

#[test]
fn joined_failures_are_not_reported() {
    let (sched, runtime) = setup();
    let program: Effect<Outcome<u32, String>, String> =
        Effect::<u32, String>::raise_error("joined".to_string())
            .fork()
            .flat_map(|child| child.join());
    let handle = runtime.spawn(program);
    sched.run_until_idle();
    assert_eq!(
        handle.try_outcome(),
        Some(Outcome::Succeeded(Outcome::Failed("joined".to_string())))
    );
    assert!(
        !sched.failures().iter().any(|failure| matches!(
            failure,
            RuntimeFailure::UnobservedError { error, .. } if error.contains("joined")
        )),
        "a joined failure must not be double-reported"
    );
}

#[test]
fn join_listeners_fire_in_registration_order() {
    let (sched, runtime) = setup();
    let order = Rc::new(std::cell::RefCell::new(Vec::new()));

    let child: Effect<u32, String> = Effect::sleep(Duration::from_millis(1)).map(|()| 5);
    let child_handle = runtime.spawn(child);
    for tag in ["first", "second"] {
        let order = order.clone();
        let join: Effect<(), String> = child_handle
            .join()
            .flat_map(move |_| Effect::delay(move || order.borrow_mut().push(tag)));
        runtime.spawn(join);
    }
    sched.advance(Duration::from_millis(1));
    assert_eq!(*order.borrow(), vec!["first", "second"]);
}

#[test]
fn sleep_observes_virtual_deadlines_in_order() {
    let (sched, runtime) = setup();
    let log = Rc::new(std::cell::RefCell::new(Vec::new()));
    for (tag, ms) in [("slow", 20u64), ("fast", 5)] {
        let log = log.clone();
        let effect: Effect<(), String> = Effect::sleep(Duration::from_millis(ms))
            .flat_map(move |()| Effect::delay(move || log.borrow_mut().push(tag)));
        runtime.spawn(effect);
    }
    sched.advance(Duration::from_millis(30));
    assert_eq!(*log.borrow(), vec!["fast", "slow"]);
}

#[test]
fn blocking_scheduler_runs_to_completion() {
    let sched = BlockingScheduler::new();
    let runtime = Runtime::new(Rc::new(sched.clone()));
    let effect: Effect<u32, String> = Effect::sleep(Duration::from_millis(1)).map(|()| 5);
    let outcome = sched.block_on(&runtime, effect);
    assert_eq!(outcome, Outcome::Succeeded(5));
}

#[test]
fn spawn_inside_effect_runs_fire_and_forget() {
    let (sched, runtime) = setup();
    let ran = Rc::new(Cell::new(false));
    let flag = ran.clone();
    let effect: Effect<(), String> = Effect::delay(move || flag.set(true))
        .fork()
        .map(|_handle| ());
    let handle = runtime.spawn(effect);
    sched.run_until_idle();
    assert_eq!(handle.try_outcome(), Some(Outcome::Succeeded(())));
    assert!(ran.get(), "orphaned fork still runs to completion");
}
