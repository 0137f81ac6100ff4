//! Structured concurrency: supervisor registration, close, and scoping.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;
use weft::{Effect, FiberHandle, LabScheduler, Outcome, Runtime, Supervisor, supervised};

fn setup() -> (LabScheduler, Rc<Runtime>) {
    let sched = LabScheduler::new();
    let runtime = Runtime::new(Rc::new(sched.clone()));
    (sched, runtime)
}

type Handles = Rc<RefCell<Vec<FiberHandle<(), String>>>>;

#[test]
fn scope_exit_cancels_pending_children() {
    let (sched, runtime) = setup();
    let handles: Handles = Rc::new(RefCell::new(Vec::new()));
    let collected = handles.clone();

    let program: Effect<u32, String> = supervised(move |sup| {
        let sup2 = sup.clone();
        let first = collected.clone();
        let second = collected.clone();
        sup.supervise(Effect::<(), String>::never())
            .flat_map(move |registered| {
                first
                    .borrow_mut()
                    .push(registered.expect("open supervisor accepts children"));
                sup2.supervise(Effect::<(), String>::never())
                    .flat_map(move |registered| {
                        second
                            .borrow_mut()
                            .push(registered.expect("open supervisor accepts children"));
                        Effect::pure(42)
                    })
            })
    });

    let handle = runtime.spawn(program);
    sched.run_until_idle();
    assert_eq!(handle.try_outcome(), Some(Outcome::Succeeded(42)));
    let handles = handles.borrow();
    assert_eq!(handles.len(), 2);
    for child in handles.iter() {
        assert_eq!(child.try_outcome(), Some(Outcome::Canceled));
    }
}

#[test]
fn scope_does_not_return_until_children_complete() {
    // The child's cancellation finalizer takes 5ms; `supervised` must wait
    // for it.
    let (sched, runtime) = setup();
    let child: Effect<(), String> =
        Effect::never().on_cancel(Effect::sleep(Duration::from_millis(5)));
    let program: Effect<u32, String> = supervised(move |sup| {
        sup.supervise(child)
            .flat_map(|registered| {
                registered.expect("open supervisor accepts children");
                Effect::pure(7)
            })
    });

    let handle = runtime.spawn(program);
    sched.run_until_idle();
    assert_eq!(
        handle.try_outcome(),
        None,
        "scope must wait for the child's finalizer"
    );
    sched.advance(Duration::from_millis(5));
    assert_eq!(handle.try_outcome(), Some(Outcome::Succeeded(7)));
}

#[test]
fn supervise_after_close_fails_without_leaking() {
    let (sched, runtime) = setup();
    let escaped: Rc<RefCell<Option<Supervisor>>> = Rc::new(RefCell::new(None));
    let slot = escaped.clone();

    let program: Effect<(), String> = supervised(move |sup| {
        slot.borrow_mut().replace(sup.clone());
        Effect::unit()
    });
    let handle = runtime.spawn(program);
    sched.run_until_idle();
    assert_eq!(handle.try_outcome(), Some(Outcome::Succeeded(())));

    let sup = escaped.borrow_mut().take().expect("supervisor escaped");
    assert!(sup.is_closing());
    let late = runtime.spawn(sup.supervise::<(), String, String>(Effect::never()));
    sched.run_until_idle();
    match late.try_outcome() {
        Some(Outcome::Succeeded(Err(_))) => {}
        other => panic!("late registration should fail, got {other:?}"),
    }
    assert_eq!(sup.child_count(), 0);
}

#[test]
fn completed_children_deregister_themselves() {
    let (sched, runtime) = setup();
    let seen: Rc<RefCell<Option<usize>>> = Rc::new(RefCell::new(None));
    let count_slot = seen.clone();

    let program: Effect<u32, String> = supervised(move |sup| {
        let observer = sup.clone();
        sup.supervise(Effect::<u32, String>::pure(1).void())
            .flat_map(move |registered| {
                registered.expect("open supervisor accepts children");
                // Let the child run, then look at the registry.
                Effect::cede().flat_map(move |()| {
                    Effect::delay(move || {
                        count_slot.borrow_mut().replace(observer.child_count());
                    })
                    .map(|()| 9)
                })
            })
    });

    let handle = runtime.spawn(program);
    sched.run_until_idle();
    assert_eq!(handle.try_outcome(), Some(Outcome::Succeeded(9)));
    assert_eq!(*seen.borrow(), Some(0), "finished child should be gone");
}

#[test]
fn supervised_propagates_body_error_after_cleanup() {
    let (sched, runtime) = setup();
    let handles: Handles = Rc::new(RefCell::new(Vec::new()));
    let collected = handles.clone();

    let program: Effect<u32, String> = supervised(move |sup| {
        sup.supervise(Effect::<(), String>::never())
            .flat_map(move |registered| {
                collected
                    .borrow_mut()
                    .push(registered.expect("open supervisor accepts children"));
                Effect::raise_error("body failed".to_string())
            })
    });

    let handle = runtime.spawn(program);
    sched.run_until_idle();
    assert_eq!(
        handle.try_outcome(),
        Some(Outcome::Failed("body failed".to_string()))
    );
    assert_eq!(
        handles.borrow()[0].try_outcome(),
        Some(Outcome::Canceled),
        "children are canceled even when the body fails"
    );
}

#[test]
fn canceling_outer_scope_cancels_children() {
    let (sched, runtime) = setup();
    let handles: Handles = Rc::new(RefCell::new(Vec::new()));
    let collected = handles.clone();

    let program: Effect<u32, String> = supervised(move |sup| {
        sup.supervise(Effect::<(), String>::never())
            .flat_map(move |registered| {
                collected
                    .borrow_mut()
                    .push(registered.expect("open supervisor accepts children"));
                Effect::never().map(|()| 0)
            })
    });

    let handle = runtime.spawn(program);
    sched.run_until_idle();
    assert!(!handle.is_completed());

    handle.request_cancel();
    sched.run_until_idle();
    assert_eq!(handle.try_outcome(), Some(Outcome::Canceled));
    assert_eq!(
        handles.borrow()[0].try_outcome(),
        Some(Outcome::Canceled),
        "scope cleanup runs under cancellation too"
    );
}
