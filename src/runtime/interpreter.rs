//! The trampolined interpreter loop.
//!
//! One call to [`RawFiber::run`] is a run burst: it consumes effect nodes
//! against the fiber's continuation stack until the fiber completes,
//! suspends on an async await, or exhausts its fairness budget and yields.
//! No native recursion is involved, so arbitrarily long combinator chains
//! interpret in constant stack space.
//!
//! Re-entry is uniform: whenever a fiber leaves the loop non-terminally, a
//! [`Frame::Resume`] holding the pending continuation sits on top of its
//! stack, and the scheduled thunk calls `run` again.

use crate::effect::node::{Node, unit_value};
use crate::error::RuntimeFailure;
use crate::runtime::fiber::{FiberCore, Gate, Phase, RawFiber};
use crate::runtime::frame::{Frame, Resumption};
use crate::trace::TraceEventKind;
use crate::types::Outcome;
use std::rc::Rc;

use crate::effect::node::AnyValue;

/// What the loop processes next.
enum Step {
    /// Interpret a node.
    Start(Node),
    /// Feed a value to the top frame.
    Value(AnyValue),
    /// Propagate an error to the nearest error-aware frame.
    Error(AnyValue),
    /// Continue the cancellation unwind.
    Unwind,
}

/// How one transition left the loop.
enum Flow {
    /// Keep stepping.
    Continue(Step),
    /// The fiber left the loop non-terminally (awaiting or rescheduled);
    /// the core has its next continuation staged.
    Suspended,
    /// The stack emptied; the fiber is done.
    Finished(super::fiber::ErasedOutcome),
}

impl RawFiber {
    /// Executes one run burst.
    pub(crate) fn run(self: &Rc<Self>) {
        if self.is_completed() {
            return;
        }
        let Some(mut core) = self.take_core() else {
            // Already inside a burst; a stray thunk for this fiber.
            return;
        };
        self.set_phase(Phase::Running);

        let mut step = match core.stack.pop() {
            Some(Frame::Resume(resumption)) => match *resumption {
                Resumption::Start(node) => Step::Start(node),
                Resumption::Value(value) => Step::Value(value),
                Resumption::Error(error) => Step::Error(error),
                Resumption::Cancel => self.begin_unwind(&mut core),
            },
            _ => unreachable!("fiber scheduled without a resume continuation"),
        };

        // A cancel requested while the fiber sat in the ready queue is
        // observed before the pending continuation, discarding it.
        if self.cancel_requested() && core.mask_depth == 0 && !core.unwinding {
            drop(step);
            step = self.begin_unwind(&mut core);
        }

        let budget = self.runtime().step_budget();
        let mut steps: u32 = 0;
        loop {
            if steps >= budget {
                self.fairness_yield(step, core);
                return;
            }
            steps += 1;
            let flow = match step {
                Step::Start(node) => self.step_node(node, &mut core),
                Step::Value(value) => self.step_value(value, &mut core),
                Step::Error(error) => self.step_error(error, &mut core),
                Step::Unwind => self.step_unwind(&mut core),
            };
            match flow {
                Flow::Continue(next) => step = next,
                Flow::Suspended => {
                    self.put_core(core);
                    return;
                }
                Flow::Finished(outcome) => {
                    self.complete(core, outcome);
                    return;
                }
            }
        }
    }

    /// Reschedules the pending continuation instead of hogging the driver.
    fn fairness_yield(self: &Rc<Self>, step: Step, mut core: FiberCore) {
        let resumption = match step {
            Step::Start(node) => Resumption::Start(node),
            Step::Value(value) => Resumption::Value(value),
            Step::Error(error) => Resumption::Error(error),
            Step::Unwind => Resumption::Cancel,
        };
        core.stack.push(Frame::Resume(Box::new(resumption)));
        self.set_phase(Phase::Queued);
        self.put_core(core);
        self.runtime().record(self.id(), TraceEventKind::Yielded);
        let fiber = Rc::clone(self);
        self.runtime()
            .scheduler()
            .execute_now(Box::new(move || fiber.run()));
    }

    /// Starts (or continues) the cancellation unwind. If the interrupted
    /// await left a cancel action behind, it runs first, as a finalizer.
    fn begin_unwind(self: &Rc<Self>, core: &mut FiberCore) -> Step {
        if !core.unwinding {
            core.unwinding = true;
            // Whatever await was pending is dead now.
            self.next_gate_epoch();
        }
        match core.async_cancel.take() {
            Some(action) => {
                core.stack.push(Frame::CancelLoop);
                self.runtime().record(self.id(), TraceEventKind::FinalizerRan);
                Step::Start(action)
            }
            None => Step::Unwind,
        }
    }

    fn step_node(self: &Rc<Self>, node: Node, core: &mut FiberCore) -> Flow {
        // `Node` implements `Drop` (iterative teardown of deep combinator
        // chains), which forbids moving fields out in a by-value match. Match
        // by `&mut` and lift each payload out with `mem::replace`, leaving a
        // trivial placeholder behind — the same safe idiom `strip_children`
        // uses. The drained `node` husk is dropped harmlessly at scope end.
        let mut node = node;
        match &mut node {
            Node::Pure(value) => {
                let value = std::mem::replace(value, Box::new(()));
                Flow::Continue(Step::Value(value))
            }
            Node::Delay(thunk) => {
                let thunk = std::mem::replace(thunk, Box::new(|| -> AnyValue { Box::new(()) }));
                Flow::Continue(Step::Value(thunk()))
            }
            Node::FromResult(thunk) => {
                let thunk = std::mem::replace(
                    thunk,
                    Box::new(|| -> Result<AnyValue, AnyValue> { Ok(Box::new(())) }),
                );
                Flow::Continue(match thunk() {
                    Ok(value) => Step::Value(value),
                    Err(error) => Step::Error(error),
                })
            }
            Node::RaiseError(error) => {
                let error = std::mem::replace(error, Box::new(()));
                Flow::Continue(Step::Error(error))
            }
            Node::Map { source, f } => {
                let source = std::mem::replace(source, Box::new(Node::Canceled));
                let f = std::mem::replace(f, Box::new(|v: AnyValue| v));
                core.stack.push(Frame::Map(f));
                Flow::Continue(Step::Start(*source))
            }
            Node::FlatMap { source, f } => {
                let source = std::mem::replace(source, Box::new(Node::Canceled));
                let f = std::mem::replace(f, Box::new(|_v: AnyValue| Node::Canceled));
                core.stack.push(Frame::FlatMap(f));
                Flow::Continue(Step::Start(*source))
            }
            Node::HandleErrorWith { source, handler } => {
                let source = std::mem::replace(source, Box::new(Node::Canceled));
                let handler = std::mem::replace(handler, Box::new(|_v: AnyValue| Node::Canceled));
                core.stack.push(Frame::ErrorHandler(handler));
                Flow::Continue(Step::Start(*source))
            }
            Node::Attempt { source, reify } => {
                let source = std::mem::replace(source, Box::new(Node::Canceled));
                let reify = std::mem::replace(
                    reify,
                    Box::new(|_r: Result<AnyValue, AnyValue>| -> AnyValue { Box::new(()) }),
                );
                core.stack.push(Frame::Attempt(reify));
                Flow::Continue(Step::Start(*source))
            }
            Node::OnCancel { source, finalizer } => {
                let source = std::mem::replace(source, Box::new(Node::Canceled));
                let finalizer = std::mem::replace(finalizer, Box::new(Node::Canceled));
                core.stack.push(Frame::CancelGuard(*finalizer));
                Flow::Continue(Step::Start(*source))
            }
            Node::Uncancelable { body } => {
                let body = std::mem::replace(
                    body,
                    Box::new(|_u: crate::effect::Unmask| Node::Canceled),
                );
                core.stack.push(Frame::MaskEnter);
                let token = crate::effect::Unmask::new(core.mask_depth);
                core.mask_depth += 1;
                Flow::Continue(Step::Start(body(token)))
            }
            Node::Unmasked {
                source,
                restore_depth,
            } => {
                let source = std::mem::replace(source, Box::new(Node::Canceled));
                let restore_depth = *restore_depth;
                core.stack.push(Frame::MaskExit {
                    restore: core.mask_depth,
                });
                core.mask_depth = restore_depth;
                if core.mask_depth == 0 && self.cancel_requested() && !core.unwinding {
                    drop(source);
                    Flow::Continue(self.begin_unwind(core))
                } else {
                    Flow::Continue(Step::Start(*source))
                }
            }
            Node::Canceled => {
                if core.unwinding {
                    // Self-cancel inside a finalizer: already unwinding.
                    Flow::Continue(Step::Value(unit_value()))
                } else {
                    self.mark_cancel_requested();
                    if core.mask_depth == 0 {
                        Flow::Continue(self.begin_unwind(core))
                    } else {
                        // Deferred: record the request, keep running.
                        Flow::Continue(Step::Value(unit_value()))
                    }
                }
            }
            Node::Fork {
                source,
                supervisor,
                error_debug,
                wrap,
            } => {
                let source = std::mem::replace(source, Box::new(Node::Canceled));
                let supervisor = supervisor.take();
                let error_debug = *error_debug;
                let wrap = std::mem::replace(
                    wrap,
                    Box::new(|_r| -> AnyValue { Box::new(()) }),
                );
                if let Some(registry) = &supervisor {
                    if registry.is_closing() {
                        return Flow::Continue(Step::Value(wrap(Err(
                            crate::error::SuperviseError,
                        ))));
                    }
                }
                let child = self.runtime().new_fiber(error_debug);
                if let Some(registry) = supervisor {
                    let key = registry.insert(Rc::clone(&child));
                    child.attach_supervisor(Rc::downgrade(&registry), key);
                }
                self.runtime().schedule_start(&child, *source);
                Flow::Continue(Step::Value(wrap(Ok(child))))
            }
            Node::Async { register } => {
                let register = std::mem::replace(register, Box::new(|_g| None));
                self.enter_async(core, register)
            }
            Node::Sleep(duration) => {
                let duration = *duration;
                let runtime = Rc::clone(self.runtime());
                self.enter_async(
                    core,
                    Box::new(move |gate: Rc<Gate>| {
                        runtime.scheduler().schedule_after(
                            duration,
                            Box::new(move || gate.complete(Ok(unit_value()))),
                        );
                        None
                    }),
                )
            }
            Node::Cede => {
                core.stack
                    .push(Frame::Resume(Box::new(Resumption::Value(unit_value()))));
                self.set_phase(Phase::Queued);
                self.runtime().record(self.id(), TraceEventKind::Yielded);
                let fiber = Rc::clone(self);
                self.runtime()
                    .scheduler()
                    .execute_now(Box::new(move || fiber.run()));
                Flow::Suspended
            }
        }
    }

    /// Registers an async completion, unless cancellation preempts it.
    fn enter_async(
        self: &Rc<Self>,
        core: &mut FiberCore,
        register: Box<dyn FnOnce(Rc<Gate>) -> Option<Node>>,
    ) -> Flow {
        // Checked before registration: a pending unmasked cancel wins and
        // the registration never happens.
        if self.cancel_requested() && core.mask_depth == 0 && !core.unwinding {
            return Flow::Continue(self.begin_unwind(core));
        }
        let epoch = self.next_gate_epoch();
        let gate = Rc::new(Gate::new(Rc::downgrade(self), epoch));
        let cancel_action = register(Rc::clone(&gate));
        if let Some(result) = gate.take_buffered() {
            // Registration completed the callback synchronously.
            return Flow::Continue(match result {
                Ok(value) => Step::Value(value),
                Err(error) => Step::Error(error),
            });
        }
        core.async_cancel = cancel_action;
        if self.cancel_requested() && core.mask_depth == 0 && !core.unwinding {
            // Canceled reentrantly during registration; run its cancel
            // action and unwind instead of suspending.
            return Flow::Continue(self.begin_unwind(core));
        }
        self.set_phase(Phase::Awaiting);
        self.runtime().record(self.id(), TraceEventKind::Suspended);
        Flow::Suspended
    }

    fn step_value(self: &Rc<Self>, value: AnyValue, core: &mut FiberCore) -> Flow {
        match core.stack.pop() {
            None => Flow::Finished(Outcome::Succeeded(Rc::from(value))),
            Some(Frame::Map(f)) => Flow::Continue(Step::Value(f(value))),
            Some(Frame::FlatMap(f)) => Flow::Continue(Step::Start(f(value))),
            Some(Frame::ErrorHandler(_)) => Flow::Continue(Step::Value(value)),
            Some(Frame::Attempt(reify)) => Flow::Continue(Step::Value(reify(Ok(value)))),
            Some(Frame::CancelGuard(_finalizer)) => {
                // Source completed; the guard's finalizer never runs.
                Flow::Continue(Step::Value(value))
            }
            Some(Frame::MaskEnter) => {
                core.mask_depth = core.mask_depth.saturating_sub(1);
                if core.mask_depth == 0 && self.cancel_requested() && !core.unwinding {
                    // Deferred cancel observed as the mask ends; the
                    // region's value is discarded.
                    drop(value);
                    Flow::Continue(self.begin_unwind(core))
                } else {
                    Flow::Continue(Step::Value(value))
                }
            }
            Some(Frame::MaskExit { restore }) => {
                core.mask_depth = restore;
                Flow::Continue(Step::Value(value))
            }
            Some(Frame::CancelLoop) => {
                // A finalizer finished; keep unwinding.
                drop(value);
                Flow::Continue(Step::Unwind)
            }
            Some(Frame::Resume(_)) => Flow::Continue(Step::Value(value)),
        }
    }

    fn step_error(self: &Rc<Self>, error: AnyValue, core: &mut FiberCore) -> Flow {
        match core.stack.pop() {
            None => Flow::Finished(Outcome::Failed(Rc::from(error))),
            Some(Frame::ErrorHandler(handler)) => Flow::Continue(Step::Start(handler(error))),
            Some(Frame::Attempt(reify)) => Flow::Continue(Step::Value(reify(Err(error)))),
            Some(Frame::Map(_) | Frame::FlatMap(_) | Frame::CancelGuard(_)) => {
                // Short-circuit plain sequencing; cancel guards only react
                // to cancellation.
                Flow::Continue(Step::Error(error))
            }
            Some(Frame::MaskEnter) => {
                core.mask_depth = core.mask_depth.saturating_sub(1);
                if core.mask_depth == 0 && self.cancel_requested() && !core.unwinding {
                    // Cancellation beats the in-flight error; don't lose it
                    // silently.
                    self.runtime()
                        .report_failure(RuntimeFailure::ErrorDisplacedByCancel {
                            fiber: self.id(),
                            error: (self.error_debug())(error.as_ref()),
                        });
                    Flow::Continue(self.begin_unwind(core))
                } else {
                    Flow::Continue(Step::Error(error))
                }
            }
            Some(Frame::MaskExit { restore }) => {
                core.mask_depth = restore;
                Flow::Continue(Step::Error(error))
            }
            Some(Frame::CancelLoop) => {
                // Finalizer failed: collect, keep unwinding.
                core.finalizer_errors
                    .push((self.error_debug())(error.as_ref()));
                Flow::Continue(Step::Unwind)
            }
            Some(Frame::Resume(_)) => Flow::Continue(Step::Error(error)),
        }
    }

    /// Pops one frame in cancellation mode, running pending finalizers.
    fn step_unwind(self: &Rc<Self>, core: &mut FiberCore) -> Flow {
        match core.stack.pop() {
            None => Flow::Finished(Outcome::Canceled),
            Some(Frame::CancelGuard(finalizer)) => {
                core.stack.push(Frame::CancelLoop);
                self.runtime().record(self.id(), TraceEventKind::FinalizerRan);
                Flow::Continue(Step::Start(finalizer))
            }
            Some(Frame::MaskEnter) => {
                core.mask_depth = core.mask_depth.saturating_sub(1);
                Flow::Continue(Step::Unwind)
            }
            Some(Frame::MaskExit { restore }) => {
                core.mask_depth = restore;
                Flow::Continue(Step::Unwind)
            }
            Some(_) => Flow::Continue(Step::Unwind),
        }
    }
}
