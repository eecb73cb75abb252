//! Frames and launchers.
//!
//! A frame owns the body, the upcall, a work guard on the executor and the
//! allocator used for the operation's storage. Between resumptions the
//! frame travels inside the continuation handed to the pending
//! suboperation, so nothing else keeps the operation alive: dropping that
//! continuation destroys the frame, releases the guard and silently cancels
//! the upcall.
//!
//! Relocatable frames move by value into every continuation, which spills
//! to the allocator once the frame outgrows the inline buffer. Pinned frames
//! are placed in one [`HandlerBox`] at launch; continuations carry only the
//! box, so the body keeps one address for the whole operation and the
//! continuation fits the callback's inline buffer.
//!
//! While a launch call is on the stack its frame is registered in a
//! thread-local scope. A continuation that completes inline inside that
//! call is not treated as a continuation, so a direct upcall from it is
//! posted and reported like one from the first resumption.

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};

use super::future::{self, UpcallFuture};
use super::step::{OperationBody, StepKind, YieldToken};
use crate::callback::{Callback, Global, HandlerAllocator, HandlerBox, IntoCallback};
use crate::error::{Error, Result};
use crate::runtime::{Executor, WorkGuard};

static NEXT_FRAME_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static LAUNCHING: RefCell<Vec<Launching>> = const { RefCell::new(Vec::new()) };
}

struct Launching {
    frame: u64,
    violated: bool,
}

/// Marks a frame as inside its launch call on this thread until dropped.
struct LaunchScope {
    frame: u64,
}

impl LaunchScope {
    fn enter(frame: u64) -> Self {
        LAUNCHING.with(|stack| {
            stack.borrow_mut().push(Launching {
                frame,
                violated: false,
            });
        });
        Self { frame }
    }

    fn violated(&self) -> bool {
        LAUNCHING.with(|stack| {
            stack
                .borrow()
                .iter()
                .rev()
                .find(|entry| entry.frame == self.frame)
                .is_some_and(|entry| entry.violated)
        })
    }
}

impl Drop for LaunchScope {
    fn drop(&mut self) {
        LAUNCHING.with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(pos) = stack.iter().rposition(|entry| entry.frame == self.frame) {
                stack.remove(pos);
            }
        });
    }
}

fn launching(frame: u64) -> bool {
    LAUNCHING.with(|stack| stack.borrow().iter().any(|entry| entry.frame == frame))
}

fn report_violation(frame: u64) {
    LAUNCHING.with(|stack| {
        if let Some(entry) = stack
            .borrow_mut()
            .iter_mut()
            .rev()
            .find(|entry| entry.frame == frame)
        {
            entry.violated = true;
        }
    });
}

struct Frame<B: OperationBody, E: Executor, A> {
    id: u64,
    body: B,
    upcall: Callback<B::Output>,
    guard: WorkGuard<E>,
    alloc: A,
}

/// Where a frame lives between resumptions.
trait FrameSlot: Send + 'static {
    type Body: OperationBody;
    type Exec: Executor;
    type Alloc: HandlerAllocator + Clone;

    fn frame_mut(&mut self) -> &mut Frame<Self::Body, Self::Exec, Self::Alloc>;
    fn into_frame(self) -> Frame<Self::Body, Self::Exec, Self::Alloc>;
}

impl<B, E, A> FrameSlot for Frame<B, E, A>
where
    B: OperationBody,
    E: Executor,
    A: HandlerAllocator + Clone,
{
    type Body = B;
    type Exec = E;
    type Alloc = A;

    fn frame_mut(&mut self) -> &mut Self {
        self
    }

    fn into_frame(self) -> Self {
        self
    }
}

impl<B, E, A> FrameSlot for HandlerBox<Frame<B, E, A>, A>
where
    B: OperationBody,
    E: Executor,
    A: HandlerAllocator + Clone,
{
    type Body = B;
    type Exec = E;
    type Alloc = A;

    fn frame_mut(&mut self) -> &mut Frame<B, E, A> {
        self
    }

    fn into_frame(self) -> Frame<B, E, A> {
        self.into_inner()
    }
}

type ResumeOf<S> = <<S as FrameSlot>::Body as OperationBody>::Resume;

fn resume<S: FrameSlot>(mut slot: S, input: Option<ResumeOf<S>>, is_continuation: bool) -> Result<()> {
    let step = slot
        .frame_mut()
        .body
        .resume(YieldToken::new(is_continuation), input);
    match step.0 {
        StepKind::Suspend(start) => {
            tracing::trace!(is_continuation, "composed operation suspended");
            let frame = slot.frame_mut();
            let id = frame.id;
            let alloc = frame.alloc.clone();
            let continuation = Callback::try_new_in(
                move |input: ResumeOf<S>| {
                    let is_continuation = !launching(slot.frame_mut().id);
                    let _ = resume(slot, Some(input), is_continuation);
                },
                alloc,
            );
            match continuation {
                Ok(continuation) => {
                    let _ = start.call(continuation);
                    Ok(())
                }
                Err(err) => {
                    tracing::error!(
                        frame = id,
                        error = %err,
                        "composed operation abandoned: no storage for its continuation"
                    );
                    Err(err)
                }
            }
        }
        StepKind::Upcall { output, direct } => {
            deliver(slot.into_frame(), output, direct, is_continuation)
        }
    }
}

fn deliver<B: OperationBody, E: Executor, A>(
    frame: Frame<B, E, A>,
    output: B::Output,
    direct: bool,
    is_continuation: bool,
) -> Result<()> {
    let Frame {
        id,
        body,
        upcall,
        mut guard,
        alloc,
    } = frame;
    drop(body);
    drop(alloc);

    if direct && is_continuation && guard.executor().running_in_this_thread() {
        tracing::trace!("composed operation delivering upcall inline");
        guard.reset();
        let _ = upcall.call(output);
        return Ok(());
    }

    let executor = guard.executor().clone();
    executor.post(upcall.bind(output));
    guard.reset();

    if direct {
        tracing::error!(
            is_continuation,
            "direct upcall outside a continuation running on its executor; posted instead"
        );
        report_violation(id);
        return Err(Error::invalid_state(
            "direct upcall requires a continuation running on its executor",
        ));
    }
    tracing::trace!(is_continuation, "composed operation posted upcall");
    Ok(())
}

fn new_frame<E: Executor, B: OperationBody, A>(
    executor: &E,
    alloc: A,
    body: B,
    upcall: Callback<B::Output>,
) -> Frame<B, E, A> {
    Frame {
        id: NEXT_FRAME_ID.fetch_add(1, Ordering::Relaxed),
        body,
        upcall,
        guard: WorkGuard::new(executor.clone()),
        alloc,
    }
}

/// Runs the first resumption of `slot` inside a launch scope.
fn first_resumption<S: FrameSlot>(mut slot: S) -> Result<()> {
    let scope = LaunchScope::enter(slot.frame_mut().id);
    resume(slot, None, false)?;
    if scope.violated() {
        return Err(Error::invalid_state(
            "direct upcall from a continuation that completed inside launch",
        ));
    }
    Ok(())
}

/// Launches `body` with a relocatable frame.
///
/// The first resumption runs before this returns; `upcall` never does.
/// Fails with `InvalidState` if a direct upcall was requested before this
/// returns, either by the first resumption or by a continuation that
/// completed inline; that upcall is posted instead.
pub fn launch<E, B>(executor: &E, body: B, upcall: impl IntoCallback<B::Output>) -> Result<()>
where
    E: Executor,
    B: OperationBody,
{
    launch_in(executor, Global, body, upcall)
}

/// Launches `body` with a relocatable frame whose continuations are
/// allocated from `alloc`.
///
/// Fails with `AllocationFailure` or `ConstructionFailure` if the first
/// continuation cannot be stored; the frame is then destroyed and the upcall
/// never runs. Later storage failures abandon the operation the same way and
/// are logged.
pub fn launch_in<E, A, B>(
    executor: &E,
    alloc: A,
    body: B,
    upcall: impl IntoCallback<B::Output>,
) -> Result<()>
where
    E: Executor,
    A: HandlerAllocator + Clone,
    B: OperationBody,
{
    tracing::debug!(pinned = false, "composed operation launched");
    first_resumption(new_frame(executor, alloc, body, upcall.into_callback()))
}

/// Launches `body` with a pinned frame.
///
/// Same contract as [`launch`], but the body stays at one address for the
/// whole operation.
pub fn launch_pinned<E, B>(executor: &E, body: B, upcall: impl IntoCallback<B::Output>) -> Result<()>
where
    E: Executor,
    B: OperationBody,
{
    launch_pinned_in(executor, Global, body, upcall)
}

/// Launches `body` with a pinned frame allocated from `alloc`.
///
/// The frame takes one block for the whole operation. Fails with
/// `AllocationFailure` or `ConstructionFailure` if that block cannot be
/// obtained, before the body ever runs.
pub fn launch_pinned_in<E, A, B>(
    executor: &E,
    alloc: A,
    body: B,
    upcall: impl IntoCallback<B::Output>,
) -> Result<()>
where
    E: Executor,
    A: HandlerAllocator + Clone,
    B: OperationBody,
{
    tracing::debug!(pinned = true, "composed operation launched");
    let frame = new_frame(executor, alloc.clone(), body, upcall.into_callback());
    first_resumption(HandlerBox::try_new_in(frame, alloc)?)
}

/// Launches `body` and returns a future for its output.
pub fn launch_future<E, B>(executor: &E, body: B) -> Result<UpcallFuture<B::Output>>
where
    E: Executor,
    B: OperationBody,
{
    let (completer, output) = future::channel();
    launch(executor, body, move |value: B::Output| completer.complete(value))?;
    Ok(output)
}
