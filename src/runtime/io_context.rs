//! A small event loop: one task queue, one timer heap, any number of runners.
//!
//! [`IoContext`] owns the queue. Threads call [`IoContext::run`] (or one of
//! its bounded variants) to execute queued tasks; [`IoExecutor`] handles
//! submit tasks and track outstanding work from anywhere.
//!
//! # Exit Conditions
//!
//! A run call returns when [`IoContext::stop`] is called, when its bound is
//! reached, or when the context runs out of work: the queue is empty, no
//! timer wait is pending and no [`WorkGuard`](super::WorkGuard) is held.
//! Running out of work leaves the context stopped; call
//! [`IoContext::restart`] before running it again.
//!
//! # Virtual Time
//!
//! With a [`ClockMode::Virtual`] clock the loop never sleeps for a timer:
//! when nothing is runnable it advances the clock straight to the next
//! deadline. Tests therefore observe exact timer ordering without waiting.

use core::fmt;
use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::executor::Executor;
use super::timer::TimerHeap;
use crate::callback::{Callback, IntoCallback};
use crate::config::{ClockMode, RuntimeConfig};
use crate::error::Status;
use crate::time::{TimeSource, VirtualClock, WallClock};
use crate::types::Time;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static RUNNING: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

/// Marks the current thread as running a context until dropped.
struct RunningScope {
    id: u64,
}

impl RunningScope {
    fn enter(id: u64) -> Self {
        RUNNING.with(|stack| stack.borrow_mut().push(id));
        Self { id }
    }
}

impl Drop for RunningScope {
    fn drop(&mut self) {
        RUNNING.with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(pos) = stack.iter().rposition(|&id| id == self.id) {
                stack.remove(pos);
            }
        });
    }
}

fn running_here(id: u64) -> bool {
    RUNNING.with(|stack| stack.borrow().contains(&id))
}

#[derive(Clone, Copy)]
enum Wait {
    Never,
    Until(Time),
    Forever,
}

struct TimerSlot {
    deadline: Option<Time>,
    generation: u64,
    waiters: SmallVec<[Callback<Status>; 1]>,
}

struct State {
    queue: VecDeque<Callback<()>>,
    outstanding_work: usize,
    pending_waits: usize,
    timers: TimerHeap,
    slots: HashMap<u64, TimerSlot>,
    next_timer: u64,
}

impl State {
    fn complete_waits(&mut self, timer: u64, status: Status) -> usize {
        let Some(slot) = self.slots.get_mut(&timer) else {
            return 0;
        };
        let waiters = std::mem::take(&mut slot.waiters);
        slot.generation += 1;
        let generation = slot.generation;
        self.timers
            .retain(|entry| entry.timer != timer || entry.generation == generation);
        self.pending_waits -= waiters.len();
        let count = waiters.len();
        for waiter in waiters {
            self.queue.push_back(waiter.bind(status));
        }
        count
    }

    fn fire_expired(&mut self, now: Time) {
        for entry in self.timers.pop_expired(now) {
            let due = self.slots.get(&entry.timer).is_some_and(|slot| {
                slot.generation == entry.generation && slot.deadline.is_some_and(|d| d <= now)
            });
            if due {
                let fired = self.complete_waits(entry.timer, Status::Ok);
                tracing::trace!(timer = entry.timer, fired, now = %now, "timer expired");
            }
        }
    }
}

struct Inner {
    id: u64,
    clock: Arc<dyn TimeSource>,
    virtual_clock: Option<Arc<VirtualClock>>,
    config: RuntimeConfig,
    stopped: AtomicBool,
    state: Mutex<State>,
    wakeup: Condvar,
}

impl Inner {
    fn post(&self, task: Callback<()>) {
        if task.is_empty() {
            return;
        }
        self.state.lock().queue.push_back(task);
        self.wakeup.notify_one();
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let result = f(&mut self.state.lock());
        self.wakeup.notify_all();
        result
    }
}

/// An event loop with a task queue and timers.
///
/// # Example
///
/// ```
/// use weft::runtime::IoContext;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// let ctx = IoContext::new();
/// let hits = Arc::new(AtomicUsize::new(0));
/// for _ in 0..3 {
///     let hits = Arc::clone(&hits);
///     ctx.post(move |()| {
///         hits.fetch_add(1, Ordering::SeqCst);
///     });
/// }
/// assert_eq!(ctx.run(), 3);
/// assert_eq!(hits.load(Ordering::SeqCst), 3);
/// assert!(ctx.stopped());
/// ```
pub struct IoContext {
    inner: Arc<Inner>,
}

impl Default for IoContext {
    fn default() -> Self {
        Self::new()
    }
}

impl IoContext {
    /// Creates a context with the default configuration (wall clock).
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Creates a context driven by a virtual clock starting at zero.
    #[must_use]
    pub fn with_virtual_clock() -> Self {
        Self::with_config(RuntimeConfig {
            clock: ClockMode::Virtual,
            ..RuntimeConfig::default()
        })
    }

    /// Creates a context from `config`.
    ///
    /// A zero `run_batch_limit` is treated as 1.
    #[must_use]
    pub fn with_config(config: RuntimeConfig) -> Self {
        let (clock, virtual_clock): (Arc<dyn TimeSource>, _) = match config.clock {
            ClockMode::Wall => (Arc::new(WallClock::starting_at(config.start_time)), None),
            ClockMode::Virtual => {
                let clock = Arc::new(VirtualClock::starting_at(config.start_time));
                (Arc::clone(&clock) as Arc<dyn TimeSource>, Some(clock))
            }
        };
        let id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(context = id, clock = ?config.clock, start = %config.start_time, "io context created");
        Self {
            inner: Arc::new(Inner {
                id,
                clock,
                virtual_clock,
                config,
                stopped: AtomicBool::new(false),
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    outstanding_work: 0,
                    pending_waits: 0,
                    timers: TimerHeap::new(),
                    slots: HashMap::new(),
                    next_timer: 1,
                }),
                wakeup: Condvar::new(),
            }),
        }
    }

    /// Returns the configuration this context was built from.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Returns a handle for submitting work.
    #[must_use]
    pub fn executor(&self) -> IoExecutor {
        IoExecutor {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Returns the current time of this context's clock.
    #[must_use]
    pub fn now(&self) -> Time {
        self.inner.clock.now()
    }

    /// Returns this context's clock.
    #[must_use]
    pub fn clock(&self) -> Arc<dyn TimeSource> {
        Arc::clone(&self.inner.clock)
    }

    /// Returns the virtual clock, if this context uses one.
    #[must_use]
    pub fn virtual_clock(&self) -> Option<&Arc<VirtualClock>> {
        self.inner.virtual_clock.as_ref()
    }

    /// Queues `task`.
    pub fn post(&self, task: impl IntoCallback<()>) {
        self.inner.post(task.into_callback());
    }

    /// Runs `task` now if called from inside this context, otherwise queues it.
    pub fn dispatch(&self, task: impl IntoCallback<()>) {
        self.executor().dispatch(task.into_callback());
    }

    /// Runs tasks until stopped or out of work. Returns the number run.
    pub fn run(&self) -> usize {
        self.run_loop(usize::MAX, Wait::Forever)
    }

    /// Runs at most one task, blocking until one is ready.
    pub fn run_one(&self) -> usize {
        self.run_loop(1, Wait::Forever)
    }

    /// Runs every task that is ready without blocking.
    pub fn poll(&self) -> usize {
        self.run_loop(usize::MAX, Wait::Never)
    }

    /// Runs at most one ready task without blocking.
    pub fn poll_one(&self) -> usize {
        self.run_loop(1, Wait::Never)
    }

    /// Runs tasks for at most `duration` of this context's clock.
    pub fn run_for(&self, duration: Duration) -> usize {
        self.run_until(self.now() + duration)
    }

    /// Runs tasks until the clock reaches `deadline`.
    pub fn run_until(&self, deadline: Time) -> usize {
        self.run_loop(usize::MAX, Wait::Until(deadline))
    }

    /// Makes every run call return as soon as its current task finishes.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::Release);
        let _guard = self.inner.state.lock();
        self.inner.wakeup.notify_all();
        tracing::debug!(context = self.inner.id, "io context stopped");
    }

    /// Returns true if the context is stopped.
    #[must_use]
    pub fn stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// Clears the stopped flag so the context can run again.
    pub fn restart(&self) {
        self.inner.stopped.store(false, Ordering::Release);
    }

    /// Number of queued tasks.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Number of pending timer waits.
    #[must_use]
    pub fn pending_waits(&self) -> usize {
        self.inner.state.lock().pending_waits
    }

    /// Runs this context on a new thread named after the configured thread name.
    pub fn run_in_thread(self: &Arc<Self>) -> std::io::Result<JoinHandle<usize>> {
        let ctx = Arc::clone(self);
        thread::Builder::new()
            .name(self.inner.config.thread_name.clone())
            .spawn(move || ctx.run())
    }

    fn run_loop(&self, max: usize, wait: Wait) -> usize {
        let _scope = RunningScope::enter(self.inner.id);
        let mut executed = 0;
        while executed < max {
            let Some(batch) = self.next_batch(max - executed, wait) else {
                break;
            };
            let mut batch = batch.into_iter();
            while let Some(task) = batch.next() {
                let _ = task.call(());
                executed += 1;
                if self.stopped() {
                    let rest: Vec<_> = batch.collect();
                    let mut state = self.inner.state.lock();
                    for task in rest.into_iter().rev() {
                        state.queue.push_front(task);
                    }
                    return executed;
                }
            }
        }
        executed
    }

    fn next_batch(&self, limit: usize, wait: Wait) -> Option<Vec<Callback<()>>> {
        let inner = &*self.inner;
        let mut state = inner.state.lock();
        loop {
            if self.stopped() {
                return None;
            }
            let now = inner.clock.now();
            state.fire_expired(now);

            if !state.queue.is_empty() {
                let n = limit
                    .min(inner.config.run_batch_limit.max(1))
                    .min(state.queue.len());
                return Some(state.queue.drain(..n).collect());
            }

            if state.outstanding_work == 0 && state.pending_waits == 0 {
                inner.stopped.store(true, Ordering::Release);
                tracing::trace!(context = inner.id, "io context out of work");
                return None;
            }

            let wake_at = match wait {
                Wait::Never => return None,
                Wait::Until(until) if now >= until => return None,
                Wait::Until(until) => Some(
                    state
                        .timers
                        .peek_deadline()
                        .map_or(until, |next| next.min(until)),
                ),
                Wait::Forever => state.timers.peek_deadline(),
            };

            match (wake_at, inner.virtual_clock.as_ref()) {
                (Some(at), Some(clock)) => {
                    tracing::trace!(context = inner.id, to = %at, "advancing virtual clock");
                    clock.advance_to(at);
                }
                (Some(at), None) => {
                    let _ = inner.wakeup.wait_for(&mut state, now.until(at));
                }
                (None, _) => inner.wakeup.wait(&mut state),
            }
        }
    }
}

impl Drop for IoContext {
    fn drop(&mut self) {
        self.inner.stopped.store(true, Ordering::Release);
        // Destroying pending work can queue more (cancelled waits, released
        // guards); keep draining until nothing is left.
        loop {
            let (tasks, waiters) = {
                let mut state = self.inner.state.lock();
                let tasks: Vec<_> = state.queue.drain(..).collect();
                let mut waiters = Vec::new();
                for slot in state.slots.values_mut() {
                    waiters.extend(slot.waiters.drain(..));
                }
                state.pending_waits = 0;
                (tasks, waiters)
            };
            if tasks.is_empty() && waiters.is_empty() {
                break;
            }
            drop(tasks);
            drop(waiters);
        }
        tracing::debug!(context = self.inner.id, "io context shut down");
    }
}

impl fmt::Debug for IoContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoContext")
            .field("id", &self.inner.id)
            .field("stopped", &self.stopped())
            .finish_non_exhaustive()
    }
}

/// Cheap, cloneable handle that submits work to an [`IoContext`].
#[derive(Clone)]
pub struct IoExecutor {
    inner: Arc<Inner>,
}

impl IoExecutor {
    /// Returns the current time of the owning context's clock.
    #[must_use]
    pub fn now(&self) -> Time {
        self.inner.clock.now()
    }

    // ------------------------------------------------------------------
    // Timer slots used by `SteadyTimer`
    // ------------------------------------------------------------------

    pub(crate) fn timer_register(&self) -> u64 {
        let mut state = self.inner.state.lock();
        let id = state.next_timer;
        state.next_timer += 1;
        state.slots.insert(
            id,
            TimerSlot {
                deadline: None,
                generation: 0,
                waiters: SmallVec::new(),
            },
        );
        id
    }

    pub(crate) fn timer_deadline(&self, timer: u64) -> Option<Time> {
        self.inner
            .state
            .lock()
            .slots
            .get(&timer)
            .and_then(|slot| slot.deadline)
    }

    /// Sets the deadline and aborts pending waits. Returns how many were aborted.
    pub(crate) fn timer_set_deadline(&self, timer: u64, deadline: Option<Time>) -> usize {
        self.inner.with_state(|state| {
            let aborted = state.complete_waits(timer, Status::OperationAborted);
            if let Some(slot) = state.slots.get_mut(&timer) {
                slot.deadline = deadline;
            }
            aborted
        })
    }

    pub(crate) fn timer_wait(&self, timer: u64, waiter: Callback<Status>) {
        let now = self.inner.clock.now();
        self.inner.with_state(|state| {
            let Some(slot) = state.slots.get_mut(&timer) else {
                state.queue.push_back(waiter.bind(Status::OperationAborted));
                return;
            };
            let Some(deadline) = slot.deadline else {
                state.queue.push_back(waiter.bind(Status::Ok));
                return;
            };
            slot.waiters.push(waiter);
            let generation = slot.generation;
            state.pending_waits += 1;
            state.timers.insert(timer, generation, deadline);
            if deadline <= now {
                state.fire_expired(now);
            }
        });
    }

    pub(crate) fn timer_deregister(&self, timer: u64) {
        self.inner.with_state(|state| {
            state.complete_waits(timer, Status::OperationAborted);
            state.slots.remove(&timer);
        });
    }
}

impl Executor for IoExecutor {
    fn dispatch(&self, task: Callback<()>) {
        if running_here(self.inner.id) {
            let _ = task.call(());
        } else {
            self.inner.post(task);
        }
    }

    fn post(&self, task: Callback<()>) {
        self.inner.post(task);
    }

    fn running_in_this_thread(&self) -> bool {
        running_here(self.inner.id)
    }

    fn on_work_started(&self) {
        self.inner.state.lock().outstanding_work += 1;
    }

    fn on_work_finished(&self) {
        let mut state = self.inner.state.lock();
        state.outstanding_work = state.outstanding_work.saturating_sub(1);
        if state.outstanding_work == 0 {
            self.inner.wakeup.notify_all();
        }
    }
}

impl PartialEq for IoExecutor {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for IoExecutor {}

impl fmt::Debug for IoExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoExecutor")
            .field("context", &self.inner.id)
            .finish()
    }
}
