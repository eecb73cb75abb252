//! Executor abstraction and outstanding-work tracking.

use core::fmt;

use crate::callback::Callback;

/// Something that runs submitted tasks.
///
/// The three submission verbs differ only in when the task may run:
///
/// - [`dispatch`](Self::dispatch) may run the task before returning when
///   the caller is already inside the executor.
/// - [`post`](Self::post) never runs the task before returning.
/// - [`defer`](Self::defer) is a `post` hinting that the task continues the
///   caller's work.
///
/// Outstanding work keeps an executor's run loop alive even while its queue
/// is empty; use [`WorkGuard`] rather than calling the counters directly.
pub trait Executor: Clone + Send + Sync + 'static {
    /// Runs `task` inline if possible, otherwise queues it.
    fn dispatch(&self, task: Callback<()>);

    /// Queues `task`.
    fn post(&self, task: Callback<()>);

    /// Queues `task` as a continuation of the current one.
    fn defer(&self, task: Callback<()>) {
        self.post(task);
    }

    /// Returns true if the calling thread is running this executor's tasks.
    fn running_in_this_thread(&self) -> bool;

    /// Records one more unit of outstanding work.
    fn on_work_started(&self);

    /// Releases one unit of outstanding work.
    fn on_work_finished(&self);
}

/// RAII token for one unit of outstanding work.
///
/// Dropping or [`reset`](Self::reset)ting the guard releases the work
/// exactly once.
#[must_use = "dropping a work guard releases the work immediately"]
pub struct WorkGuard<E: Executor> {
    executor: E,
    owns_work: bool,
}

impl<E: Executor> WorkGuard<E> {
    /// Acquires work on `executor`.
    pub fn new(executor: E) -> Self {
        executor.on_work_started();
        Self {
            executor,
            owns_work: true,
        }
    }

    /// Returns the guarded executor.
    #[must_use]
    pub const fn executor(&self) -> &E {
        &self.executor
    }

    /// Returns true until the work is released.
    #[must_use]
    pub const fn owns_work(&self) -> bool {
        self.owns_work
    }

    /// Releases the work early.
    pub fn reset(&mut self) {
        if self.owns_work {
            self.owns_work = false;
            self.executor.on_work_finished();
        }
    }
}

impl<E: Executor> Drop for WorkGuard<E> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<E: Executor> fmt::Debug for WorkGuard<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkGuard")
            .field("owns_work", &self.owns_work)
            .finish_non_exhaustive()
    }
}
