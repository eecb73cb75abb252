//! Single-deadline timers.

use core::fmt;

use super::io_context::{IoContext, IoExecutor};
use crate::callback::Callback;
use crate::error::Status;
use crate::types::Time;

/// A timer with one deadline and any number of pending waits.
///
/// This is the primitive a [`TimeoutService`](crate::time::TimeoutService)
/// multiplexes its entries onto.
///
/// Waits complete through the owning executor, never inline:
/// - with [`Status::Ok`] once the deadline passes (immediately when no
///   deadline is set),
/// - with [`Status::OperationAborted`] when the deadline is reprogrammed or
///   the timer is cancelled or dropped.
pub trait PrimitiveTimer: Send + 'static {
    /// Current time of the timer's clock.
    fn now(&self) -> Time;

    /// Programs the deadline, aborting pending waits. Returns how many were aborted.
    fn expires_at(&mut self, deadline: Time) -> usize;

    /// Registers a wait for the current deadline.
    fn async_wait(&mut self, handler: Callback<Status>);

    /// Aborts pending waits and clears the deadline. Returns how many were aborted.
    fn cancel(&mut self) -> usize;

    /// The programmed deadline, if any.
    fn deadline(&self) -> Option<Time>;
}

/// [`PrimitiveTimer`] backed by an [`IoContext`]'s timer heap.
pub struct SteadyTimer {
    executor: IoExecutor,
    id: u64,
}

impl SteadyTimer {
    /// Creates an unprogrammed timer on `ctx`.
    #[must_use]
    pub fn new(ctx: &IoContext) -> Self {
        Self::with_executor(ctx.executor())
    }

    /// Creates an unprogrammed timer on the context behind `executor`.
    #[must_use]
    pub fn with_executor(executor: IoExecutor) -> Self {
        let id = executor.timer_register();
        Self { executor, id }
    }

    /// Returns the executor waits complete on.
    #[must_use]
    pub const fn executor(&self) -> &IoExecutor {
        &self.executor
    }
}

impl PrimitiveTimer for SteadyTimer {
    fn now(&self) -> Time {
        self.executor.now()
    }

    fn expires_at(&mut self, deadline: Time) -> usize {
        tracing::trace!(timer = self.id, deadline = %deadline, "primitive timer programmed");
        self.executor.timer_set_deadline(self.id, Some(deadline))
    }

    fn async_wait(&mut self, handler: Callback<Status>) {
        self.executor.timer_wait(self.id, handler);
    }

    fn cancel(&mut self) -> usize {
        tracing::trace!(timer = self.id, "primitive timer cancelled");
        self.executor.timer_set_deadline(self.id, None)
    }

    fn deadline(&self) -> Option<Time> {
        self.executor.timer_deadline(self.id)
    }
}

impl Drop for SteadyTimer {
    fn drop(&mut self) {
        self.executor.timer_deregister(self.id);
    }
}

impl fmt::Debug for SteadyTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SteadyTimer")
            .field("id", &self.id)
            .field("deadline", &self.deadline())
            .finish()
    }
}
