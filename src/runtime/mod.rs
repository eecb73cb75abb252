//! Executors and the reference event loop.
//!
//! - [`Executor`] / [`WorkGuard`]: the scheduling interface every primitive
//!   in this crate is written against
//! - [`IoContext`] / [`IoExecutor`]: a queue-plus-timers event loop
//!   implementing it
//! - [`PrimitiveTimer`] / [`SteadyTimer`]: a single-deadline timer on that loop

mod executor;
mod io_context;
mod steady_timer;
mod timer;

pub use executor::{Executor, WorkGuard};
pub use io_context::{IoContext, IoExecutor};
pub use steady_timer::{PrimitiveTimer, SteadyTimer};
