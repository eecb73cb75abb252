//! Weft: erased callbacks, multiplexed timeouts and composed operations.
//!
//! # Overview
//!
//! Weft provides the low-level pieces an event-loop I/O runtime is woven
//! from. Every asynchronous step in it is a one-shot callback handed to an
//! executor; the crate makes those callbacks cheap to store, safe to cancel
//! and easy to compose.
//!
//! # Core Guarantees
//!
//! - **Invoke at most once**: a [`Callback`] is consumed by invocation and
//!   releases its storage before the callable runs
//! - **Drop is cancellation**: destroying a pending callback, timeout or
//!   continuation never delivers a result
//! - **No inline completions**: timeout waiters and posted upcalls always
//!   run through the executor, never inside the call that scheduled them
//! - **One timer**: any number of [`Timeout`](time::Timeout)s share a single
//!   primitive timer that always tracks the earliest deadline
//! - **Deterministic testing**: a virtual clock drives the reference run
//!   loop straight to the next deadline
//!
//! # Module Structure
//!
//! - [`callback`]: Move-only type-erased callbacks and handler allocators
//! - [`compose`]: Composed-operation engine (bodies, yield tokens, launchers)
//! - [`config`]: Runtime configuration with environment overrides
//! - [`error`]: Error types and completion statuses
//! - [`runtime`]: Executor trait, work guards, reference run loop and timer
//! - [`sync`]: Synchronized cells with deadlock-free multi-cell locking
//! - [`time`]: Clocks and the multiplexed timeout service
//! - [`types`]: Core value types
//! - [`util`]: Internal utilities (arenas)
//! - [`test_utils`]: Logging and fault-injection helpers for tests

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]

pub mod callback;
pub mod compose;
pub mod config;
pub mod error;
pub mod runtime;
pub mod sync;
pub mod test_utils;
pub mod time;
pub mod types;
pub mod util;

// Re-exports for convenient access to core types
pub use callback::{Callback, CallbackList, HandlerAllocator, HandlerBox, IntoCallback};
pub use compose::{
    launch, launch_future, launch_in, launch_pinned, launch_pinned_in, OperationBody, YieldToken,
};
pub use config::{ClockMode, ConfigError, RuntimeConfig};
pub use error::{Error, ErrorCategory, ErrorKind, Result, Status};
pub use runtime::{Executor, IoContext, IoExecutor, PrimitiveTimer, SteadyTimer, WorkGuard};
pub use sync::Synchronized;
pub use time::{Timeout, TimeoutService};
pub use types::Time;
