//! Composed operations: resumable bodies driven through suboperations.
//!
//! A composed operation is an algorithm that issues a series of
//! asynchronous suboperations (timer waits, reads, other composed
//! operations) and finally reports one result through an *upcall*.
//!
//! The body implements [`OperationBody`]. At every resumption it receives a
//! [`YieldToken`] and returns a [`Step`]:
//!
//! - [`YieldToken::suspend`] hands a continuation to the next suboperation;
//!   the body resumes with that suboperation's result.
//! - [`YieldToken::post_upcall`] finishes, delivering through the executor.
//! - [`YieldToken::upcall`] finishes, delivering inline. Only valid on a
//!   continuation that runs inside the executor.
//!
//! # Guarantees
//!
//! - The launch call performs the first resumption synchronously and never
//!   invokes the upcall itself, even when a suboperation completes inline
//!   before it returns.
//! - [`launch_in`] and [`launch_pinned_in`] take frame and continuation
//!   storage from a [`HandlerAllocator`](crate::callback::HandlerAllocator) and
//!   report storage failures from the launch call.
//! - The operation holds a [`WorkGuard`](crate::runtime::WorkGuard) from
//!   launch until its upcall is posted or about to run inline.
//! - Dropping a pending continuation destroys the whole frame; the upcall is
//!   never invoked.
//!
//! [`Coroutine`] keeps track of resume points for bodies written by hand.

mod coroutine;
mod future;
mod launch;
mod step;

pub use coroutine::Coroutine;
pub use future::UpcallFuture;
pub use launch::{launch, launch_future, launch_in, launch_pinned, launch_pinned_in};
pub use step::{from_fn, FnBody, OperationBody, Step, YieldToken};
