//! Clocks and the multiplexed timeout service.
//!
//! - [`TimeSource`] abstracts over [`WallClock`] and [`VirtualClock`].
//! - [`TimeoutService`] drives any number of [`Timeout`]s from one
//!   [`PrimitiveTimer`](crate::runtime::PrimitiveTimer).
//!
//! # Virtual vs Wall Time
//!
//! Every component reads time through a [`TimeSource`], so the same code
//! runs against the wall clock in production and a virtual clock in tests.

mod clock;
mod timeout;

pub use clock::{TimeSource, VirtualClock, WallClock};
pub use timeout::{Timeout, TimeoutService};
