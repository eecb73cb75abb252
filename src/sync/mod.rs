//! Synchronized state.
//!
//! - [`Synchronized`]: a value reachable only through a closure run under
//!   its lock, with deadlock-free locking of several cells at once
//! - [`synchronize`]: wraps a function so every call runs under one cell's lock

mod synchronized;

pub use synchronized::{synchronize, Synchronized};
