//! Core value types shared by the callback, timer and composition layers.
//!
//! - [`time`]: The logical nanosecond timestamp used by every clock

pub mod time;

pub use time::Time;
