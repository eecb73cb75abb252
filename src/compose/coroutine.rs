//! Resume-point bookkeeping for hand-written bodies.

use crate::error::{Error, Result};

/// Tracks where a body left off between resumptions.
///
/// A body calls [`reenter`](Self::reenter) at the top of every resumption
/// and dispatches on the returned point: `None` on the first entry, the
/// point recorded by the last [`suspend_at`](Self::suspend_at) afterwards.
///
/// ```
/// use weft::compose::Coroutine;
///
/// #[derive(Debug, PartialEq)]
/// enum Point { Read, Write }
///
/// let mut co = Coroutine::new();
/// assert_eq!(co.reenter().unwrap(), None);
/// co.suspend_at(Point::Read);
/// assert_eq!(co.reenter().unwrap(), Some(Point::Read));
/// assert!(co.is_continuation());
/// co.suspend_at(Point::Write);
/// assert_eq!(co.reenter().unwrap(), Some(Point::Write));
/// co.complete();
/// assert!(co.reenter().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coroutine<P> {
    point: Option<P>,
    entries: u64,
    complete: bool,
}

impl<P> Coroutine<P> {
    /// Creates a coroutine that has not been entered yet.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            point: None,
            entries: 0,
            complete: false,
        }
    }

    /// Enters the body, returning the recorded resume point.
    ///
    /// Fails with `InvalidState` once the coroutine is complete.
    pub fn reenter(&mut self) -> Result<Option<P>> {
        if self.complete {
            return Err(Error::invalid_state("coroutine reentered after completion"));
        }
        self.entries += 1;
        Ok(self.point.take())
    }

    /// Records where the next entry resumes.
    pub fn suspend_at(&mut self, point: P) {
        self.point = Some(point);
    }

    /// Marks the body finished.
    pub fn complete(&mut self) {
        self.point = None;
        self.complete = true;
    }

    /// Returns true once [`complete`](Self::complete) has been called.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.complete
    }

    /// Returns true after the first entry.
    #[must_use]
    pub const fn is_continuation(&self) -> bool {
        self.entries > 1
    }

    /// Number of entries so far.
    #[must_use]
    pub const fn entries(&self) -> u64 {
        self.entries
    }
}

impl<P> Default for Coroutine<P> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Point {
        Connect,
        Handshake,
    }

    #[test]
    fn first_entry_has_no_point() {
        let mut co: Coroutine<Point> = Coroutine::default();
        assert!(!co.is_continuation());
        assert_eq!(co.reenter().expect("enter"), None);
        assert!(!co.is_continuation());
        assert_eq!(co.entries(), 1);
    }

    #[test]
    fn points_are_consumed_on_reentry() {
        let mut co = Coroutine::new();
        co.reenter().expect("enter");
        co.suspend_at(Point::Connect);
        assert_eq!(co.reenter().expect("enter"), Some(Point::Connect));
        assert!(co.is_continuation());
        // Not suspended again: the next entry starts without a point.
        assert_eq!(co.reenter().expect("enter"), None);
        co.suspend_at(Point::Handshake);
        assert_eq!(co.reenter().expect("enter"), Some(Point::Handshake));
    }

    #[test]
    fn reentering_a_completed_coroutine_fails() {
        let mut co = Coroutine::new();
        co.reenter().expect("enter");
        co.suspend_at(Point::Connect);
        co.complete();
        assert!(co.is_complete());
        let err = co.reenter().expect_err("completed");
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(co.entries(), 1);
    }
}
