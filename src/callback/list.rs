//! Ordered queue of callbacks.

use std::collections::VecDeque;

use super::erased::{Callback, IntoCallback};
use crate::error::{Error, Result};

/// An ordered list of armed callbacks.
///
/// Empty callbacks are never stored; pushing one is a no-op. Dropping or
/// clearing the list destroys the remaining callbacks without invoking them.
#[derive(Debug)]
pub struct CallbackList<T, R = ()> {
    entries: VecDeque<Callback<T, R>>,
}

impl<T, R> Default for CallbackList<T, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, R> CallbackList<T, R> {
    /// Creates an empty list.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    /// Number of stored callbacks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no callback is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends a callback.
    pub fn push_back(&mut self, cb: impl IntoCallback<T, R>) {
        let cb = cb.into_callback();
        if cb.is_armed() {
            self.entries.push_back(cb);
        }
    }

    /// Prepends a callback.
    pub fn push_front(&mut self, cb: impl IntoCallback<T, R>) {
        let cb = cb.into_callback();
        if cb.is_armed() {
            self.entries.push_front(cb);
        }
    }

    /// Removes the first callback.
    pub fn pop_front(&mut self) -> Option<Callback<T, R>> {
        self.entries.pop_front()
    }

    /// Removes the last callback.
    pub fn pop_back(&mut self) -> Option<Callback<T, R>> {
        self.entries.pop_back()
    }

    /// Removes the callback at `index`.
    pub fn remove(&mut self, index: usize) -> Option<Callback<T, R>> {
        self.entries.remove(index)
    }

    /// Moves every callback of `other` to the back of `self`.
    pub fn append(&mut self, other: &mut Self) {
        self.entries.append(&mut other.entries);
    }

    /// Destroys every callback without invoking it.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Removes and invokes the first callback.
    ///
    /// Fails with `InvalidState` if the list is empty.
    pub fn invoke_front(&mut self, arg: T) -> Result<R> {
        let cb = self
            .entries
            .pop_front()
            .ok_or_else(|| Error::invalid_state("callback list is empty"))?;
        cb.call(arg)
    }

    /// Invokes every callback in order with a clone of `arg`.
    ///
    /// The list is emptied before the first callback runs, so callbacks
    /// may push new entries onto a list they can reach; those are not
    /// invoked by this call.
    pub fn drain_invoke(&mut self, arg: &T) -> Vec<R>
    where
        T: Clone,
    {
        let drained = std::mem::take(&mut self.entries);
        drained
            .into_iter()
            .filter_map(|cb| cb.call(arg.clone()).ok())
            .collect()
    }
}

impl<T, R> Extend<Callback<T, R>> for CallbackList<T, R> {
    fn extend<I: IntoIterator<Item = Callback<T, R>>>(&mut self, iter: I) {
        for cb in iter {
            self.push_back(cb);
        }
    }
}
