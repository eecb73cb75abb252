//! A value guarded by a lock and reachable only through closures.
//!
//! Every cell is assigned a process-unique id when it is created. Operations
//! that lock more than one cell acquire the locks in ascending id order, so
//! two threads locking the same cells in opposite argument order cannot
//! deadlock.

use core::fmt;
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};

static NEXT_CELL_ID: AtomicU64 = AtomicU64::new(1);

/// A value accessible only while its lock is held.
///
/// # Example
///
/// ```
/// use weft::sync::Synchronized;
///
/// let from = Synchronized::new(10_u32);
/// let to = Synchronized::new(0_u32);
/// Synchronized::apply_pair(&from, &to, |a, b| {
///     *a -= 4;
///     *b += 4;
/// })
/// .unwrap();
/// assert_eq!(to.apply(|v| *v), 4);
/// ```
pub struct Synchronized<T> {
    id: u64,
    value: Mutex<T>,
}

impl<T> Synchronized<T> {
    /// Wraps `value` in a new cell.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            id: NEXT_CELL_ID.fetch_add(1, Ordering::Relaxed),
            value: Mutex::new(value),
        }
    }

    /// Returns the lock-ordering id of this cell.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Runs `f` with exclusive access to the value.
    pub fn apply<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.value.lock();
        f(&mut guard)
    }

    /// Runs `f` with exclusive access to the values of two distinct cells.
    ///
    /// Fails with [`ErrorKind::InvalidState`](crate::error::ErrorKind::InvalidState)
    /// when `a` and `b` are the same cell.
    pub fn apply_pair<U, R>(
        a: &Self,
        b: &Synchronized<U>,
        f: impl FnOnce(&mut T, &mut U) -> R,
    ) -> Result<R> {
        if a.id == b.id {
            return Err(Error::invalid_state("cannot lock the same cell twice"));
        }
        let (mut ga, mut gb) = if a.id < b.id {
            let ga = a.value.lock();
            (ga, b.value.lock())
        } else {
            let gb = b.value.lock();
            (a.value.lock(), gb)
        };
        Ok(f(&mut ga, &mut gb))
    }

    /// Runs `f` with exclusive access to every cell in `cells`.
    ///
    /// The slice passed to `f` follows the order of `cells`, whatever order
    /// the locks were taken in. Fails with `InvalidState` if a cell appears
    /// twice.
    pub fn apply_many<R>(cells: &[&Self], f: impl FnOnce(&mut [&mut T]) -> R) -> Result<R> {
        let mut order: Vec<usize> = (0..cells.len()).collect();
        order.sort_by_key(|&i| cells[i].id);
        if order.windows(2).any(|w| cells[w[0]].id == cells[w[1]].id) {
            return Err(Error::invalid_state("cannot lock the same cell twice"));
        }

        let mut guards: Vec<(usize, MutexGuard<'_, T>)> = order
            .into_iter()
            .map(|i| (i, cells[i].value.lock()))
            .collect();
        guards.sort_by_key(|(i, _)| *i);

        let mut values: Vec<&mut T> = guards.iter_mut().map(|(_, g)| &mut **g).collect();
        Ok(f(&mut values))
    }

    /// Returns a mutable reference without locking.
    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    /// Consumes the cell and returns the value.
    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T: Default> Default for Synchronized<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for Synchronized<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Synchronized");
        d.field("id", &self.id);
        match self.value.try_lock() {
            Some(value) => d.field("value", &*value),
            None => d.field("value", &"<locked>"),
        };
        d.finish()
    }
}

/// Wraps `f` so that each call runs under `cell`'s lock.
///
/// The returned function passes the guarded value to `f` alongside its own
/// argument and may be called any number of times.
pub fn synchronize<T, A, R, F>(cell: Arc<Synchronized<T>>, mut f: F) -> impl FnMut(A) -> R
where
    F: FnMut(&mut T, A) -> R,
{
    move |arg| cell.apply(|value| f(value, arg))
}
