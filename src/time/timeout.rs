//! Many timeouts, one primitive timer.
//!
//! A [`TimeoutService`] keeps every armed [`Timeout`] in a map ordered by
//! `(expiry, arm sequence)` and programs its single [`PrimitiveTimer`] for
//! the earliest one. When the primitive timer fires, the service completes
//! every entry that is due, then reprograms the timer for the new earliest
//! expiry or disarms it when nothing is left.
//!
//! # Invariants
//!
//! - The primitive timer's deadline is the earliest armed expiry, and the
//!   timer is disarmed exactly when no entry is armed.
//! - Waiters are extracted under the service lock and invoked after it is
//!   released.
//! - User handlers never run inside a service call: every waiter posts its
//!   handler through the service executor, holding a work guard until then.
//! - An entry is due when `expiry <= now`.

use core::fmt;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::callback::{Callback, IntoCallback};
use crate::error::{Result, Status};
use crate::runtime::{Executor, IoContext, IoExecutor, PrimitiveTimer, SteadyTimer, WorkGuard};
use crate::sync::Synchronized;
use crate::types::Time;
use crate::util::{Arena, ArenaIndex};

type OrderKey = (Time, u64);

struct Entry {
    expiry: Time,
    key: Option<OrderKey>,
    waiter: Callback<Status>,
}

struct State<P> {
    timer: P,
    entries: Arena<Entry>,
    order: BTreeMap<OrderKey, ArenaIndex>,
    next_seq: u64,
}

impl<P: PrimitiveTimer> State<P> {
    fn unlink(&mut self, index: ArenaIndex) -> bool {
        let Some(entry) = self.entries.get_mut(index) else {
            return false;
        };
        match entry.key.take() {
            Some(key) => self.order.remove(&key).is_some(),
            None => false,
        }
    }

    fn link(&mut self, index: ArenaIndex, expiry: Time) {
        let key = (expiry, self.next_seq);
        self.next_seq += 1;
        if let Some(entry) = self.entries.get_mut(index) {
            entry.expiry = expiry;
            entry.key = Some(key);
            self.order.insert(key, index);
        }
    }

    fn earliest(&self) -> Option<Time> {
        self.order.first_key_value().map(|(&(expiry, _), _)| expiry)
    }

    /// Points the primitive timer at the earliest expiry, or disarms it.
    fn reschedule(&mut self, fire: impl FnOnce() -> Callback<Status>) {
        match self.earliest() {
            Some(earliest) if self.timer.deadline() != Some(earliest) => {
                tracing::trace!(deadline = %earliest, "timeout service reprogramming timer");
                self.timer.expires_at(earliest);
                self.timer.async_wait(fire());
            }
            Some(_) => {}
            None => {
                if self.timer.deadline().is_some() {
                    tracing::trace!("timeout service disarming timer");
                    self.timer.cancel();
                }
            }
        }
    }

    /// Pops the earliest entry if it is due and takes its waiter.
    fn pop_due(&mut self) -> Option<Callback<Status>> {
        let now = self.timer.now();
        let (&key, &index) = self.order.first_key_value()?;
        if key.0 > now {
            return None;
        }
        self.order.remove(&key);
        let entry = self.entries.get_mut(index)?;
        entry.key = None;
        Some(entry.waiter.take())
    }
}

/// Registry of timeouts sharing one primitive timer.
///
/// # Example
///
/// ```
/// use weft::error::Status;
/// use weft::runtime::IoContext;
/// use weft::time::TimeoutService;
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let ctx = IoContext::with_virtual_clock();
/// let service = TimeoutService::on(&ctx);
/// let timeout = service.create_timeout().unwrap();
///
/// let fired = Arc::new(AtomicBool::new(false));
/// let flag = Arc::clone(&fired);
/// timeout.arm_from_now(Duration::from_millis(100));
/// timeout.wait(move |status: Status| flag.store(status.is_ok(), Ordering::SeqCst));
///
/// ctx.run();
/// assert!(fired.load(Ordering::SeqCst));
/// assert_eq!(ctx.now().as_millis(), 100);
/// ```
pub struct TimeoutService<P: PrimitiveTimer, E: Executor> {
    state: Synchronized<State<P>>,
    executor: E,
    this: Weak<Self>,
}

impl TimeoutService<SteadyTimer, IoExecutor> {
    /// Creates a service on `ctx` backed by a [`SteadyTimer`].
    #[must_use]
    pub fn on(ctx: &IoContext) -> Arc<Self> {
        Self::new(SteadyTimer::new(ctx), ctx.executor())
    }
}

impl<P: PrimitiveTimer, E: Executor> TimeoutService<P, E> {
    /// Creates a service that programs `timer` and posts handlers on `executor`.
    #[must_use]
    pub fn new(timer: P, executor: E) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            state: Synchronized::new(State {
                timer,
                entries: Arena::new(),
                order: BTreeMap::new(),
                next_seq: 0,
            }),
            executor,
            this: this.clone(),
        })
    }

    /// Creates an unarmed timeout registered with this service.
    ///
    /// Its expiry starts at [`Time::ZERO`], so waiting on it before arming
    /// completes immediately.
    pub fn create_timeout(self: &Arc<Self>) -> Result<Timeout<P, E>> {
        Timeout::new(self)
    }

    /// Returns the executor handlers are posted on.
    #[must_use]
    pub const fn executor(&self) -> &E {
        &self.executor
    }

    /// Current time of the primitive timer's clock.
    #[must_use]
    pub fn now(&self) -> Time {
        self.state.apply(|st| st.timer.now())
    }

    /// Number of armed timeouts.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.state.apply(|st| st.order.len())
    }

    /// Earliest armed expiry.
    #[must_use]
    pub fn next_expiry(&self) -> Option<Time> {
        self.state.apply(|st| st.earliest())
    }

    /// Deadline currently programmed on the primitive timer.
    #[must_use]
    pub fn timer_deadline(&self) -> Option<Time> {
        self.state.apply(|st| st.timer.deadline())
    }

    fn fire_handler(&self) -> Callback<Status> {
        let this = self.this.clone();
        Callback::new(move |status: Status| {
            if status.is_err() {
                return;
            }
            if let Some(service) = this.upgrade() {
                service.expire_due();
            }
        })
    }

    /// Wraps `handler` so that completing it posts through the executor.
    fn suspend(&self, handler: Callback<Status>) -> Callback<Status> {
        let guard = WorkGuard::new(self.executor.clone());
        Callback::new(move |status: Status| {
            guard.executor().post(handler.bind(status));
            drop(guard);
        })
    }

    fn expire_due(&self) {
        let mut fired = 0_usize;
        while let Some(waiter) = self.state.apply(State::pop_due) {
            fired += 1;
            let _ = waiter.call(Status::Ok);
        }
        tracing::debug!(fired, "timeout service expired entries");
        self.state.apply(|st| st.reschedule(|| self.fire_handler()));
    }
}

impl<P: PrimitiveTimer, E: Executor> fmt::Debug for TimeoutService<P, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (pending, earliest) = self.state.apply(|st| (st.order.len(), st.earliest()));
        f.debug_struct("TimeoutService")
            .field("pending", &pending)
            .field("next_expiry", &earliest)
            .finish_non_exhaustive()
    }
}

/// A rearmable deadline with at most one waiter.
///
/// Dropping a timeout cancels it: a stored waiter completes with
/// [`Status::Cancelled`].
pub struct Timeout<P: PrimitiveTimer, E: Executor> {
    service: Arc<TimeoutService<P, E>>,
    index: ArenaIndex,
}

impl<P: PrimitiveTimer, E: Executor> Timeout<P, E> {
    /// Creates an unarmed timeout on `service`.
    pub fn new(service: &Arc<TimeoutService<P, E>>) -> Result<Self> {
        let index = service.state.apply(|st| {
            st.entries.insert(Entry {
                expiry: Time::ZERO,
                key: None,
                waiter: Callback::empty(),
            })
        })?;
        Ok(Self {
            service: Arc::clone(service),
            index,
        })
    }

    /// Returns the owning service.
    #[must_use]
    pub fn service(&self) -> &Arc<TimeoutService<P, E>> {
        &self.service
    }

    /// Arms the timeout to expire `duration` from now.
    ///
    /// Returns true if it was already armed; the earlier expiry is replaced.
    pub fn arm_from_now(&self, duration: Duration) -> bool {
        self.arm_with(|now| now + duration)
    }

    /// Arms the timeout to expire at `expiry`.
    ///
    /// Returns true if it was already armed; the earlier expiry is replaced.
    pub fn arm_at(&self, expiry: Time) -> bool {
        self.arm_with(|_| expiry)
    }

    fn arm_with(&self, expiry: impl FnOnce(Time) -> Time) -> bool {
        let service = &self.service;
        service.state.apply(|st| {
            let expiry = expiry(st.timer.now());
            let was_armed = st.unlink(self.index);
            st.link(self.index, expiry);
            tracing::debug!(timeout = ?self.index, expiry = %expiry, was_armed, "timeout armed");
            st.reschedule(|| service.fire_handler());
            was_armed
        })
    }

    /// Registers `handler` to run when the timeout expires or is cancelled.
    ///
    /// If the expiry has already passed, `handler` is posted with
    /// [`Status::Ok`] right away. A waiter registered earlier on the same
    /// timeout is completed with [`Status::OperationAborted`]. The handler
    /// always runs through the service executor.
    ///
    /// A timeout that was cancelled keeps its last expiry. Waiting on it
    /// before that expiry stores the handler without arming anything: it
    /// completes only when the timeout is armed again, cancelled or dropped.
    /// Until then it holds work on the executor, so a run loop waiting for
    /// work to finish does not return.
    pub fn wait(&self, handler: impl IntoCallback<Status>) {
        let waiter = self.service.suspend(handler.into_callback());
        let (expired, replaced) = self.service.state.apply(|st| {
            let now = st.timer.now();
            match st.entries.get_mut(self.index) {
                Some(entry) if entry.expiry <= now => (Some(waiter), Callback::empty()),
                Some(entry) => (None, std::mem::replace(&mut entry.waiter, waiter)),
                None => (Some(waiter), Callback::empty()),
            }
        });
        if let Some(waiter) = expired {
            tracing::trace!(timeout = ?self.index, "wait on expired timeout");
            let _ = waiter.call(Status::Ok);
        }
        if replaced.is_armed() {
            tracing::trace!(timeout = ?self.index, "previous waiter aborted");
            let _ = replaced.call(Status::OperationAborted);
        }
    }

    /// Unarms the timeout and completes a stored waiter with [`Status::Cancelled`].
    ///
    /// Returns true if the timeout was armed or a waiter was completed.
    pub fn cancel(&self) -> bool {
        let service = &self.service;
        let (was_armed, waiter) = service.state.apply(|st| {
            let was_armed = st.unlink(self.index);
            let waiter = st
                .entries
                .get_mut(self.index)
                .map(|entry| entry.waiter.take())
                .unwrap_or_default();
            if was_armed {
                st.reschedule(|| service.fire_handler());
            }
            (was_armed, waiter)
        });
        let fired = waiter.is_armed();
        if fired {
            let _ = waiter.call(Status::Cancelled);
        }
        tracing::debug!(timeout = ?self.index, was_armed, fired, "timeout cancelled");
        was_armed || fired
    }

    /// The expiry most recently set, armed or not.
    #[must_use]
    pub fn current_expiry(&self) -> Time {
        self.service.state.apply(|st| {
            st.entries
                .get(self.index)
                .map_or(Time::ZERO, |entry| entry.expiry)
        })
    }

    /// Returns true while the timeout is armed.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.service.state.apply(|st| {
            st.entries
                .get(self.index)
                .is_some_and(|entry| entry.key.is_some())
        })
    }
}

impl<P: PrimitiveTimer, E: Executor> Drop for Timeout<P, E> {
    fn drop(&mut self) {
        let service = &self.service;
        let entry = service.state.apply(|st| {
            let was_armed = st.unlink(self.index);
            let entry = st.entries.remove(self.index);
            if was_armed {
                st.reschedule(|| service.fire_handler());
            }
            entry
        });
        if let Some(entry) = entry {
            if entry.waiter.is_armed() {
                let _ = entry.waiter.call(Status::Cancelled);
            }
        }
    }
}

impl<P: PrimitiveTimer, E: Executor> fmt::Debug for Timeout<P, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timeout")
            .field("index", &self.index)
            .field("expiry", &self.current_expiry())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    type Log = Arc<Mutex<Vec<(&'static str, Status, Time)>>>;

    fn recorder(log: &Log, ctx: &IoContext, tag: &'static str) -> Callback<Status> {
        let log = Arc::clone(log);
        let clock = ctx.clock();
        Callback::new(move |status| log.lock().push((tag, status, clock.now())))
    }

    #[test]
    fn timeouts_fire_in_expiry_order() {
        init_test("timeouts_fire_in_expiry_order");
        let ctx = IoContext::with_virtual_clock();
        let service = TimeoutService::on(&ctx);
        let log: Log = Arc::default();

        let slow = service.create_timeout().expect("timeout");
        let fast = service.create_timeout().expect("timeout");
        assert!(!slow.arm_from_now(Duration::from_millis(300)));
        assert!(!fast.arm_from_now(Duration::from_millis(100)));
        slow.wait(recorder(&log, &ctx, "300ms"));
        fast.wait(recorder(&log, &ctx, "100ms"));

        ctx.run();
        assert_eq!(
            *log.lock(),
            vec![
                ("100ms", Status::Ok, Time::from_millis(100)),
                ("300ms", Status::Ok, Time::from_millis(300)),
            ]
        );
        assert_eq!(service.pending_count(), 0);
        assert_eq!(service.timer_deadline(), None);
        crate::test_complete!("timeouts_fire_in_expiry_order");
    }

    #[test]
    fn equal_expiries_fire_in_arm_order() {
        init_test("equal_expiries_fire_in_arm_order");
        let ctx = IoContext::with_virtual_clock();
        let service = TimeoutService::on(&ctx);
        let log: Log = Arc::default();
        let tags = ["a", "b", "c"];
        let timeouts: Vec<_> = tags
            .iter()
            .map(|tag| {
                let t = service.create_timeout().expect("timeout");
                t.arm_at(Time::from_millis(20));
                t.wait(recorder(&log, &ctx, *tag));
                t
            })
            .collect();

        ctx.run();
        let seen: Vec<_> = log.lock().iter().map(|(tag, _, _)| *tag).collect();
        assert_eq!(seen, tags);
        drop(timeouts);
        crate::test_complete!("equal_expiries_fire_in_arm_order");
    }

    #[test]
    fn expired_wait_is_posted_not_inline() {
        init_test("expired_wait_is_posted_not_inline");
        let ctx = IoContext::with_virtual_clock();
        let service = TimeoutService::on(&ctx);
        let timeout = service.create_timeout().expect("timeout");
        timeout.arm_from_now(Duration::ZERO);

        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        timeout.wait(move |status: Status| {
            assert_eq!(status, Status::Ok);
            flag.store(true, Ordering::SeqCst);
        });
        crate::assert_with_log!(
            !ran.load(Ordering::SeqCst),
            "handler deferred to the executor",
            false,
            ran.load(Ordering::SeqCst)
        );
        ctx.run();
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(ctx.now(), Time::ZERO);
        crate::test_complete!("expired_wait_is_posted_not_inline");
    }

    #[test]
    fn never_armed_timeout_completes_immediately() {
        init_test("never_armed_timeout_completes_immediately");
        let ctx = IoContext::with_virtual_clock();
        let service = TimeoutService::on(&ctx);
        let log: Log = Arc::default();
        let timeout = service.create_timeout().expect("timeout");
        assert_eq!(timeout.current_expiry(), Time::ZERO);
        timeout.wait(recorder(&log, &ctx, "unarmed"));
        ctx.run();
        assert_eq!(*log.lock(), vec![("unarmed", Status::Ok, Time::ZERO)]);
        crate::test_complete!("never_armed_timeout_completes_immediately");
    }

    #[test]
    fn cancel_completes_waiter_with_cancelled() {
        init_test("cancel_completes_waiter_with_cancelled");
        let ctx = IoContext::with_virtual_clock();
        let service = TimeoutService::on(&ctx);
        let log: Log = Arc::default();
        let timeout = service.create_timeout().expect("timeout");
        timeout.arm_from_now(Duration::from_millis(100));
        timeout.wait(recorder(&log, &ctx, "cancelled"));

        assert!(timeout.cancel());
        assert!(!timeout.cancel(), "second cancel has nothing to do");
        assert!(!timeout.is_armed());
        assert_eq!(service.timer_deadline(), None);

        ctx.run();
        assert_eq!(*log.lock(), vec![("cancelled", Status::Cancelled, Time::ZERO)]);
        crate::test_complete!("cancel_completes_waiter_with_cancelled");
    }

    #[test]
    fn dropping_a_timeout_cancels_it() {
        init_test("dropping_a_timeout_cancels_it");
        let ctx = IoContext::with_virtual_clock();
        let service = TimeoutService::on(&ctx);
        let log: Log = Arc::default();
        {
            let timeout = service.create_timeout().expect("timeout");
            timeout.arm_from_now(Duration::from_millis(100));
            timeout.wait(recorder(&log, &ctx, "dropped"));
        }
        assert_eq!(service.pending_count(), 0);
        ctx.run();
        assert_eq!(*log.lock(), vec![("dropped", Status::Cancelled, Time::ZERO)]);
        crate::test_complete!("dropping_a_timeout_cancels_it");
    }

    #[test]
    fn second_wait_aborts_the_first() {
        init_test("second_wait_aborts_the_first");
        let ctx = IoContext::with_virtual_clock();
        let service = TimeoutService::on(&ctx);
        let log: Log = Arc::default();
        let timeout = service.create_timeout().expect("timeout");
        timeout.arm_from_now(Duration::from_millis(40));
        timeout.wait(recorder(&log, &ctx, "first"));
        timeout.wait(recorder(&log, &ctx, "second"));

        ctx.run();
        assert_eq!(
            *log.lock(),
            vec![
                ("first", Status::OperationAborted, Time::ZERO),
                ("second", Status::Ok, Time::from_millis(40)),
            ]
        );
        crate::test_complete!("second_wait_aborts_the_first");
    }

    #[test]
    fn rearming_postpones_expiry() {
        init_test("rearming_postpones_expiry");
        let ctx = IoContext::with_virtual_clock();
        let service = TimeoutService::on(&ctx);
        let log: Log = Arc::default();

        let watchdog = Arc::new(service.create_timeout().expect("timeout"));
        watchdog.arm_from_now(Duration::from_millis(100));
        watchdog.wait(recorder(&log, &ctx, "watchdog"));

        let kick = service.create_timeout().expect("timeout");
        kick.arm_from_now(Duration::from_millis(50));
        let dog = Arc::clone(&watchdog);
        kick.wait(move |_status: Status| {
            assert!(dog.arm_from_now(Duration::from_millis(250)));
        });

        ctx.run();
        assert_eq!(
            *log.lock(),
            vec![("watchdog", Status::Ok, Time::from_millis(300))]
        );
        crate::test_complete!("rearming_postpones_expiry");
    }

    #[test]
    fn primitive_timer_tracks_the_earliest_expiry() {
        init_test("primitive_timer_tracks_the_earliest_expiry");
        let ctx = IoContext::with_virtual_clock();
        let service = TimeoutService::on(&ctx);
        let late = service.create_timeout().expect("timeout");
        let early = service.create_timeout().expect("timeout");

        late.arm_at(Time::from_millis(300));
        assert_eq!(service.timer_deadline(), Some(Time::from_millis(300)));
        early.arm_at(Time::from_millis(100));
        assert_eq!(service.timer_deadline(), Some(Time::from_millis(100)));
        assert_eq!(service.next_expiry(), Some(Time::from_millis(100)));

        early.cancel();
        assert_eq!(service.timer_deadline(), Some(Time::from_millis(300)));
        late.cancel();
        assert_eq!(service.timer_deadline(), None);
        assert_eq!(service.pending_count(), 0);
        crate::test_complete!("primitive_timer_tracks_the_earliest_expiry");
    }

    #[test]
    fn arming_twice_reports_previous_registration() {
        init_test("arming_twice_reports_previous_registration");
        let ctx = IoContext::with_virtual_clock();
        let service = TimeoutService::on(&ctx);
        let timeout = service.create_timeout().expect("timeout");
        assert!(!timeout.arm_at(Time::from_millis(10)));
        assert!(timeout.arm_at(Time::from_millis(20)));
        assert_eq!(timeout.current_expiry(), Time::from_millis(20));
        assert_eq!(service.pending_count(), 1);
        crate::test_complete!("arming_twice_reports_previous_registration");
    }

    #[test]
    fn wait_after_cancel_is_held_until_rearmed() {
        init_test("wait_after_cancel_is_held_until_rearmed");
        let ctx = IoContext::with_virtual_clock();
        let service = TimeoutService::on(&ctx);
        let log: Log = Arc::default();
        let timeout = service.create_timeout().expect("timeout");
        timeout.arm_from_now(Duration::from_millis(100));
        assert!(timeout.cancel());

        timeout.wait(recorder(&log, &ctx, "held"));
        assert_eq!(ctx.poll(), 0);
        assert!(log.lock().is_empty(), "stale expiry still ahead");
        assert!(!timeout.is_armed());

        assert!(!timeout.arm_from_now(Duration::from_millis(200)));
        ctx.run();
        assert_eq!(*log.lock(), vec![("held", Status::Ok, Time::from_millis(200))]);
        crate::test_complete!("wait_after_cancel_is_held_until_rearmed");
    }
}
