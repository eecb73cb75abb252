//! Composed operations driven by timeouts.

mod common;

use common::*;
use futures_lite::future::block_on;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use weft::callback::Callback;
use weft::compose::{launch, launch_future, launch_pinned, Coroutine, OperationBody, Step, YieldToken};
use weft::error::Status;
use weft::runtime::{IoContext, IoExecutor, SteadyTimer};
use weft::time::{Timeout, TimeoutService};
use weft::types::Time;

type Service = TimeoutService<SteadyTimer, IoExecutor>;
type IoTimeout = Timeout<SteadyTimer, IoExecutor>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Beat {
    Sleeping,
}

/// Sleeps `limit` times for `period`, then reports how many beats completed.
struct Heartbeat {
    timeout: Arc<IoTimeout>,
    co: Coroutine<Beat>,
    beats: u32,
    limit: u32,
    period: Duration,
}

impl Heartbeat {
    fn new(timeout: Arc<IoTimeout>, limit: u32, period: Duration) -> Self {
        Self {
            timeout,
            co: Coroutine::new(),
            beats: 0,
            limit,
            period,
        }
    }
}

impl OperationBody for Heartbeat {
    type Resume = Status;
    type Output = (Status, u32);

    fn resume(
        &mut self,
        token: YieldToken<Status, (Status, u32)>,
        input: Option<Status>,
    ) -> Step<Status, (Status, u32)> {
        match self.co.reenter() {
            Ok(None) => {}
            Ok(Some(Beat::Sleeping)) => match input.unwrap_or_default() {
                Status::Ok => self.beats += 1,
                status => {
                    self.co.complete();
                    return token.upcall((status, self.beats));
                }
            },
            Err(_) => return token.post_upcall((Status::OperationAborted, self.beats)),
        }
        if self.beats == self.limit {
            self.co.complete();
            return token.upcall((Status::Ok, self.beats));
        }
        self.timeout.arm_from_now(self.period);
        self.co.suspend_at(Beat::Sleeping);
        let timeout = Arc::clone(&self.timeout);
        token.suspend(move |k: Callback<Status>| timeout.wait(k))
    }
}

fn heartbeat(service: &Arc<Service>, limit: u32, period_ms: u64) -> Heartbeat {
    let timeout = Arc::new(service.create_timeout().expect("create timeout"));
    Heartbeat::new(timeout, limit, Duration::from_millis(period_ms))
}

type Outcome = Arc<Mutex<Option<((Status, u32), Time)>>>;

fn capture(ctx: &IoContext, outcome: &Outcome) -> Callback<(Status, u32)> {
    let outcome = Arc::clone(outcome);
    let clock = ctx.clock();
    Callback::new(move |out| *outcome.lock() = Some((out, clock.now())))
}

#[test]
fn heartbeat_completes_after_its_beats() {
    let ctx = virtual_context();
    weft::test_phase!("heartbeat_completes_after_its_beats");
    let service = TimeoutService::on(&ctx);
    let outcome = Outcome::default();

    launch_pinned(&ctx.executor(), heartbeat(&service, 3, 25), capture(&ctx, &outcome))
        .expect("launch");
    ctx.run();

    assert_eq!(
        *outcome.lock(),
        Some(((Status::Ok, 3), Time::from_millis(75)))
    );
    weft::test_complete!("heartbeat_completes_after_its_beats");
}

#[test]
fn cancelling_the_timeout_ends_the_operation() {
    let ctx = virtual_context();
    weft::test_phase!("cancelling_the_timeout_ends_the_operation");
    let service = TimeoutService::on(&ctx);
    let outcome = Outcome::default();

    let body = heartbeat(&service, 10, 100);
    let victim = Arc::clone(&body.timeout);
    let canceller = service.create_timeout().expect("create timeout");
    canceller.arm_from_now(Duration::from_millis(250));
    canceller.wait(move |_status: Status| {
        victim.cancel();
    });

    launch(&ctx.executor(), body, capture(&ctx, &outcome)).expect("launch");
    ctx.run();

    assert_eq!(
        *outcome.lock(),
        Some(((Status::Cancelled, 2), Time::from_millis(250)))
    );
    assert_eq!(service.pending_count(), 0);
    weft::test_complete!("cancelling_the_timeout_ends_the_operation");
}

/// Runs two heartbeats back to back as suboperations and sums their beats.
struct Sequence {
    exec: IoExecutor,
    service: Arc<Service>,
    co: Coroutine<u8>,
    total: u32,
}

impl Sequence {
    fn start_child(&self, limit: u32) -> impl FnOnce(Callback<(Status, u32)>) + Send + 'static {
        let exec = self.exec.clone();
        let child = heartbeat(&self.service, limit, 10);
        move |k| launch(&exec, child, k).expect("child launch")
    }
}

impl OperationBody for Sequence {
    type Resume = (Status, u32);
    type Output = u32;

    fn resume(
        &mut self,
        token: YieldToken<(Status, u32), u32>,
        input: Option<(Status, u32)>,
    ) -> Step<(Status, u32), u32> {
        let point = self.co.reenter().expect("sequence reentered after completion");
        if let Some((_, beats)) = input {
            self.total += beats;
        }
        match point {
            None => {
                self.co.suspend_at(1);
                token.suspend(self.start_child(2))
            }
            Some(1) => {
                self.co.suspend_at(2);
                token.suspend(self.start_child(3))
            }
            Some(_) => {
                self.co.complete();
                token.post_upcall(self.total)
            }
        }
    }
}

#[test]
fn composed_operations_nest() {
    let ctx = virtual_context();
    weft::test_phase!("composed_operations_nest");
    let service = TimeoutService::on(&ctx);
    let result = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&result);
    let clock = ctx.clock();

    let body = Sequence {
        exec: ctx.executor(),
        service: Arc::clone(&service),
        co: Coroutine::new(),
        total: 0,
    };
    launch(&ctx.executor(), body, move |total: u32| {
        *sink.lock() = Some((total, clock.now()));
    })
    .expect("launch");
    ctx.run();

    assert_eq!(*result.lock(), Some((5, Time::from_millis(50))));
    weft::test_complete!("composed_operations_nest");
}

#[test]
fn future_resolves_while_a_runner_thread_drives_the_context() {
    init_test_logging();
    weft::test_phase!("future_resolves_while_a_runner_thread_drives_the_context");
    let ctx = Arc::new(IoContext::new());
    let service = TimeoutService::on(&ctx);

    let output = launch_future(&ctx.executor(), heartbeat(&service, 2, 5)).expect("launch");
    let runner = ctx.run_in_thread().expect("spawn runner");
    let (status, beats) = block_on(output).expect("completed");
    runner.join().expect("runner");

    assert_eq!(status, Status::Ok);
    assert_eq!(beats, 2);
    weft::test_complete!("future_resolves_while_a_runner_thread_drives_the_context");
}
