//! Awaiting a composed operation's output.

use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll, Waker};
use parking_lot::Mutex;
use std::sync::Arc;

use crate::error::{Error, ErrorKind, Result};

struct Shared<O> {
    value: Option<O>,
    closed: bool,
    waker: Option<Waker>,
}

/// Future resolving to the output of a launched operation.
///
/// Resolves to a `Cancelled` error if the operation was abandoned before it
/// delivered its upcall.
#[must_use = "futures do nothing unless polled"]
pub struct UpcallFuture<O> {
    shared: Arc<Mutex<Shared<O>>>,
}

/// Write half held by the upcall.
pub(crate) struct Completer<O> {
    shared: Arc<Mutex<Shared<O>>>,
}

pub(crate) fn channel<O>() -> (Completer<O>, UpcallFuture<O>) {
    let shared = Arc::new(Mutex::new(Shared {
        value: None,
        closed: false,
        waker: None,
    }));
    (
        Completer {
            shared: Arc::clone(&shared),
        },
        UpcallFuture { shared },
    )
}

impl<O> Completer<O> {
    pub(crate) fn complete(self, output: O) {
        self.shared.lock().value = Some(output);
    }
}

impl<O> Drop for Completer<O> {
    fn drop(&mut self) {
        let waker = {
            let mut shared = self.shared.lock();
            shared.closed = true;
            shared.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

impl<O> Future for UpcallFuture<O> {
    type Output = Result<O>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut shared = self.shared.lock();
        if let Some(value) = shared.value.take() {
            return Poll::Ready(Ok(value));
        }
        if shared.closed {
            return Poll::Ready(Err(Error::new(ErrorKind::Cancelled)
                .with_message("composed operation abandoned before its upcall")));
        }
        let registered = shared
            .waker
            .as_ref()
            .is_some_and(|waker| waker.will_wake(cx.waker()));
        if !registered {
            shared.waker = Some(cx.waker().clone());
        }
        Poll::Pending
    }
}

impl<O> core::fmt::Debug for UpcallFuture<O> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let shared = self.shared.lock();
        f.debug_struct("UpcallFuture")
            .field("ready", &shared.value.is_some())
            .field("closed", &shared.closed)
            .finish()
    }
}
