//! Bodies, yield tokens and the steps they produce.

use core::fmt;
use core::marker::PhantomData;

use crate::callback::Callback;

/// A resumable algorithm driven by the composed-operation engine.
///
/// The engine calls [`resume`](Self::resume) once synchronously at launch
/// (with `input == None`) and then once per completed suboperation (with the
/// suboperation's result). Every call must consume its token and return the
/// resulting [`Step`].
pub trait OperationBody: Send + 'static {
    /// Result type of the suboperations this body waits on.
    type Resume: Send + 'static;
    /// Final result delivered to the upcall.
    type Output: Send + 'static;

    /// Advances the body.
    fn resume(
        &mut self,
        token: YieldToken<Self::Resume, Self::Output>,
        input: Option<Self::Resume>,
    ) -> Step<Self::Resume, Self::Output>;
}

/// Permission to take exactly one step, issued once per resumption.
#[must_use = "a yield token must be turned into a step"]
pub struct YieldToken<T, O> {
    is_continuation: bool,
    _marker: PhantomData<fn(T) -> O>,
}

impl<T: Send + 'static, O: Send + 'static> YieldToken<T, O> {
    pub(crate) const fn new(is_continuation: bool) -> Self {
        Self {
            is_continuation,
            _marker: PhantomData,
        }
    }

    /// Returns false while the launch call is still on this thread's stack:
    /// for the first resumption and for continuations completed inline by it.
    #[must_use]
    pub const fn is_continuation(&self) -> bool {
        self.is_continuation
    }

    /// Suspends the body until a suboperation completes.
    ///
    /// `start` receives the continuation once the engine has packaged the
    /// frame into it, and must hand it to exactly one suboperation. Dropping
    /// the continuation abandons the whole operation.
    pub fn suspend<F>(self, start: F) -> Step<T, O>
    where
        F: FnOnce(Callback<T>) + Send + 'static,
    {
        Step(StepKind::Suspend(Callback::new(start)))
    }

    /// Finishes the operation, delivering `output` through the executor.
    pub fn post_upcall(self, output: O) -> Step<T, O> {
        Step(StepKind::Upcall {
            output,
            direct: false,
        })
    }

    /// Finishes the operation, invoking the upcall inline.
    ///
    /// Only valid on a continuation running inside its executor after the
    /// launch call returned. Anywhere else the engine reports the misuse and
    /// posts the upcall instead.
    pub fn upcall(self, output: O) -> Step<T, O> {
        Step(StepKind::Upcall {
            output,
            direct: true,
        })
    }
}

impl<T, O> fmt::Debug for YieldToken<T, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("YieldToken")
            .field("is_continuation", &self.is_continuation)
            .finish()
    }
}

/// What a body asked the engine to do next.
#[must_use = "a step must be returned to the engine"]
pub struct Step<T, O>(pub(crate) StepKind<T, O>);

pub(crate) enum StepKind<T, O> {
    Suspend(Callback<Callback<T>>),
    Upcall { output: O, direct: bool },
}

impl<T, O> fmt::Debug for Step<T, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            StepKind::Suspend(_) => f.write_str("Step::Suspend"),
            StepKind::Upcall { direct, .. } => f
                .debug_struct("Step::Upcall")
                .field("direct", direct)
                .finish_non_exhaustive(),
        }
    }
}

/// An [`OperationBody`] built from a closure. See [`from_fn`].
pub struct FnBody<F, T, O> {
    f: F,
    _marker: PhantomData<fn(T) -> O>,
}

/// Turns a closure into an [`OperationBody`].
///
/// ```
/// use weft::compose::{from_fn, launch, YieldToken};
/// use weft::runtime::IoContext;
///
/// let ctx = IoContext::new();
/// let body = from_fn(|token: YieldToken<(), u32>, _input: Option<()>| token.post_upcall(7));
/// launch(&ctx.executor(), body, |value: u32| assert_eq!(value, 7)).unwrap();
/// assert_eq!(ctx.run(), 1);
/// ```
pub fn from_fn<T, O, F>(f: F) -> FnBody<F, T, O>
where
    F: FnMut(YieldToken<T, O>, Option<T>) -> Step<T, O> + Send + 'static,
{
    FnBody {
        f,
        _marker: PhantomData,
    }
}

impl<T, O, F> OperationBody for FnBody<F, T, O>
where
    T: Send + 'static,
    O: Send + 'static,
    F: FnMut(YieldToken<T, O>, Option<T>) -> Step<T, O> + Send + 'static,
{
    type Resume = T;
    type Output = O;

    fn resume(&mut self, token: YieldToken<T, O>, input: Option<T>) -> Step<T, O> {
        (self.f)(token, input)
    }
}

impl<F, T, O> fmt::Debug for FnBody<F, T, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnBody").finish_non_exhaustive()
    }
}
