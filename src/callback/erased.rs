//! The erased callback itself.
//!
//! Storage is a two-word buffer plus a function table `{call, destroy}`
//! built for the concrete callable when it is wrapped. The buffer holds
//! either the callable itself or a pointer to a heap block
//! `{allocator, callable}`; only the table knows which.

#![allow(unsafe_code)]

use core::alloc::Layout;
use core::fmt;
use core::marker::PhantomData;
use core::mem::{self, ManuallyDrop, MaybeUninit};
use core::ptr::{self, NonNull};

use super::alloc::{Global, HandlerAllocator};
use crate::error::{Error, ErrorKind, Result};

const INLINE_WORDS: usize = 2;

/// Bytes available for inline storage.
pub const INLINE_CAPACITY: usize = INLINE_WORDS * mem::size_of::<usize>();

type InlineBuf = MaybeUninit<[usize; INLINE_WORDS]>;

const fn fits_inline<F>() -> bool {
    mem::size_of::<F>() <= mem::size_of::<InlineBuf>()
        && mem::align_of::<F>() <= mem::align_of::<InlineBuf>()
}

struct VTable<T, R> {
    call: unsafe fn(*mut InlineBuf, T) -> R,
    destroy: unsafe fn(*mut InlineBuf),
    inline: bool,
}

impl<T, R> Clone for VTable<T, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T, R> Copy for VTable<T, R> {}

struct HeapBlock<F, A> {
    alloc: A,
    payload: F,
}

// Inline storage: the buffer is the callable.

unsafe fn call_inline<F: FnOnce(T) -> R, T, R>(buf: *mut InlineBuf, arg: T) -> R {
    // SAFETY: the buffer holds an initialized `F` that is read exactly once.
    let payload = unsafe { ptr::read(buf.cast::<F>()) };
    payload(arg)
}

unsafe fn destroy_inline<F>(buf: *mut InlineBuf) {
    // SAFETY: the buffer holds an initialized `F` that is dropped exactly once.
    unsafe { ptr::drop_in_place(buf.cast::<F>()) };
}

// Heap storage: the buffer holds a pointer to a `HeapBlock<F, A>`.

unsafe fn take_block<F, A: HandlerAllocator>(buf: *mut InlineBuf) -> (A, F) {
    // SAFETY: the buffer holds the block pointer written by `RawCallback::heap`,
    // and the block holds an initialized value that is moved out exactly once.
    unsafe {
        let block = ptr::read(buf.cast::<NonNull<HeapBlock<F, A>>>());
        let HeapBlock { alloc, payload } = ptr::read(block.as_ptr());
        alloc.on_destroy();
        alloc.deallocate(block.cast(), Layout::new::<HeapBlock<F, A>>());
        (alloc, payload)
    }
}

unsafe fn call_heap<F: FnOnce(T) -> R, A: HandlerAllocator, T, R>(
    buf: *mut InlineBuf,
    arg: T,
) -> R {
    // SAFETY: forwarded from the caller.
    let (alloc, payload) = unsafe { take_block::<F, A>(buf) };
    drop(alloc);
    payload(arg)
}

unsafe fn destroy_heap<F, A: HandlerAllocator>(buf: *mut InlineBuf) {
    // SAFETY: forwarded from the caller.
    let (alloc, payload) = unsafe { take_block::<F, A>(buf) };
    drop(payload);
    drop(alloc);
}

/// An armed payload: storage plus the table that knows how to use it.
struct RawCallback<T, R> {
    buf: InlineBuf,
    vtable: VTable<T, R>,
}

impl<T, R> RawCallback<T, R> {
    fn inline<F>(payload: F) -> Self
    where
        F: FnOnce(T) -> R,
    {
        debug_assert!(fits_inline::<F>());
        let mut buf = InlineBuf::uninit();
        // SAFETY: `F` fits the buffer's size and alignment.
        unsafe { buf.as_mut_ptr().cast::<F>().write(payload) };
        Self {
            buf,
            vtable: VTable {
                call: call_inline::<F, T, R>,
                destroy: destroy_inline::<F>,
                inline: true,
            },
        }
    }

    fn heap<F, A>(payload: F, alloc: A) -> Result<Self>
    where
        F: FnOnce(T) -> R,
        A: HandlerAllocator,
    {
        let layout = Layout::new::<HeapBlock<F, A>>();
        let block = alloc.allocate(layout).map_err(|err| {
            if err.kind() == ErrorKind::AllocationFailure {
                err
            } else {
                Error::allocation_failure(layout.size()).with_source(err)
            }
        })?;

        if let Err(err) = alloc.on_construct() {
            // SAFETY: `block` was just allocated with `layout` and never written.
            unsafe { alloc.deallocate(block, layout) };
            drop(payload);
            return Err(Error::construction_failure("allocator refused construction").with_source(err));
        }

        let block = block.cast::<HeapBlock<F, A>>();
        let mut buf = InlineBuf::uninit();
        // SAFETY: `block` is valid for writes of `HeapBlock<F, A>`, and a
        // pointer always fits the inline buffer.
        unsafe {
            block.as_ptr().write(HeapBlock { alloc, payload });
            buf.as_mut_ptr().cast::<NonNull<HeapBlock<F, A>>>().write(block);
        }
        Ok(Self {
            buf,
            vtable: VTable {
                call: call_heap::<F, A, T, R>,
                destroy: destroy_heap::<F, A>,
                inline: false,
            },
        })
    }

    fn run(self, arg: T) -> R {
        let this = ManuallyDrop::new(self);
        let mut buf = this.buf;
        // SAFETY: `this` is never dropped, so the payload is consumed exactly once.
        unsafe { (this.vtable.call)(&mut buf, arg) }
    }
}

impl<T, R> Drop for RawCallback<T, R> {
    fn drop(&mut self) {
        // SAFETY: `run` bypasses this drop, so the payload is still live here.
        unsafe { (self.vtable.destroy)(&mut self.buf) };
    }
}

/// A move-only, one-shot, type-erased `FnOnce(T) -> R`.
///
/// Callables must be `Send + 'static`, which makes every callback safe to
/// hand to another thread. Multi-argument signatures use a tuple for `T`.
///
/// # Example
///
/// ```
/// use weft::callback::Callback;
///
/// let mut cb: Callback<u32, u32> = Callback::new(|x| x * 2);
/// assert!(cb.is_armed());
/// assert_eq!(cb.invoke(21).unwrap(), 42);
/// assert!(cb.is_empty());
/// assert!(cb.invoke(1).is_err());
/// ```
pub struct Callback<T, R = ()> {
    raw: Option<RawCallback<T, R>>,
    _marker: PhantomData<fn(T) -> R>,
}

impl<T, R> Callback<T, R> {
    /// Returns an empty callback.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            raw: None,
            _marker: PhantomData,
        }
    }

    /// Wraps `f`, storing it inline when it fits and on the global heap otherwise.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(T) -> R + Send + 'static,
    {
        Self::try_new_in(f, Global).unwrap_or_else(|_| {
            std::alloc::handle_alloc_error(Layout::new::<HeapBlock<F, Global>>())
        })
    }

    /// Wraps `f`, using `alloc` if it does not fit inline.
    ///
    /// Fails with `AllocationFailure` if `alloc` cannot provide a block and
    /// with `ConstructionFailure` if it refuses construction. In both cases
    /// nothing is leaked and `f` is dropped.
    pub fn try_new_in<F, A>(f: F, alloc: A) -> Result<Self>
    where
        F: FnOnce(T) -> R + Send + 'static,
        A: HandlerAllocator,
    {
        let raw = if fits_inline::<F>() {
            RawCallback::inline(f)
        } else {
            RawCallback::heap(f, alloc)?
        };
        Ok(Self {
            raw: Some(raw),
            _marker: PhantomData,
        })
    }

    /// Replaces the stored callable with `f`.
    ///
    /// The previous callable, if any, is destroyed without being invoked.
    pub fn assign<F>(&mut self, f: F)
    where
        F: FnOnce(T) -> R + Send + 'static,
    {
        *self = Self::new(f);
    }

    /// Replaces the stored callable with `f`, allocating from `alloc`.
    ///
    /// On failure `self` is left exactly as it was.
    pub fn try_assign_in<F, A>(&mut self, f: F, alloc: A) -> Result<()>
    where
        F: FnOnce(T) -> R + Send + 'static,
        A: HandlerAllocator,
    {
        let replacement = Self::try_new_in(f, alloc)?;
        *self = replacement;
        Ok(())
    }

    /// Invokes the callable, leaving `self` empty.
    ///
    /// Storage is released before the callable runs. Fails with
    /// `InvalidState` if `self` is empty.
    pub fn invoke(&mut self, arg: T) -> Result<R> {
        let raw = self
            .raw
            .take()
            .ok_or_else(|| Error::invalid_state("invoked an empty callback"))?;
        Ok(raw.run(arg))
    }

    /// Consuming form of [`invoke`](Self::invoke).
    pub fn call(mut self, arg: T) -> Result<R> {
        self.invoke(arg)
    }

    /// Moves the callable out, leaving `self` empty.
    #[must_use]
    pub fn take(&mut self) -> Self {
        mem::take(self)
    }

    /// Destroys the callable without invoking it.
    pub fn clear(&mut self) {
        self.raw = None;
    }

    /// Returns true if a callable is stored.
    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.raw.is_some()
    }

    /// Returns true if no callable is stored.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.raw.is_none()
    }

    /// Returns true if the callable is stored in the inline buffer.
    #[must_use]
    pub fn is_inline(&self) -> bool {
        self.raw.as_ref().is_some_and(|raw| raw.vtable.inline)
    }

    /// Pre-binds `arg`, producing a callback that takes no argument.
    ///
    /// Binding an empty callback yields an empty callback.
    #[must_use]
    pub fn bind(self, arg: T) -> Callback<(), R>
    where
        T: Send + 'static,
        R: 'static,
    {
        let mut this = self;
        match this.raw.take() {
            Some(raw) => Callback::new(move |()| raw.run(arg)),
            None => Callback::empty(),
        }
    }
}

impl<T, R> Default for Callback<T, R> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T, R> fmt::Debug for Callback<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("armed", &self.is_armed())
            .field("inline", &self.is_inline())
            .finish()
    }
}

/// Conversion into a [`Callback`].
///
/// Implemented for every suitable closure and for `Callback` itself, so
/// APIs can accept either without double wrapping.
pub trait IntoCallback<T, R = ()> {
    /// Performs the conversion.
    fn into_callback(self) -> Callback<T, R>;
}

impl<T, R, F> IntoCallback<T, R> for F
where
    F: FnOnce(T) -> R + Send + 'static,
{
    fn into_callback(self) -> Callback<T, R> {
        Callback::new(self)
    }
}

impl<T, R> IntoCallback<T, R> for Callback<T, R> {
    fn into_callback(self) -> Self {
        self
    }
}
