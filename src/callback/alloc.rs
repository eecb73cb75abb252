//! Allocators for callback storage.

#![allow(unsafe_code)]

use core::alloc::Layout;
use core::fmt;
use core::mem::ManuallyDrop;
use core::ops::{Deref, DerefMut};
use core::ptr::{self, NonNull};

use crate::error::{Error, ErrorKind, Result};

/// Allocator used for callbacks that do not fit inline.
///
/// The allocator is moved into the heap block it allocated, so it is
/// available again when the block is released. Implementations that
/// share state (counters, arenas) do so through interior handles.
pub trait HandlerAllocator: Send + 'static {
    /// Allocates a block that satisfies `layout`.
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>>;

    /// Releases a block previously returned by [`allocate`](Self::allocate).
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by `allocate` on this allocator with the
    /// same `layout`, and must not be used afterwards.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);

    /// Called after allocation, before the callable is written.
    ///
    /// Returning an error aborts construction; the block is released and
    /// the callable dropped.
    fn on_construct(&self) -> Result<()> {
        Ok(())
    }

    /// Called when a stored callable leaves its block, on invoke or destroy.
    fn on_destroy(&self) {}
}

/// The process-wide allocator.
#[derive(Debug, Clone, Copy, Default)]
pub struct Global;

impl HandlerAllocator for Global {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>> {
        if layout.size() == 0 {
            // Zero-sized blocks are never dereferenced; any aligned address will do.
            return NonNull::new(layout.align() as *mut u8)
                .ok_or_else(|| Error::allocation_failure(0));
        }
        // SAFETY: `layout` has a non-zero size.
        let ptr = unsafe { std::alloc::alloc(layout) };
        NonNull::new(ptr).ok_or_else(|| Error::allocation_failure(layout.size()))
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() != 0 {
            // SAFETY: the caller guarantees `ptr` came from `allocate` with `layout`.
            unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) };
        }
    }
}

/// An owned value at a fixed address in a block from a [`HandlerAllocator`].
///
/// Construction runs the same `allocate` then `on_construct` sequence as
/// heap-stored callbacks; dropping runs `on_destroy` then `deallocate`.
pub struct HandlerBox<T, A: HandlerAllocator> {
    ptr: NonNull<T>,
    alloc: A,
}

// SAFETY: the box owns its `T` exclusively, like `Box<T>`.
unsafe impl<T: Send, A: HandlerAllocator> Send for HandlerBox<T, A> {}
// SAFETY: shared access only hands out `&T`.
unsafe impl<T: Sync, A: HandlerAllocator + Sync> Sync for HandlerBox<T, A> {}

impl<T, A: HandlerAllocator> HandlerBox<T, A> {
    /// Moves `value` into a block from `alloc`.
    ///
    /// Fails with `AllocationFailure` or `ConstructionFailure`; in both cases
    /// nothing is leaked and `value` is dropped.
    pub fn try_new_in(value: T, alloc: A) -> Result<Self> {
        let layout = Layout::new::<T>();
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
            drop(value);
            return Err(Error::construction_failure("allocator refused construction").with_source(err));
        }
        let ptr = block.cast::<T>();
        // SAFETY: `ptr` is valid for writes of `T`.
        unsafe { ptr.as_ptr().write(value) };
        Ok(Self { ptr, alloc })
    }

    /// Moves the value out and releases the block.
    pub fn into_inner(self) -> T {
        let this = ManuallyDrop::new(self);
        // SAFETY: `this` is never dropped, so the value is read and the block
        // released exactly once; `alloc` is moved out of the same wrapper.
        unsafe {
            let value = ptr::read(this.ptr.as_ptr());
            let alloc = ptr::read(&this.alloc);
            alloc.on_destroy();
            alloc.deallocate(this.ptr.cast(), Layout::new::<T>());
            value
        }
    }

    /// Returns the allocator that owns the block.
    pub const fn allocator(&self) -> &A {
        &self.alloc
    }
}

impl<T, A: HandlerAllocator> Deref for HandlerBox<T, A> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: `ptr` holds an initialized `T` for the life of the box.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T, A: HandlerAllocator> DerefMut for HandlerBox<T, A> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: `ptr` holds an initialized `T` owned exclusively by the box.
        unsafe { self.ptr.as_mut() }
    }
}

impl<T, A: HandlerAllocator> Drop for HandlerBox<T, A> {
    fn drop(&mut self) {
        // SAFETY: the value is live until here and the block came from `alloc`.
        unsafe {
            ptr::drop_in_place(self.ptr.as_ptr());
            self.alloc.on_destroy();
            self.alloc.deallocate(self.ptr.cast(), Layout::new::<T>());
        }
    }
}

impl<T: fmt::Debug, A: HandlerAllocator> fmt::Debug for HandlerBox<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HandlerBox").field(&**self).finish()
    }
}
