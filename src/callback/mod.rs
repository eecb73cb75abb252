//! Move-only, one-shot, type-erased callables.
//!
//! A [`Callback<T, R>`] owns a single `FnOnce(T) -> R` of any concrete type.
//! Small callables (at most two machine words, word aligned) are stored
//! inline with no allocation; larger ones live in a block obtained from a
//! [`HandlerAllocator`].
//!
//! A callback is either *empty* or *armed*. Invoking an armed callback
//! empties it and releases its storage before the callable runs, so the
//! callable may immediately store a new callback into the same slot, or
//! allocate from the same allocator, without growing memory use. Dropping an
//! armed callback destroys the callable without running it; that is how
//! pending work is cancelled implicitly.
//!
//! [`CallbackList`] keeps an ordered queue of callbacks.

mod alloc;
mod erased;
mod list;

pub use alloc::{Global, HandlerAllocator, HandlerBox};
pub use erased::{Callback, IntoCallback, INLINE_CAPACITY};
pub use list::CallbackList;
