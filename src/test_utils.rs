//! Test utilities.
//!
//! This module provides shared helpers for unit and integration tests:
//! - Consistent tracing-based logging initialization
//! - Phase/section macros for readable test output
//! - A counting, fault-injecting [`HandlerAllocator`] for callback storage
//!
//! # Example
//! ```
//! use weft::test_utils::{init_test_logging, AllocatorControl, TestAllocator};
//! use weft::callback::Callback;
//!
//! init_test_logging();
//! let ctrl = AllocatorControl::with_budgets(Some(0), None);
//! let big = [0_u8; 64];
//! let result = Callback::<()>::try_new_in(move |()| drop(big), TestAllocator::new(ctrl));
//! assert!(result.is_err());
//! ```

#![allow(unsafe_code)]

use core::alloc::Layout;
use core::ptr::NonNull;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use tracing_subscriber::fmt::format::FmtSpan;

use crate::callback::{Global, HandlerAllocator};
use crate::error::{Error, ErrorKind, Result};

static INIT_LOGGING: Once = Once::new();

/// Initialize test logging with trace-level output.
///
/// Safe to call multiple times; only initializes once.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initialize test logging with a custom level.
///
/// The first call wins; later calls are no-ops.
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(false)
            .try_init();
    });
}

/// Log a test phase transition with a visual separator.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "========================================");
        tracing::info!(phase = %$name, "TEST PHASE: {}", $name);
        tracing::info!(phase = %$name, "========================================");
    };
}

/// Log a section within a test phase.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        tracing::debug!(section = %$name, "--- {} ---", $name);
    };
}

/// Log test completion with summary.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test completed successfully: {}", $name);
    };
    ($name:expr, $($key:ident = $value:expr),* $(,)?) => {
        tracing::info!(
            test = %$name,
            $($key = %$value,)*
            "test completed successfully: {}",
            $name
        );
    };
}

/// Log before assertions for context.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {
        tracing::debug!(
            expected = ?$expected,
            actual = ?$actual,
            "Asserting: {}",
            $msg
        );
        assert!($cond, "{}: expected {:?}, got {:?}", $msg, $expected, $actual);
    };
}

// ============================================================================
// Fault injection
// ============================================================================

/// A countdown of permitted operations.
///
/// `None` means unlimited. Each successful [`consume`](Self::consume) spends
/// one unit; once the budget reaches zero every call fails with
/// [`ErrorKind::Exhausted`].
#[derive(Debug, Default)]
pub struct FaultBudget {
    remaining: Mutex<Option<usize>>,
}

impl FaultBudget {
    /// Creates a budget of `limit` operations, or unlimited for `None`.
    #[must_use]
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            remaining: Mutex::new(limit),
        }
    }

    /// Spends one unit of the budget.
    pub fn consume(&self) -> Result<()> {
        let mut remaining = self.remaining.lock();
        match remaining.as_mut() {
            None => Ok(()),
            Some(0) => Err(Error::new(ErrorKind::Exhausted).with_message("fault budget spent")),
            Some(n) => {
                *n -= 1;
                Ok(())
            }
        }
    }

    /// Replaces the remaining budget.
    pub fn reset(&self, limit: Option<usize>) {
        *self.remaining.lock() = limit;
    }

    /// Returns the remaining budget, or `None` when unlimited.
    #[must_use]
    pub fn remaining(&self) -> Option<usize> {
        *self.remaining.lock()
    }
}

/// Shared counters and budgets behind every [`TestAllocator`] clone.
#[derive(Debug, Default)]
pub struct AllocatorControl {
    /// Remaining allocations before `allocate` fails.
    pub allocation_budget: FaultBudget,
    /// Remaining constructions before `on_construct` fails.
    pub construction_budget: FaultBudget,
    allocations: AtomicUsize,
    constructions: AtomicUsize,
    destructions: AtomicUsize,
    deallocations: AtomicUsize,
}

impl AllocatorControl {
    /// Creates a control block with unlimited budgets.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates a control block with the given allocation and construction budgets.
    #[must_use]
    pub fn with_budgets(allocations: Option<usize>, constructions: Option<usize>) -> Arc<Self> {
        Arc::new(Self {
            allocation_budget: FaultBudget::new(allocations),
            construction_budget: FaultBudget::new(constructions),
            ..Self::default()
        })
    }

    /// Successful allocations so far.
    #[must_use]
    pub fn allocations(&self) -> usize {
        self.allocations.load(Ordering::SeqCst)
    }

    /// Successful constructions so far.
    #[must_use]
    pub fn constructions(&self) -> usize {
        self.constructions.load(Ordering::SeqCst)
    }

    /// Destroy hooks run so far.
    #[must_use]
    pub fn destructions(&self) -> usize {
        self.destructions.load(Ordering::SeqCst)
    }

    /// Blocks released so far.
    #[must_use]
    pub fn deallocations(&self) -> usize {
        self.deallocations.load(Ordering::SeqCst)
    }

    /// Blocks allocated and not yet released.
    #[must_use]
    pub fn live_blocks(&self) -> usize {
        self.allocations().saturating_sub(self.deallocations())
    }
}

/// A [`HandlerAllocator`] that counts every operation and fails on demand.
#[derive(Debug, Clone)]
pub struct TestAllocator {
    ctrl: Arc<AllocatorControl>,
}

impl TestAllocator {
    /// Creates an allocator reporting to `ctrl`.
    #[must_use]
    pub const fn new(ctrl: Arc<AllocatorControl>) -> Self {
        Self { ctrl }
    }

    /// Returns the shared control block.
    #[must_use]
    pub fn control(&self) -> &Arc<AllocatorControl> {
        &self.ctrl
    }
}

impl HandlerAllocator for TestAllocator {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>> {
        self.ctrl
            .allocation_budget
            .consume()
            .map_err(|e| Error::allocation_failure(layout.size()).with_source(e))?;
        let ptr = Global.allocate(layout)?;
        self.ctrl.allocations.fetch_add(1, Ordering::SeqCst);
        Ok(ptr)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        self.ctrl.deallocations.fetch_add(1, Ordering::SeqCst);
        // SAFETY: forwarded from the caller; blocks come from `Global`.
        unsafe { Global.deallocate(ptr, layout) };
    }

    fn on_construct(&self) -> Result<()> {
        self.ctrl.construction_budget.consume()?;
        self.ctrl.constructions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_destroy(&self) {
        self.ctrl.destructions.fetch_add(1, Ordering::SeqCst);
    }
}
