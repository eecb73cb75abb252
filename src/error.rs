//! Error types and completion statuses.
//!
//! Two families of failure flow through this crate and they travel on
//! different paths:
//!
//! - **Errors** ([`Error`]) surface synchronously to the caller that attempted
//!   something: storing a callable that cannot be allocated, invoking a
//!   callback that was already consumed, loading a malformed configuration.
//! - **Statuses** ([`Status`]) are ordinary result data delivered to waiters
//!   and continuations (`Cancelled`, `TimedOut`, ...). They are never raised;
//!   the receiver inspects them explicitly.
//!
//! # Error Categories
//!
//! - **Usage**: programming errors such as invoking an empty callback
//! - **Resource**: allocation or construction of stored state failed
//! - **Completion**: a status converted into an error with [`Status::into_result`]
//! - **Fault injection**: deterministic test-only failures
//! - **Config**: configuration parsing failures

use core::fmt;
use std::sync::Arc;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Usage ===
    /// An empty or already-consumed object was used.
    InvalidState,

    // === Resource ===
    /// Storage for a callable could not be allocated.
    AllocationFailure,
    /// Storage was allocated but the stored state could not be constructed.
    ConstructionFailure,

    // === Completion ===
    /// The operation was cancelled before it completed.
    Cancelled,
    /// The operation did not complete before its deadline.
    TimedOut,
    /// The operation was aborted, usually because it was superseded.
    OperationAborted,

    // === Fault injection ===
    /// A deterministic fault budget was exhausted.
    Exhausted,

    // === Config ===
    /// Configuration could not be parsed or validated.
    Config,
}

impl ErrorKind {
    /// Returns the error category for this kind.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidState => ErrorCategory::Usage,
            Self::AllocationFailure | Self::ConstructionFailure => ErrorCategory::Resource,
            Self::Cancelled | Self::TimedOut | Self::OperationAborted => ErrorCategory::Completion,
            Self::Exhausted => ErrorCategory::FaultInjection,
            Self::Config => ErrorCategory::Config,
        }
    }

    /// Returns true for programming errors that must not be retried.
    ///
    /// Invoking something that was already consumed cannot succeed on a
    /// second attempt.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::InvalidState)
    }
}

/// High-level error category for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// API misuse.
    Usage,
    /// Allocation and construction failures.
    Resource,
    /// Completion statuses promoted to errors.
    Completion,
    /// Deterministic test faults.
    FaultInjection,
    /// Configuration failures.
    Config,
}

/// The main error type for this crate.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Returns true if this error is a programming error.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        self.kind.is_fatal()
    }

    /// Returns true if this error represents cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Creates an invalid-state error.
    #[must_use]
    pub fn invalid_state(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidState).with_message(detail)
    }

    /// Creates an allocation failure for a block of `size` bytes.
    #[must_use]
    pub fn allocation_failure(size: usize) -> Self {
        Self::new(ErrorKind::AllocationFailure)
            .with_message(format!("failed to allocate {size} bytes"))
    }

    /// Creates a construction failure.
    #[must_use]
    pub fn construction_failure(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConstructionFailure).with_message(detail)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

impl From<Status> for Error {
    fn from(status: Status) -> Self {
        match status.into_result() {
            Ok(()) => Self::invalid_state("success status converted into an error"),
            Err(err) => err,
        }
    }
}

/// Completion status delivered to waiters and continuations.
///
/// This is plain data, not an error: the receiver decides whether to retry,
/// abort or continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[must_use]
pub enum Status {
    /// The operation completed normally.
    #[default]
    Ok,
    /// The operation was cancelled explicitly.
    Cancelled,
    /// The operation hit its deadline.
    TimedOut,
    /// The operation was superseded or its owner went away.
    OperationAborted,
}

impl Status {
    /// Returns true for [`Status::Ok`].
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Returns true for any status other than [`Status::Ok`].
    #[must_use]
    pub const fn is_err(self) -> bool {
        !self.is_ok()
    }

    /// Converts the status into a `Result`, mapping failures onto [`ErrorKind`].
    pub fn into_result(self) -> Result<()> {
        match self {
            Self::Ok => Ok(()),
            Self::Cancelled => Err(Error::new(ErrorKind::Cancelled)),
            Self::TimedOut => Err(Error::new(ErrorKind::TimedOut)),
            Self::OperationAborted => Err(Error::new(ErrorKind::OperationAborted)),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ok => "ok",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed out",
            Self::OperationAborted => "operation aborted",
        };
        f.write_str(s)
    }
}

/// A specialized Result type for this crate.
#[allow(clippy::result_large_err)]
pub type Result<T> = core::result::Result<T, Error>;
