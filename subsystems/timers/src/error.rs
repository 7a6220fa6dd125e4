//! # Timer Errors
//!
//! Every lifecycle operation reports an explicit [`TimerError`]; nothing in
//! the service panics on caller misuse.
//!
//! ## Error Categories
//!
//! | Kind | Errors | Caller action |
//! |------|--------|---------------|
//! | InvalidArgument | `InvalidHandle`, `AlreadyInitialized` | Fix the call site |
//! | ResourceExhausted | `OutOfMemory` | Free timers or retry later |
//! | EngineFailure | `SubmitFailed`, `CancelFailed` | Timer left inactive, may retry |
//! | NotFound | `NotFound` | Lifecycle defect upstream, logged |

use core::fmt;

// =============================================================================
// ERROR KIND
// =============================================================================

/// Classification of timer errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorKind {
    /// Null or stale handle, occupied output slot
    InvalidArgument   = 1,

    /// Allocator, pool or job records exhausted
    ResourceExhausted = 100,

    /// The deferred execution engine refused a submission or cancellation
    EngineFailure     = 200,

    /// A job or control block has no registry entry
    NotFound          = 300,
}

impl ErrorKind {
    /// Check if retrying the same call may succeed
    pub const fn is_transient(&self) -> bool {
        matches!(self, ErrorKind::ResourceExhausted | ErrorKind::EngineFailure)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// =============================================================================
// TIMER ERROR
// =============================================================================

/// Timer service errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerError {
    /// The handle is null, stale or already deleted
    InvalidHandle,
    /// The output slot already holds a live timer
    AlreadyInitialized,
    /// No control block or job record could be allocated
    OutOfMemory,
    /// The engine refused to queue the timer's job
    SubmitFailed,
    /// The engine refused to cancel the timer's job
    CancelFailed,
    /// No control block owns the job
    NotFound,
}

impl TimerError {
    /// Classify the error
    pub const fn kind(&self) -> ErrorKind {
        match self {
            TimerError::InvalidHandle | TimerError::AlreadyInitialized => {
                ErrorKind::InvalidArgument
            },
            TimerError::OutOfMemory => ErrorKind::ResourceExhausted,
            TimerError::SubmitFailed | TimerError::CancelFailed => ErrorKind::EngineFailure,
            TimerError::NotFound => ErrorKind::NotFound,
        }
    }

    /// Static description
    pub const fn as_str(&self) -> &'static str {
        match self {
            TimerError::InvalidHandle => "invalid timer handle",
            TimerError::AlreadyInitialized => "timer already initialized",
            TimerError::OutOfMemory => "out of memory",
            TimerError::SubmitFailed => "work queue submission failed",
            TimerError::CancelFailed => "work queue cancellation failed",
            TimerError::NotFound => "timer not found",
        }
    }
}

impl fmt::Display for TimerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.as_str(), self.kind())
    }
}

/// Result type for timer operations
pub type TimerResult<T> = Result<T, TimerError>;
