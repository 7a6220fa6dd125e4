//! # Deferred Execution Engine
//!
//! Interface of the low-priority worker that runs submitted jobs after a
//! tick-denominated delay, outside interrupt context.
//!
//! ## Contract
//!
//! - A job is identified by an opaque [`JobHandle`] obtained from
//!   [`WorkQueue::alloc_job`] and returned with [`WorkQueue::free_job`].
//! - A job has at most one outstanding submission. Submitting a job that is
//!   already queued reports [`SubmitError::AlreadyQueued`] and leaves the
//!   existing submission untouched.
//! - Cancelling a job that already fired (or was never submitted) reports
//!   [`CancelError::NotFound`].
//! - Handles of freed jobs are never handed out again while a fire of the old
//!   job might still be in flight: engines bump a generation on reuse.
//!
//! [`DelayedWorkQueue`] is a complete tick-driven engine implementing this
//! contract.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

pub mod delayed;

use core::fmt;

pub use delayed::DelayedWorkQueue;
pub use tempo_hal::Ticks;

// =============================================================================
// Job Handle
// =============================================================================

/// Opaque token identifying one job record of an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobHandle {
    index: u32,
    generation: u32,
}

impl JobHandle {
    /// Build a handle from an engine slot index and its generation
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index inside the engine
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Generation of the slot when the handle was issued
    pub const fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job#{}.{}", self.index, self.generation)
    }
}

// =============================================================================
// Priorities
// =============================================================================

/// Order of jobs expiring on the same tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum WorkPriority {
    /// Runs before low priority work
    High,
    /// Default priority for deferred work
    #[default]
    Low,
}

// =============================================================================
// Outcomes
// =============================================================================

/// Reasons a submission was not queued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    /// The job already has an outstanding submission
    AlreadyQueued,
    /// The engine refused the job (unknown handle, engine stopped, ...)
    Rejected,
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitError::AlreadyQueued => write!(f, "job already queued"),
            SubmitError::Rejected => write!(f, "submission rejected"),
        }
    }
}

/// Reasons a cancellation did not remove a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelError {
    /// Nothing was queued for the job
    NotFound,
    /// The engine refused the request
    Rejected,
}

impl fmt::Display for CancelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelError::NotFound => write!(f, "job not queued"),
            CancelError::Rejected => write!(f, "cancellation rejected"),
        }
    }
}

// =============================================================================
// Engine Interface
// =============================================================================

/// A deferred execution engine
///
/// Implementations are shared between task context and their own worker
/// context and must not call back into their users while holding internal
/// locks.
pub trait WorkQueue: Send + Sync {
    /// Allocate a job record, `None` when the engine is out of records
    fn alloc_job(&self) -> Option<JobHandle>;

    /// Release a job record, dropping any outstanding submission
    fn free_job(&self, job: JobHandle);

    /// Queue `job` to run after `delay` ticks
    fn submit(&self, job: JobHandle, delay: Ticks) -> Result<(), SubmitError>;

    /// Remove the outstanding submission of `job`
    fn cancel(&self, job: JobHandle) -> Result<(), CancelError>;

    /// Whether `job` currently has an outstanding submission
    fn is_queued(&self, job: JobHandle) -> bool;
}

impl<Q: WorkQueue + ?Sized> WorkQueue for &Q {
    fn alloc_job(&self) -> Option<JobHandle> {
        (**self).alloc_job()
    }

    fn free_job(&self, job: JobHandle) {
        (**self).free_job(job)
    }

    fn submit(&self, job: JobHandle, delay: Ticks) -> Result<(), SubmitError> {
        (**self).submit(job, delay)
    }

    fn cancel(&self, job: JobHandle) -> Result<(), CancelError> {
        (**self).cancel(job)
    }

    fn is_queued(&self, job: JobHandle) -> bool {
        (**self).is_queued(job)
    }
}
