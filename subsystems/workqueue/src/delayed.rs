//! # Delayed Work Queue
//!
//! A tick-driven deferred execution engine. Jobs are kept in a min-heap
//! ordered by (deadline, priority, submission sequence); every tick the
//! worker pops the expired ones and hands them to its sink one at a time,
//! outside the critical section, so a job may cancel or resubmit any job
//! (itself included) while it runs.
//!
//! Cancellation is lazy: the heap entry stays behind and is skipped when its
//! sequence number no longer matches the job's live submission.

extern crate alloc;

use alloc::collections::BinaryHeap;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::cmp::Reverse;

use critical_section::Mutex;
use tempo_hal::{with_critical, Ticks};

use crate::{CancelError, JobHandle, SubmitError, WorkPriority, WorkQueue};

/// Default number of job records
pub const DEFAULT_JOB_CAPACITY: usize = 64;

/// Stale heap entries tolerated on top of twice the queued jobs
const COMPACT_SLACK: usize = 16;

// =============================================================================
// Internal State
// =============================================================================

/// Live submission of a job
#[derive(Debug, Clone, Copy)]
struct Submission {
    seq: u64,
    deadline: u64,
}

/// One job record
#[derive(Debug)]
struct JobSlot {
    generation: u32,
    allocated: bool,
    priority: WorkPriority,
    queued: Option<Submission>,
}

/// Heap entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Pending {
    deadline: u64,
    priority: WorkPriority,
    seq: u64,
    index: u32,
}

#[derive(Debug)]
struct QueueState {
    now: u64,
    seq: u64,
    slots: Vec<JobSlot>,
    free: Vec<u32>,
    pending: BinaryHeap<Reverse<Pending>>,
    queued: usize,
}

impl QueueState {
    const fn new() -> Self {
        Self {
            now: 0,
            seq: 0,
            slots: Vec::new(),
            free: Vec::new(),
            pending: BinaryHeap::new(),
            queued: 0,
        }
    }

    fn slot(&self, job: JobHandle) -> Option<&JobSlot> {
        self.slots
            .get(job.index() as usize)
            .filter(|s| s.allocated && s.generation == job.generation())
    }

    fn slot_mut(&mut self, job: JobHandle) -> Option<&mut JobSlot> {
        self.slots
            .get_mut(job.index() as usize)
            .filter(|s| s.allocated && s.generation == job.generation())
    }

    /// Pop the next expired job with a live submission
    fn pop_expired(&mut self) -> Option<JobHandle> {
        while let Some(Reverse(top)) = self.pending.peek().copied() {
            if top.deadline > self.now {
                return None;
            }
            self.pending.pop();

            let slot = &mut self.slots[top.index as usize];
            match slot.queued {
                Some(sub) if sub.seq == top.seq => {
                    slot.queued = None;
                    self.queued -= 1;
                    return Some(JobHandle::new(top.index, slot.generation));
                },
                // Cancelled or resubmitted since
                _ => continue,
            }
        }
        None
    }

    /// Drop heap entries left behind by cancellations once they dominate
    fn compact(&mut self) {
        if self.pending.len() <= 2 * self.queued + COMPACT_SLACK {
            return;
        }
        let slots = &self.slots;
        self.pending.retain(|Reverse(entry)| {
            slots[entry.index as usize]
                .queued
                .is_some_and(|sub| sub.seq == entry.seq)
        });
    }
}

// =============================================================================
// Delayed Work Queue
// =============================================================================

/// Tick-driven deferred execution engine
pub struct DelayedWorkQueue {
    state: Mutex<RefCell<QueueState>>,
    capacity: usize,
    priority: WorkPriority,
}

impl DelayedWorkQueue {
    /// Create an engine whose jobs run at `priority`
    pub const fn new(priority: WorkPriority) -> Self {
        Self::with_capacity(priority, DEFAULT_JOB_CAPACITY)
    }

    /// Create an engine with at most `capacity` job records
    pub const fn with_capacity(priority: WorkPriority, capacity: usize) -> Self {
        Self {
            state: Mutex::new(RefCell::new(QueueState::new())),
            capacity,
            priority,
        }
    }

    /// Allocate a job record with an explicit priority
    pub fn alloc_job_with(&self, priority: WorkPriority) -> Option<JobHandle> {
        with_critical(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);

            let index = match state.free.pop() {
                Some(index) => index,
                None if state.slots.len() < self.capacity => {
                    state.slots.push(JobSlot {
                        generation: 0,
                        allocated: false,
                        priority,
                        queued: None,
                    });
                    (state.slots.len() - 1) as u32
                },
                None => return None,
            };

            let slot = &mut state.slots[index as usize];
            slot.allocated = true;
            slot.priority = priority;
            slot.queued = None;
            Some(JobHandle::new(index, slot.generation))
        })
    }

    /// Current engine time in ticks
    pub fn now(&self) -> u64 {
        with_critical(|cs| self.state.borrow_ref(cs).now)
    }

    /// Number of jobs with an outstanding submission
    pub fn pending(&self) -> usize {
        with_critical(|cs| self.state.borrow_ref(cs).queued)
    }

    /// Number of allocated job records
    pub fn allocated(&self) -> usize {
        with_critical(|cs| {
            self.state
                .borrow_ref(cs)
                .slots
                .iter()
                .filter(|s| s.allocated)
                .count()
        })
    }

    /// Absolute tick at which `job` fires, if queued
    pub fn deadline(&self, job: JobHandle) -> Option<u64> {
        with_critical(|cs| {
            self.state
                .borrow_ref(cs)
                .slot(job)
                .and_then(|s| s.queued)
                .map(|sub| sub.deadline)
        })
    }

    /// Advance time by one tick and run every job that expired
    ///
    /// Returns the number of jobs handed to `sink`.
    pub fn tick<F>(&self, mut sink: F) -> usize
    where
        F: FnMut(JobHandle),
    {
        with_critical(|cs| self.state.borrow_ref_mut(cs).now += 1);

        let mut fired = 0;
        // The section is left before each job runs.
        while let Some(job) = with_critical(|cs| self.state.borrow_ref_mut(cs).pop_expired()) {
            log::trace!("workqueue: running {}", job);
            sink(job);
            fired += 1;
        }
        fired
    }

    /// Advance time by `ticks` ticks, one at a time
    pub fn advance<F>(&self, ticks: Ticks, mut sink: F) -> usize
    where
        F: FnMut(JobHandle),
    {
        (0..ticks).map(|_| self.tick(&mut sink)).sum()
    }
}

impl WorkQueue for DelayedWorkQueue {
    fn alloc_job(&self) -> Option<JobHandle> {
        self.alloc_job_with(self.priority)
    }

    fn free_job(&self, job: JobHandle) {
        with_critical(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            let Some(slot) = state.slot_mut(job) else {
                log::warn!("workqueue: freeing unknown {}", job);
                return;
            };

            let was_queued = slot.queued.take().is_some();
            slot.allocated = false;
            slot.generation = slot.generation.wrapping_add(1);

            if was_queued {
                state.queued -= 1;
            }
            state.free.push(job.index());
            state.compact();
        })
    }

    fn submit(&self, job: JobHandle, delay: Ticks) -> Result<(), SubmitError> {
        with_critical(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            // Zero delay still waits for the next tick
            let deadline = state.now + delay.max(1) as u64;
            let seq = state.seq;

            let slot = state.slot_mut(job).ok_or(SubmitError::Rejected)?;
            if slot.queued.is_some() {
                return Err(SubmitError::AlreadyQueued);
            }
            slot.queued = Some(Submission { seq, deadline });
            let priority = slot.priority;

            state.seq += 1;
            state.queued += 1;
            state.pending.push(Reverse(Pending {
                deadline,
                priority,
                seq,
                index: job.index(),
            }));
            Ok(())
        })
    }

    fn cancel(&self, job: JobHandle) -> Result<(), CancelError> {
        with_critical(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            let slot = state.slot_mut(job).ok_or(CancelError::Rejected)?;
            slot.queued.take().ok_or(CancelError::NotFound)?;
            state.queued -= 1;
            state.compact();
            Ok(())
        })
    }

    fn is_queued(&self, job: JobHandle) -> bool {
        with_critical(|cs| {
            self.state
                .borrow_ref(cs)
                .slot(job)
                .is_some_and(|s| s.queued.is_some())
        })
    }
}

impl Default for DelayedWorkQueue {
    fn default() -> Self {
        Self::new(WorkPriority::Low)
    }
}

impl core::fmt::Debug for DelayedWorkQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DelayedWorkQueue")
            .field("capacity", &self.capacity)
            .field("priority", &self.priority)
            .field("pending", &self.pending())
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================
