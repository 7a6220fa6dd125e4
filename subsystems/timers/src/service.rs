//! # Timer Service
//!
//! Lifecycle API of the timer service: create, start, stop, change period,
//! delete and the read-only queries.
//!
//! ## Concurrency
//!
//! Registry state is only touched inside the critical section; engine calls
//! are always made outside of it. Every task-side operation therefore runs in
//! three steps:
//!
//! 1. Inside the section: validate the handle, record the requested
//!    [`Intent`] and take a fresh epoch.
//! 2. Outside: submit or cancel the timer's job.
//! 3. Inside again: commit the outcome to the control block, unless a later
//!    operation took a newer epoch in the meantime.
//!
//! The dispatcher observes the same protocol (see [`crate::dispatch`]), so a
//! fire racing a start or stop is either delivered once or dropped as stale,
//! never lost while the timer is meant to run.

extern crate alloc;

use alloc::boxed::Box;
use core::cell::RefCell;
use core::fmt;

use critical_section::Mutex;
use spin::Once;
use tempo_hal::{with_critical, Ticks};
use tempo_workqueue::{CancelError, JobHandle, SubmitError, WorkQueue};

use crate::block::{ControlBlock, Intent, TimerHandle, TimerName};
use crate::config::{ServiceConfig, TimerConfig};
use crate::error::{TimerError, TimerResult};
use crate::pool::Released;
use crate::registry::{Registry, Reservation, Unlinked};

/// Times an arm sequence is redone when fires keep interleaving with it
const ARM_ATTEMPTS: usize = 4;

/// Outcome of the commit step of an arm sequence
enum Commit {
    Done(TimerResult<()>),
    Retry,
}

// =============================================================================
// Service
// =============================================================================

/// Software timers on top of a deferred work queue
///
/// The registry, static pool included, is built on first use, so a service
/// can be declared as a `static`:
///
/// ```ignore
/// static QUEUE: DelayedWorkQueue = DelayedWorkQueue::new(WorkPriority::High);
/// static TIMERS: TimerService<&DelayedWorkQueue> =
///     TimerService::new(&QUEUE, ServiceConfig::DEFAULT);
/// ```
pub struct TimerService<Q: WorkQueue> {
    engine: Q,
    config: ServiceConfig,
    registry: Once<Mutex<RefCell<Registry>>>,
}

impl<Q: WorkQueue> TimerService<Q> {
    /// Create a service running its timers on `engine`
    pub const fn new(engine: Q, config: ServiceConfig) -> Self {
        Self {
            engine,
            config,
            registry: Once::new(),
        }
    }

    /// The deferred execution engine
    pub fn engine(&self) -> &Q {
        &self.engine
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    fn registry(&self) -> &Mutex<RefCell<Registry>> {
        self.registry.call_once(|| {
            log::debug!(
                "timers: reserving {} pooled control blocks, heap limit {}",
                self.config.pool_capacity,
                self.config.heap_limit
            );
            Mutex::new(RefCell::new(Registry::new(
                self.config.pool_capacity,
                self.config.heap_limit,
                self.config.heap_reserve,
            )))
        })
    }

    /// Run `f` on the registry inside the critical section
    pub(crate) fn with_registry<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut Registry) -> R,
    {
        let registry = self.registry();
        with_critical(|cs| f(&mut registry.borrow_ref_mut(cs)))
    }

    pub(crate) fn ticks(&self, period_ms: u32) -> Ticks {
        self.config.tick_rate.ms_to_ticks(period_ms)
    }

    /// Hand back what a released slot held
    pub(crate) fn finish_release(&self, released: Released) {
        if let Some(job) = released.job {
            self.engine.free_job(job);
        }
        drop(released);
    }

    // =========================================================================
    // Creation
    // =========================================================================

    /// Create a timer with an allocator-backed control block
    ///
    /// The timer is created inactive. On success `slot` holds the new handle;
    /// a slot that still holds a live timer is refused.
    pub fn create(
        &self,
        slot: &mut Option<TimerHandle>,
        config: TimerConfig,
    ) -> TimerResult<TimerHandle> {
        self.create_in(slot, config, false)
    }

    /// Create a timer, preferring a control block from the static pool
    ///
    /// Falls back to the allocator once the pool is exhausted.
    pub fn create_static(
        &self,
        slot: &mut Option<TimerHandle>,
        config: TimerConfig,
    ) -> TimerResult<TimerHandle> {
        self.create_in(slot, config, cfg!(feature = "static-pool"))
    }

    fn create_in(
        &self,
        slot: &mut Option<TimerHandle>,
        config: TimerConfig,
        pooled: bool,
    ) -> TimerResult<TimerHandle> {
        if let Some(existing) = *slot {
            if self.with_registry(|reg| reg.contains(existing)) {
                log::warn!("timer '{}': slot already holds {}", config.name, existing);
                return Err(TimerError::AlreadyInitialized);
            }
            log::debug!("timer '{}': replacing stale {}", config.name, existing);
        }

        let reservation = self
            .with_registry(|reg| {
                let from_pool = if pooled { reg.acquire_pool() } else { None };
                from_pool.or_else(|| reg.reserve_heap())
            })
            .ok_or_else(|| {
                log::error!("timer '{}': no control block available", config.name);
                TimerError::OutOfMemory
            })?;

        let Some(job) = self.engine.alloc_job() else {
            log::error!("timer '{}': no work queue job available", config.name);
            self.with_registry(|reg| reg.abandon(reservation));
            return Err(TimerError::OutOfMemory);
        };

        let name = config.name;
        let block = ControlBlock::new(
            config.name,
            config.id,
            config.period_ms,
            config.reload,
            config.callback,
            job,
        );
        let handle = match reservation {
            Reservation::Pool(index) => self.with_registry(|reg| reg.link_pool(index, block)),
            Reservation::Heap => {
                let block = Box::new(block);
                self.with_registry(|reg| reg.link_heap(block))
            },
        };

        log::debug!(
            "timer '{}': created {} ({}, {})",
            name,
            handle,
            if matches!(reservation, Reservation::Pool(_)) {
                "pooled"
            } else {
                "heap"
            },
            if config.reload { "periodic" } else { "one-shot" },
        );
        *slot = Some(handle);
        Ok(handle)
    }

    // =========================================================================
    // Arming
    // =========================================================================

    /// Activate the timer; it fires one period from now
    ///
    /// Starting an active timer restarts its period. `wait_ms` is accepted
    /// for API compatibility, submission never blocks.
    pub fn start(&self, handle: TimerHandle, wait_ms: u32) -> TimerResult<()> {
        let _ = wait_ms;
        self.arm(handle, None)
    }

    /// Set a new period and (re)start the timer with it
    ///
    /// The new period is kept only if the timer could be armed.
    pub fn change_period(
        &self,
        handle: TimerHandle,
        period_ms: u32,
        wait_ms: u32,
    ) -> TimerResult<()> {
        let _ = wait_ms;
        self.arm(handle, Some(period_ms))
    }

    fn arm(&self, handle: TimerHandle, new_period: Option<u32>) -> TimerResult<()> {
        let (job, period_ms, previous, epoch) = self
            .with_registry(|reg| {
                let block = reg.get_mut(handle)?;
                let previous = block.period_ms;
                if let Some(period_ms) = new_period {
                    block.period_ms = period_ms;
                }
                block.pending_ops += 1;
                let epoch = block.transition(Intent::Armed);
                Some((block.job, block.period_ms, previous, epoch))
            })
            .ok_or_else(|| {
                log::warn!("timers: cannot arm {}", handle);
                TimerError::InvalidHandle
            })?;

        let delay = self.ticks(period_ms);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self.submit_exclusive(job, delay);
            let queued = self.engine.is_queued(job);

            let commit = self.with_registry(|reg| {
                let Some(block) = reg.get_mut(handle) else {
                    return Commit::Done(Err(TimerError::InvalidHandle));
                };
                if block.epoch != epoch {
                    block.pending_ops -= 1;
                    return Commit::Done(result);
                }
                // A fire was consumed while the job was being re-armed. It
                // may have been our own submission, so arm once more.
                if core::mem::take(&mut block.fired_during_op) && attempt < ARM_ATTEMPTS {
                    return Commit::Retry;
                }
                block.pending_ops -= 1;
                block.live = result.is_ok() || queued;
                if !block.live {
                    block.intent = Intent::Idle;
                }
                if result.is_err() {
                    block.period_ms = previous;
                }
                Commit::Done(result)
            });

            match commit {
                Commit::Retry => continue,
                Commit::Done(result) => {
                    if let Err(err) = result {
                        log::warn!("timers: arming {} failed: {}", handle, err);
                    }
                    return result;
                },
            }
        }
    }

    /// Queue `job`, replacing a submission that is still outstanding
    fn submit_exclusive(&self, job: JobHandle, delay: Ticks) -> TimerResult<()> {
        for _ in 0..ARM_ATTEMPTS {
            match self.engine.submit(job, delay) {
                Ok(()) => return Ok(()),
                Err(SubmitError::AlreadyQueued) => match self.engine.cancel(job) {
                    Ok(()) | Err(CancelError::NotFound) => {},
                    Err(err) => {
                        log::warn!("timers: cancelling {} before resubmit: {}", job, err);
                        return Err(TimerError::SubmitFailed);
                    },
                },
                Err(err) => {
                    log::warn!("timers: submitting {}: {}", job, err);
                    return Err(TimerError::SubmitFailed);
                },
            }
        }
        log::warn!("timers: {} kept being requeued", job);
        Err(TimerError::SubmitFailed)
    }

    // =========================================================================
    // Disarming
    // =========================================================================

    /// Deactivate the timer
    ///
    /// Stopping an inactive timer succeeds.
    pub fn stop(&self, handle: TimerHandle, wait_ms: u32) -> TimerResult<()> {
        let _ = wait_ms;
        let (job, epoch) = self.disarm(handle)?;

        let result = match self.engine.cancel(job) {
            Ok(()) | Err(CancelError::NotFound) => Ok(()),
            Err(err) => {
                log::warn!("timers: stopping {}: {}", handle, err);
                Err(TimerError::CancelFailed)
            },
        };
        self.settle_disarm(handle, job, epoch, result.is_err());
        result
    }

    /// Stop and destroy the timer, clearing `slot`
    ///
    /// Cancellation is retried `cancel_retries` times. If the dispatcher is
    /// running the timer's callback right now, the control block is released
    /// once the callback returns; the handle is invalid immediately.
    pub fn delete(&self, slot: &mut Option<TimerHandle>, wait_ms: u32) -> TimerResult<()> {
        let _ = wait_ms;
        let handle = slot.ok_or_else(|| {
            log::warn!("timers: delete without a timer");
            TimerError::InvalidHandle
        })?;
        let (job, epoch) = self.disarm(handle)?;

        let mut cancelled = false;
        for attempt in 1..=self.config.cancel_retries {
            match self.engine.cancel(job) {
                Ok(()) | Err(CancelError::NotFound) => {
                    cancelled = true;
                    break;
                },
                Err(err) => log::debug!("timers: cancel {} attempt {}: {}", job, attempt, err),
            }
            core::hint::spin_loop();
        }
        if !cancelled {
            log::error!(
                "timers: {} still queued after {} attempts, not deleted",
                handle,
                self.config.cancel_retries
            );
            self.settle_disarm(handle, job, epoch, true);
            return Err(TimerError::CancelFailed);
        }

        match self.with_registry(|reg| reg.unlink(handle)) {
            Some(Unlinked::Released(released)) => self.finish_release(released),
            Some(Unlinked::Deferred) => {
                log::debug!("timers: {} deleted while firing, release deferred", handle)
            },
            None => return Err(TimerError::InvalidHandle),
        }
        *slot = None;
        log::debug!("timers: deleted {}", handle);
        Ok(())
    }

    fn disarm(&self, handle: TimerHandle) -> TimerResult<(JobHandle, u32)> {
        self.with_registry(|reg| {
            let block = reg.get_mut(handle)?;
            block.live = false;
            block.pending_ops += 1;
            Some((block.job, block.transition(Intent::Idle)))
        })
        .ok_or_else(|| {
            log::warn!("timers: cannot disarm {}", handle);
            TimerError::InvalidHandle
        })
    }

    /// Commit step of stop and delete
    ///
    /// A failed cancellation leaves whatever the engine still holds in
    /// charge of the timer.
    fn settle_disarm(&self, handle: TimerHandle, job: JobHandle, epoch: u32, failed: bool) {
        let queued = failed && self.engine.is_queued(job);
        self.with_registry(|reg| {
            if let Some(block) = reg.get_mut(handle) {
                block.pending_ops -= 1;
                if block.epoch == epoch && queued {
                    block.live = true;
                    block.intent = Intent::Armed;
                }
            }
        });
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Whether a job is outstanding for the timer; `false` for stale handles
    pub fn is_active(&self, handle: TimerHandle) -> bool {
        self.with_registry(|reg| reg.get(handle).is_some_and(|b| b.live))
    }

    /// Caller tag given at creation; `0` for stale handles
    pub fn get_id(&self, handle: TimerHandle) -> u32 {
        self.with_registry(|reg| reg.get(handle).map_or(0, |b| b.id))
    }

    pub fn period_ms(&self, handle: TimerHandle) -> Option<u32> {
        self.with_registry(|reg| reg.get(handle).map(|b| b.period_ms))
    }

    pub fn name(&self, handle: TimerHandle) -> Option<TimerName> {
        self.with_registry(|reg| reg.get(handle).map(|b| b.name))
    }

    pub fn is_reload(&self, handle: TimerHandle) -> bool {
        self.with_registry(|reg| reg.get(handle).is_some_and(|b| b.reload))
    }

    /// Number of registered timers
    pub fn len(&self) -> usize {
        self.with_registry(|reg| reg.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Free control blocks left in the static pool
    pub fn pool_available(&self) -> usize {
        self.with_registry(|reg| reg.pool_available())
    }
}

impl<Q: WorkQueue> fmt::Debug for TimerService<Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("TimerService");
        s.field("config", &self.config);
        if self.registry.is_completed() {
            let (timers, pool, pool_available, heap) = self.with_registry(|reg| {
                (
                    reg.len(),
                    reg.pool_capacity(),
                    reg.pool_available(),
                    reg.heap_live(),
                )
            });
            s.field("timers", &timers)
                .field("pool", &pool)
                .field("pool_available", &pool_available)
                .field("heap_blocks", &heap);
        }
        s.finish_non_exhaustive()
    }
}

// =============================================================================
// TESTS
// =============================================================================
