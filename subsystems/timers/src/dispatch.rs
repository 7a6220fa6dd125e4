//! # Timer Dispatch
//!
//! Entry point the work queue calls when a timer's job expires.
//!
//! A periodic timer is re-armed *before* its callback runs, so a slow
//! callback does not stretch the period. A one-shot timer is marked inactive
//! before its callback runs, so the callback may start it again.
//!
//! Fires are matched against the timer's intent: a job that expires after
//! the timer was stopped or deleted is dropped without running the callback.
//! When a fire lands while a start or change-period is in progress, the
//! callback still runs and the in-progress operation takes care of arming.

use tempo_hal::Ticks;
use tempo_workqueue::{CancelError, DelayedWorkQueue, JobHandle, SubmitError, WorkQueue};

use crate::block::{Intent, TimerCallback, TimerHandle, TimerName};
use crate::registry::Registry;
use crate::service::TimerService;

/// Rounds of cancel and restore when stops and starts keep racing a re-arm
const WITHDRAW_ATTEMPTS: usize = 4;

/// Snapshot taken when a fire is accepted
struct Fire {
    handle: TimerHandle,
    name: TimerName,
    callback: Option<TimerCallback>,
    /// Period and epoch to re-arm with, periodic timers only
    rearm: Option<(u32, u32)>,
}

/// Why a fire was not accepted
enum Skip {
    /// No timer owns the job
    Orphan,
    /// The timer is no longer meant to run
    Stale(TimerName),
}

impl<Q: WorkQueue> TimerService<Q> {
    /// Handle the expiry of `job`
    ///
    /// Runs in the worker's context. The callback is invoked outside the
    /// critical section and may call any lifecycle operation, on its own
    /// timer included.
    pub fn dispatch(&self, job: JobHandle) {
        let fire = match self.with_registry(|reg| accept(reg, job)) {
            Ok(fire) => fire,
            Err(Skip::Orphan) => {
                log::warn!("timers: {} expired but no timer owns it", job);
                return;
            },
            Err(Skip::Stale(name)) => {
                log::debug!("timer '{}': dropping stale fire", name);
                return;
            },
        };
        let handle = fire.handle;

        // Re-arm outside the critical section
        let (armed, submitted) = match fire.rearm {
            Some((period_ms, _)) => self.resubmit(&fire.name, job, period_ms),
            None => (false, false),
        };

        let (deliver, withdraw) = self.with_registry(|reg| {
            if reg.is_detached(handle) {
                return (false, None);
            }
            let Some(block) = reg.get_mut(handle) else {
                return (false, None);
            };
            match fire.rearm {
                Some((_, epoch)) if block.epoch == epoch => {
                    block.live = armed;
                    if !armed {
                        block.intent = Intent::Idle;
                    }
                    (true, None)
                },
                // A stop raced our submission, which must not survive it
                Some(_) if submitted && block.intent == Intent::Idle => (true, Some(block.epoch)),
                _ => (true, None),
            }
        });

        if let Some(seen) = withdraw {
            self.withdraw(&fire.name, handle, job, seen);
        }
        if deliver {
            if let Some(callback) = &fire.callback {
                callback.invoke();
            }
        }
        drop(fire);

        if let Some(released) = self.with_registry(|reg| reg.end_dispatch(handle)) {
            log::debug!("timers: releasing {} after its last fire", handle);
            self.finish_release(released);
        }
    }

    /// Submit the next period of a periodic timer
    ///
    /// Returns whether a submission is outstanding and whether it is ours.
    fn resubmit(&self, name: &TimerName, job: JobHandle, period_ms: u32) -> (bool, bool) {
        match self.engine().submit(job, self.ticks(period_ms)) {
            Ok(()) => (true, true),
            Err(SubmitError::AlreadyQueued) => (true, false),
            Err(err) => {
                log::warn!("timer '{}': re-arm failed: {}", name, err);
                (false, false)
            },
        }
    }

    /// Cancel a re-arm that lost against a stop
    ///
    /// `seen` is the epoch of that stop. An operation that re-armed the
    /// timer before the cancel landed would lose its submission, so the
    /// timer is armed again on its behalf.
    fn withdraw(&self, name: &TimerName, handle: TimerHandle, job: JobHandle, mut seen: u32) {
        for _ in 0..WITHDRAW_ATTEMPTS {
            if let Err(CancelError::Rejected) = self.engine().cancel(job) {
                log::warn!("timer '{}': withdrawing re-arm of {} rejected", name, job);
                return;
            }

            let restore = self.with_registry(|reg| {
                if reg.is_detached(handle) {
                    return None;
                }
                let block = reg.get_mut(handle)?;
                if block.epoch == seen || block.intent != Intent::Armed {
                    return None;
                }
                if block.pending_ops > 0 {
                    // The operation in flight commits after the cancel and
                    // arms again when told a fire was consumed.
                    block.fired_during_op = true;
                    return None;
                }
                Some((block.period_ms, block.epoch))
            });
            let Some((period_ms, epoch)) = restore else {
                return;
            };

            log::debug!("timer '{}': re-arming after a restart raced a stop", name);
            let (armed, submitted) = self.resubmit(name, job, period_ms);
            let again = self.with_registry(|reg| {
                let block = reg.get_mut(handle)?;
                if block.epoch == epoch {
                    block.live = armed;
                    if !armed {
                        block.intent = Intent::Idle;
                    }
                    return None;
                }
                (submitted && block.intent == Intent::Idle).then_some(block.epoch)
            });
            match again {
                Some(epoch) => seen = epoch,
                None => return,
            }
        }
        log::warn!("timer '{}': gave up settling {} against concurrent operations", name, job);
    }
}

/// Accept a fire, taking everything the dispatch needs from the block
fn accept(reg: &mut Registry, job: JobHandle) -> Result<Fire, Skip> {
    let handle = reg.find_by_job(job).ok_or(Skip::Orphan)?;
    let block = reg.get_mut(handle).ok_or(Skip::Orphan)?;
    if block.intent != Intent::Armed {
        return Err(Skip::Stale(block.name));
    }

    let rearm = if block.pending_ops > 0 {
        block.fired_during_op = true;
        None
    } else if block.reload {
        Some((block.period_ms, block.epoch))
    } else {
        block.live = false;
        block.intent = Intent::Idle;
        None
    };

    let fire = Fire {
        handle,
        name: block.name,
        callback: block.callback.clone(),
        rearm,
    };
    reg.begin_dispatch(handle);
    Ok(fire)
}

impl TimerService<DelayedWorkQueue> {
    /// Advance the owned work queue by `ticks`, dispatching every expiry
    ///
    /// Returns the number of jobs dispatched.
    pub fn run_worker(&self, ticks: Ticks) -> usize {
        self.engine().advance(ticks, |job| self.dispatch(job))
    }
}

impl TimerService<&DelayedWorkQueue> {
    /// Advance the shared work queue by `ticks`, dispatching every expiry
    pub fn run_worker(&self, ticks: Ticks) -> usize {
        self.engine().advance(ticks, |job| self.dispatch(job))
    }
}

// =============================================================================
// TESTS
// =============================================================================
