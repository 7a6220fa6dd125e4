//! Scripted work queue for unit tests
//!
//! Wraps a [`DelayedWorkQueue`] and fails a configured number of upcoming
//! submissions, cancellations or job allocations. One-shot hooks run right
//! before the next submission or cancellation reaches the engine, standing in
//! for a task preempting the worker at that point.

use alloc::boxed::Box;
use core::ops::Deref;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use spin::Mutex;
use tempo_hal::{TickRate, Ticks};
use tempo_workqueue::{
    CancelError, DelayedWorkQueue, JobHandle, SubmitError, WorkPriority, WorkQueue,
};

use crate::config::ServiceConfig;
use crate::service::TimerService;

/// One tick per millisecond
pub(crate) fn fast_config() -> ServiceConfig {
    ServiceConfig::new()
        .with_tick_rate(TickRate::new(1000))
        .with_pool_capacity(4)
}

type Hook = Box<dyn FnOnce() + Send>;

pub(crate) struct ScriptedQueue {
    inner: DelayedWorkQueue,
    failing_submits: AtomicU32,
    failing_cancels: AtomicU32,
    failing_alloc: AtomicBool,
    cancel_calls: AtomicUsize,
    last_job: Mutex<Option<JobHandle>>,
    submit_hook: Mutex<Option<Hook>>,
    cancel_hook: Mutex<Option<Hook>>,
}

impl ScriptedQueue {
    pub fn new() -> Self {
        Self {
            inner: DelayedWorkQueue::new(WorkPriority::High),
            failing_submits: AtomicU32::new(0),
            failing_cancels: AtomicU32::new(0),
            failing_alloc: AtomicBool::new(false),
            cancel_calls: AtomicUsize::new(0),
            last_job: Mutex::new(None),
            submit_hook: Mutex::new(None),
            cancel_hook: Mutex::new(None),
        }
    }

    /// Reject the next `count` submissions
    pub fn fail_submits(&self, count: u32) {
        self.failing_submits.store(count, Ordering::SeqCst);
    }

    /// Reject the next `count` cancellations
    pub fn fail_cancels(&self, count: u32) {
        self.failing_cancels.store(count, Ordering::SeqCst);
    }

    pub fn fail_alloc(&self, fail: bool) {
        self.failing_alloc.store(fail, Ordering::SeqCst);
    }

    pub fn cancel_calls(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }

    /// Most recently allocated job
    pub fn last_job(&self) -> Option<JobHandle> {
        *self.last_job.lock()
    }

    /// Run `hook` before the next submission
    pub fn before_submit<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        *self.submit_hook.lock() = Some(Box::new(hook));
    }

    /// Run `hook` before the next cancellation
    pub fn before_cancel<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        *self.cancel_hook.lock() = Some(Box::new(hook));
    }

    fn run_hook(slot: &Mutex<Option<Hook>>) {
        let hook = slot.lock().take();
        if let Some(hook) = hook {
            hook();
        }
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Deref for ScriptedQueue {
    type Target = DelayedWorkQueue;

    fn deref(&self) -> &DelayedWorkQueue {
        &self.inner
    }
}

impl WorkQueue for ScriptedQueue {
    fn alloc_job(&self) -> Option<JobHandle> {
        if self.failing_alloc.load(Ordering::SeqCst) {
            return None;
        }
        let job = self.inner.alloc_job()?;
        *self.last_job.lock() = Some(job);
        Some(job)
    }

    fn free_job(&self, job: JobHandle) {
        self.inner.free_job(job)
    }

    fn submit(&self, job: JobHandle, delay: Ticks) -> Result<(), SubmitError> {
        Self::run_hook(&self.submit_hook);
        if Self::take_failure(&self.failing_submits) {
            return Err(SubmitError::Rejected);
        }
        self.inner.submit(job, delay)
    }

    fn cancel(&self, job: JobHandle) -> Result<(), CancelError> {
        Self::run_hook(&self.cancel_hook);
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.failing_cancels) {
            return Err(CancelError::Rejected);
        }
        self.inner.cancel(job)
    }

    fn is_queued(&self, job: JobHandle) -> bool {
        self.inner.is_queued(job)
    }
}

impl TimerService<ScriptedQueue> {
    /// Advance the scripted queue by `ticks`, dispatching every expiry
    pub fn run_for(&self, ticks: Ticks) -> usize {
        self.engine().advance(ticks, |job| self.dispatch(job))
    }
}
