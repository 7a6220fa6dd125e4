//! # Timer Control Block
//!
//! Per-timer configuration and runtime state, plus the handle callers use to
//! refer to it.

extern crate alloc;

use alloc::sync::Arc;
use core::fmt;

use static_assertions::const_assert;
use tempo_workqueue::JobHandle;

/// Capacity of a timer name in bytes
pub const TIMER_NAME_SIZE: usize = 16;

const_assert!(TIMER_NAME_SIZE > 0);

/// Job of a block that is not registered
const NO_JOB: JobHandle = JobHandle::new(u32::MAX, u32::MAX);

// =============================================================================
// Handle
// =============================================================================

/// Opaque reference to a timer
///
/// Handles stay valid until the timer is deleted. A handle that outlived its
/// timer is rejected with `InvalidHandle`, it never aliases a newer timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl TimerHandle {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }
}

impl fmt::Display for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}.{}", self.index, self.generation)
    }
}

// =============================================================================
// Name
// =============================================================================

/// Fixed-size timer label
///
/// Longer names are truncated. A name that fills the whole buffer carries no
/// terminator.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct TimerName {
    bytes: [u8; TIMER_NAME_SIZE],
}

impl TimerName {
    /// Empty name
    pub const EMPTY: TimerName = TimerName {
        bytes: [0; TIMER_NAME_SIZE],
    };

    /// Copy at most `TIMER_NAME_SIZE` bytes of `name`
    pub fn new(name: &str) -> Self {
        let mut bytes = [0; TIMER_NAME_SIZE];
        let len = name.len().min(TIMER_NAME_SIZE);
        bytes[..len].copy_from_slice(&name.as_bytes()[..len]);
        Self { bytes }
    }

    /// Raw bytes up to the first nul
    pub fn as_bytes(&self) -> &[u8] {
        let len = self
            .bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(TIMER_NAME_SIZE);
        &self.bytes[..len]
    }

    /// Name as text, dropping a code point cut by truncation
    pub fn as_str(&self) -> &str {
        let bytes = self.as_bytes();
        match core::str::from_utf8(bytes) {
            Ok(s) => s,
            Err(e) => core::str::from_utf8(&bytes[..e.valid_up_to()]).unwrap_or_default(),
        }
    }

    pub(crate) fn clear(&mut self) {
        self.bytes = [0; TIMER_NAME_SIZE];
    }
}

impl fmt::Debug for TimerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl fmt::Display for TimerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Callback
// =============================================================================

/// User function run each time a timer fires
///
/// Invoked synchronously in the work queue's worker context.
#[derive(Clone)]
pub struct TimerCallback(Arc<dyn Fn() + Send + Sync>);

impl TimerCallback {
    /// Wrap a closure
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Plain function plus one user argument
    pub fn from_fn(f: fn(usize), arg: usize) -> Self {
        Self::new(move || f(arg))
    }

    pub(crate) fn invoke(&self) {
        (self.0)()
    }
}

impl fmt::Debug for TimerCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TimerCallback")
    }
}

// =============================================================================
// Control Block
// =============================================================================

/// Whether task context wants the job queued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Intent {
    Idle,
    Armed,
}

/// Per-timer state
#[derive(Debug)]
pub(crate) struct ControlBlock {
    pub name: TimerName,
    pub id: u32,
    pub period_ms: u32,
    pub reload: bool,
    /// A job is outstanding in the engine
    pub live: bool,
    pub callback: Option<TimerCallback>,
    pub job: JobHandle,
    /// State requested by the latest start/stop/change-period/delete
    pub intent: Intent,
    /// Bumped by every task-side transition; an engine call only commits
    /// its outcome if no other transition happened meanwhile
    pub epoch: u32,
    /// Task-side operations between their first and last critical section
    pub pending_ops: u16,
    /// A fire was delivered while an operation was re-arming the job
    pub fired_during_op: bool,
}

impl ControlBlock {
    pub fn new(
        name: TimerName,
        id: u32,
        period_ms: u32,
        reload: bool,
        callback: Option<TimerCallback>,
        job: JobHandle,
    ) -> Self {
        Self {
            name,
            id,
            period_ms,
            reload,
            live: false,
            callback,
            job,
            intent: Intent::Idle,
            epoch: 0,
            pending_ops: 0,
            fired_during_op: false,
        }
    }

    /// Placeholder stored in unused pool slots
    pub fn vacant() -> Self {
        Self::new(TimerName::EMPTY, 0, 0, false, None, NO_JOB)
    }

    /// Start a new transition, returning its epoch
    pub fn transition(&mut self, intent: Intent) -> u32 {
        self.intent = intent;
        self.epoch = self.epoch.wrapping_add(1);
        self.epoch
    }

    /// Reset every field before the block is released
    pub fn clear(&mut self) {
        self.name.clear();
        self.id = 0;
        self.period_ms = 0;
        self.reload = false;
        self.live = false;
        self.callback = None;
        self.intent = Intent::Idle;
        self.pending_ops = 0;
        self.fired_during_op = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_name_truncation() {
        let name = TimerName::new("a-very-long-timer-name");
        assert_eq!(name.as_bytes().len(), TIMER_NAME_SIZE);
        assert_eq!(name.as_str(), "a-very-long-time");
    }

    #[test]
    fn test_short_name() {
        let name = TimerName::new("led");
        assert_eq!(name.as_str(), "led");
        assert_eq!(TimerName::EMPTY.as_str(), "");
    }

    #[test]
    fn test_name_cut_inside_code_point() {
        // 15 ASCII bytes followed by a two byte code point
        let name = TimerName::new("abcdefghijklmnoé");
        assert_eq!(name.as_str(), "abcdefghijklmno");
    }

    #[test]
    fn test_callback_from_fn() {
        static SEEN: AtomicUsize = AtomicUsize::new(0);
        fn record(arg: usize) {
            SEEN.store(arg, Ordering::SeqCst);
        }

        TimerCallback::from_fn(record, 7).invoke();
        assert_eq!(SEEN.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn test_transition_bumps_epoch() {
        let mut block = ControlBlock::new(
            TimerName::new("t"),
            1,
            10,
            false,
            None,
            JobHandle::new(0, 0),
        );
        let first = block.transition(Intent::Armed);
        let second = block.transition(Intent::Idle);
        assert_ne!(first, second);
        assert_eq!(block.intent, Intent::Idle);

        block.clear();
        assert_eq!(block.id, 0);
        assert!(block.name.as_str().is_empty());
    }
}
