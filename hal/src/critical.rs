//! # Critical Sections
//!
//! Scoped regions in which the current core can neither be preempted nor
//! interrupted. Everything executed inside must be short and must never
//! block or try to enter the section a second time through a path that
//! expects to be the outermost holder.
//!
//! The section is built on the `critical-section` crate: entering returns an
//! opaque restore-state token and leaving consumes it, so nested sections
//! restore the outer state instead of unconditionally re-enabling interrupts.

use core::marker::PhantomData;

use critical_section::RestoreState;

// =============================================================================
// Critical Section Guard
// =============================================================================

/// RAII guard for a critical section
///
/// Enters the section when created, restores the previous state when dropped.
#[must_use = "the critical section is left as soon as the guard is dropped"]
pub struct CriticalSection {
    /// State to restore on exit
    state: RestoreState,
    /// The section belongs to the core that entered it
    _not_send: PhantomData<*mut ()>,
}

impl CriticalSection {
    /// Enter a critical section
    pub fn enter() -> Self {
        // SAFETY: the matching release happens exactly once, in `Drop`.
        let state = unsafe { critical_section::acquire() };
        Self {
            state,
            _not_send: PhantomData,
        }
    }

    /// Token proving the section is held, for `critical_section::Mutex` access
    pub fn token(&self) -> critical_section::CriticalSection<'_> {
        // SAFETY: the token cannot outlive the guard that holds the section.
        unsafe { critical_section::CriticalSection::new() }
    }
}

impl Drop for CriticalSection {
    fn drop(&mut self) {
        // SAFETY: `state` came from the `acquire` in `enter`.
        unsafe { critical_section::release(self.state) }
    }
}

impl core::fmt::Debug for CriticalSection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CriticalSection").finish_non_exhaustive()
    }
}

/// Execute a closure inside a critical section
///
/// Restores the previous state after the closure returns.
#[inline]
pub fn with_critical<F, R>(f: F) -> R
where
    F: FnOnce(critical_section::CriticalSection<'_>) -> R,
{
    let guard = CriticalSection::enter();
    f(guard.token())
}

// =============================================================================
// TESTS
// =============================================================================
