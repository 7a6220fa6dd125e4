//! # Tempo Software Timers
//!
//! One-shot and periodic software timers running on a deferred work queue.
//!
//! Each timer owns exactly one job of the [`WorkQueue`] it was created on.
//! Starting a timer submits that job with the timer's period converted to
//! ticks; when the job expires the queue hands it to
//! [`TimerService::dispatch`], which re-arms periodic timers and runs the
//! user callback in the worker's context.
//!
//! ## Control Blocks
//!
//! Timer state lives in control blocks taken either from a static pool
//! reserved once at first use ([`TimerService::create_static`]) or from the
//! global allocator ([`TimerService::create`]). Both kinds are addressed
//! through the same generation-checked [`TimerHandle`]; a handle to a
//! deleted timer is rejected, never confused with a newer one.
//!
//! ## Example
//!
//! ```ignore
//! static QUEUE: DelayedWorkQueue = DelayedWorkQueue::new(WorkPriority::High);
//! static TIMERS: TimerService<&DelayedWorkQueue> =
//!     TimerService::new(&QUEUE, ServiceConfig::DEFAULT);
//!
//! let mut blink = None;
//! let handle = TIMERS.create_static(
//!     &mut blink,
//!     TimerConfig::new("blink").with_period_ms(500).periodic().on_fire(toggle_led),
//! )?;
//! TIMERS.start(handle, 0)?;
//!
//! // scheduler tick
//! TIMERS.run_worker(1);
//! ```
//!
//! [`WorkQueue`]: tempo_workqueue::WorkQueue

#![no_std]
#![deny(unsafe_code)]

extern crate alloc;

mod block;
pub mod config;
pub mod dispatch;
pub mod error;
mod pool;
mod registry;
pub mod service;

#[cfg(test)]
mod testing;

pub use block::{TimerCallback, TimerHandle, TimerName, TIMER_NAME_SIZE};
pub use config::{ServiceConfig, TimerConfig};
pub use error::{ErrorKind, TimerError, TimerResult};
pub use service::TimerService;
