//! # Tempo Hardware Abstraction Layer
//!
//! The small set of platform services the timer service relies on:
//!
//! - **Critical sections**: a scoped region with preemption and interrupts
//!   disabled on the owning core, used to guard shared kernel state.
//! - **Tick rate**: the platform scheduler tick and the millisecond to tick
//!   conversion every delayed submission goes through.
//!
//! The actual interrupt masking is provided by the platform through the
//! `critical-section` crate (`critical_section::set_impl!`). Hosted builds
//! use its `std` implementation.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod critical;
pub mod tick;

pub use critical::{with_critical, CriticalSection};
pub use tick::{TickRate, Ticks};
