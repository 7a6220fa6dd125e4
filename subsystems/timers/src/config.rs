//! # Configuration
//!
//! Service-wide settings and per-timer creation parameters, both built with
//! chained `with_*` calls.

use tempo_hal::TickRate;

use crate::block::{TimerCallback, TimerName};

/// Default number of pre-reserved control blocks
pub const DEFAULT_POOL_SIZE: usize = 8;

/// Default maximum number of heap control blocks
pub const DEFAULT_HEAP_LIMIT: usize = 256;

/// Default number of heap slots reserved up front
pub const DEFAULT_HEAP_RESERVE: usize = 16;

/// Default number of cancellation attempts made by `delete`
pub const DEFAULT_CANCEL_RETRIES: u32 = 8;

// =============================================================================
// Service Configuration
// =============================================================================

/// Timer service settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Tick rate of the work queue
    pub tick_rate: TickRate,
    /// Control blocks reserved in the static pool
    pub pool_capacity: usize,
    /// Upper bound of allocator-backed control blocks
    pub heap_limit: usize,
    /// Heap slots reserved when the registry is set up
    pub heap_reserve: usize,
    /// Cancellation attempts before `delete` gives up
    pub cancel_retries: u32,
}

impl ServiceConfig {
    /// Default settings
    pub const DEFAULT: ServiceConfig = ServiceConfig::new();

    pub const fn new() -> Self {
        Self {
            tick_rate: TickRate::DEFAULT,
            pool_capacity: DEFAULT_POOL_SIZE,
            heap_limit: DEFAULT_HEAP_LIMIT,
            heap_reserve: DEFAULT_HEAP_RESERVE,
            cancel_retries: DEFAULT_CANCEL_RETRIES,
        }
    }

    pub const fn with_tick_rate(mut self, tick_rate: TickRate) -> Self {
        self.tick_rate = tick_rate;
        self
    }

    pub const fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = capacity;
        self
    }

    pub const fn with_heap_limit(mut self, limit: usize) -> Self {
        self.heap_limit = limit;
        self
    }

    pub const fn with_heap_reserve(mut self, reserve: usize) -> Self {
        self.heap_reserve = reserve;
        self
    }

    /// At least one attempt is always made
    pub const fn with_cancel_retries(mut self, retries: u32) -> Self {
        self.cancel_retries = if retries == 0 { 1 } else { retries };
        self
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

// =============================================================================
// Timer Configuration
// =============================================================================

/// Parameters of a new timer
#[derive(Debug, Clone)]
pub struct TimerConfig {
    pub name: TimerName,
    /// Caller tag, opaque to the service
    pub id: u32,
    pub period_ms: u32,
    /// Re-arm after every fire
    pub reload: bool,
    pub callback: Option<TimerCallback>,
}

impl TimerConfig {
    /// One-shot timer without callback
    pub fn new(name: &str) -> Self {
        Self {
            name: TimerName::new(name),
            id: 0,
            period_ms: 0,
            reload: false,
            callback: None,
        }
    }

    pub fn with_id(mut self, id: u32) -> Self {
        self.id = id;
        self
    }

    pub fn with_period_ms(mut self, period_ms: u32) -> Self {
        self.period_ms = period_ms;
        self
    }

    pub fn with_reload(mut self, reload: bool) -> Self {
        self.reload = reload;
        self
    }

    /// Shorthand for `with_reload(true)`
    pub fn periodic(self) -> Self {
        self.with_reload(true)
    }

    pub fn with_callback(mut self, callback: TimerCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Wrap a closure as the callback
    pub fn on_fire<F>(self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.with_callback(TimerCallback::new(f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.pool_capacity, DEFAULT_POOL_SIZE);
        assert_eq!(config.cancel_retries, DEFAULT_CANCEL_RETRIES);
        assert_eq!(config.tick_rate, TickRate::DEFAULT);
    }

    #[test]
    fn test_cancel_retries_floor() {
        assert_eq!(ServiceConfig::new().with_cancel_retries(0).cancel_retries, 1);
    }

    #[test]
    fn test_timer_builder() {
        let config = TimerConfig::new("blink")
            .with_id(7)
            .with_period_ms(100)
            .periodic()
            .on_fire(|| {});
        assert_eq!(config.name.as_str(), "blink");
        assert_eq!(config.id, 7);
        assert_eq!(config.period_ms, 100);
        assert!(config.reload);
        assert!(config.callback.is_some());
    }
}
