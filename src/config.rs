//! # Global scheduler configuration.
//!
//! Provides [`Config`], centralized defaults for groups, event managers and
//! the async driver.
//!
//! Config is used in three ways:
//! 1. **Group creation**: `Group::with_config(name, &config)`
//! 2. **Event trees**: `EventManager::with_config(name, &config)` (separator)
//! 3. **Driving**: `drive(&root, &config, token)`
//!
//! ## Sentinel values
//! - `max_active = 0` → unbounded active set

use std::time::Duration;

use crate::policies::{AutoPolicy, Eviction};

/// Global configuration for the scheduling core.
///
/// ## Field semantics
/// - `separator`: path separator for event and group addressing
/// - `auto_start` / `auto_stop`: default auto-management of new groups
/// - `max_active`: default active ceiling of new groups (`0` = unbounded)
/// - `eviction`: victim selection for forced starts
/// - `tick_period`: period of the async driver
/// - `stop_when_done`: let the driver return once the root is done
#[derive(Clone, Debug)]
pub struct Config {
    /// Separator used to address descendants (`"child/event"`).
    pub separator: char,

    /// Default start-side policy for groups.
    pub auto_start: AutoPolicy,

    /// Default stop-side policy for groups.
    pub auto_stop: AutoPolicy,

    /// Default ceiling on the active set.
    ///
    /// - `0` = unbounded
    /// - `n > 0` = at most `n` children active at once
    pub max_active: usize,

    /// Victim selection when a Start is forced past `max_active`.
    pub eviction: Eviction,

    /// Interval between two driver ticks.
    pub tick_period: Duration,

    /// When `true`, the driver returns as soon as the root reports done.
    pub stop_when_done: bool,
}

impl Config {
    /// Returns the active ceiling as an `Option`.
    ///
    /// - `None` → unbounded
    /// - `Some(n)` → at most `n` active children
    #[inline]
    pub fn active_limit(&self) -> Option<usize> {
        if self.max_active == 0 {
            None
        } else {
            Some(self.max_active)
        }
    }

    /// Returns the driver period clamped to at least one millisecond.
    #[inline]
    pub fn tick_period_clamped(&self) -> Duration {
        self.tick_period.max(Duration::from_millis(1))
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `separator = '/'`
    /// - `auto_start = auto_stop = AutoPolicy::Always`
    /// - `max_active = 0` (unbounded)
    /// - `eviction = Eviction::Random`
    /// - `tick_period = 20ms` (50 Hz control loop)
    /// - `stop_when_done = false`
    fn default() -> Self {
        Self {
            separator: '/',
            auto_start: AutoPolicy::default(),
            auto_stop: AutoPolicy::default(),
            max_active: 0,
            eviction: Eviction::default(),
            tick_period: Duration::from_millis(20),
            stop_when_done: false,
        }
    }
}
