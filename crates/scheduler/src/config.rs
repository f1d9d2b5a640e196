//! Static scheduler configuration.

use std::time::Duration;

/// Tunables fixed for the lifetime of one scheduler instance.
///
/// Runtime-flippable knobs live in [`huginn_core::RuntimeConfig`]; this
/// struct is decided at construction.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Pause between scheduling ticks.
    pub tick_interval: Duration,
    /// Definition-cache lifetime before a reload is attempted.
    pub cache_ttl: Duration,
    /// Identity global actions are queued under; lowercase.
    pub controller_mac: String,
    /// Terminal entries older than this (past completion) are purged.
    pub retention: Duration,
    /// Pending entries waiting longer than this get a priority bump each
    /// tick.
    pub starvation_threshold: Duration,
}

/// Priority ceiling for anti-starvation aging.
pub const MAX_PRIORITY: u8 = 100;

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(5),
            cache_ttl: Duration::from_secs(60),
            controller_mac: "__global__".to_string(),
            retention: Duration::from_secs(7 * 24 * 3600),
            starvation_threshold: Duration::from_secs(3600),
        }
    }
}

impl SchedulerConfig {
    /// Normalize operator-supplied fields (controller MAC is compared
    /// case-insensitively everywhere, stored lowercase).
    pub fn normalized(mut self) -> Self {
        self.controller_mac = self.controller_mac.to_lowercase();
        self
    }
}
