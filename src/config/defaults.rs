use std::time::Duration;

use super::WaitConfig;

/// Budget a leaf strategy gets when no explicit startup timeout is set.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(60);

/// Delay between two unsuccessful probe attempts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            startup_timeout_ms: DEFAULT_STARTUP_TIMEOUT.as_millis() as u64,
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            force_ipv4_localhost: false,
        }
    }
}
