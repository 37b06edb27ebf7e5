use std::time::Duration;

use crate::core::context::WaitContext;
use crate::core::errors::WaitError;
use crate::core::target::StrategyTarget;
use crate::core::wait::{check_state, DEFAULT_POLL_INTERVAL, DEFAULT_STARTUP_TIMEOUT};

pub const HEALTHY: &str = "healthy";

/// Waits until the target's own health check reports `healthy`.
///
/// A target without health information is simply not healthy yet.
#[derive(Debug, Clone)]
pub struct HealthStrategy {
    timeout: Option<Duration>,
    poll_interval: Duration,
}

impl Default for HealthStrategy {
    fn default() -> Self {
        Self {
            timeout: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

pub fn for_health_check() -> HealthStrategy {
    HealthStrategy::default()
}

impl HealthStrategy {
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Alias of [`HealthStrategy::with_startup_timeout`].
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_startup_timeout(timeout)
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub async fn wait_until_ready(&self, ctx: &WaitContext, target: &dyn StrategyTarget) -> Result<(), WaitError> {
        let ctx = ctx.with_timeout(self.timeout.unwrap_or(DEFAULT_STARTUP_TIMEOUT));
        loop {
            let state = ctx
                .run(target.state())
                .await?
                .map_err(|err| WaitError::target("get state", err))?;
            check_state(&state)?;

            if state.health.as_ref().is_some_and(|health| health.status == HEALTHY) {
                return Ok(());
            }
            ctx.sleep(self.poll_interval).await?;
        }
    }
}
