use std::time::Duration;

use crate::core::context::WaitContext;
use crate::core::errors::WaitError;
use crate::core::target::StrategyTarget;
use crate::core::wait::DEFAULT_POLL_INTERVAL;

/// Waits for the target to stop running. A target that no longer exists
/// counts as exited. Unbounded unless a timeout is set.
#[derive(Debug, Clone)]
pub struct ExitStrategy {
    timeout: Option<Duration>,
    poll_interval: Duration,
}

impl Default for ExitStrategy {
    fn default() -> Self {
        Self {
            timeout: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

pub fn for_exit() -> ExitStrategy {
    ExitStrategy::default()
}

impl ExitStrategy {
    pub fn with_exit_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_exit_timeout(timeout)
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub async fn wait_until_ready(&self, ctx: &WaitContext, target: &dyn StrategyTarget) -> Result<(), WaitError> {
        let ctx = match self.timeout {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx.clone(),
        };

        loop {
            match ctx.run(target.state()).await? {
                Ok(state) if !state.running => return Ok(()),
                Ok(_) => {}
                Err(err) if err.is_not_found() => return Ok(()),
                Err(err) => return Err(WaitError::target("get state", err)),
            }
            ctx.sleep(self.poll_interval).await?;
        }
    }
}
