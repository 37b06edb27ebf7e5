//! Sequential composition of strategies.
//!
//! Two timeouts, deliberately distinct:
//!
//! - [`MultiStrategy::with_deadline`] bounds the whole evaluation, whatever
//!   the children declare;
//! - [`MultiStrategy::with_startup_timeout_default`] is only a fallback for
//!   children that declare no timeout of their own. Children that do keep
//!   theirs and run without an extra bound.

use std::time::Duration;

use crate::core::context::WaitContext;
use crate::core::errors::WaitError;
use crate::core::target::StrategyTarget;
use crate::core::wait::Strategy;

#[derive(Debug, Clone, Default)]
pub struct MultiStrategy {
    strategies: Vec<Strategy>,
    timeout: Option<Duration>,
    deadline: Option<Duration>,
}

/// Evaluate `strategies` one after another; the first failure wins.
pub fn for_all<I>(strategies: I) -> MultiStrategy
where
    I: IntoIterator<Item = Strategy>,
{
    MultiStrategy {
        strategies: strategies.into_iter().collect(),
        timeout: None,
        deadline: None,
    }
}

impl MultiStrategy {
    pub fn with_strategy(mut self, strategy: impl Into<Strategy>) -> Self {
        self.strategies.push(strategy.into());
        self
    }

    /// Timeout for children without one of their own.
    pub fn with_startup_timeout_default(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Overall bound for the whole evaluation.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Same as [`MultiStrategy::with_deadline`].
    #[deprecated(note = "use with_deadline or with_startup_timeout_default")]
    pub fn with_startup_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(timeout)
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.strategies = self
            .strategies
            .into_iter()
            .map(|strategy| strategy.with_poll_interval(poll_interval))
            .collect();
        self
    }

    pub fn strategies(&self) -> &[Strategy] {
        &self.strategies
    }

    pub(crate) fn strategies_mut(&mut self) -> &mut Vec<Strategy> {
        &mut self.strategies
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    /// The default timeout handed to children.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub async fn wait_until_ready(&self, ctx: &WaitContext, target: &dyn StrategyTarget) -> Result<(), WaitError> {
        if self.strategies.is_empty() {
            return Err(WaitError::Config("no wait strategy supplied".to_string()));
        }

        let ctx = match self.deadline {
            Some(deadline) => ctx.with_timeout(deadline),
            None => ctx.clone(),
        };

        for strategy in &self.strategies {
            let child = match (self.timeout, strategy.timeout()) {
                (Some(default), None) => ctx.with_timeout(default),
                _ => ctx.clone(),
            };
            strategy.wait_until_ready(&child, target).await?;
        }
        Ok(())
    }
}

impl Strategy {
    /// Apply a poll interval to this strategy and, for composites, every descendant.
    pub fn with_poll_interval(self, poll_interval: Duration) -> Self {
        match self {
            Strategy::Log(s) => s.with_poll_interval(poll_interval).into(),
            Strategy::HostPort(s) => s.with_poll_interval(poll_interval).into(),
            Strategy::Http(s) => s.with_poll_interval(poll_interval).into(),
            Strategy::Health(s) => s.with_poll_interval(poll_interval).into(),
            Strategy::Exec(s) => s.with_poll_interval(poll_interval).into(),
            Strategy::Sql(s) => s.with_poll_interval(poll_interval).into(),
            Strategy::File(s) => s.with_poll_interval(poll_interval).into(),
            Strategy::Tls(s) => s.with_poll_interval(poll_interval).into(),
            Strategy::Exit(s) => s.with_poll_interval(poll_interval).into(),
            Strategy::Multi(s) => s.with_poll_interval(poll_interval).into(),
            Strategy::Nop(s) => Strategy::Nop(s),
        }
    }
}
