//! Wait for text (or a pattern) to appear in the target's output.
//!
//! Every poll re-reads the whole accumulated log and counts matches from
//! scratch. The occurrence check is exact equality, so a line that shows up
//! more often than requested fails too.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use regex::bytes::Regex;
use tokio::io::AsyncReadExt;

use crate::core::context::WaitContext;
use crate::core::debug_logger::get_debug_logger;
use crate::core::errors::{BoxError, PermanentError, WaitError};
use crate::core::target::StrategyTarget;
use crate::core::wait::{check_target, DEFAULT_POLL_INTERVAL, DEFAULT_STARTUP_TIMEOUT};

/// All matches of a pattern; each match lists its capture groups, group 0
/// being the whole match. Groups that did not participate are empty.
pub type Submatches<'a> = [Vec<&'a [u8]>];

type SubmatchCallback = Arc<dyn Fn(&str, &Submatches<'_>) -> Result<(), BoxError> + Send + Sync>;

#[derive(Clone)]
pub struct LogStrategy {
    log: String,
    is_regexp: bool,
    occurrence: usize,
    submatch: Option<SubmatchCallback>,
    timeout: Option<Duration>,
    poll_interval: Duration,
}

impl fmt::Debug for LogStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogStrategy")
            .field("log", &self.log)
            .field("is_regexp", &self.is_regexp)
            .field("occurrence", &self.occurrence)
            .field("submatch", &self.submatch.is_some())
            .field("timeout", &self.timeout)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

pub fn for_log(log: impl Into<String>) -> LogStrategy {
    LogStrategy::new(log)
}

enum Matched {
    Yes,
    No,
}

impl LogStrategy {
    pub fn new(log: impl Into<String>) -> Self {
        Self {
            log: log.into(),
            is_regexp: false,
            occurrence: 1,
            submatch: None,
            timeout: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Treat the log text as a regular expression.
    pub fn as_regexp(mut self) -> Self {
        self.is_regexp = true;
        self
    }

    /// Require exactly `occurrence` matches; zero is treated as one.
    pub fn with_occurrence(mut self, occurrence: usize) -> Self {
        self.occurrence = occurrence.max(1);
        self
    }

    /// Validate the regex matches with `callback` instead of counting them.
    ///
    /// `Ok(())` means ready. An error wrapped in [`PermanentError`] stops
    /// waiting immediately; any other error keeps polling.
    pub fn with_submatch<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, &Submatches<'_>) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.is_regexp = true;
        self.submatch = Some(Arc::new(callback));
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn occurrence(&self) -> usize {
        self.occurrence
    }

    pub async fn wait_until_ready(&self, ctx: &WaitContext, target: &dyn StrategyTarget) -> Result<(), WaitError> {
        let ctx = ctx.with_timeout(self.timeout.unwrap_or(DEFAULT_STARTUP_TIMEOUT));
        let pattern = if self.is_regexp {
            Some(Regex::new(&self.log).map_err(|err| {
                WaitError::Config(format!("invalid log pattern {:?}: {}", self.log, err))
            })?)
        } else {
            None
        };
        let logger = get_debug_logger();

        let mut length = 0usize;
        loop {
            let check_err = match check_target(&ctx, target).await {
                Ok(()) => None,
                Err(err) if err.is_context() => return Err(err),
                Err(err) => Some(err),
            };

            let logs = match read_logs(&ctx, target).await {
                Ok(logs) => logs,
                Err(err) if err.is_context() => return Err(WaitError::interrupted_with(err, check_err)),
                Err(err) => {
                    logger.probe_retry("log", &err.to_string());
                    if let Err(err) = ctx.sleep(self.poll_interval).await {
                        return Err(WaitError::interrupted_with(err, check_err));
                    }
                    continue;
                }
            };

            if let Matched::Yes = self.matches(&logs, pattern.as_ref())? {
                // a match from a dead target does not count
                return match check_target(&ctx, target).await {
                    Ok(()) => Ok(()),
                    Err(err) => {
                        if !err.is_context() {
                            logger.state_check_failed("log", &err.to_string());
                        }
                        Err(err)
                    }
                };
            }

            // while nothing matched, a dead target only fails the wait once
            // its output stopped growing
            if logs.len() == length {
                if let Some(err) = check_err {
                    logger.state_check_failed("log", &err.to_string());
                    return Err(err);
                }
            }
            length = logs.len();

            if let Err(err) = ctx.sleep(self.poll_interval).await {
                return Err(WaitError::interrupted_with(err, check_err));
            }
        }
    }

    fn matches(&self, logs: &[u8], pattern: Option<&Regex>) -> Result<Matched, WaitError> {
        let Some(pattern) = pattern else {
            let count = String::from_utf8_lossy(logs).matches(self.log.as_str()).count();
            return Ok(if count == self.occurrence { Matched::Yes } else { Matched::No });
        };

        let Some(callback) = &self.submatch else {
            let count = pattern.find_iter(logs).count();
            return Ok(if count == self.occurrence { Matched::Yes } else { Matched::No });
        };

        let submatches: Vec<Vec<&[u8]>> = pattern
            .captures_iter(logs)
            .map(|caps| {
                caps.iter()
                    .map(|group| group.map(|m| m.as_bytes()).unwrap_or_default())
                    .collect()
            })
            .collect();

        match callback(&self.log, &submatches) {
            Ok(()) => Ok(Matched::Yes),
            Err(err) => match err.downcast::<PermanentError>() {
                Ok(permanent) => Err(WaitError::Permanent(*permanent)),
                Err(err) => {
                    get_debug_logger().probe_retry("log", &err.to_string());
                    Ok(Matched::No)
                }
            },
        }
    }
}

async fn read_logs(ctx: &WaitContext, target: &dyn StrategyTarget) -> Result<Vec<u8>, WaitError> {
    let mut stream = ctx
        .run(target.logs())
        .await?
        .map_err(|err| WaitError::target("logs", err))?;
    let mut logs = Vec::new();
    ctx.run(stream.read_to_end(&mut logs))
        .await?
        .map_err(|err| WaitError::target("read logs", err.into()))?;
    Ok(logs)
}
