use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::core::context::WaitContext;
use crate::core::debug_logger::get_debug_logger;
use crate::core::errors::WaitError;
use crate::core::target::StrategyTarget;
use crate::core::wait::{check_target, DEFAULT_POLL_INTERVAL, DEFAULT_STARTUP_TIMEOUT};

type ExitCodeMatcher = Arc<dyn Fn(i64) -> bool + Send + Sync>;
type ResponseMatcher = Arc<dyn Fn(&[u8]) -> bool + Send + Sync>;

/// Runs a command in the target until its exit code (and optionally its
/// output) is acceptable.
///
/// A missing or non-executable shell shows up as exit code 127/126 and is
/// judged by the matcher like any other code.
#[derive(Clone)]
pub struct ExecStrategy {
    cmd: Vec<String>,
    exit_code_matcher: ExitCodeMatcher,
    response_matcher: Option<ResponseMatcher>,
    timeout: Option<Duration>,
    poll_interval: Duration,
}

impl fmt::Debug for ExecStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecStrategy")
            .field("cmd", &self.cmd)
            .field("response_matcher", &self.response_matcher.is_some())
            .field("timeout", &self.timeout)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

pub fn for_exec<I, S>(cmd: I) -> ExecStrategy
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    ExecStrategy::new(cmd)
}

impl ExecStrategy {
    pub fn new<I, S>(cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cmd: cmd.into_iter().map(Into::into).collect(),
            exit_code_matcher: Arc::new(|code| code == 0),
            response_matcher: None,
            timeout: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_exit_code_matcher<F>(mut self, matcher: F) -> Self
    where
        F: Fn(i64) -> bool + Send + Sync + 'static,
    {
        self.exit_code_matcher = Arc::new(matcher);
        self
    }

    pub fn with_exit_code(self, exit_code: i64) -> Self {
        self.with_exit_code_matcher(move |code| code == exit_code)
    }

    pub fn with_response_matcher<F>(mut self, matcher: F) -> Self
    where
        F: Fn(&[u8]) -> bool + Send + Sync + 'static,
    {
        self.response_matcher = Some(Arc::new(matcher));
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

    pub fn cmd(&self) -> &[String] {
        &self.cmd
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub async fn wait_until_ready(&self, ctx: &WaitContext, target: &dyn StrategyTarget) -> Result<(), WaitError> {
        if self.cmd.is_empty() {
            return Err(WaitError::Config("exec strategy needs a command".to_string()));
        }
        let ctx = ctx.with_timeout(self.timeout.unwrap_or(DEFAULT_STARTUP_TIMEOUT));
        let logger = get_debug_logger();

        loop {
            check_target(&ctx, target).await?;
            let result = ctx
                .run(target.exec(&self.cmd))
                .await?
                .map_err(|err| WaitError::target("exec", err))?;

            let response_ok = self
                .response_matcher
                .as_ref()
                .map_or(true, |matcher| matcher(&result.output));
            if (self.exit_code_matcher)(result.exit_code) && response_ok {
                return Ok(());
            }
            logger.probe_retry("exec", &format!("exit code {}", result.exit_code));

            if let Err(err) = ctx.sleep(self.poll_interval).await {
                return Err(WaitError::interrupted(
                    err,
                    WaitError::Probe(format!("last exit code {}", result.exit_code)),
                ));
            }
        }
    }
}
