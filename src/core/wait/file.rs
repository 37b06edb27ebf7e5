use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;

use crate::core::context::WaitContext;
use crate::core::debug_logger::get_debug_logger;
use crate::core::errors::{BoxError, TargetError, WaitError};
use crate::core::target::StrategyTarget;
use crate::core::wait::{check_target, DEFAULT_POLL_INTERVAL, DEFAULT_STARTUP_TIMEOUT};

type FileMatcher = Arc<dyn Fn(&[u8]) -> Result<(), BoxError> + Send + Sync>;

/// Waits for a file to exist in the target, optionally validating its content.
#[derive(Clone)]
pub struct FileStrategy {
    file: String,
    matcher: Option<FileMatcher>,
    timeout: Option<Duration>,
    poll_interval: Duration,
}

impl fmt::Debug for FileStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileStrategy")
            .field("file", &self.file)
            .field("matcher", &self.matcher.is_some())
            .field("timeout", &self.timeout)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

pub fn for_file(file: impl Into<String>) -> FileStrategy {
    FileStrategy::new(file)
}

impl FileStrategy {
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            matcher: None,
            timeout: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Validate the file content once it can be copied. A matcher error is final.
    pub fn with_matcher<F>(mut self, matcher: F) -> Self
    where
        F: Fn(&[u8]) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.matcher = Some(Arc::new(matcher));
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

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub async fn wait_until_ready(&self, ctx: &WaitContext, target: &dyn StrategyTarget) -> Result<(), WaitError> {
        let ctx = ctx.with_timeout(self.timeout.unwrap_or(DEFAULT_STARTUP_TIMEOUT));
        let content = self.read_when_ready(&ctx, target).await?;
        if let Some(matcher) = &self.matcher {
            matcher(&content).map_err(|source| WaitError::Callback {
                context: "matcher",
                source,
            })?;
        }
        Ok(())
    }

    /// Poll until the file can be copied and return its content. Runs under
    /// the caller's context as is.
    pub(crate) async fn read_when_ready(
        &self,
        ctx: &WaitContext,
        target: &dyn StrategyTarget,
    ) -> Result<Vec<u8>, WaitError> {
        loop {
            check_target(ctx, target).await?;
            match ctx.run(target.copy_file_from_container(&self.file)).await? {
                Ok(mut stream) => {
                    let mut content = Vec::new();
                    ctx.run(stream.read_to_end(&mut content))
                        .await?
                        .map_err(|err| WaitError::target("copy from container", TargetError::Io(err)))?;
                    return Ok(content);
                }
                Err(err) if err.is_not_found() => {
                    get_debug_logger().probe_retry("file", &format!("{}: {}", self.file, err));
                }
                Err(err) => return Err(WaitError::target("copy from container", err)),
            }
            ctx.sleep(self.poll_interval).await?;
        }
    }
}
