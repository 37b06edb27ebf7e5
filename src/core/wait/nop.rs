//! Closure-backed strategy and an inert target, for tests.

use std::fmt;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

use crate::core::context::WaitContext;
use crate::core::errors::{TargetError, WaitError};
use crate::core::target::{
    ByteStream, ContainerInspect, ContainerState, ExecResult, Port, StrategyTarget,
};

type NopWaitFn = Arc<
    dyn for<'a> Fn(&'a WaitContext, &'a dyn StrategyTarget) -> BoxFuture<'a, Result<(), WaitError>>
        + Send
        + Sync,
>;

/// Delegates readiness to a closure.
///
/// ```
/// use waitkit::core::wait::for_nop;
///
/// let strategy = for_nop(|_ctx, _target| Box::pin(async { Ok(()) }));
/// # let _ = strategy;
/// ```
#[derive(Clone)]
pub struct NopStrategy {
    timeout: Option<Duration>,
    wait: NopWaitFn,
}

impl fmt::Debug for NopStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NopStrategy")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

pub fn for_nop<F>(wait: F) -> NopStrategy
where
    F: for<'a> Fn(&'a WaitContext, &'a dyn StrategyTarget) -> BoxFuture<'a, Result<(), WaitError>>
        + Send
        + Sync
        + 'static,
{
    NopStrategy {
        timeout: None,
        wait: Arc::new(wait),
    }
}

impl NopStrategy {
    /// Reported through [`NopStrategy::timeout`]; not enforced.
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub async fn wait_until_ready(&self, ctx: &WaitContext, target: &dyn StrategyTarget) -> Result<(), WaitError> {
        (self.wait)(ctx, target).await
    }
}

/// A target that serves fixed logs and a fixed state (running by default).
#[derive(Debug, Clone, Default)]
pub struct NopStrategyTarget {
    pub logs: Vec<u8>,
    pub state: Option<ContainerState>,
}

impl NopStrategyTarget {
    pub fn with_logs(logs: impl Into<Vec<u8>>) -> Self {
        Self {
            logs: logs.into(),
            state: None,
        }
    }
}

#[async_trait::async_trait]
impl StrategyTarget for NopStrategyTarget {
    async fn host(&self) -> Result<String, TargetError> {
        Ok(String::new())
    }

    async fn inspect(&self) -> Result<ContainerInspect, TargetError> {
        Ok(ContainerInspect::default())
    }

    async fn mapped_port(&self, port: &Port) -> Result<Port, TargetError> {
        Err(TargetError::PortNotFound(port.clone()))
    }

    async fn logs(&self) -> Result<ByteStream, TargetError> {
        Ok(Box::new(Cursor::new(self.logs.clone())))
    }

    async fn exec(&self, _cmd: &[String]) -> Result<ExecResult, TargetError> {
        Ok(ExecResult::default())
    }

    async fn state(&self) -> Result<ContainerState, TargetError> {
        Ok(self.state.clone().unwrap_or_else(ContainerState::running))
    }

    async fn copy_file_from_container(&self, path: &str) -> Result<ByteStream, TargetError> {
        Err(TargetError::NotFound(path.to_string()))
    }
}
