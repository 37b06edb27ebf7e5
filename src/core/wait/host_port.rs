//! Wait for a port to be mapped, reachable from outside and listening inside.
//!
//! Three stages, each optional after the first:
//!
//! 1. the internal port gets a host mapping;
//! 2. a TCP dial to the mapped port succeeds (connection refused is retried);
//! 3. a shell probe inside the target sees the port listening. Targets
//!    without a usable `/bin/sh` fall back to the external check alone.

use std::io::ErrorKind;
use std::time::Duration;

use tokio::net::TcpStream;

use crate::core::context::WaitContext;
use crate::core::debug_logger::get_debug_logger;
use crate::core::errors::{TargetError, WaitError};
use crate::core::target::{Port, StrategyTarget};
use crate::core::wait::port::{host_port_mapping, join_host_port};
use crate::core::wait::{check_target, DEFAULT_POLL_INTERVAL, DEFAULT_STARTUP_TIMEOUT};

const EXIT_SHELL_NOT_EXECUTABLE: i64 = 126;
const EXIT_SHELL_NOT_FOUND: i64 = 127;

#[derive(Debug, Clone)]
pub struct HostPortStrategy {
    port: Option<Port>,
    timeout: Option<Duration>,
    poll_interval: Duration,
    skip_internal_check: bool,
    skip_external_check: bool,
}

/// Wait until `port` is mapped, accepts connections and is bound inside the target.
pub fn for_listening_port(port: impl Into<Port>) -> HostPortStrategy {
    HostPortStrategy::new(Some(port.into()))
}

/// Like [`for_listening_port`] for the lowest exposed port.
pub fn for_exposed_port() -> HostPortStrategy {
    HostPortStrategy::new(None)
}

/// Only wait for `port` to get a host mapping.
pub fn for_mapped_port(port: impl Into<Port>) -> HostPortStrategy {
    for_listening_port(port)
        .skip_external_check()
        .skip_internal_check()
}

enum InternalCheck {
    Listening,
    ShellNotExecutable,
    ShellNotFound,
}

impl HostPortStrategy {
    pub fn new(port: Option<Port>) -> Self {
        Self {
            port,
            timeout: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            skip_internal_check: false,
            skip_external_check: false,
        }
    }

    /// Skip the in-target shell probe, for images without a shell or
    /// services that bind late.
    pub fn skip_internal_check(mut self) -> Self {
        self.skip_internal_check = true;
        self
    }

    pub fn skip_external_check(mut self) -> Self {
        self.skip_external_check = true;
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

    pub fn port(&self) -> Option<&Port> {
        self.port.as_ref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub async fn wait_until_ready(&self, ctx: &WaitContext, target: &dyn StrategyTarget) -> Result<(), WaitError> {
        let ctx = ctx.with_timeout(self.timeout.unwrap_or(DEFAULT_STARTUP_TIMEOUT));
        let logger = get_debug_logger();

        let (host, internal_port, mapped_port) = match &self.port {
            Some(port) => {
                let host = ctx
                    .run(target.host())
                    .await?
                    .map_err(|err| WaitError::target("host", err))?;
                let mapped = self.mapped_port(&ctx, target, port).await?;
                (host, port.clone(), mapped)
            }
            None => {
                let details =
                    host_port_mapping(&ctx, target, None, self.poll_interval, false, None).await?;
                let mapped = Port::new(details.host_port, details.internal_port.proto());
                (details.host, details.internal_port, mapped)
            }
        };
        logger.port_resolved("host_port", &internal_port.to_string(), &host, mapped_port.number());

        if !self.skip_external_check {
            self.external_check(&ctx, target, &host, &mapped_port).await?;
        }
        if self.skip_internal_check {
            return Ok(());
        }

        match self.internal_check(&ctx, target, &internal_port).await? {
            InternalCheck::Listening => {}
            InternalCheck::ShellNotExecutable => logger.warn_sync(
                "host_port",
                "internal_check_skipped",
                "Shell not executable in container, only external port validated",
            ),
            InternalCheck::ShellNotFound => logger.warn_sync(
                "host_port",
                "internal_check_skipped",
                "Shell not found in container, only external port validated",
            ),
        }
        Ok(())
    }

    async fn mapped_port(
        &self,
        ctx: &WaitContext,
        target: &dyn StrategyTarget,
        port: &Port,
    ) -> Result<Port, WaitError> {
        let not_found = || WaitError::PortNotFound(Some(port.clone()));
        loop {
            match ctx.run(target.mapped_port(port)).await {
                Err(err) => return Err(WaitError::interrupted(err, not_found())),
                Ok(Ok(mapped)) => return Ok(mapped),
                Ok(Err(err)) if err.is_not_found() => {
                    get_debug_logger().probe_retry("host_port", &err.to_string());
                }
                Ok(Err(err)) => return Err(WaitError::target("mapped port", err)),
            }

            check_target(ctx, target).await?;
            if let Err(err) = ctx.sleep(self.poll_interval).await {
                return Err(WaitError::interrupted(err, not_found()));
            }
        }
    }

    async fn external_check(
        &self,
        ctx: &WaitContext,
        target: &dyn StrategyTarget,
        host: &str,
        mapped: &Port,
    ) -> Result<(), WaitError> {
        if mapped.proto() != "tcp" {
            return Ok(());
        }
        let address = join_host_port(host, mapped.number());
        loop {
            check_target(ctx, target).await?;
            match ctx.run(TcpStream::connect(address.as_str())).await? {
                Ok(_stream) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::ConnectionRefused => {
                    get_debug_logger().probe_retry("host_port", &format!("dial {}: {}", address, err));
                    ctx.sleep(self.poll_interval).await?;
                }
                Err(err) => {
                    return Err(WaitError::target("dial", TargetError::Other(format!("{}: {}", address, err))))
                }
            }
        }
    }

    async fn internal_check(
        &self,
        ctx: &WaitContext,
        target: &dyn StrategyTarget,
        port: &Port,
    ) -> Result<InternalCheck, WaitError> {
        let command = vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            build_internal_check_command(port.number()),
        ];
        loop {
            check_target(ctx, target).await?;
            let result = ctx
                .run(target.exec(&command))
                .await?
                .map_err(|err| WaitError::target("host port waiting failed", err))?;

            match result.exit_code {
                0 => return Ok(InternalCheck::Listening),
                EXIT_SHELL_NOT_EXECUTABLE => return Ok(InternalCheck::ShellNotExecutable),
                EXIT_SHELL_NOT_FOUND => return Ok(InternalCheck::ShellNotFound),
                _ => ctx.sleep(self.poll_interval).await?,
            }
        }
    }
}

/// Shell snippet that succeeds once something listens on `port` inside the target.
pub(crate) fn build_internal_check_command(port: u16) -> String {
    format!(
        "true && (\n\
         cat /proc/net/tcp* | awk '{{print $2}}' | grep -i :{:04x} ||\n\
         nc -vz -w 1 localhost {} ||\n\
         /bin/sh -c '</dev/tcp/localhost/{}'\n\
         )\n",
        port, port, port
    )
}
