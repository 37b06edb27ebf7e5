/*!
Composable readiness probes ("wait strategies").

A [`Strategy`] is a declarative readiness condition. Leaves poll one signal
(a log line, a port, an HTTP endpoint, a health status, ...) until it holds,
the target dies, or the [`WaitContext`] runs out. [`MultiStrategy`] chains
leaves sequentially under one deadline, and [`walk`] inspects or prunes a
composed tree.

```no_run
use std::time::Duration;
use waitkit::core::context::WaitContext;
use waitkit::core::target::StrategyTarget;
use waitkit::core::wait::{for_all, for_http, for_log};

async fn ready(target: &dyn StrategyTarget) -> Result<(), waitkit::core::errors::WaitError> {
    let strategy = for_all(vec![
        for_log("database system is ready to accept connections")
            .with_occurrence(2)
            .into(),
        for_http("/health").with_port(8080).into(),
    ])
    .with_deadline(Duration::from_secs(30));

    strategy.wait_until_ready(&WaitContext::background(), target).await
}
```

## Loop contract

Every leaf except [`ExitStrategy`] and [`NopStrategy`] calls [`check_target`]
on each iteration, so a crashed target fails fast instead of burning the whole
budget. Context errors are returned as-is (optionally wrapping the last
transient failure) so callers can tell "my timeout elapsed" from "the target
died" from "the signal never appeared".
*/

mod all;
mod exec;
mod exit;
mod file;
mod health;
mod host_port;
mod http;
mod log;
mod nop;
pub mod port;
mod sql;
mod tls;
mod walk;

use std::time::{Duration, Instant};

use futures::future::BoxFuture;

pub use all::{for_all, MultiStrategy};
pub use exec::{for_exec, ExecStrategy};
pub use exit::{for_exit, ExitStrategy};
pub use file::{for_file, FileStrategy};
pub use health::{for_health_check, HealthStrategy};
pub use host_port::{for_exposed_port, for_listening_port, for_mapped_port, HostPortStrategy};
pub use http::{
    for_http, HttpClientError, HttpClientTrait, HttpProbeRequest, HttpProbeResponse,
    HttpStrategy, HttpTlsOptions,
};
#[cfg(feature = "http-probe")]
pub use http::IsahcProbeClient;
pub use log::{for_log, LogStrategy, Submatches};
pub use nop::{for_nop, NopStrategy, NopStrategyTarget};
pub use port::{resolve_host_port_binding, PortDetails};
pub use sql::{for_sql, SqlConnection, SqlDriver, SqlStrategy};
pub use tls::{for_tls_cert, TlsClientConfig, TlsStrategy};
pub use walk::{walk, Visit};

pub use crate::config::defaults::{DEFAULT_POLL_INTERVAL, DEFAULT_STARTUP_TIMEOUT};

use crate::core::context::WaitContext;
use crate::core::debug_logger::{get_debug_logger, short_id};
use crate::core::errors::WaitError;
use crate::core::target::{ContainerState, StrategyTarget};

/// A readiness condition, possibly composite.
#[derive(Clone, Debug)]
pub enum Strategy {
    Log(LogStrategy),
    HostPort(HostPortStrategy),
    Http(HttpStrategy),
    Health(HealthStrategy),
    Exec(ExecStrategy),
    Sql(SqlStrategy),
    File(FileStrategy),
    Tls(TlsStrategy),
    Exit(ExitStrategy),
    Multi(MultiStrategy),
    Nop(NopStrategy),
}

impl Strategy {
    pub fn kind(&self) -> &'static str {
        match self {
            Strategy::Log(_) => "log",
            Strategy::HostPort(_) => "host_port",
            Strategy::Http(_) => "http",
            Strategy::Health(_) => "health",
            Strategy::Exec(_) => "exec",
            Strategy::Sql(_) => "sql",
            Strategy::File(_) => "file",
            Strategy::Tls(_) => "tls",
            Strategy::Exit(_) => "exit",
            Strategy::Multi(_) => "multi",
            Strategy::Nop(_) => "nop",
        }
    }

    /// The explicitly configured timeout, `None` when the strategy relies on
    /// its default (or, for composites, on its children).
    pub fn timeout(&self) -> Option<Duration> {
        match self {
            Strategy::Log(s) => s.timeout(),
            Strategy::HostPort(s) => s.timeout(),
            Strategy::Http(s) => s.timeout(),
            Strategy::Health(s) => s.timeout(),
            Strategy::Exec(s) => s.timeout(),
            Strategy::Sql(s) => s.timeout(),
            Strategy::File(s) => s.timeout(),
            Strategy::Tls(s) => s.timeout(),
            Strategy::Exit(s) => s.timeout(),
            Strategy::Multi(s) => s.timeout(),
            Strategy::Nop(s) => s.timeout(),
        }
    }

    pub fn wait_until_ready<'a>(
        &'a self,
        ctx: &'a WaitContext,
        target: &'a dyn StrategyTarget,
    ) -> BoxFuture<'a, Result<(), WaitError>> {
        Box::pin(async move {
            let logger = get_debug_logger();
            let correlation_id = short_id();
            let started = Instant::now();
            logger.strategy_start(
                self.kind(),
                self.timeout().map(|t| t.as_millis() as u64),
                &correlation_id,
            );

            let result = match self {
                Strategy::Log(s) => s.wait_until_ready(ctx, target).await,
                Strategy::HostPort(s) => s.wait_until_ready(ctx, target).await,
                Strategy::Http(s) => s.wait_until_ready(ctx, target).await,
                Strategy::Health(s) => s.wait_until_ready(ctx, target).await,
                Strategy::Exec(s) => s.wait_until_ready(ctx, target).await,
                Strategy::Sql(s) => s.wait_until_ready(ctx, target).await,
                Strategy::File(s) => s.wait_until_ready(ctx, target).await,
                Strategy::Tls(s) => s.wait_until_ready(ctx, target).await,
                Strategy::Exit(s) => s.wait_until_ready(ctx, target).await,
                Strategy::Multi(s) => s.wait_until_ready(ctx, target).await,
                Strategy::Nop(s) => s.wait_until_ready(ctx, target).await,
            };

            let error = result.as_ref().err().map(ToString::to_string);
            logger.strategy_end(
                self.kind(),
                error.as_deref(),
                started.elapsed().as_millis() as u64,
                &correlation_id,
            );
            result
        })
    }
}

macro_rules! impl_from_strategy {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Strategy {
                fn from(strategy: $ty) -> Self {
                    Strategy::$variant(strategy)
                }
            }
        )*
    };
}

impl_from_strategy! {
    Log => LogStrategy,
    HostPort => HostPortStrategy,
    Http => HttpStrategy,
    Health => HealthStrategy,
    Exec => ExecStrategy,
    Sql => SqlStrategy,
    File => FileStrategy,
    Tls => TlsStrategy,
    Exit => ExitStrategy,
    Multi => MultiStrategy,
    Nop => NopStrategy,
}

/// Classify a lifecycle snapshot: only a running target may keep being probed.
pub fn check_state(state: &ContainerState) -> Result<(), WaitError> {
    if state.running {
        Ok(())
    } else if state.oom_killed {
        Err(WaitError::OomKilled)
    } else if state.status == "exited" {
        Err(WaitError::ContainerExited(state.exit_code))
    } else {
        Err(WaitError::UnexpectedStatus(state.status.clone()))
    }
}

/// Fetch the target state and classify it with [`check_state`].
pub async fn check_target(ctx: &WaitContext, target: &dyn StrategyTarget) -> Result<(), WaitError> {
    let state = ctx
        .run(target.state())
        .await?
        .map_err(|err| WaitError::target("get state", err))?;
    check_state(&state)
}
