//! Wait until a database in the target answers a query.
//!
//! The engine carries no database drivers of its own: callers plug one in
//! through [`SqlDriver`] and describe how to build a connection URL from the
//! mapped host and port.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::core::context::WaitContext;
use crate::core::debug_logger::get_debug_logger;
use crate::core::errors::{BoxError, WaitError};
use crate::core::target::{Port, StrategyTarget};
use crate::core::wait::{check_target, DEFAULT_POLL_INTERVAL, DEFAULT_STARTUP_TIMEOUT};

pub const DEFAULT_QUERY: &str = "SELECT 1";

/// Opens lazy database handles.
#[async_trait::async_trait]
pub trait SqlDriver: Send + Sync {
    /// Prepare a handle for `url`. Connecting may be deferred to the first query.
    async fn open(&self, url: &str) -> Result<Box<dyn SqlConnection>, BoxError>;
}

#[async_trait::async_trait]
pub trait SqlConnection: Send + Sync {
    async fn execute(&self, query: &str) -> Result<(), BoxError>;
}

type UrlFactory = Arc<dyn Fn(&str, &Port) -> String + Send + Sync>;

#[derive(Clone)]
pub struct SqlStrategy {
    port: Port,
    driver: Arc<dyn SqlDriver>,
    url: UrlFactory,
    query: String,
    timeout: Option<Duration>,
    poll_interval: Duration,
}

impl fmt::Debug for SqlStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlStrategy")
            .field("port", &self.port)
            .field("query", &self.query)
            .field("timeout", &self.timeout)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

/// `url` receives the target host and the mapped port and returns the
/// connection string handed to `driver`.
pub fn for_sql<F>(port: impl Into<Port>, driver: Arc<dyn SqlDriver>, url: F) -> SqlStrategy
where
    F: Fn(&str, &Port) -> String + Send + Sync + 'static,
{
    SqlStrategy {
        port: port.into(),
        driver,
        url: Arc::new(url),
        query: DEFAULT_QUERY.to_string(),
        timeout: None,
        poll_interval: DEFAULT_POLL_INTERVAL,
    }
}

impl SqlStrategy {
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
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

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub async fn wait_until_ready(&self, ctx: &WaitContext, target: &dyn StrategyTarget) -> Result<(), WaitError> {
        let ctx = ctx.with_timeout(self.timeout.unwrap_or(DEFAULT_STARTUP_TIMEOUT));
        let logger = get_debug_logger();

        let host = ctx
            .run(target.host())
            .await?
            .map_err(|err| WaitError::target("host", err))?;

        let mapped = loop {
            check_target(&ctx, target).await?;
            match ctx.run(target.mapped_port(&self.port)).await? {
                Ok(mapped) => break mapped,
                Err(err) if err.is_not_found() => logger.probe_retry("sql", &err.to_string()),
                Err(err) => return Err(WaitError::target("mapped port", err)),
            }
            if let Err(err) = ctx.sleep(self.poll_interval).await {
                return Err(WaitError::interrupted(err, WaitError::PortNotFound(Some(self.port.clone()))));
            }
        };

        let url = (self.url)(&host, &mapped);
        let connection = ctx
            .run(self.driver.open(&url))
            .await?
            .map_err(|source| WaitError::Callback {
                context: "sql.open",
                source,
            })?;

        loop {
            check_target(&ctx, target).await?;
            let last = match ctx.run(connection.execute(&self.query)).await? {
                Ok(()) => return Ok(()),
                Err(err) => WaitError::Probe(format!("query {:?}: {}", self.query, err)),
            };
            logger.probe_retry("sql", &last.to_string());
            if let Err(err) = ctx.sleep(self.poll_interval).await {
                return Err(WaitError::interrupted(err, last));
            }
        }
    }
}
