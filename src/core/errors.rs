//! Error taxonomy shared by every wait strategy.
//!
//! Strategies classify each failure they observe into one of four buckets:
//!
//! - **Context**: [`WaitError::DeadlineExceeded`] / [`WaitError::Cancelled`], the
//!   caller's own budget ran out. When a loop had a more specific last failure it
//!   is attached through [`WaitError::Interrupted`].
//! - **Transient**: never surfaced directly; the loop sleeps and retries.
//! - **Permanent**: target-state failures ([`WaitError::ContainerExited`],
//!   [`WaitError::OomKilled`], [`WaitError::UnexpectedStatus`]), configuration
//!   mistakes and anything a user callback wraps in [`PermanentError`].
//! - **Sentinel**: [`WaitError::PortNotFound`] carries the port that never bound.

use std::error::Error as StdError;

use crate::core::target::{HostIp, Port};

/// Boxed error returned by user supplied callbacks (matchers, visitors, drivers).
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors reported by a [`StrategyTarget`](crate::core::target::StrategyTarget).
#[derive(Debug, thiserror::Error)]
pub enum TargetError {
    /// The requested object (container, file) does not exist (yet).
    #[error("not found: {0}")]
    NotFound(String),
    /// The internal port has no host mapping yet.
    #[error("port {0} not mapped")]
    PortNotFound(Port),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
}

impl TargetError {
    pub fn is_not_found(&self) -> bool {
        match self {
            TargetError::NotFound(_) | TargetError::PortNotFound(_) => true,
            TargetError::Io(err) => err.kind() == std::io::ErrorKind::NotFound,
            TargetError::Other(_) => false,
        }
    }
}

/// Marks a callback failure as terminal: the owning loop stops retrying at once.
///
/// ```
/// use waitkit::core::errors::{BoxError, PermanentError};
///
/// fn validate(line: &str) -> Result<(), BoxError> {
///     if line.contains("FATAL") {
///         return Err(PermanentError::new("server refused to start").into());
///     }
///     Err("not yet".into())
/// }
/// assert!(validate("FATAL").is_err());
/// ```
#[derive(Debug, thiserror::Error)]
#[error("{source}")]
pub struct PermanentError {
    source: BoxError,
}

impl PermanentError {
    pub fn new(source: impl Into<BoxError>) -> Self {
        Self {
            source: source.into(),
        }
    }

    pub fn into_inner(self) -> BoxError {
        self.source
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    #[error("context canceled")]
    Cancelled,

    /// A context error together with the last failure the loop observed.
    #[error("{context}: {last}")]
    Interrupted {
        context: Box<WaitError>,
        #[source]
        last: Box<WaitError>,
    },

    #[error("{}", port_not_found_message(.0.as_ref()))]
    PortNotFound(Option<Port>),

    #[error("no host port found for host IPs [{}]", join_host_ips(.0))]
    NoHostPort(Vec<HostIp>),

    #[error("container exited with code {0}")]
    ContainerExited(i64),

    #[error("container crashed with out-of-memory (OOMKilled)")]
    OomKilled,

    #[error("unexpected container status {0:?}")]
    UnexpectedStatus(String),

    #[error("{op}: {source}")]
    Target {
        op: &'static str,
        source: TargetError,
    },

    #[error(transparent)]
    Permanent(#[from] PermanentError),

    /// Unusable strategy configuration; never retried.
    #[error("{0}")]
    Config(String),

    /// A probe ran but did not observe the expected condition.
    #[error("{0}")]
    Probe(String),

    #[error("{context}: {source}")]
    Callback {
        context: &'static str,
        source: BoxError,
    },

    #[error("tls: {0}")]
    Tls(String),

    #[error("{0}")]
    Visitor(#[source] BoxError),
}

fn port_not_found_message(port: Option<&Port>) -> String {
    match port {
        Some(port) => format!("port {} not found", port),
        None => "port not found".to_string(),
    }
}

fn join_host_ips(ips: &[HostIp]) -> String {
    ips.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

impl WaitError {
    /// Attach the last observed failure to a context error.
    pub fn interrupted(context: WaitError, last: WaitError) -> Self {
        WaitError::Interrupted {
            context: Box::new(context),
            last: Box::new(last),
        }
    }

    /// Same as [`WaitError::interrupted`] but tolerates a missing last failure.
    pub fn interrupted_with(context: WaitError, last: Option<WaitError>) -> Self {
        match last {
            Some(last) => Self::interrupted(context, last),
            None => context,
        }
    }

    pub(crate) fn target(op: &'static str, source: TargetError) -> Self {
        WaitError::Target { op, source }
    }

    /// True for the bare context errors produced by [`WaitContext`](crate::core::context::WaitContext).
    pub fn is_context(&self) -> bool {
        matches!(self, WaitError::DeadlineExceeded | WaitError::Cancelled)
    }

    pub fn is_deadline_exceeded(&self) -> bool {
        match self {
            WaitError::DeadlineExceeded => true,
            WaitError::Interrupted { context, .. } => context.is_deadline_exceeded(),
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            WaitError::Cancelled => true,
            WaitError::Interrupted { context, .. } => context.is_cancelled(),
            _ => false,
        }
    }

    /// Returns the port-not-found sentinel anywhere in the chain.
    ///
    /// The outer `Option` tells whether the sentinel is present; the inner one
    /// is the port, absent when the lowest exposed port was being resolved.
    pub fn port_not_found(&self) -> Option<Option<&Port>> {
        match self {
            WaitError::PortNotFound(port) => Some(port.as_ref()),
            WaitError::Interrupted { context, last } => {
                context.port_not_found().or_else(|| last.port_not_found())
            }
            _ => None,
        }
    }

    pub fn is_permanent(&self) -> bool {
        match self {
            WaitError::Permanent(_) => true,
            WaitError::Interrupted { last, .. } => last.is_permanent(),
            _ => false,
        }
    }

    /// The target reported it is dead (exited, OOM killed, or in an unexpected state).
    pub fn is_target_failure(&self) -> bool {
        match self {
            WaitError::ContainerExited(_) | WaitError::OomKilled | WaitError::UnexpectedStatus(_) => true,
            WaitError::Interrupted { last, .. } => last.is_target_failure(),
            _ => false,
        }
    }
}
