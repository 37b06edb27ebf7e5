//! The read-only capability surface a probed resource exposes to strategies.
//!
//! The engine never owns the resource: it only asks for its host, port table,
//! logs, lifecycle state, a one-shot command and file copies. Container
//! runtimes, local processes and test doubles all plug in through
//! [`StrategyTarget`].

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use tokio::io::AsyncRead;

use crate::core::errors::TargetError;

/// Byte stream returned by [`StrategyTarget::logs`] and file copies.
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

/// Network mode reported by a target sharing the host's network stack.
pub const HOST_NETWORK_MODE: &str = "host";

/// An internal (container side) port with its protocol, e.g. `8080/tcp`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Port {
    number: u16,
    proto: String,
}

impl Port {
    pub fn new(number: u16, proto: impl Into<String>) -> Self {
        Self {
            number,
            proto: proto.into().to_lowercase(),
        }
    }

    pub fn tcp(number: u16) -> Self {
        Self::new(number, "tcp")
    }

    pub fn udp(number: u16) -> Self {
        Self::new(number, "udp")
    }

    pub fn number(&self) -> u16 {
        self.number
    }

    pub fn proto(&self) -> &str {
        &self.proto
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.number, self.proto)
    }
}

impl From<u16> for Port {
    fn from(number: u16) -> Self {
        Port::tcp(number)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid port {0:?}")]
pub struct ParsePortError(String);

impl FromStr for Port {
    type Err = ParsePortError;

    /// Accepts `"8080"` (tcp implied) and `"8080/udp"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (number, proto) = match s.trim().split_once('/') {
            Some((number, proto)) if !proto.is_empty() => (number, proto),
            Some(_) => return Err(ParsePortError(s.to_string())),
            None => (s.trim(), "tcp"),
        };
        let number = number
            .parse::<u16>()
            .map_err(|_| ParsePortError(s.to_string()))?;
        Ok(Port::new(number, proto))
    }
}

/// One host side binding of an internal port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortBinding {
    pub host_ip: String,
    pub host_port: u16,
}

impl PortBinding {
    pub fn new(host_ip: impl Into<String>, host_port: u16) -> Self {
        Self {
            host_ip: host_ip.into(),
            host_port,
        }
    }
}

/// The subset of an inspection result the engine reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerInspect {
    pub network_mode: String,
    pub ports: BTreeMap<Port, Vec<PortBinding>>,
}

impl ContainerInspect {
    pub fn is_host_network(&self) -> bool {
        self.network_mode == HOST_NETWORK_MODE
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthState {
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerState {
    pub running: bool,
    pub status: String,
    pub exit_code: i64,
    pub oom_killed: bool,
    pub health: Option<HealthState>,
}

impl ContainerState {
    pub fn running() -> Self {
        Self {
            running: true,
            status: "running".to_string(),
            ..Self::default()
        }
    }

    pub fn exited(exit_code: i64) -> Self {
        Self {
            running: false,
            status: "exited".to_string(),
            exit_code,
            ..Self::default()
        }
    }

    pub fn with_health(mut self, status: impl Into<String>) -> Self {
        self.health = Some(HealthState {
            status: status.into(),
        });
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecResult {
    pub exit_code: i64,
    pub output: Vec<u8>,
}

#[async_trait::async_trait]
pub trait StrategyTarget: Send + Sync {
    async fn host(&self) -> Result<String, TargetError>;

    async fn inspect(&self) -> Result<ContainerInspect, TargetError>;

    /// Host side port for `port`; [`TargetError::PortNotFound`] while unbound.
    async fn mapped_port(&self, port: &Port) -> Result<Port, TargetError>;

    /// A fresh stream over everything the target has logged so far.
    async fn logs(&self) -> Result<ByteStream, TargetError>;

    async fn exec(&self, cmd: &[String]) -> Result<ExecResult, TargetError>;

    async fn state(&self) -> Result<ContainerState, TargetError>;

    /// Fails with [`TargetError::NotFound`] while `path` does not exist.
    async fn copy_file_from_container(&self, path: &str) -> Result<ByteStream, TargetError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpFamily {
    V4,
    V6,
}

impl fmt::Display for IpFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpFamily::V4 => f.write_str("IPv4"),
            IpFamily::V6 => f.write_str("IPv6"),
        }
    }
}

/// A host address classified by family. Anything that does not parse as an
/// IPv6 literal, including hostnames and the empty string, counts as IPv4.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostIp {
    pub address: String,
    pub family: IpFamily,
}

impl HostIp {
    pub fn new(address: impl Into<String>) -> Self {
        let address = address.into();
        let family = match address.parse::<IpAddr>() {
            Ok(IpAddr::V6(_)) => IpFamily::V6,
            _ => IpFamily::V4,
        };
        Self { address, family }
    }

    pub fn loopback() -> Self {
        Self::new("127.0.0.1")
    }
}

impl From<IpAddr> for HostIp {
    fn from(ip: IpAddr) -> Self {
        HostIp::new(ip.to_string())
    }
}

impl fmt::Display for HostIp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.address, self.family)
    }
}
