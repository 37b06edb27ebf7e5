//! Liveness port resolution shared by the port based strategies.
//!
//! Two modes:
//!
//! - **specified**: wait until the given internal port reports a host binding;
//! - **lowest**: wait until the lowest bound internal port is stable, i.e. two
//!   consecutive inspections report the same number of exposed ports. A port
//!   table that is still being populated mid-startup is never trusted.
//!
//! Bindings are chosen per address family in the order the target's host
//! resolves to, see [`resolve_host_port_binding`].

use std::net::IpAddr;
use std::time::Duration;

use crate::core::context::WaitContext;
use crate::core::debug_logger::get_debug_logger;
use crate::core::errors::WaitError;
use crate::core::target::{ContainerInspect, HostIp, Port, PortBinding, StrategyTarget};
use crate::core::wait::check_target;

/// A resolved port: where the internal port is reachable from the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortDetails {
    pub internal_port: Port,
    pub host_port: u16,
    pub host: String,
}

impl PortDetails {
    /// `host:port`, bracketing IPv6 literals.
    pub fn address(&self) -> String {
        join_host_port(&self.host, self.host_port)
    }
}

pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Pick the binding to use for a set of candidates.
///
/// Host IPs are tried in the caller's order; for each one the first binding
/// of the same address family wins. Binding addresses that are not IPv6
/// literals (including the empty string) count as IPv4.
pub fn resolve_host_port_binding<'a>(
    host_ips: &[HostIp],
    bindings: &'a [PortBinding],
) -> Result<&'a PortBinding, WaitError> {
    for host_ip in host_ips {
        if let Some(binding) = bindings
            .iter()
            .find(|binding| HostIp::new(binding.host_ip.as_str()).family == host_ip.family)
        {
            return Ok(binding);
        }
    }
    Err(WaitError::NoHostPort(host_ips.to_vec()))
}

/// Addresses `host` resolves to, in resolver order. Falls back to IPv4 loopback.
///
/// The lookup is bounded by `ctx`; resolver failures fall back like an empty answer.
pub async fn host_ips(ctx: &WaitContext, host: &str) -> Result<Vec<HostIp>, WaitError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(vec![HostIp::from(ip)]);
    }

    let mut ips: Vec<IpAddr> = Vec::new();
    if let Ok(addrs) = ctx.run(tokio::net::lookup_host((host, 0))).await? {
        for addr in addrs {
            if !ips.contains(&addr.ip()) {
                ips.push(addr.ip());
            }
        }
    }

    if ips.is_empty() {
        Ok(vec![HostIp::loopback()])
    } else {
        Ok(ips.into_iter().map(HostIp::from).collect())
    }
}

fn is_unbound(address: &str) -> bool {
    matches!(address, "" | "0.0.0.0" | "::")
}

/// Resolve the liveness port of `target`.
///
/// `internal` selects the specified mode; `None` selects the lowest bound
/// port, optionally restricted to `protocol`. On timeout the context error
/// is returned together with [`WaitError::PortNotFound`].
pub async fn host_port_mapping(
    ctx: &WaitContext,
    target: &dyn StrategyTarget,
    internal: Option<&Port>,
    poll_interval: Duration,
    force_ipv4_localhost: bool,
    protocol: Option<&str>,
) -> Result<PortDetails, WaitError> {
    let mut host = ctx
        .run(target.host())
        .await?
        .map_err(|err| WaitError::target("host", err))?;
    if force_ipv4_localhost && host == "localhost" {
        host = "127.0.0.1".to_string();
    }
    let not_found = |err: WaitError| {
        if err.is_context() {
            WaitError::interrupted(err, WaitError::PortNotFound(internal.cloned()))
        } else {
            err
        }
    };

    let ips = host_ips(ctx, &host).await.map_err(not_found)?;

    let mut details = match internal {
        Some(port) => specified_port(ctx, target, port, &ips, poll_interval).await,
        None => lowest_port(ctx, target, protocol, &ips, poll_interval).await,
    }
    .map_err(not_found)?;

    check_target(ctx, target).await.map_err(not_found)?;

    if is_unbound(&details.host) {
        details.host = host;
    }
    get_debug_logger().port_resolved(
        "port",
        &details.internal_port.to_string(),
        &details.host,
        details.host_port,
    );
    Ok(details)
}

async fn inspect(ctx: &WaitContext, target: &dyn StrategyTarget) -> Result<ContainerInspect, WaitError> {
    ctx.run(target.inspect())
        .await?
        .map_err(|err| WaitError::target("inspect container", err))
}

async fn specified_port(
    ctx: &WaitContext,
    target: &dyn StrategyTarget,
    port: &Port,
    ips: &[HostIp],
    poll_interval: Duration,
) -> Result<PortDetails, WaitError> {
    loop {
        let inspection = inspect(ctx, target).await?;
        if inspection.is_host_network() {
            return Ok(PortDetails {
                internal_port: port.clone(),
                host_port: port.number(),
                host: "0.0.0.0".to_string(),
            });
        }

        let binding = inspection
            .ports
            .iter()
            .filter(|(candidate, bindings)| {
                candidate.number() == port.number()
                    && candidate.proto() == port.proto()
                    && !bindings.is_empty()
            })
            .find_map(|(_, bindings)| resolve_host_port_binding(ips, bindings).ok());

        if let Some(binding) = binding {
            return Ok(PortDetails {
                internal_port: port.clone(),
                host_port: binding.host_port,
                host: binding.host_ip.clone(),
            });
        }

        check_target(ctx, target).await?;
        ctx.sleep(poll_interval).await?;
    }
}

async fn lowest_port(
    ctx: &WaitContext,
    target: &dyn StrategyTarget,
    protocol: Option<&str>,
    ips: &[HostIp],
    poll_interval: Duration,
) -> Result<PortDetails, WaitError> {
    let mut last_exposed: Option<usize> = None;
    loop {
        let inspection = inspect(ctx, target).await?;
        if inspection.is_host_network() {
            return Err(WaitError::Config(format!(
                "unable to determine port: network mode {:?}",
                inspection.network_mode
            )));
        }

        let mut exposed = 0usize;
        let mut lowest: Option<(&Port, &PortBinding)> = None;
        for (port, bindings) in &inspection.ports {
            if protocol.is_some_and(|proto| port.proto() != proto) || bindings.is_empty() {
                continue;
            }
            exposed += 1;
            let Ok(binding) = resolve_host_port_binding(ips, bindings) else {
                continue;
            };
            if lowest.map_or(true, |(current, _)| port.number() < current.number()) {
                lowest = Some((port, binding));
            }
        }

        if let Some((port, binding)) = lowest {
            if last_exposed == Some(exposed) {
                return Ok(PortDetails {
                    internal_port: port.clone(),
                    host_port: binding.host_port,
                    host: binding.host_ip.clone(),
                });
            }
        }
        last_exposed = Some(exposed);

        check_target(ctx, target).await?;
        ctx.sleep(poll_interval).await?;
    }
}
