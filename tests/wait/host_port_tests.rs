use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use waitkit::core::context::WaitContext;
use waitkit::core::errors::WaitError;
use waitkit::core::target::{ContainerInspect, ExecResult, HostIp, Port, PortBinding};
use waitkit::core::wait::port::host_port_mapping;
use waitkit::core::wait::{
    for_exposed_port, for_listening_port, for_mapped_port, resolve_host_port_binding,
};

use crate::common::MockStrategyTarget;

const POLL: Duration = Duration::from_millis(10);

async fn listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

/// A port nothing listens on.
async fn closed_port() -> u16 {
    let (listener, port) = listener().await;
    drop(listener);
    port
}

fn mapped_to(host_port: u16) -> MockStrategyTarget {
    MockStrategyTarget::new().with_mapped_port(move |port| Ok(Port::new(host_port, port.proto())))
}

fn inspect_with(ports: Vec<(Port, Vec<PortBinding>)>) -> ContainerInspect {
    ContainerInspect {
        network_mode: "bridge".to_string(),
        ports: ports.into_iter().collect::<BTreeMap<_, _>>(),
    }
}

#[test]
fn test_dual_stack_prefers_host_ip_order() {
    let ips = vec![HostIp::new("::1"), HostIp::new("127.0.0.1")];
    let bindings = vec![PortBinding::new("0.0.0.0", 50000), PortBinding::new("::", 50001)];
    let binding = resolve_host_port_binding(&ips, &bindings).unwrap();
    assert_eq!(binding.host_port.to_string(), "50001");
}

#[test]
fn test_dual_stack_unmatched_family() {
    let ips = vec![HostIp::new("::1")];
    let bindings = vec![PortBinding::new("0.0.0.0", 50000)];
    let err = resolve_host_port_binding(&ips, &bindings).unwrap_err();
    assert!(err.to_string().contains("::1 (IPv6)"), "{}", err);
}

#[tokio::test]
async fn test_listening_port_reachable() {
    let (_listener, port) = listener().await;
    let execs = Arc::new(AtomicUsize::new(0));
    let counter = execs.clone();
    let target = mapped_to(port).with_exec(move |cmd| {
        counter.fetch_add(1, Ordering::SeqCst);
        assert_eq!(cmd[0], "/bin/sh");
        assert!(cmd[2].contains("localhost 8080"));
        Ok(ExecResult::default())
    });

    for_listening_port(8080)
        .with_startup_timeout(Duration::from_secs(5))
        .with_poll_interval(POLL)
        .wait_until_ready(&WaitContext::background(), &target)
        .await
        .unwrap();
    assert_eq!(execs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_internal_check_retries_until_listening() {
    let (_listener, port) = listener().await;
    let execs = Arc::new(AtomicUsize::new(0));
    let counter = execs.clone();
    let target = mapped_to(port).with_exec(move |_| {
        let exit_code = if counter.fetch_add(1, Ordering::SeqCst) < 2 { 1 } else { 0 };
        Ok(ExecResult {
            exit_code,
            output: Vec::new(),
        })
    });

    for_listening_port(8080)
        .with_poll_interval(POLL)
        .wait_until_ready(&WaitContext::background(), &target)
        .await
        .unwrap();
    assert_eq!(execs.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_missing_shell_falls_back_to_external_check() {
    for exit_code in [126, 127] {
        let (_listener, port) = listener().await;
        let target = mapped_to(port).with_exec(move |_| {
            Ok(ExecResult {
                exit_code,
                output: Vec::new(),
            })
        });

        for_listening_port(8080)
            .with_startup_timeout(Duration::from_secs(2))
            .with_poll_interval(POLL)
            .wait_until_ready(&WaitContext::background(), &target)
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_refused_connection_is_retried_until_deadline() {
    let port = closed_port().await;
    let err = for_listening_port(8080)
        .skip_internal_check()
        .with_startup_timeout(Duration::from_millis(150))
        .with_poll_interval(POLL)
        .wait_until_ready(&WaitContext::background(), &mapped_to(port))
        .await
        .unwrap_err();
    assert!(err.is_deadline_exceeded(), "unexpected error: {}", err);
}

#[tokio::test]
async fn test_unmapped_port_reports_port_not_found() {
    let target = MockStrategyTarget::new();
    let err = for_listening_port(8080)
        .with_startup_timeout(Duration::from_millis(100))
        .with_poll_interval(Duration::from_secs(5))
        .wait_until_ready(&WaitContext::background(), &target)
        .await
        .unwrap_err();

    assert!(err.is_deadline_exceeded());
    assert_eq!(err.port_not_found(), Some(Some(&Port::tcp(8080))));
    assert_eq!(err.to_string(), "context deadline exceeded: port 8080/tcp not found");
}

#[tokio::test]
async fn test_mapped_port_needs_no_listener() {
    let target = mapped_to(closed_port().await).with_exec(|_| panic!("no internal check expected"));
    for_mapped_port(5432)
        .wait_until_ready(&WaitContext::background(), &target)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_udp_port_skips_dial() {
    let target = mapped_to(closed_port().await);
    for_listening_port(Port::udp(53))
        .skip_internal_check()
        .wait_until_ready(&WaitContext::background(), &target)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_exposed_port_uses_lowest_binding() {
    let (_listener, port) = listener().await;
    let target = MockStrategyTarget::new().with_inspect(move || {
        Ok(inspect_with(vec![
            (Port::tcp(9090), vec![PortBinding::new("0.0.0.0", 1)]),
            (Port::tcp(8080), vec![PortBinding::new("0.0.0.0", port)]),
        ]))
    });

    for_exposed_port()
        .skip_internal_check()
        .with_startup_timeout(Duration::from_secs(5))
        .with_poll_interval(POLL)
        .wait_until_ready(&WaitContext::background(), &target)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_lowest_port_waits_for_stable_port_table() {
    let inspections = Arc::new(AtomicUsize::new(0));
    let counter = inspections.clone();
    let target = MockStrategyTarget::new().with_inspect(move || {
        let mut ports = vec![(Port::tcp(8080), vec![PortBinding::new("0.0.0.0", 32768)])];
        // the second port shows up while the first inspections run
        if counter.fetch_add(1, Ordering::SeqCst) >= 1 {
            ports.push((Port::tcp(7070), vec![PortBinding::new("0.0.0.0", 32769)]));
        }
        Ok(inspect_with(ports))
    });

    let ctx = WaitContext::background().with_timeout(Duration::from_secs(5));
    let details = host_port_mapping(&ctx, &target, None, POLL, false, None).await.unwrap();

    assert_eq!(details.internal_port, Port::tcp(7070));
    assert_eq!(details.host_port, 32769);
    // unbound addresses are replaced with the target host
    assert_eq!(details.host, "127.0.0.1");
    assert_eq!(details.address(), "127.0.0.1:32769");
    assert_eq!(inspections.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_lowest_port_in_host_network_is_config_error() {
    let target = MockStrategyTarget::new().with_inspect(|| {
        Ok(ContainerInspect {
            network_mode: "host".to_string(),
            ..ContainerInspect::default()
        })
    });
    let err = host_port_mapping(&WaitContext::background(), &target, None, POLL, false, None)
        .await
        .unwrap_err();
    assert!(matches!(err, WaitError::Config(_)));
    assert_eq!(err.to_string(), "unable to determine port: network mode \"host\"");
}

#[tokio::test]
async fn test_specified_port_in_host_network_uses_target_host() {
    let target = MockStrategyTarget::new().with_inspect(|| {
        Ok(ContainerInspect {
            network_mode: "host".to_string(),
            ..ContainerInspect::default()
        })
    });
    let details = host_port_mapping(
        &WaitContext::background(),
        &target,
        Some(&Port::tcp(6379)),
        POLL,
        false,
        None,
    )
    .await
    .unwrap();
    assert_eq!(details.address(), "127.0.0.1:6379");
}

#[tokio::test]
async fn test_specified_port_without_matching_family_times_out() {
    let target = MockStrategyTarget::new()
        .with_host(|| Ok("::1".to_string()))
        .with_inspect(|| {
            Ok(inspect_with(vec![(
                Port::tcp(8080),
                vec![PortBinding::new("0.0.0.0", 50000)],
            )]))
        });
    let ctx = WaitContext::background().with_timeout(Duration::from_millis(100));

    let err = host_port_mapping(&ctx, &target, Some(&Port::tcp(8080)), POLL, false, None)
        .await
        .unwrap_err();
    assert!(err.is_deadline_exceeded());
    assert_eq!(err.port_not_found(), Some(Some(&Port::tcp(8080))));
}

#[tokio::test]
async fn test_forced_ipv4_localhost() {
    let target = MockStrategyTarget::new()
        .with_host(|| Ok("localhost".to_string()))
        .with_inspect(|| {
            Ok(inspect_with(vec![(
                Port::tcp(80),
                vec![PortBinding::new("", 8080)],
            )]))
        });
    let details = host_port_mapping(
        &WaitContext::background(),
        &target,
        Some(&Port::tcp(80)),
        POLL,
        true,
        None,
    )
    .await
    .unwrap();
    assert_eq!(details.host, "127.0.0.1");
    assert_eq!(details.host_port, 8080);
}
