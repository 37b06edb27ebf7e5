use std::time::Duration;

use waitkit::core::context::WaitContext;
use waitkit::core::errors::{TargetError, WaitError};
use waitkit::core::wait::{for_http, for_tls_cert, TlsClientConfig};

use crate::common::{testdata, MockStrategyTarget};

const POLL: Duration = Duration::from_millis(10);

/// Serves the fixtures under `/tls/...` inside the target.
fn target_with_fixtures() -> MockStrategyTarget {
    MockStrategyTarget::new().with_copy(|path| {
        let name = path
            .strip_prefix("/tls/")
            .ok_or_else(|| TargetError::NotFound(path.to_string()))?;
        std::fs::read(testdata(name)).map_err(TargetError::from)
    })
}

#[tokio::test]
async fn test_tls_config_assembled_from_target_files() {
    let strategy = for_tls_cert("/tls/cert.crt", "/tls/cert.key")
        .with_root_cas(["/tls/ca.pem"])
        .with_server_name("localhost")
        .with_startup_timeout(Duration::from_secs(5))
        .with_poll_interval(POLL);
    assert!(strategy.tls_config().is_none());

    strategy
        .wait_until_ready(&WaitContext::background(), &target_with_fixtures())
        .await
        .unwrap();

    let config = strategy.tls_config().expect("config assembled");
    assert_eq!(config.server_name(), Some("localhost"));
    assert!(config.root_ca_pem().starts_with(b"-----BEGIN CERTIFICATE-----"));
    assert!(!config.cert_pem().is_empty());

    // a config assembled by the tls strategy feeds an https probe
    let http = for_http("/health").with_tls(true, Some(config));
    assert!(format!("{:?}", http).contains("use_tls: true"));
}

#[tokio::test]
async fn test_missing_key_times_out() {
    let strategy = for_tls_cert("/tls/cert.crt", "/tls/missing.key")
        .with_startup_timeout(Duration::from_millis(150))
        .with_poll_interval(POLL);

    let err = strategy
        .wait_until_ready(&WaitContext::background(), &target_with_fixtures())
        .await
        .unwrap_err();
    assert!(err.is_deadline_exceeded());
    assert!(strategy.tls_config().is_none());
}

#[test]
fn test_invalid_root_ca_is_rejected() {
    let cert = std::fs::read(testdata("cert.crt")).unwrap();
    let key = std::fs::read(testdata("cert.key")).unwrap();

    let err = TlsClientConfig::from_pem(&[b"not a certificate".to_vec()], &cert, &key, None).unwrap_err();
    assert!(matches!(err, WaitError::Tls(_)));
    assert_eq!(err.to_string(), "tls: root CA #0: no certificates found");
}

#[test]
fn test_missing_certificate_is_rejected() {
    let key = std::fs::read(testdata("cert.key")).unwrap();
    let err = TlsClientConfig::from_pem(&[], b"", &key, None).unwrap_err();
    assert_eq!(err.to_string(), "tls: certificate: no certificates found");
}

#[test]
fn test_config_without_root_cas() {
    let cert = std::fs::read(testdata("cert.crt")).unwrap();
    let key = std::fs::read(testdata("cert.key")).unwrap();
    let config = TlsClientConfig::from_pem(&[], &cert, &key, None).unwrap();
    assert!(config.root_ca_pem().is_empty());
    assert_eq!(config.server_name(), None);
}
