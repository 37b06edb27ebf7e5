//! Wait for TLS material inside the target and assemble a client config from it.
//!
//! Root CAs, the client certificate chain and its key are copied out of the
//! target (a missing file is retried). Once all of them parse, the
//! assembled [`TlsClientConfig`] is kept and handed out by
//! [`TlsStrategy::tls_config`], e.g. to feed [`HttpStrategy::with_tls`](crate::core::wait::HttpStrategy::with_tls).

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore};

use crate::core::context::WaitContext;
use crate::core::errors::WaitError;
use crate::core::target::StrategyTarget;
use crate::core::wait::file::FileStrategy;
use crate::core::wait::{DEFAULT_POLL_INTERVAL, DEFAULT_STARTUP_TIMEOUT};

/// PEM material plus the rustls client configuration built from it.
#[derive(Clone)]
pub struct TlsClientConfig {
    root_ca_pem: Vec<u8>,
    cert_pem: Vec<u8>,
    key_pem: Vec<u8>,
    server_name: Option<String>,
    client_config: Arc<ClientConfig>,
}

impl fmt::Debug for TlsClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsClientConfig")
            .field("root_ca_bytes", &self.root_ca_pem.len())
            .field("cert_bytes", &self.cert_pem.len())
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

impl TlsClientConfig {
    /// Build a client-auth configuration. Every root CA blob must contain at
    /// least one certificate.
    pub fn from_pem(
        root_cas: &[Vec<u8>],
        cert_pem: &[u8],
        key_pem: &[u8],
        server_name: Option<String>,
    ) -> Result<Self, WaitError> {
        let mut roots = RootCertStore::empty();
        for (index, pem) in root_cas.iter().enumerate() {
            let certs = parse_certificates(pem)
                .map_err(|e| WaitError::Tls(format!("root CA #{}: {}", index, e)))?;
            if certs.is_empty() {
                return Err(WaitError::Tls(format!("root CA #{}: no certificates found", index)));
            }
            for cert in certs {
                roots
                    .add(cert)
                    .map_err(|e| WaitError::Tls(format!("root CA #{}: {}", index, e)))?;
            }
        }

        let chain = parse_certificates(cert_pem)
            .map_err(|e| WaitError::Tls(format!("certificate: {}", e)))?;
        if chain.is_empty() {
            return Err(WaitError::Tls("certificate: no certificates found".to_string()));
        }
        let key = PrivateKeyDer::from_pem_slice(key_pem)
            .map_err(|e| WaitError::Tls(format!("private key: {:?}", e)))?;

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let client_config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| WaitError::Tls(e.to_string()))?
            .with_root_certificates(roots)
            .with_client_auth_cert(chain, key)
            .map_err(|e| WaitError::Tls(format!("client certificate: {}", e)))?;

        Ok(Self {
            root_ca_pem: root_cas.concat(),
            cert_pem: cert_pem.to_vec(),
            key_pem: key_pem.to_vec(),
            server_name,
            client_config: Arc::new(client_config),
        })
    }

    pub fn client_config(&self) -> Arc<ClientConfig> {
        self.client_config.clone()
    }

    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    /// Concatenated root CAs, empty when none were configured.
    pub fn root_ca_pem(&self) -> &[u8] {
        &self.root_ca_pem
    }

    pub fn cert_pem(&self) -> &[u8] {
        &self.cert_pem
    }

    pub fn key_pem(&self) -> &[u8] {
        &self.key_pem
    }
}

fn parse_certificates(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, String> {
    CertificateDer::pem_slice_iter(pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("{:?}", e))
}

#[derive(Clone)]
pub struct TlsStrategy {
    cert_file: String,
    key_file: String,
    root_cas: Vec<String>,
    server_name: Option<String>,
    timeout: Option<Duration>,
    poll_interval: Duration,
    config: Arc<Mutex<Option<TlsClientConfig>>>,
}

impl fmt::Debug for TlsStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsStrategy")
            .field("cert_file", &self.cert_file)
            .field("key_file", &self.key_file)
            .field("root_cas", &self.root_cas)
            .field("server_name", &self.server_name)
            .field("timeout", &self.timeout)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

/// Wait for a client certificate and key at the given paths inside the target.
pub fn for_tls_cert(cert_file: impl Into<String>, key_file: impl Into<String>) -> TlsStrategy {
    TlsStrategy::new(cert_file, key_file)
}

impl TlsStrategy {
    pub fn new(cert_file: impl Into<String>, key_file: impl Into<String>) -> Self {
        Self {
            cert_file: cert_file.into(),
            key_file: key_file.into(),
            root_cas: Vec::new(),
            server_name: None,
            timeout: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            config: Arc::new(Mutex::new(None)),
        }
    }

    /// Also wait for these CA bundles and trust them.
    pub fn with_root_cas<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.root_cas.extend(files.into_iter().map(Into::into));
        self
    }

    pub fn with_server_name(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = Some(server_name.into());
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

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// The configuration assembled by the last successful wait. Clones of the
    /// strategy share it.
    pub fn tls_config(&self) -> Option<TlsClientConfig> {
        self.config.lock().ok().and_then(|config| config.clone())
    }

    async fn read(&self, ctx: &WaitContext, target: &dyn StrategyTarget, path: &str) -> Result<Vec<u8>, WaitError> {
        FileStrategy::new(path)
            .with_poll_interval(self.poll_interval)
            .read_when_ready(ctx, target)
            .await
    }

    pub async fn wait_until_ready(&self, ctx: &WaitContext, target: &dyn StrategyTarget) -> Result<(), WaitError> {
        let ctx = ctx.with_timeout(self.timeout.unwrap_or(DEFAULT_STARTUP_TIMEOUT));

        let mut root_cas = Vec::with_capacity(self.root_cas.len());
        for path in &self.root_cas {
            root_cas.push(self.read(&ctx, target, path).await?);
        }
        let cert_pem = self.read(&ctx, target, &self.cert_file).await?;
        let key_pem = self.read(&ctx, target, &self.key_file).await?;

        let config = TlsClientConfig::from_pem(&root_cas, &cert_pem, &key_pem, self.server_name.clone())?;
        if let Ok(mut slot) = self.config.lock() {
            *slot = Some(config);
        }
        Ok(())
    }
}
