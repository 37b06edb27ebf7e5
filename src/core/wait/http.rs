/*!
Wait for an HTTP(S) endpoint on the target to answer as expected.

The liveness port is either given with [`HttpStrategy::with_port`] or derived
from the single exposed TCP port; several exposed TCP ports without an
explicit choice is a configuration error.

Each poll issues one request. Failing to establish the connection is
retried; any other transport failure aborts. With the isahc transport that
class is curl's "couldn't connect", which besides a refused connection also
covers a host that is not reachable yet (a connect timeout is not part of it
and aborts). A response is accepted when the status matcher
(default `== 200`) and, when configured, the body and header matchers agree.

## Dependencies

- `isahc`: default transport (feature `http-probe`), swappable through
  [`HttpClientTrait`] for tests or custom stacks
- `url`: endpoint construction, including basic-auth user info
*/

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::core::context::WaitContext;
use crate::core::debug_logger::get_debug_logger;
use crate::core::errors::WaitError;
use crate::core::target::{Port, StrategyTarget};
use crate::core::wait::port::host_port_mapping;
use crate::core::wait::tls::TlsClientConfig;
use crate::core::wait::{check_target, DEFAULT_POLL_INTERVAL, DEFAULT_STARTUP_TIMEOUT};

#[cfg(feature = "http-probe")]
use isahc::config::{CaCertificate, ClientCertificate, Configurable, PrivateKey, RedirectPolicy, SslOption};
#[cfg(feature = "http-probe")]
use isahc::{AsyncReadResponseExt, HttpClient, Request};

const VALID_METHODS: [&str; 9] = [
    "GET", "HEAD", "POST", "PUT", "PATCH", "DELETE", "CONNECT", "OPTIONS", "TRACE",
];

/// Upper bound for a single request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpProbeRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpProbeResponse {
    pub status_code: u16,
    /// Header names are lower-cased.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HttpClientError {
    /// Nothing accepted the connection yet; retried.
    #[error("connection refused: {0}")]
    ConnectionRefused(String),
    #[error("{0}")]
    Transport(String),
}

/// HTTP transport abstraction for dependency injection and testing
#[async_trait::async_trait]
pub trait HttpClientTrait: Send + Sync {
    async fn execute(&self, request: HttpProbeRequest) -> Result<HttpProbeResponse, HttpClientError>;
}

/// TLS settings the default client is built with.
#[derive(Debug, Clone, Default)]
pub struct HttpTlsOptions {
    pub allow_insecure: bool,
    pub config: Option<TlsClientConfig>,
}

/// Production HTTP client implementation using isahc
#[cfg(feature = "http-probe")]
pub struct IsahcProbeClient {
    client: HttpClient,
    // curl reads CA bundles from disk; the file must outlive the client
    _ca_file: Option<tempfile::NamedTempFile>,
}

#[cfg(feature = "http-probe")]
impl IsahcProbeClient {
    pub fn new(tls: &HttpTlsOptions) -> Result<Self, WaitError> {
        let mut builder = HttpClient::builder().redirect_policy(RedirectPolicy::None);
        let mut ca_file = None;

        if tls.allow_insecure {
            builder = builder.ssl_options(
                SslOption::DANGER_ACCEPT_INVALID_CERTS | SslOption::DANGER_ACCEPT_INVALID_HOSTS,
            );
        }
        if let Some(config) = &tls.config {
            builder = builder.ssl_client_certificate(ClientCertificate::pem(
                config.cert_pem().to_vec(),
                Some(PrivateKey::pem(config.key_pem().to_vec(), None)),
            ));
            if !config.root_ca_pem().is_empty() {
                let file = write_ca_bundle(config.root_ca_pem())?;
                builder = builder.ssl_ca_certificate(CaCertificate::file(file.path()));
                ca_file = Some(file);
            }
        }

        let client = builder
            .build()
            .map_err(|e| WaitError::Config(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            _ca_file: ca_file,
        })
    }
}

#[cfg(feature = "http-probe")]
fn write_ca_bundle(pem: &[u8]) -> Result<tempfile::NamedTempFile, WaitError> {
    use std::io::Write;

    let mut file = tempfile::Builder::new()
        .prefix("waitkit-ca-")
        .suffix(".pem")
        .tempfile()
        .map_err(|e| WaitError::Tls(format!("write CA bundle: {}", e)))?;
    file.write_all(pem)
        .and_then(|_| file.flush())
        .map_err(|e| WaitError::Tls(format!("write CA bundle: {}", e)))?;
    Ok(file)
}

#[cfg(feature = "http-probe")]
#[async_trait::async_trait]
impl HttpClientTrait for IsahcProbeClient {
    async fn execute(&self, probe: HttpProbeRequest) -> Result<HttpProbeResponse, HttpClientError> {
        let mut builder = Request::builder()
            .method(probe.method.as_str())
            .uri(probe.url.as_str())
            .timeout(probe.timeout);
        for (name, value) in &probe.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let request = builder
            .body(probe.body)
            .map_err(|e| HttpClientError::Transport(format!("new request: {}", e)))?;

        let mut response = self.client.send_async(request).await.map_err(|e| {
            if matches!(e.kind(), isahc::error::ErrorKind::ConnectionFailed) {
                HttpClientError::ConnectionRefused(e.to_string())
            } else {
                HttpClientError::Transport(format!("do request: {}", e))
            }
        })?;

        let status_code = response.status().as_u16();
        let mut headers = HashMap::new();
        for (key, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(key.as_str().to_lowercase(), value.to_string());
            }
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| HttpClientError::Transport(format!("read body: {}", e)))?;

        Ok(HttpProbeResponse {
            status_code,
            headers,
            body,
        })
    }
}

type StatusMatcher = Arc<dyn Fn(u16) -> bool + Send + Sync>;
type BodyMatcher = Arc<dyn Fn(&[u8]) -> bool + Send + Sync>;
type HeadersMatcher = Arc<dyn Fn(&HashMap<String, String>) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct HttpStrategy {
    port: Option<Port>,
    path: String,
    status_code_matcher: StatusMatcher,
    response_matcher: Option<BodyMatcher>,
    response_headers_matcher: Option<HeadersMatcher>,
    use_tls: bool,
    allow_insecure: bool,
    tls_config: Option<TlsClientConfig>,
    method: String,
    body: Option<Vec<u8>>,
    headers: BTreeMap<String, String>,
    basic_auth: Option<(String, String)>,
    force_ipv4_localhost: bool,
    timeout: Option<Duration>,
    poll_interval: Duration,
    client: Option<Arc<dyn HttpClientTrait>>,
}

impl fmt::Debug for HttpStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpStrategy")
            .field("port", &self.port)
            .field("path", &self.path)
            .field("method", &self.method)
            .field("use_tls", &self.use_tls)
            .field("allow_insecure", &self.allow_insecure)
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .field("force_ipv4_localhost", &self.force_ipv4_localhost)
            .field("timeout", &self.timeout)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

pub fn for_http(path: impl Into<String>) -> HttpStrategy {
    HttpStrategy::new(path)
}

impl HttpStrategy {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            port: None,
            path: path.into(),
            status_code_matcher: Arc::new(|status| status == 200),
            response_matcher: None,
            response_headers_matcher: None,
            use_tls: false,
            allow_insecure: false,
            tls_config: None,
            method: "GET".to_string(),
            body: None,
            headers: BTreeMap::new(),
            basic_auth: None,
            force_ipv4_localhost: false,
            timeout: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            client: None,
        }
    }

    pub fn with_port(mut self, port: impl Into<Port>) -> Self {
        self.port = Some(port.into());
        self
    }

    pub fn with_status_code_matcher<F>(mut self, matcher: F) -> Self
    where
        F: Fn(u16) -> bool + Send + Sync + 'static,
    {
        self.status_code_matcher = Arc::new(matcher);
        self
    }

    pub fn with_response_matcher<F>(mut self, matcher: F) -> Self
    where
        F: Fn(&[u8]) -> bool + Send + Sync + 'static,
    {
        self.response_matcher = Some(Arc::new(matcher));
        self
    }

    pub fn with_response_headers_matcher<F>(mut self, matcher: F) -> Self
    where
        F: Fn(&HashMap<String, String>) -> bool + Send + Sync + 'static,
    {
        self.response_headers_matcher = Some(Arc::new(matcher));
        self
    }

    /// Switch to `https`, optionally with client certificates and CAs.
    pub fn with_tls(mut self, use_tls: bool, config: Option<TlsClientConfig>) -> Self {
        self.use_tls = use_tls;
        self.tls_config = config;
        self
    }

    /// Accept any server certificate (only meaningful with TLS).
    pub fn with_allow_insecure(mut self, allow_insecure: bool) -> Self {
        self.allow_insecure = allow_insecure;
        self
    }

    /// An empty method means `GET`; anything else is validated when waiting.
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    /// Request body, sent unchanged on every attempt.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn with_basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.basic_auth = Some((username.into(), password.into()));
        self
    }

    /// Probe `127.0.0.1` when the target reports `localhost`.
    pub fn with_forced_ipv4_localhost(mut self) -> Self {
        self.force_ipv4_localhost = true;
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

    /// Replace the transport. TLS options are then the client's business.
    pub fn with_http_client(mut self, client: Arc<dyn HttpClientTrait>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn validated_method(&self) -> Result<String, WaitError> {
        if self.method.is_empty() {
            return Ok("GET".to_string());
        }
        if VALID_METHODS.contains(&self.method.as_str()) {
            Ok(self.method.clone())
        } else {
            Err(WaitError::Config(format!("invalid http method {:?}", self.method)))
        }
    }

    fn client(&self) -> Result<Arc<dyn HttpClientTrait>, WaitError> {
        if let Some(client) = &self.client {
            return Ok(client.clone());
        }
        #[cfg(feature = "http-probe")]
        {
            let tls = HttpTlsOptions {
                allow_insecure: self.allow_insecure,
                config: self.tls_config.clone(),
            };
            return Ok(Arc::new(IsahcProbeClient::new(&tls)?));
        }
        #[cfg(not(feature = "http-probe"))]
        {
            return Err(WaitError::Config(
                "no HTTP client: enable the `http-probe` feature or use with_http_client".to_string(),
            ));
        }
    }

    /// The explicit port, or the only exposed TCP port.
    async fn liveness_port(&self, ctx: &WaitContext, target: &dyn StrategyTarget) -> Result<Option<Port>, WaitError> {
        if let Some(port) = &self.port {
            return Ok(Some(port.clone()));
        }
        let inspection = ctx
            .run(target.inspect())
            .await?
            .map_err(|err| WaitError::target("inspect container", err))?;
        let mut tcp_ports = inspection.ports.keys().filter(|port| port.proto() == "tcp");
        match (tcp_ports.next(), tcp_ports.next()) {
            (Some(_), Some(_)) => Err(WaitError::Config(
                "multiple tcp ports exposed, use with_port to choose one".to_string(),
            )),
            (Some(port), None) => Ok(Some(port.clone())),
            // nothing declared yet: take the lowest tcp port once bound
            (None, _) => Ok(None),
        }
    }

    fn endpoint(&self, address: &str) -> Result<String, WaitError> {
        let scheme = if self.use_tls { "https" } else { "http" };
        let mut endpoint = Url::parse(&format!("{}://{}", scheme, address))
            .map_err(|e| WaitError::Config(format!("invalid endpoint {}: {}", address, e)))?;
        // set_path would percent-encode the '?'
        let (path, query) = match self.path.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (self.path.as_str(), None),
        };
        endpoint.set_path(path);
        endpoint.set_query(query);
        if let Some((username, password)) = &self.basic_auth {
            endpoint
                .set_username(username)
                .and_then(|_| endpoint.set_password(Some(password)))
                .map_err(|_| WaitError::Config("cannot set basic auth on endpoint".to_string()))?;
        }
        Ok(endpoint.to_string())
    }

    fn check_response(&self, response: &HttpProbeResponse) -> Result<(), WaitError> {
        if !(self.status_code_matcher)(response.status_code) {
            return Err(WaitError::Probe(format!(
                "status code mismatch {}",
                response.status_code
            )));
        }
        if let Some(matcher) = &self.response_matcher {
            if !matcher(&response.body) {
                return Err(WaitError::Probe("body mismatch".to_string()));
            }
        }
        if let Some(matcher) = &self.response_headers_matcher {
            if !matcher(&response.headers) {
                return Err(WaitError::Probe(format!("header mismatch: {:?}", response.headers)));
            }
        }
        Ok(())
    }

    pub async fn wait_until_ready(&self, ctx: &WaitContext, target: &dyn StrategyTarget) -> Result<(), WaitError> {
        let ctx = ctx.with_timeout(self.timeout.unwrap_or(DEFAULT_STARTUP_TIMEOUT));
        let method = self.validated_method()?;

        let port = self.liveness_port(&ctx, target).await?;
        let details = host_port_mapping(
            &ctx,
            target,
            port.as_ref(),
            self.poll_interval,
            self.force_ipv4_localhost,
            Some("tcp"),
        )
        .await?;

        let client = self.client()?;
        let request = HttpProbeRequest {
            method,
            url: self.endpoint(&details.address())?,
            headers: self
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            body: self.body.clone().unwrap_or_default(),
            timeout: REQUEST_TIMEOUT,
        };
        let logger = get_debug_logger();

        loop {
            let last = match ctx.run(client.execute(request.clone())).await? {
                Ok(response) => match self.check_response(&response) {
                    Ok(()) => return Ok(()),
                    Err(err) => err,
                },
                Err(HttpClientError::ConnectionRefused(message)) => {
                    WaitError::Probe(format!("connection refused: {}", message))
                }
                Err(err) => return Err(WaitError::Probe(err.to_string())),
            };
            logger.probe_retry("http", &last.to_string());

            if let Err(err) = ctx.sleep(self.poll_interval).await {
                return Err(WaitError::interrupted(err, last));
            }
            check_target(&ctx, target).await?;
        }
    }
}
