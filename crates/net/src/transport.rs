//! HTTP transport over a pinned TLS stack
//!
//! [`Transport`] is the seam between request orchestration and the wire.
//! The production implementation wraps `reqwest` configured with the
//! crate's rustls pinning posture; tests substitute a scripted transport.
//! Failures are classified here so callers can tell connectivity loss
//! (queue and resume later) from security failures (never retried).

use std::collections::HashMap;
use std::error::Error as StdError;
use std::time::Duration;

use async_trait::async_trait;
use caravel_domain::{ApiRequest, HttpMethod, NetworkError};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, warn};

use crate::pinning::{pinned_client_config, TlsPinning};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_USER_AGENT: &str = concat!("caravel/", env!("CARGO_PKG_VERSION"));

/// Transport-level failure, classified for routing
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// No response within the configured deadline
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Could not reach the host: DNS, refused, unreachable
    #[error("connection failed: {0}")]
    Connect(String),

    /// TLS handshake or pin validation failure
    #[error("security failure: {0}")]
    Security(String),

    /// The request itself cannot be sent as constructed
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Anything else on the wire, treated as connectivity
    #[error("transport failure: {0}")]
    Other(String),
}

impl TransportError {
    /// True when the failure means the network is unavailable rather
    /// than the request being wrong or the peer untrusted.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Connect(_) | Self::Other(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

impl From<TransportError> for NetworkError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Security(msg) => NetworkError::Security(msg),
            TransportError::InvalidRequest(msg) => NetworkError::Config(msg),
            TransportError::Timeout(_) | TransportError::Connect(_) | TransportError::Other(_) => {
                NetworkError::Offline { queued_id: None }
            }
        }
    }
}

/// Raw wire response before status interpretation
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    /// Header names are lowercased on ingestion
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn new(status: u16, body: Vec<u8>) -> Self {
        Self { status, headers: HashMap::new(), body }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// Seam to the wire. One call sends one request once; retry scheduling
/// and queueing live above this trait.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<RawResponse, TransportError>;
}

/// `reqwest`-backed transport with certificate pinning
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    /// Builder with the given pinning posture. The posture is the one
    /// required argument so an unpinned client is always a visible,
    /// deliberate choice at the call site.
    pub fn builder(pinning: TlsPinning) -> HttpTransportBuilder {
        HttpTransportBuilder {
            pinning,
            timeout: DEFAULT_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }

    fn classify(&self, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            return TransportError::Timeout(self.timeout);
        }
        // TLS failures also satisfy is_connect, so walk the source chain
        // for a rustls error before the connectivity checks.
        let mut source: Option<&(dyn StdError + 'static)> = err.source();
        while let Some(cause) = source {
            if let Some(tls) = cause.downcast_ref::<rustls::Error>() {
                return TransportError::Security(tls.to_string());
            }
            source = cause.source();
        }
        if err.is_connect() {
            return TransportError::Connect(err.to_string());
        }
        if err.is_builder() || err.is_request() {
            return TransportError::InvalidRequest(err.to_string());
        }
        TransportError::Other(err.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &ApiRequest) -> Result<RawResponse, TransportError> {
        let url = reqwest::Url::parse(&request.url)
            .map_err(|e| TransportError::InvalidRequest(format!("url {}: {e}", request.url)))?;

        let mut headers = HeaderMap::with_capacity(request.headers.len());
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::InvalidRequest(format!("header {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::InvalidRequest(format!("header {name}: {e}")))?;
            headers.insert(name, value);
        }

        let mut builder = self.client.request(method_of(request.method), url).headers(headers);
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        debug!(method = %request.method, url = %request.url, "sending request");
        let response = builder.send().await.map_err(|e| self.classify(e))?;

        let status = response.status().as_u16();
        let mut response_headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(text) = value.to_str() {
                response_headers.insert(name.as_str().to_ascii_lowercase(), text.to_string());
            }
        }
        let body = response.bytes().await.map_err(|e| self.classify(e))?.to_vec();

        debug!(status, bytes = body.len(), "response received");
        Ok(RawResponse { status, headers: response_headers, body })
    }
}

fn method_of(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Delete => reqwest::Method::DELETE,
        HttpMethod::Patch => reqwest::Method::PATCH,
    }
}

/// Configuration for [`HttpTransport`]
pub struct HttpTransportBuilder {
    pinning: TlsPinning,
    timeout: Duration,
    user_agent: String,
}

impl HttpTransportBuilder {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn build(self) -> Result<HttpTransport, NetworkError> {
        if !self.pinning.is_enforced() {
            warn!("certificate pinning disabled; server identity relies on web PKI roots alone");
        }
        let tls = pinned_client_config(self.pinning)?;
        let client = reqwest::Client::builder()
            .use_preconfigured_tls(tls)
            .timeout(self.timeout)
            .user_agent(&self.user_agent)
            .build()
            .map_err(|e| NetworkError::Config(format!("http client: {e}")))?;
        Ok(HttpTransport { client, timeout: self.timeout })
    }
}
