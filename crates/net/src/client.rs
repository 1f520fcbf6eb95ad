//! Request orchestration
//!
//! [`ApiClient::execute`] runs the full pipeline for one logical call:
//! cache probe, request interceptors, transport, response interceptors,
//! the single 401 refresh-and-retry, status-driven retries with
//! backoff, response finalization and cache maintenance. Connectivity
//! failures hand the original request to the offline queue and surface
//! the assigned id.

use std::sync::Arc;
use std::time::Duration;

use caravel_domain::{ApiRequest, NetworkError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, instrument};
use url::Url;

use crate::auth::AccessTokenProvider;
use crate::cache::ResponseCache;
use crate::interceptor::{
    AuthInterceptor, LoggingInterceptor, RequestInterceptor, ResponseInterceptor, SecurityGate,
    SecurityGateInterceptor,
};
use crate::queue::OfflineQueue;
use crate::retry::RetryPolicy;
use crate::transport::{RawResponse, Transport, TransportError};

const STATUS_UNAUTHORIZED: u16 = 401;
const STATUS_REQUEST_TIMEOUT: u16 = 408;

pub struct ApiClient {
    transport: Arc<dyn Transport>,
    cache: Arc<ResponseCache>,
    queue: Arc<OfflineQueue>,
    auth: Option<Arc<dyn AccessTokenProvider>>,
    request_interceptors: Vec<Arc<dyn RequestInterceptor>>,
    response_interceptors: Vec<Arc<dyn ResponseInterceptor>>,
    retry_policy: RetryPolicy,
    base_url: Option<Url>,
    cache_ttl: Option<Duration>,
}

impl ApiClient {
    pub fn builder() -> ApiClientBuilder {
        ApiClientBuilder::default()
    }

    /// Runs one request through the pipeline and decodes the response.
    ///
    /// A fresh GET is served from the cache when a live entry exists.
    /// Interceptors run again on every retry so replays carry current
    /// headers. Dropping the returned future abandons interest in the
    /// outcome; a write already on the wire is not rolled back.
    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    pub async fn execute<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        if request.cacheable() {
            if let Some(entry) = self.cache.get(request.cache_key()) {
                debug!(url = %request.url, "serving from cache");
                return decode(&entry.body);
            }
        }

        let original = request;
        let mut attempt: u32 = 0;
        let mut did_auth_retry = false;

        loop {
            let mut prepared = original.clone();
            for interceptor in &self.request_interceptors {
                prepared = interceptor.intercept(prepared).await?;
            }

            match self.transport.send(&prepared).await {
                Ok(response) => {
                    for interceptor in &self.response_interceptors {
                        interceptor.inspect(&prepared, &response).await;
                    }

                    // One refresh-and-retry per call, outside the retry
                    // budget, and only when a token provider is wired.
                    if response.status == STATUS_UNAUTHORIZED && !did_auth_retry {
                        if let Some(auth) = &self.auth {
                            did_auth_retry = true;
                            debug!(url = %original.url, "401 received, refreshing session");
                            auth.force_refresh().await?;
                            continue;
                        }
                    }

                    if self.retry_policy.should_retry(response.status, attempt + 1) {
                        let delay = self.retry_policy.delay(attempt);
                        debug!(
                            status = response.status,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "retrying after backoff"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }

                    return self.finalize(&original, response);
                }
                Err(TransportError::Security(message)) => {
                    return Err(NetworkError::Security(message));
                }
                Err(TransportError::InvalidRequest(message)) => {
                    return Err(NetworkError::Config(message));
                }
                Err(TransportError::Timeout(_))
                    if self.retry_policy.should_retry(STATUS_REQUEST_TIMEOUT, attempt + 1) =>
                {
                    // Timeouts retry on the same budget as an HTTP 408.
                    let delay = self.retry_policy.delay(attempt);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, "timeout, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    debug!(url = %original.url, error = %err, "connectivity failure");
                    return self.enqueue_offline(&original).await;
                }
            }
        }
    }

    /// GET against the configured base URL.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.execute(ApiRequest::get(self.resolve(path)?)).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let request = ApiRequest::post(self.resolve(path)?)
            .with_json(body)
            .map_err(|e| NetworkError::Config(format!("request body: {e}")))?;
        self.execute(request).await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let request = ApiRequest::put(self.resolve(path)?)
            .with_json(body)
            .map_err(|e| NetworkError::Config(format!("request body: {e}")))?;
        self.execute(request).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.execute(ApiRequest::delete(self.resolve(path)?)).await
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn offline_queue(&self) -> &Arc<OfflineQueue> {
        &self.queue
    }

    fn resolve(&self, path: &str) -> Result<String> {
        if path.starts_with("http://") || path.starts_with("https://") {
            return Ok(path.to_string());
        }
        let base = self.base_url.as_ref().ok_or_else(|| {
            NetworkError::Config(format!("relative path {path:?} needs a base url"))
        })?;
        let url = base
            .join(path)
            .map_err(|e| NetworkError::Config(format!("path {path:?}: {e}")))?;
        Ok(url.into())
    }

    fn finalize<T: DeserializeOwned>(
        &self,
        original: &ApiRequest,
        response: RawResponse,
    ) -> Result<T> {
        if response.is_success() {
            if original.cacheable() {
                self.cache.set(original.cache_key(), response.body.clone(), self.cache_ttl);
            } else {
                // A successful write makes any cached copy stale.
                self.cache.invalidate(original.cache_key());
            }
            return decode(&response.body);
        }
        Err(error_for_status(response.status, &response.body))
    }

    async fn enqueue_offline<T>(&self, original: &ApiRequest) -> Result<T> {
        let id = self.queue.enqueue(original).await;
        info!(url = %original.url, %id, "request queued while offline");
        Err(NetworkError::Offline { queued_id: Some(id) })
    }
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    // Empty success bodies decode as JSON null so () and Option targets
    // work for 204-style responses.
    let payload: &[u8] = if body.is_empty() { b"null" } else { body };
    serde_json::from_slice(payload).map_err(|e| NetworkError::Decode(e.to_string()))
}

/// Maps a non-success status and body to the error surface.
pub(crate) fn error_for_status(status: u16, body: &[u8]) -> NetworkError {
    let message = snippet(body);
    match status {
        401 => NetworkError::Unauthorized(message),
        404 => NetworkError::NotFound(message),
        300..=499 => NetworkError::Client { status, message },
        _ => NetworkError::Server { status, message },
    }
}

fn snippet(body: &[u8]) -> String {
    const MAX_CHARS: usize = 256;
    let text = String::from_utf8_lossy(body);
    let trimmed = text.trim();
    if trimmed.chars().count() <= MAX_CHARS {
        trimmed.to_string()
    } else {
        trimmed.chars().take(MAX_CHARS).collect()
    }
}

/// Assembles an [`ApiClient`].
///
/// Interceptor order is fixed: security gate, then auth, then logging,
/// then anything caller-supplied.
#[derive(Default)]
pub struct ApiClientBuilder {
    transport: Option<Arc<dyn Transport>>,
    cache: Option<Arc<ResponseCache>>,
    queue: Option<Arc<OfflineQueue>>,
    auth: Option<Arc<dyn AccessTokenProvider>>,
    security_gate: Option<Arc<dyn SecurityGate>>,
    extra_request_interceptors: Vec<Arc<dyn RequestInterceptor>>,
    extra_response_interceptors: Vec<Arc<dyn ResponseInterceptor>>,
    retry_policy: Option<RetryPolicy>,
    base_url: Option<Url>,
    cache_ttl: Option<Duration>,
}

impl ApiClientBuilder {
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn offline_queue(mut self, queue: Arc<OfflineQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn auth(mut self, provider: Arc<dyn AccessTokenProvider>) -> Self {
        self.auth = Some(provider);
        self
    }

    pub fn security_gate(mut self, gate: Arc<dyn SecurityGate>) -> Self {
        self.security_gate = Some(gate);
        self
    }

    pub fn request_interceptor(mut self, interceptor: Arc<dyn RequestInterceptor>) -> Self {
        self.extra_request_interceptors.push(interceptor);
        self
    }

    pub fn response_interceptor(mut self, interceptor: Arc<dyn ResponseInterceptor>) -> Self {
        self.extra_response_interceptors.push(interceptor);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn base_url(mut self, base: Url) -> Self {
        self.base_url = Some(base);
        self
    }

    /// TTL for cached GET responses; the cache default applies otherwise.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn build(self) -> Result<ApiClient> {
        let transport = self
            .transport
            .ok_or_else(|| NetworkError::Config("client requires a transport".to_string()))?;
        let queue = self
            .queue
            .ok_or_else(|| NetworkError::Config("client requires an offline queue".to_string()))?;
        let cache = self.cache.unwrap_or_default();

        let mut request_interceptors: Vec<Arc<dyn RequestInterceptor>> = Vec::new();
        if let Some(gate) = self.security_gate {
            request_interceptors.push(Arc::new(SecurityGateInterceptor::new(gate)));
        }
        if let Some(auth) = &self.auth {
            request_interceptors.push(Arc::new(AuthInterceptor::new(Arc::clone(auth))));
        }
        request_interceptors.push(Arc::new(LoggingInterceptor));
        request_interceptors.extend(self.extra_request_interceptors);

        let mut response_interceptors: Vec<Arc<dyn ResponseInterceptor>> =
            vec![Arc::new(LoggingInterceptor)];
        response_interceptors.extend(self.extra_response_interceptors);

        Ok(ApiClient {
            transport,
            cache,
            queue,
            auth: self.auth,
            request_interceptors,
            response_interceptors,
            retry_policy: self.retry_policy.unwrap_or_default(),
            base_url: self.base_url,
            cache_ttl: self.cache_ttl,
        })
    }
}
