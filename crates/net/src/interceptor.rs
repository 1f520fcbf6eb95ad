//! Request and response interceptors
//!
//! Request interceptors transform the outgoing [`ApiRequest`] and run in
//! registration order: security gate, then auth, then logging, then any
//! caller-supplied ones. They run again on every retry so replays carry
//! a current token. Response interceptors observe what came back.

use std::sync::Arc;

use async_trait::async_trait;
use caravel_domain::{ApiRequest, NetworkError};
use tracing::{debug, warn};

use crate::auth::AccessTokenProvider;
use crate::transport::RawResponse;

const AUTHORIZATION: &str = "Authorization";

#[async_trait]
pub trait RequestInterceptor: Send + Sync {
    async fn intercept(&self, request: ApiRequest) -> Result<ApiRequest, NetworkError>;
}

#[async_trait]
pub trait ResponseInterceptor: Send + Sync {
    async fn inspect(&self, request: &ApiRequest, response: &RawResponse);
}

/// Policy hook consulted before any request leaves the client.
///
/// A denial carries the reason and surfaces as a security error without
/// touching the network.
pub trait SecurityGate: Send + Sync {
    fn permit(&self, request: &ApiRequest) -> Result<(), String>;
}

/// Default gate that lets every request through
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl SecurityGate for AllowAll {
    fn permit(&self, _request: &ApiRequest) -> Result<(), String> {
        Ok(())
    }
}

pub struct SecurityGateInterceptor {
    gate: Arc<dyn SecurityGate>,
}

impl SecurityGateInterceptor {
    pub fn new(gate: Arc<dyn SecurityGate>) -> Self {
        Self { gate }
    }
}

#[async_trait]
impl RequestInterceptor for SecurityGateInterceptor {
    async fn intercept(&self, request: ApiRequest) -> Result<ApiRequest, NetworkError> {
        match self.gate.permit(&request) {
            Ok(()) => Ok(request),
            Err(reason) => {
                warn!(url = %request.url, %reason, "request blocked by security gate");
                Err(NetworkError::Security(reason))
            }
        }
    }
}

/// Injects `Authorization: Bearer <token>` from the token provider.
///
/// A request that already carries an Authorization header is passed
/// through untouched so callers can override credentials per call.
pub struct AuthInterceptor {
    provider: Arc<dyn AccessTokenProvider>,
}

impl AuthInterceptor {
    pub fn new(provider: Arc<dyn AccessTokenProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl RequestInterceptor for AuthInterceptor {
    async fn intercept(&self, request: ApiRequest) -> Result<ApiRequest, NetworkError> {
        if request.headers.contains_key(AUTHORIZATION) {
            return Ok(request);
        }
        let token = self.provider.access_token().await?;
        Ok(request.with_header(AUTHORIZATION, format!("Bearer {token}")))
    }
}

/// Emits a debug line per request and per response
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingInterceptor;

#[async_trait]
impl RequestInterceptor for LoggingInterceptor {
    async fn intercept(&self, request: ApiRequest) -> Result<ApiRequest, NetworkError> {
        debug!(method = %request.method, url = %request.url, "dispatching request");
        Ok(request)
    }
}

#[async_trait]
impl ResponseInterceptor for LoggingInterceptor {
    async fn inspect(&self, request: &ApiRequest, response: &RawResponse) {
        if response.status >= 500 {
            warn!(
                method = %request.method,
                url = %request.url,
                status = response.status,
                "server failure response"
            );
        } else {
            debug!(
                method = %request.method,
                url = %request.url,
                status = response.status,
                "response"
            );
        }
    }
}
