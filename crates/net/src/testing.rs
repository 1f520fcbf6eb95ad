//! Test doubles for the networking seams
//!
//! Available to dependents through the `test-utils` feature and to this
//! crate's own tests. Each double records what it saw so assertions can
//! check both outcomes and traffic.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use caravel_domain::{ApiRequest, QueuedRequest};
use chrono::Utc;
use parking_lot::Mutex;

use crate::auth::{AuthError, TokenPair, TokenRefresher};
use crate::queue::{ReplayExecutor, ReplayOutcome};
use crate::transport::{RawResponse, Transport, TransportError};

/// Scripted [`Transport`] that records every request it is handed.
///
/// Responses and errors are served in push order; an exhausted script
/// fails the call so a test cannot silently send more requests than it
/// scripted.
#[derive(Default)]
pub struct MockTransport {
    script: Mutex<VecDeque<Result<RawResponse, TransportError>>>,
    seen: Mutex<Vec<ApiRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, status: u16, body: Vec<u8>) {
        self.script.lock().push_back(Ok(RawResponse::new(status, body)));
    }

    pub fn push_raw(&self, response: RawResponse) {
        self.script.lock().push_back(Ok(response));
    }

    pub fn push_error(&self, error: TransportError) {
        self.script.lock().push_back(Err(error));
    }

    /// Requests seen so far, in send order.
    pub fn requests(&self) -> Vec<ApiRequest> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &ApiRequest) -> Result<RawResponse, TransportError> {
        self.seen.lock().push(request.clone());
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Other("mock transport script exhausted".into())))
    }
}

/// Counting [`TokenRefresher`] double.
///
/// Successful refreshes mint `"{prefix}-{n}"` access tokens, `n` being
/// the 1-based call number, so tests can tell refreshes apart and
/// detect duplicate network calls.
pub struct MockRefresher {
    prefix: String,
    failure: Option<String>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockRefresher {
    pub fn succeeding(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into(), failure: None, delay: None, calls: AtomicUsize::new(0) }
    }

    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            prefix: String::new(),
            failure: Some(reason.into()),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Adds latency to every refresh so tests can overlap callers.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of refresh calls that reached this double.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenRefresher for MockRefresher {
    async fn refresh(&self, _refresh_token: &str) -> Result<TokenPair, AuthError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = &self.failure {
            return Err(AuthError::RefreshFailed(reason.clone()));
        }
        Ok(TokenPair::new(
            format!("{}-{call}", self.prefix),
            format!("{}-refresh-{call}", self.prefix),
        )
        .with_expiry(Utc::now() + chrono::Duration::hours(1)))
    }
}

/// Scripted [`ReplayExecutor`] for queue tests.
///
/// Outcomes are served in push order and default to
/// [`ReplayOutcome::Delivered`] once the script runs out.
#[derive(Default)]
pub struct RecordingExecutor {
    script: Mutex<VecDeque<ReplayOutcome>>,
    seen: Mutex<Vec<QueuedRequest>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_outcome(&self, outcome: ReplayOutcome) {
        self.script.lock().push_back(outcome);
    }

    /// Records replayed so far, in replay order.
    pub fn replayed(&self) -> Vec<QueuedRequest> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl ReplayExecutor for RecordingExecutor {
    async fn replay(&self, request: &QueuedRequest) -> ReplayOutcome {
        self.seen.lock().push(request.clone());
        self.script.lock().pop_front().unwrap_or(ReplayOutcome::Delivered)
    }
}
