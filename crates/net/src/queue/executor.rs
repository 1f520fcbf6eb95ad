//! Replay execution for queued requests

use std::sync::Arc;

use async_trait::async_trait;
use caravel_domain::{NetworkError, QueuedRequest};
use tracing::debug;

use crate::auth::AccessTokenProvider;
use crate::client::error_for_status;
use crate::transport::Transport;

const AUTHORIZATION: &str = "Authorization";
const STATUS_CONFLICT: u16 = 409;

/// What happened to one replayed request
#[derive(Debug, Clone)]
pub enum ReplayOutcome {
    /// Accepted by the server
    Delivered,
    /// Rejected as conflicting with newer server state; carries the
    /// server's copy from the response body
    Conflict { status: u16, server_body: Vec<u8> },
    /// Not delivered; the queue keeps the request
    Failed(NetworkError),
}

/// Seam between the queue and the wire during a drain.
///
/// The queue decides retention and conflict policy; the executor only
/// reports what one delivery attempt produced.
#[async_trait]
pub trait ReplayExecutor: Send + Sync {
    async fn replay(&self, request: &QueuedRequest) -> ReplayOutcome;
}

/// Replays through the production transport, stamping a fresh bearer
/// token when a provider is attached. Tokens captured at enqueue time
/// are likely expired by drain time, so the stored Authorization header
/// is always replaced.
pub struct TransportReplayExecutor {
    transport: Arc<dyn Transport>,
    auth: Option<Arc<dyn AccessTokenProvider>>,
}

impl TransportReplayExecutor {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport, auth: None }
    }

    pub fn with_auth(mut self, provider: Arc<dyn AccessTokenProvider>) -> Self {
        self.auth = Some(provider);
        self
    }
}

#[async_trait]
impl ReplayExecutor for TransportReplayExecutor {
    async fn replay(&self, record: &QueuedRequest) -> ReplayOutcome {
        let mut request = record.to_request();
        if let Some(provider) = &self.auth {
            match provider.access_token().await {
                Ok(token) => {
                    request = request.with_header(AUTHORIZATION, format!("Bearer {token}"));
                }
                Err(err) => return ReplayOutcome::Failed(err.into()),
            }
        }

        debug!(id = %record.id, method = %record.method, url = %record.url, "replaying");
        match self.transport.send(&request).await {
            Ok(response) if response.is_success() => ReplayOutcome::Delivered,
            Ok(response) if response.status == STATUS_CONFLICT => ReplayOutcome::Conflict {
                status: response.status,
                server_body: response.body,
            },
            Ok(response) => {
                ReplayOutcome::Failed(error_for_status(response.status, &response.body))
            }
            Err(err) => ReplayOutcome::Failed(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caravel_domain::ApiRequest;

    use crate::auth::AuthError;
    use crate::testing::MockTransport;
    use crate::transport::TransportError;

    fn record(url: &str) -> QueuedRequest {
        QueuedRequest::from_request(&ApiRequest::post(url).with_body(b"{}".to_vec()))
    }

    #[tokio::test]
    async fn test_success_statuses_report_delivered() {
        let transport = Arc::new(MockTransport::new());
        transport.push_response(201, b"created".to_vec());

        let executor = TransportReplayExecutor::new(transport);
        let outcome = executor.replay(&record("https://api.example.com/v1/tasks")).await;

        assert!(matches!(outcome, ReplayOutcome::Delivered));
    }

    #[tokio::test]
    async fn test_conflict_status_carries_the_server_body() {
        let transport = Arc::new(MockTransport::new());
        transport.push_response(409, b"server copy".to_vec());

        let executor = TransportReplayExecutor::new(transport);
        let outcome = executor.replay(&record("https://api.example.com/v1/tasks/4")).await;

        match outcome {
            ReplayOutcome::Conflict { status, server_body } => {
                assert_eq!(status, 409);
                assert_eq!(server_body, b"server copy");
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_server_failure_maps_to_a_retained_error() {
        let transport = Arc::new(MockTransport::new());
        transport.push_response(503, Vec::new());

        let executor = TransportReplayExecutor::new(transport);
        let outcome = executor.replay(&record("https://api.example.com/v1/tasks")).await;

        match outcome {
            ReplayOutcome::Failed(NetworkError::Server { status, .. }) => assert_eq!(status, 503),
            other => panic!("expected server failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connectivity_failure_maps_to_offline() {
        let transport = Arc::new(MockTransport::new());
        transport.push_error(TransportError::Connect("no route".into()));

        let executor = TransportReplayExecutor::new(transport);
        let outcome = executor.replay(&record("https://api.example.com/v1/tasks")).await;

        assert!(matches!(
            outcome,
            ReplayOutcome::Failed(NetworkError::Offline { queued_id: None })
        ));
    }

    #[tokio::test]
    async fn test_replay_stamps_a_fresh_bearer_token() {
        struct FixedToken;

        #[async_trait]
        impl AccessTokenProvider for FixedToken {
            async fn access_token(&self) -> Result<String, AuthError> {
                Ok("fresh".to_string())
            }

            async fn force_refresh(&self) -> Result<String, AuthError> {
                Ok("fresh".to_string())
            }
        }

        let transport = Arc::new(MockTransport::new());
        transport.push_response(200, Vec::new());

        let stale = QueuedRequest::from_request(
            &ApiRequest::post("https://api.example.com/v1/tasks")
                .with_header(AUTHORIZATION, "Bearer stale"),
        );
        let executor =
            TransportReplayExecutor::new(Arc::clone(&transport) as Arc<dyn Transport>)
                .with_auth(Arc::new(FixedToken));
        executor.replay(&stale).await;

        let sent = transport.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].headers.get(AUTHORIZATION).map(String::as_str),
            Some("Bearer fresh")
        );
    }

    #[tokio::test]
    async fn test_auth_failure_retains_without_touching_the_wire() {
        struct NoSession;

        #[async_trait]
        impl AccessTokenProvider for NoSession {
            async fn access_token(&self) -> Result<String, AuthError> {
                Err(AuthError::SessionExpired("refresh token rejected".into()))
            }

            async fn force_refresh(&self) -> Result<String, AuthError> {
                Err(AuthError::SessionExpired("refresh token rejected".into()))
            }
        }

        let transport = Arc::new(MockTransport::new());
        let executor =
            TransportReplayExecutor::new(Arc::clone(&transport) as Arc<dyn Transport>)
                .with_auth(Arc::new(NoSession));

        let outcome = executor.replay(&record("https://api.example.com/v1/tasks")).await;

        assert!(matches!(outcome, ReplayOutcome::Failed(NetworkError::SessionExpired(_))));
        assert!(transport.requests().is_empty());
    }
}
