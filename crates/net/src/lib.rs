//! # Caravel Net
//!
//! Resilient client networking for Caravel: a pinned HTTP transport with
//! retries, response caching, token refresh, an offline queue and
//! reconnect-driven sync.
//!
//! The pieces compose around [`ApiClient`]:
//!
//! - [`retry::RetryPolicy`] decides which failures are retried and when
//! - [`cache::ResponseCache`] serves fresh GET responses locally
//! - [`pinning`] validates server identity down to the public key
//! - [`auth::TokenRefreshCoordinator`] keeps one refresh in flight
//! - [`queue::OfflineQueue`] captures writes that could not be delivered
//! - [`monitor::NetworkMonitor`] fans out connectivity edges
//! - [`sync::NetworkSyncCoordinator`] drains the queue on reconnect

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Infrastructure
pub mod store;
pub mod time;

// Transport and security
pub mod pinning;
pub mod transport;

// Resilience
pub mod cache;
pub mod retry;

// Session
pub mod auth;

// Offline operation
pub mod conflict;
pub mod monitor;
pub mod queue;
pub mod sync;

// Orchestration
pub mod client;
pub mod interceptor;

#[cfg(any(feature = "test-utils", test))]
pub mod testing;

// Orchestration surface
pub use client::{ApiClient, ApiClientBuilder};
pub use interceptor::{
    AllowAll, AuthInterceptor, LoggingInterceptor, RequestInterceptor, ResponseInterceptor,
    SecurityGate, SecurityGateInterceptor,
};

// Transport and security surface
pub use pinning::{CertificateValidator, PinSet, SpkiPin, TlsPinning};
pub use transport::{HttpTransport, HttpTransportBuilder, RawResponse, Transport, TransportError};

// Resilience surface
pub use cache::{CacheConfig, CacheStats, CachedResponse, ResponseCache};
pub use retry::{Backoff, RetryPolicy};

// Session surface
pub use auth::{
    AccessTokenProvider, AuthError, MemorySecureStore, RefreshState, SecureStore, TokenPair,
    TokenRefreshCoordinator, TokenRefresher, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY,
};
#[cfg(feature = "platform")]
pub use auth::KeyringSecureStore;

// Offline surface
pub use conflict::resolve;
pub use monitor::NetworkMonitor;
pub use queue::{
    DrainOutcome, DrainReport, OfflineQueue, QueueConfig, QueueError, ReplayExecutor,
    ReplayOutcome, TransportReplayExecutor, QUEUE_STORAGE_KEY,
};
pub use store::{FileStore, KeyValueStore, MemoryStore, StoreError};
pub use sync::NetworkSyncCoordinator;

// Domain types used throughout the API surface
pub use caravel_domain::{
    ApiRequest, ConflictStrategy, ConnectionState, ConnectionType, ErrorCategory, HttpMethod,
    NetworkError, QueuedRequest, Resolution, Result, SyncConflict,
};
