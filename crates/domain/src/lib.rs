//! # Caravel Domain
//!
//! Shared data model for the Caravel networking stack.
//!
//! This crate contains:
//! - Request and queued-request records
//! - Connectivity state types
//! - Sync conflict types and resolution strategies
//! - The caller-facing error taxonomy
//!
//! ## Architecture
//! - No dependencies on other Caravel crates
//! - Only external dependencies allowed
//! - Pure data structures; no I/O and no async

pub mod connectivity;
pub mod conflict;
pub mod errors;
pub mod queue;
pub mod request;
pub mod serde_util;

// Re-export commonly used items
pub use connectivity::{ConnectionState, ConnectionType};
pub use conflict::{ConflictStrategy, Resolution, SyncConflict};
pub use errors::{ErrorCategory, NetworkError, Result};
pub use queue::QueuedRequest;
pub use request::{ApiRequest, HttpMethod};
