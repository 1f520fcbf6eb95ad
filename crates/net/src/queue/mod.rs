//! Durable offline queue for failed requests
//!
//! Requests that could not be delivered are recorded here and replayed
//! when connectivity returns. The queue persists through the key-value
//! store after every mutation, so a process restart picks up exactly
//! where the last session stopped. Draining is single-flight and works
//! on a snapshot, so new requests enqueued mid-drain wait for the next
//! pass.

mod core;
mod executor;

pub use self::core::{OfflineQueue, QueueConfig};
pub use self::executor::{ReplayExecutor, ReplayOutcome, TransportReplayExecutor};

use caravel_domain::{NetworkError, SyncConflict};
use uuid::Uuid;

use crate::store::StoreError;

/// Storage key for the persisted queue record
pub const QUEUE_STORAGE_KEY: &str = "caravel.offline.queue.v1";

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue storage failure: {0}")]
    Store(#[from] StoreError),

    #[error("queue serialization failure: {0}")]
    Serialize(String),
}

impl From<QueueError> for NetworkError {
    fn from(err: QueueError) -> Self {
        NetworkError::Store(err.to_string())
    }
}

/// Result of a drain request
#[derive(Debug)]
pub enum DrainOutcome {
    /// A pass ran; the report carries per-item accounting
    Completed(DrainReport),
    /// No pass ran, the monitor reports no connectivity
    Offline,
    /// No pass ran, another drain already holds the gate
    AlreadyRunning,
}

impl DrainOutcome {
    pub fn report(&self) -> Option<&DrainReport> {
        match self {
            Self::Completed(report) => Some(report),
            _ => None,
        }
    }
}

/// Per-item accounting for one drain pass
#[derive(Debug, Default)]
pub struct DrainReport {
    /// Accepted by the server and removed
    pub delivered: Vec<Uuid>,
    /// Conflicted, resolved in the server's favor and removed
    pub resolved: Vec<Uuid>,
    /// Conflicted under the manual strategy; removed and surfaced here
    pub deferred: Vec<SyncConflict>,
    /// Conflicted under client-wins; kept queued for another attempt
    pub retained: Vec<Uuid>,
    /// Older than the retention window; removed without executing
    pub purged: Vec<Uuid>,
    /// Replay failed; kept queued
    pub failed: Vec<Uuid>,
    /// Queue length after the pass, including requests enqueued during it
    pub remaining: usize,
}

impl DrainReport {
    /// Number of snapshot items the pass handled in any way.
    pub fn total_processed(&self) -> usize {
        self.delivered.len()
            + self.resolved.len()
            + self.deferred.len()
            + self.retained.len()
            + self.purged.len()
            + self.failed.len()
    }
}
