//! Conflict resolution for queued writes
//!
//! When a replayed request collides with newer server state, the server
//! answers 409 with its copy of the record. [`resolve`] maps a conflict
//! and a strategy to a [`Resolution`] and never performs I/O, so drain
//! code and UI code apply it the same way.

use caravel_domain::{ConflictStrategy, Resolution, SyncConflict};
use tracing::debug;

/// Applies `strategy` to `conflict`.
///
/// Server-wins adopts the server payload, client-wins keeps the local
/// payload for another attempt, and manual hands the untouched conflict
/// back for the caller to settle.
pub fn resolve(conflict: SyncConflict, strategy: ConflictStrategy) -> Resolution {
    debug!(endpoint = %conflict.endpoint, ?strategy, "resolving sync conflict");
    match strategy {
        ConflictStrategy::ServerWins => Resolution::UseServer(conflict.server_data),
        ConflictStrategy::ClientWins => Resolution::UseClient(conflict.local_data),
        ConflictStrategy::Manual => Resolution::Deferred(conflict),
    }
}
