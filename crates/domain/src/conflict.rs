//! Write-conflict types and resolution strategies

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::serde_util;

/// A write conflict reported by the server for a replayed mutation.
///
/// Built from the conflict response at the moment it is observed and handed
/// straight to resolution; not retained afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Resource the conflicting write targeted
    pub endpoint: String,
    /// The local mutation body that was rejected
    #[serde(with = "serde_util::base64_bytes")]
    pub local_data: Vec<u8>,
    /// The server's copy, taken from the conflict response body
    #[serde(with = "serde_util::base64_bytes")]
    pub server_data: Vec<u8>,
    pub occurred_at: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
}

/// How conflicting writes are reconciled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConflictStrategy {
    /// Discard the local mutation and adopt the server copy
    #[default]
    ServerWins,
    /// Re-deliver the local mutation, overwriting the server copy
    ClientWins,
    /// No automatic winner; surface the conflict for user action
    Manual,
}

/// Outcome of resolving a conflict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    /// Adopt the server copy; the local mutation is dropped
    UseServer(#[serde(with = "serde_util::base64_bytes")] Vec<u8>),
    /// Keep the local copy; the mutation stays eligible for delivery
    UseClient(#[serde(with = "serde_util::base64_bytes")] Vec<u8>),
    /// Deferred to the caller; carries the full conflict for display
    Deferred(SyncConflict),
}

impl SyncConflict {
    pub fn new(endpoint: impl Into<String>, local_data: Vec<u8>, server_data: Vec<u8>) -> Self {
        Self {
            endpoint: endpoint.into(),
            local_data,
            server_data,
            occurred_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
