//! Connectivity state reported by the platform

use serde::{Deserialize, Serialize};

/// Physical transport carrying traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    Wifi,
    Cellular,
    Wired,
    Unknown,
}

/// Point-in-time connectivity observation.
///
/// Recomputed on every platform event; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionState {
    pub connected: bool,
    pub connection_type: ConnectionType,
}

impl ConnectionState {
    pub fn online(connection_type: ConnectionType) -> Self {
        Self { connected: true, connection_type }
    }

    pub fn offline() -> Self {
        Self { connected: false, connection_type: ConnectionType::Unknown }
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::offline()
    }
}
