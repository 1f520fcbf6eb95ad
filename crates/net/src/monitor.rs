//! Connectivity state fan-out
//!
//! The monitor does no probing of its own. Platform code reports state
//! transitions into it and consumers either read the current state or
//! subscribe to a watch channel that wakes them only on real edges.
//! Duplicate reports of the unchanged state are absorbed here.

use caravel_domain::{ConnectionState, ConnectionType};
use tokio::sync::watch;
use tracing::info;

pub struct NetworkMonitor {
    sender: watch::Sender<ConnectionState>,
}

impl NetworkMonitor {
    /// Starts disconnected until the platform reports otherwise.
    pub fn new() -> Self {
        Self::with_initial(ConnectionState::offline())
    }

    pub fn with_initial(initial: ConnectionState) -> Self {
        let (sender, _) = watch::channel(initial);
        Self { sender }
    }

    /// Records a state report from the platform. Subscribers are woken
    /// only when the state actually changed.
    pub fn report(&self, state: ConnectionState) {
        let changed = self.sender.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            info!(
                connected = state.connected,
                connection_type = ?state.connection_type,
                "connectivity changed"
            );
        }
    }

    pub fn is_connected(&self) -> bool {
        self.sender.borrow().connected
    }

    pub fn connection_type(&self) -> ConnectionType {
        self.sender.borrow().connection_type
    }

    pub fn current(&self) -> ConnectionState {
        *self.sender.borrow()
    }

    /// Watch receiver positioned at the current state; only subsequent
    /// edges mark it changed.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.sender.subscribe()
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new()
    }
}
