//! Reconnect-driven queue drains
//!
//! The coordinator owns a background task subscribed to the monitor.
//! On every disconnected-to-connected edge it drains the offline queue;
//! `sync_now` triggers the same pass on demand. Start and stop are
//! idempotent and dropping the coordinator stops the task.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::monitor::NetworkMonitor;
use crate::queue::{DrainOutcome, OfflineQueue};

pub struct NetworkSyncCoordinator {
    monitor: Arc<NetworkMonitor>,
    queue: Arc<OfflineQueue>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl NetworkSyncCoordinator {
    pub fn new(monitor: Arc<NetworkMonitor>, queue: Arc<OfflineQueue>) -> Self {
        Self { monitor, queue, task: Mutex::new(None) }
    }

    /// Starts the reconnect watcher. Calling again while it runs is a
    /// no-op.
    pub async fn start_monitoring(&self) {
        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("sync coordinator already monitoring");
            return;
        }

        let mut rx = self.monitor.subscribe();
        let queue = Arc::clone(&self.queue);
        let handle = tokio::spawn(async move {
            let mut was_connected = rx.borrow_and_update().connected;
            loop {
                if rx.changed().await.is_err() {
                    break;
                }
                let connected = rx.borrow_and_update().connected;
                if connected && !was_connected {
                    info!("connectivity restored, draining offline queue");
                    let outcome = queue.process_queue().await;
                    debug!(?outcome, "reconnect drain finished");
                }
                was_connected = connected;
            }
        });
        *task = Some(handle);
        info!("sync coordinator started");
    }

    /// Stops the reconnect watcher. Calling without one running is a
    /// no-op.
    pub async fn stop_monitoring(&self) {
        if let Some(handle) = self.task.lock().await.take() {
            handle.abort();
            info!("sync coordinator stopped");
        }
    }

    pub async fn is_monitoring(&self) -> bool {
        self.task.lock().await.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Drains the queue immediately, independent of connectivity edges.
    pub async fn sync_now(&self) -> DrainOutcome {
        self.queue.process_queue().await
    }
}

impl Drop for NetworkSyncCoordinator {
    fn drop(&mut self) {
        if let Some(handle) = self.task.get_mut().take() {
            handle.abort();
        }
    }
}
