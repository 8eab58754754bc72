//! Application lifetime signals shared between the daemon and its worker

use std::sync::Arc;
use tokio::sync::watch;

/// Started/stopping flags for the running process.
///
/// Clones share the same flags. Both flags only ever go from `false` to
/// `true`.
#[derive(Debug, Clone)]
pub struct HostLifetime {
    started: Arc<watch::Sender<bool>>,
    stopping: Arc<watch::Sender<bool>>,
}

impl HostLifetime {
    pub fn new() -> Self {
        Self {
            started: Arc::new(watch::channel(false).0),
            stopping: Arc::new(watch::channel(false).0),
        }
    }

    /// Signal that startup has completed
    pub fn notify_started(&self) {
        self.started.send_replace(true);
    }

    pub fn is_started(&self) -> bool {
        *self.started.borrow()
    }

    /// Wait until [`notify_started`](Self::notify_started) has been called
    pub async fn started(&self) {
        let mut rx = self.started.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|started| *started).await;
    }

    /// Ask the application to shut down
    pub fn request_stop(&self) {
        self.stopping.send_replace(true);
    }

    pub fn is_stopping(&self) -> bool {
        *self.stopping.borrow()
    }

    /// Wait until a stop has been requested
    pub async fn stopping(&self) {
        let mut rx = self.stopping.subscribe();
        let _ = rx.wait_for(|stopping| *stopping).await;
    }
}

impl Default for HostLifetime {
    fn default() -> Self {
        Self::new()
    }
}
