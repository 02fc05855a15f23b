// Graceful shutdown signalling for background workers

use tokio::sync::watch;

/// Receiver half handed to each worker loop.
#[derive(Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

impl ShutdownToken {
    /// Check whether shutdown was requested.
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until shutdown is signalled.
    pub async fn wait(&mut self) {
        // Only one value is ever sent, so any change means shutdown.
        let _ = self.rx.changed().await;
    }
}

/// Sender half kept by the composition root.
pub struct ShutdownSender {
    tx: watch::Sender<bool>,
}

impl ShutdownSender {
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

pub fn shutdown_channel() -> (ShutdownSender, ShutdownToken) {
    let (tx, rx) = watch::channel(false);
    (ShutdownSender { tx }, ShutdownToken { rx })
}
