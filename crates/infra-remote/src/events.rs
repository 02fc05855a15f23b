// Review Event Stream
//
// Holds a long-lived `gerrit stream-events` ssh session; a reader task
// parses each JSON line into a ReviewEvent and queues it. `get_event` is a
// non-blocking pull so the poll loop can drain pending events and move on.
// A dead stream surfaces as an error from `get_event`, which the daemon
// treats as fatal and lets its supervisor restart the process.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use gatewatch_core::domain::ReviewEvent;
use gatewatch_core::error::{AppError, Result};
use gatewatch_core::port::EventSource;

pub struct StreamEventSource {
    rx: Mutex<mpsc::UnboundedReceiver<ReviewEvent>>,
}

impl StreamEventSource {
    /// Connect to the review host and start the reader task.
    pub async fn connect(
        host: &str,
        port: u16,
        username: &str,
        key_path: &str,
    ) -> Result<Self> {
        let mut child = Command::new("ssh")
            .args(["-q", "-o", "BatchMode=yes", "-o", "ServerAliveInterval=60"])
            .arg("-i")
            .arg(key_path)
            .arg("-p")
            .arg(port.to_string())
            .arg(format!("{}@{}", username, host))
            .arg("gerrit stream-events")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| AppError::Remote(format!("event stream to {}: {}", host, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Remote("no stdout from event stream".to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let stream_host = host.to_string();
        tokio::spawn(async move {
            info!(host = %stream_host, "event stream connected");
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => match serde_json::from_str::<ReviewEvent>(&line) {
                        Ok(event) => {
                            debug!(kind = ?event.kind, "event received");
                            if tx.send(event).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "dropping unparseable event line"),
                    },
                    Ok(None) => {
                        error!(host = %stream_host, "event stream closed");
                        break;
                    }
                    Err(e) => {
                        error!(host = %stream_host, error = %e, "event stream read failed");
                        break;
                    }
                }
            }
            // Dropping tx makes get_event report the disconnect.
            let _ = child.wait().await;
        });

        Ok(Self { rx: Mutex::new(rx) })
    }
}

#[async_trait]
impl EventSource for StreamEventSource {
    async fn get_event(&self) -> Result<Option<ReviewEvent>> {
        match self.rx.lock().await.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => {
                Err(AppError::Remote("event stream disconnected".to_string()))
            }
        }
    }
}
