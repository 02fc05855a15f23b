// Result Collection Worker
//
// Decouples the slow harvest-and-upload path from the poll loop: liveness
// polling of many jobs is never stalled behind one slow artifact transfer.
// The worker re-reads Collecting rows from the database each cycle, so a
// failed harvest is retried and harvest state survives restarts.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{error, info};

use crate::application::runner::JobRunner;
use crate::application::shutdown::ShutdownToken;
use crate::domain::JobState;
use crate::error::Result;
use crate::port::JobRepository;

pub struct ResultCollector {
    repo: Arc<dyn JobRepository>,
    runner: Arc<JobRunner>,
    /// Wakeup hints from `process_results`; purely an optimization over
    /// the idle timeout.
    rx: mpsc::UnboundedReceiver<i64>,
    idle: Duration,
}

impl ResultCollector {
    pub fn new(
        repo: Arc<dyn JobRepository>,
        runner: Arc<JobRunner>,
        rx: mpsc::UnboundedReceiver<i64>,
        idle: Duration,
    ) -> Self {
        Self {
            repo,
            runner,
            rx,
            idle,
        }
    }

    /// Harvest every Collecting job once. Per-job failures are logged and
    /// the job stays Collecting for the next pass.
    pub async fn run_once(&self) -> Result<usize> {
        let collecting = self.repo.find_by_state(JobState::Collecting).await?;
        let mut harvested = 0;
        for mut job in collecting {
            match self.runner.upload_results(&mut job).await {
                Ok(()) => harvested += 1,
                Err(e) => error!(job = %job, error = %e, "harvest failed"),
            }
        }
        Ok(harvested)
    }

    pub async fn run(mut self, mut shutdown: ShutdownToken) {
        info!(idle_secs = self.idle.as_secs(), "result collector started");
        loop {
            if shutdown.is_shutdown() {
                break;
            }
            if let Err(e) = self.run_once().await {
                error!(error = %e, "collector cycle failed");
            }
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = self.rx.recv() => {
                    // Coalesce a burst of wakeups into one pass.
                    while self.rx.try_recv().is_ok() {}
                }
                _ = sleep(self.idle) => {}
            }
        }
        info!("result collector stopped");
    }
}
