// Node Release Worker
//
// Eventually-consistent GC of test machines. Each cycle drops node
// ownership from terminal jobs (minus a bounded retention set of recent
// failures kept for live post-mortem debugging), then releases every held
// node no job row references any more. It only removes references it
// cannot find, never fabricates them, so it is safe to run concurrently
// with the poll loop.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{error, info};

use crate::application::store;
use crate::application::shutdown::ShutdownToken;
use crate::config::Config;
use crate::domain::job::result;
use crate::domain::{Job, JobPatch};
use crate::error::Result;
use crate::port::{JobRepository, NodePool, TimeProvider};

pub struct NodeReaper {
    repo: Arc<dyn JobRepository>,
    pool: Arc<dyn NodePool>,
    time: Arc<dyn TimeProvider>,
    config: Arc<Config>,
}

/// Node ids exempt from release: the `keep` most-recently-updated terminal
/// "Failed" jobs still inside the age window keep their machine.
pub fn retained_failed_nodes(
    jobs: &[Job],
    keep: usize,
    max_age_millis: i64,
    now_millis: i64,
) -> HashSet<i64> {
    let mut failed: Vec<&Job> = jobs
        .iter()
        .filter(|j| {
            j.state.is_terminal()
                && j.node_id != 0
                && j.result.as_deref() == Some(result::FAILED)
                && now_millis - j.updated <= max_age_millis
        })
        .collect();
    failed.sort_by_key(|j| std::cmp::Reverse(j.updated));
    failed.into_iter().take(keep).map(|j| j.node_id).collect()
}

impl NodeReaper {
    pub fn new(
        repo: Arc<dyn JobRepository>,
        pool: Arc<dyn NodePool>,
        time: Arc<dyn TimeProvider>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            repo,
            pool,
            time,
            config,
        }
    }

    /// Drop node ownership from terminal jobs outside the retention set.
    /// `node_ip` is kept so listings still show the last-known address.
    pub async fn reap_finished_job_nodes(&self) -> Result<()> {
        let jobs = self.repo.find_with_nodes().await?;
        let now = self.time.now_millis();
        let retained = retained_failed_nodes(
            &jobs,
            self.config.keep_failed,
            self.config.keep_failed_max_age_secs * 1000,
            now,
        );

        for mut job in jobs {
            if job.state.is_terminal() && !retained.contains(&job.node_id) {
                info!(job = %job, node_id = job.node_id, "dropping node from finished job");
                store(&*self.repo, &mut job, JobPatch::clear_node(), now).await?;
            }
        }
        Ok(())
    }

    /// Held nodes old enough to trust, minus everything still referenced
    /// by a job row.
    pub async fn nodes_to_release(&self) -> Result<Vec<i64>> {
        let referenced: HashSet<i64> = self
            .repo
            .find_with_nodes()
            .await?
            .iter()
            .map(|j| j.node_id)
            .collect();
        let held = self
            .pool
            .held_nodes(Duration::from_secs(
                self.config.node_min_hold_age_secs as u64,
            ))
            .await?;
        Ok(held.difference(&referenced).copied().collect())
    }

    /// One reconciliation pass; returns how many nodes were released.
    pub async fn run_once(&self) -> Result<usize> {
        self.reap_finished_job_nodes().await?;
        let mut released = 0;
        for node_id in self.nodes_to_release().await? {
            match self.pool.release(node_id).await {
                Ok(()) => {
                    info!(node_id, "released unreferenced node");
                    released += 1;
                }
                Err(e) => error!(node_id, error = %e, "failed to release node"),
            }
        }
        Ok(released)
    }

    pub async fn run(self, mut shutdown: ShutdownToken) {
        let interval = Duration::from_secs(self.config.reaper_interval_secs);
        info!(interval_secs = interval.as_secs(), "node reaper started");
        loop {
            if shutdown.is_shutdown() {
                break;
            }
            if let Err(e) = self.run_once().await {
                error!(error = %e, "reaper cycle failed");
            }
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = sleep(interval) => {}
            }
        }
        info!("node reaper stopped");
    }
}
