// Job Queue Orchestrator
//
// The four idempotent verbs of the poll cycle. Each verb is a full scan of
// jobs in one state; per-job failures are logged and swallowed so one bad
// job never stops the rest of the fleet.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::application::runner::JobRunner;
use crate::application::store;
use crate::config::Config;
use crate::domain::job::{change_num_from_ref, result};
use crate::domain::{Job, JobPatch, JobState};
use crate::error::Result;
use crate::port::{JobRepository, TimeProvider, Vote, VoteTransport};

pub struct JobQueue {
    repo: Arc<dyn JobRepository>,
    runner: Arc<JobRunner>,
    votes: Arc<dyn VoteTransport>,
    time: Arc<dyn TimeProvider>,
    config: Arc<Config>,
    /// Wakeup channel owned by this instance, handed to its collector at
    /// construction time.
    collect_tx: mpsc::UnboundedSender<i64>,
}

impl JobQueue {
    /// Build the queue and the receiving half of its collector wakeup
    /// channel.
    pub fn new(
        repo: Arc<dyn JobRepository>,
        runner: Arc<JobRunner>,
        votes: Arc<dyn VoteTransport>,
        time: Arc<dyn TimeProvider>,
        config: Arc<Config>,
    ) -> (Self, mpsc::UnboundedReceiver<i64>) {
        let (collect_tx, collect_rx) = mpsc::unbounded_channel();
        (
            Self {
                repo,
                runner,
                votes,
                time,
                config,
                collect_tx,
            },
            collect_rx,
        )
    }

    /// Queue a job for one patchset of one change.
    ///
    /// Any existing non-terminal row for the same (project, change) is
    /// marked Obsolete - not deleted, and its node is left for the reaper -
    /// before the new Queued row is inserted. Re-notification of the same
    /// change is therefore idempotent in effect without losing history.
    pub async fn add_job(
        &self,
        change_ref: &str,
        project_name: &str,
        commit_id: &str,
    ) -> Result<i64> {
        let change_num = change_num_from_ref(change_ref).map_err(crate::error::AppError::Domain)?;

        for mut existing in self.repo.find_active(project_name, change_num).await? {
            info!(job = %existing, "superseding job for a previous patchset");
            store(
                &*self.repo,
                &mut existing,
                JobPatch::state(JobState::Obsolete),
                self.time.now_millis(),
            )
            .await?;
        }

        let mut job = Job::new(change_ref, project_name, commit_id, self.time.now_millis())
            .map_err(crate::error::AppError::Domain)?;
        let id = self.repo.insert(&job).await?;
        job.id = id;
        info!(job = %job, "job queued");
        Ok(id)
    }

    /// All Queued jobs, or none when dispatch is suppressed for
    /// maintenance (jobs still queue up meanwhile).
    pub async fn queued_enabled_jobs(&self) -> Result<Vec<Job>> {
        let queued = self.repo.find_by_state(JobState::Queued).await?;
        info!(count = queued.len(), "jobs queued");
        if self.config.jobs_enabled {
            Ok(queued)
        } else {
            Ok(Vec::new())
        }
    }

    /// Dispatch every queued job for which a node can be allocated.
    pub async fn trigger_jobs(&self) -> Result<()> {
        for mut job in self.queued_enabled_jobs().await? {
            if let Err(e) = self.runner.dispatch(&mut job).await {
                error!(job = %job, error = %e, "dispatch failed");
            }
        }
        Ok(())
    }

    /// Poll liveness of every Running job; finished ones move to
    /// Collecting and are handed to the collector. Harvest never runs
    /// inline here - a slow transfer must not stall the poll loop.
    pub async fn process_results(&self) -> Result<()> {
        let running = self.repo.find_by_state(JobState::Running).await?;
        info!(count = running.len(), "jobs running");
        for mut job in running {
            match self.runner.is_running(&mut job).await {
                Ok(true) => {}
                Ok(false) => {
                    info!(job = %job, "tests are done, collecting");
                    store(
                        &*self.repo,
                        &mut job,
                        JobPatch::state(JobState::Collecting),
                        self.time.now_millis(),
                    )
                    .await?;
                    // Wakeup only; the collector re-reads Collecting rows.
                    let _ = self.collect_tx.send(job.id);
                }
                Err(e) => error!(job = %job, error = %e, "liveness check failed"),
            }
        }
        Ok(())
    }

    /// Report every Collected job upstream and finish it.
    ///
    /// Aborted runs carry no verdict and are never voted on. Negative
    /// votes can be silenced network-wide with `vote_passed_only` without
    /// silencing positive ones.
    pub async fn post_results(&self) -> Result<()> {
        let collected = self.repo.find_by_state(JobState::Collected).await?;
        info!(count = collected.len(), "jobs ready to be posted");
        for mut job in collected {
            if job.is_aborted() {
                info!(job = %job, result = ?job.result, "not voting on aborted job");
                store(
                    &*self.repo,
                    &mut job,
                    JobPatch::state(JobState::Finished),
                    self.time.now_millis(),
                )
                .await?;
                continue;
            }

            if self.config.vote {
                let outcome = job.result.clone().unwrap_or_default();
                let vote = if outcome == result::PASSED {
                    Vote::Approve
                } else {
                    Vote::Reject
                };
                if vote == Vote::Approve || !self.config.vote_passed_only {
                    let message = self.config.render_vote_message(
                        &outcome,
                        job.logs_url.as_deref().unwrap_or(""),
                        job.report_url.as_deref().unwrap_or(""),
                    );
                    info!(job = %job, result = %outcome, vote = %vote, "posting result");
                    if let Err(e) = self.votes.vote(&job.commit_id, vote, &message).await {
                        // Leave the job Collected; next cycle retries.
                        warn!(job = %job, error = %e, "vote failed");
                        continue;
                    }
                }
            }

            store(
                &*self.repo,
                &mut job,
                JobPatch::state(JobState::Finished),
                self.time.now_millis(),
            )
            .await?;
        }
        Ok(())
    }
}
