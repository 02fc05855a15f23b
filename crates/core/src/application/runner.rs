// Job Runner - remote side effects of one job
//
// Owns dispatch onto an allocated node, the liveness probe, and the
// harvest/upload of results. Infrastructure failures never bubble out of
// the probe or the harvest as errors; they become "Aborted: <reason>"
// results so the job is driven to a terminal state instead of retrying
// forever.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::application::store;
use crate::config::Config;
use crate::domain::job::result;
use crate::domain::{Job, JobPatch, JobState};
use crate::error::Result;
use crate::port::{ArtifactStore, JobRepository, NodePool, RemoteExecutor, TimeProvider};

const ENV_FILE: &str = "run_tests_env";
const LOG_FILE: &str = "run_tests.log";
const PID_FILE: &str = "run_tests.pid";
const RESULT_FILE: &str = "result.txt";
const RUNNER_CHECKOUT: &str = "test-runner";

pub struct JobRunner {
    repo: Arc<dyn JobRepository>,
    pool: Arc<dyn NodePool>,
    executor: Arc<dyn RemoteExecutor>,
    artifacts: Arc<dyn ArtifactStore>,
    time: Arc<dyn TimeProvider>,
    config: Arc<Config>,
}

impl JobRunner {
    pub fn new(
        repo: Arc<dyn JobRepository>,
        pool: Arc<dyn NodePool>,
        executor: Arc<dyn RemoteExecutor>,
        artifacts: Arc<dyn ArtifactStore>,
        time: Arc<dyn TimeProvider>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            repo,
            pool,
            executor,
            artifacts,
            time,
            config,
        }
    }

    /// Dispatch a queued job onto a freshly allocated node.
    ///
    /// An exhausted pool or an unreachable node leaves the job Queued for
    /// the next cycle; only transport/storage failures are errors.
    pub async fn dispatch(&self, job: &mut Job) -> Result<()> {
        if job.node_id != 0 {
            // A stale node_id means a previous dispatch attempt failed
            // part-way through.
            warn!(job = %job, node_id = job.node_id, "releasing stale node before re-dispatch");
            self.pool.release(job.node_id).await?;
            store(&*self.repo, job, JobPatch::clear_node(), self.time.now_millis()).await?;
        }

        let Some(node) = self.pool.allocate(&self.config.node_label).await? else {
            debug!(job = %job, label = %self.config.node_label, "no nodes available");
            return Ok(());
        };

        info!(job = %job, node_id = node.id, node_ip = %node.ip, "running job");

        let reachable = matches!(self.executor.run(&node.ip, &argv(["true"])).await, Ok(0));
        if !reachable {
            error!(node_id = node.id, node_ip = %node.ip, "node unreachable over SSH, releasing it");
            self.pool.release(node.id).await?;
            return Ok(());
        }

        store(
            &*self.repo,
            job,
            JobPatch {
                node_id: Some(node.id),
                node_ip: Some(node.ip.clone()),
                result: Some(String::new()),
                ..Default::default()
            },
            self.time.now_millis(),
        )
        .await?;

        self.write_instructions(job, &node.ip).await?;
        self.launch(&node.ip).await?;

        store(
            &*self.repo,
            job,
            JobPatch::state(JobState::Running),
            self.time.now_millis(),
        )
        .await
    }

    /// Accumulate the test script on the node: checkout line first, then
    /// the environment plus the runner invocation.
    async fn write_instructions(&self, job: &Job, ip: &str) -> Result<()> {
        let mut checkout = argv(["echo", "/usr/bin/git", "clone"]);
        checkout.push(self.config.runner_repo_url.clone());
        checkout.push(RUNNER_CHECKOUT.to_string());
        checkout.extend(argv([">>", ENV_FILE]));
        self.executor.run(ip, &checkout).await?;

        let mut line = vec!["echo".to_string()];
        line.extend(self.environment(job));
        line.push(format!("{}/run_tests.sh", RUNNER_CHECKOUT));
        line.extend(argv([">>", ENV_FILE]));
        self.executor.run(ip, &line).await?;
        Ok(())
    }

    fn environment(&self, job: &Job) -> Vec<String> {
        vec![
            format!("CHANGE_REF={}", job.change_ref),
            format!("PROJECT={}", job.project_name),
            format!("BRANCH={}", self.config.branch),
        ]
    }

    async fn launch(&self, ip: &str) -> Result<()> {
        // The freshly written file is not always visible to an immediate
        // follow-up ssh invocation.
        if self.config.dispatch_settle_secs > 0 {
            tokio::time::sleep(Duration::from_secs(self.config.dispatch_settle_secs)).await;
        }
        let launch = argv([
            "nohup", "bash", ENV_FILE, "<", "/dev/null", ">", LOG_FILE, "2>&1", "&",
        ]);
        self.executor.run(ip, &launch).await?;
        Ok(())
    }

    /// Liveness decision for a Running job.
    ///
    /// No IP means the node was lost. Within the grace period the job is
    /// assumed alive without probing. Past the configured maximum running
    /// time the job is timed out without probing. Otherwise the node is
    /// probed for the runner pid; a probe transport failure is terminal.
    pub async fn is_running(&self, job: &mut Job) -> Result<bool> {
        let Some(ip) = job.node_ip.clone() else {
            error!(job = %job, "checking whether job is running but it has no node IP address");
            return Ok(false);
        };

        let now = self.time.now_millis();
        let elapsed_ms = now - job.updated;

        if elapsed_ms < self.config.probe_grace_secs * 1000 {
            return Ok(true);
        }

        if elapsed_ms > self.config.max_running_time_secs * 1000 {
            error!(job = %job, elapsed_secs = elapsed_ms / 1000, "timed out job");
            store(&*self.repo, job, JobPatch::result(result::ABORTED_TIMED_OUT), now).await?;
            return Ok(false);
        }

        let probe = argv(["ps", "-p", &format!("$(cat {})", PID_FILE)]);
        match self.executor.run(&ip, &probe).await {
            Ok(code) => {
                info!(job = %job, node_ip = %ip, running = code == 0, "liveness probe");
                Ok(code == 0)
            }
            Err(e) => {
                warn!(job = %job, error = %e, "liveness probe failed");
                store(&*self.repo, job, JobPatch::result(result::ABORTED_PROBE), now).await?;
                Ok(false)
            }
        }
    }

    /// Pull the result line and the logs off the node into `dest`.
    ///
    /// Infallible by design: every failure maps to an "Aborted: <reason>"
    /// result string, and a prior Aborted result survives a failed harvest
    /// so the original cause is not lost.
    pub async fn retrieve_results(&self, job: &Job, dest: &Path) -> String {
        let Some(ip) = job.node_ip.clone() else {
            error!(job = %job, "attempting to retrieve results but job has no node IP address");
            return result::ABORTED_NO_IP.to_string();
        };

        match self.harvest(job, &ip, dest).await {
            Ok(line) => line,
            Err(e) => {
                warn!(job = %job, error = %e, "failed to copy logs");
                match &job.result {
                    Some(prior) if job.is_aborted() => prior.clone(),
                    _ => result::ABORTED_COPY_FAIL.to_string(),
                }
            }
        }
    }

    async fn harvest(&self, job: &Job, ip: &str, dest: &Path) -> Result<String> {
        let output = self
            .executor
            .run_captured(ip, &argv(["cat", RESULT_FILE]))
            .await?;
        debug!(job = %job, stdout = %output.stdout, stderr = %output.stderr, "result file");

        info!(job = %job, "downloading logs");
        self.executor
            .fetch(ip, &self.config.log_masks, dest)
            .await?;
        self.collect_host_logs(job, ip, dest).await;

        if !output.success() {
            // The node is broken somehow; keep an earlier abort cause.
            if let Some(prior) = job.result.as_deref() {
                if job.is_aborted() {
                    return Ok(prior.to_string());
                }
            }
            return Ok(result::ABORTED_NO_RESULT.to_string());
        }

        let line = output.stdout.lines().next().unwrap_or("").trim();
        if line.is_empty() {
            return Ok(result::ABORTED_NO_RESULT.to_string());
        }
        Ok(line.to_string())
    }

    /// Host-level logs come over as one streamed tarball; failures here
    /// only cost diagnostics, never the harvest.
    async fn collect_host_logs(&self, job: &Job, ip: &str, dest: &Path) {
        if self.config.host_log_paths.is_empty() {
            return;
        }
        let mut producer = argv(["tar", "--ignore-failed-read", "-czf", "-"]);
        producer.extend(self.config.host_log_paths.iter().cloned());
        let consumer = argv(["tar", "-xzf", "-", "-C", &dest.to_string_lossy()]);
        match self.executor.pipe(ip, &producer, &consumer).await {
            Ok(0) => {}
            Ok(code) => warn!(job = %job, code, "host log collection exited non-zero"),
            Err(e) => warn!(job = %job, error = %e, "host log collection failed"),
        }
    }

    /// Harvest a Collecting job and move it to Collected.
    ///
    /// An upload failure propagates and leaves the job Collecting; the
    /// collector retries it on its next cycle.
    pub async fn upload_results(&self, job: &mut Job) -> Result<()> {
        let staging = tempfile::Builder::new()
            .prefix("gatewatch-")
            .suffix(&job.change_num)
            .tempdir()?;

        let outcome = self.retrieve_results(job, staging.path()).await;
        let failed = fail_lines(&staging.path().join(LOG_FILE));

        info!(job = %job, "uploading logs");
        let prefix = job.change_ref.trim_start_matches("refs/changes/");
        let url = self.artifacts.upload(staging.path(), prefix).await?;
        info!(job = %job, url = %url, "uploaded results");

        store(
            &*self.repo,
            job,
            JobPatch {
                result: Some(outcome),
                logs_url: Some(url.clone()),
                report_url: Some(url),
                failed: Some(failed),
                ..Default::default()
            },
            self.time.now_millis(),
        )
        .await?;
        store(
            &*self.repo,
            job,
            JobPatch::state(JobState::Collected),
            self.time.now_millis(),
        )
        .await
    }
}

fn argv<const N: usize>(words: [&str; N]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}

/// Best-effort capture of the failing sub-test lines from the runner log.
/// Only lines carrying the runner's `... FAIL` verdict marker count;
/// incidental mentions of FAIL elsewhere in the log do not.
fn fail_lines(log_path: &Path) -> String {
    let Ok(contents) = std::fs::read_to_string(log_path) else {
        return String::new();
    };
    contents
        .lines()
        .filter(|line| line.contains("... FAIL"))
        .collect::<Vec<_>>()
        .join("\n")
}
