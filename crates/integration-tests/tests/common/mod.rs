//! Shared test fixture: an in-memory ledger plus hand-rolled fakes for
//! every external system the orchestrator talks to.

// Not every test binary uses every fixture.
#![allow(dead_code)]

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use gatewatch_core::application::{JobQueue, JobRunner, NodeReaper, ResultCollector};
use gatewatch_core::error::{AppError, Result};
use gatewatch_core::port::{
    ArtifactStore, CommandOutput, JobRepository, NodeHandle, NodePool, RemoteExecutor,
    TimeProvider, Vote, VoteTransport,
};
use gatewatch_core::Config;
use gatewatch_infra_sqlite::{create_pool, run_migrations, SqliteJobRepository};
use tokio::sync::mpsc;

pub const CHANGE_REF: &str = "refs/changes/61/65261/7";
pub const PROJECT: &str = "nova";
pub const COMMIT: &str = "c0ff33";

/// Settable clock, in epoch milliseconds.
pub struct MockTime {
    now: AtomicI64,
}

impl MockTime {
    pub fn new(now: i64) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub fn advance_secs(&self, secs: i64) {
        self.now.fetch_add(secs * 1000, Ordering::SeqCst);
    }
}

impl TimeProvider for MockTime {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// In-memory node inventory.
#[derive(Default)]
pub struct FakeNodePool {
    pub ready: Mutex<Vec<NodeHandle>>,
    pub held: Mutex<HashSet<i64>>,
    pub released: Mutex<Vec<i64>>,
}

impl FakeNodePool {
    pub fn with_nodes(nodes: &[(i64, &str)]) -> Self {
        let pool = Self::default();
        *pool.ready.lock().unwrap() = nodes
            .iter()
            .map(|(id, ip)| NodeHandle {
                id: *id,
                ip: ip.to_string(),
            })
            .collect();
        pool
    }

    pub fn hold(&self, node_id: i64) {
        self.held.lock().unwrap().insert(node_id);
    }

    pub fn released_ids(&self) -> Vec<i64> {
        self.released.lock().unwrap().clone()
    }
}

#[async_trait]
impl NodePool for FakeNodePool {
    async fn allocate(&self, _label: &str) -> Result<Option<NodeHandle>> {
        let mut ready = self.ready.lock().unwrap();
        if ready.is_empty() {
            return Ok(None);
        }
        let node = ready.remove(0);
        self.held.lock().unwrap().insert(node.id);
        Ok(Some(node))
    }

    async fn held_nodes(&self, _min_state_age: Duration) -> Result<HashSet<i64>> {
        Ok(self.held.lock().unwrap().clone())
    }

    async fn release(&self, node_id: i64) -> Result<()> {
        if node_id == 0 {
            return Ok(());
        }
        self.held.lock().unwrap().remove(&node_id);
        self.released.lock().unwrap().push(node_id);
        Ok(())
    }
}

/// Scripted remote side: every command is recorded, the liveness probe and
/// the result-file read return whatever the test staged.
pub struct ScriptedExecutor {
    pub commands: Mutex<Vec<String>>,
    /// Exit code of the `ps -p` liveness probe; `Err` when `probe_fails`.
    pub probe_code: AtomicI64,
    pub probe_fails: Mutex<bool>,
    /// (exit code, first line) of reading the result file.
    pub result_file: Mutex<(i32, String)>,
    /// Contents written into `run_tests.log` on fetch.
    pub runner_log: Mutex<String>,
    pub fetch_fails: Mutex<bool>,
    pub unreachable: Mutex<bool>,
}

impl Default for ScriptedExecutor {
    fn default() -> Self {
        Self {
            commands: Mutex::new(Vec::new()),
            probe_code: AtomicI64::new(0),
            probe_fails: Mutex::new(false),
            result_file: Mutex::new((0, "Passed".to_string())),
            runner_log: Mutex::new(String::new()),
            fetch_fails: Mutex::new(false),
            unreachable: Mutex::new(false),
        }
    }
}

impl ScriptedExecutor {
    pub fn set_result(&self, code: i32, line: &str) {
        *self.result_file.lock().unwrap() = (code, line.to_string());
    }

    pub fn finish_tests(&self) {
        self.probe_code.store(1, Ordering::SeqCst);
    }

    pub fn command_log(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteExecutor for ScriptedExecutor {
    async fn run(&self, host: &str, command: &[String]) -> Result<i32> {
        let line = command.join(" ");
        self.commands
            .lock()
            .unwrap()
            .push(format!("{}: {}", host, line));
        if *self.unreachable.lock().unwrap() {
            return Ok(255);
        }
        if line.starts_with("ps -p") {
            if *self.probe_fails.lock().unwrap() {
                return Err(AppError::Remote("connection reset".to_string()));
            }
            return Ok(self.probe_code.load(Ordering::SeqCst) as i32);
        }
        Ok(0)
    }

    async fn run_captured(&self, host: &str, command: &[String]) -> Result<CommandOutput> {
        self.commands
            .lock()
            .unwrap()
            .push(format!("{}: {}", host, command.join(" ")));
        let (code, line) = self.result_file.lock().unwrap().clone();
        Ok(CommandOutput {
            code,
            stdout: format!("{}\n", line),
            stderr: String::new(),
        })
    }

    async fn pipe(&self, host: &str, producer: &[String], _consumer: &[String]) -> Result<i32> {
        self.commands
            .lock()
            .unwrap()
            .push(format!("{}: {}", host, producer.join(" ")));
        Ok(0)
    }

    async fn fetch(&self, host: &str, source_masks: &[String], dest: &Path) -> Result<()> {
        self.commands
            .lock()
            .unwrap()
            .push(format!("{}: fetch {}", host, source_masks.join(" ")));
        if *self.fetch_fails.lock().unwrap() {
            return Err(AppError::Remote("scp failed".to_string()));
        }
        std::fs::write(dest.join("run_tests.log"), &*self.runner_log.lock().unwrap())?;
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeArtifactStore {
    pub uploads: Mutex<Vec<String>>,
    pub fails: Mutex<bool>,
}

#[async_trait]
impl ArtifactStore for FakeArtifactStore {
    async fn upload(&self, _local_dir: &Path, remote_prefix: &str) -> Result<String> {
        if *self.fails.lock().unwrap() {
            return Err(AppError::Upload("store unavailable".to_string()));
        }
        self.uploads.lock().unwrap().push(remote_prefix.to_string());
        Ok(format!("http://logs.test/{}/index.html", remote_prefix))
    }
}

#[derive(Default)]
pub struct FakeVoteTransport {
    pub votes: Mutex<Vec<(String, Vote, String)>>,
    pub fails: Mutex<bool>,
}

impl FakeVoteTransport {
    pub fn recorded(&self) -> Vec<(String, Vote, String)> {
        self.votes.lock().unwrap().clone()
    }
}

#[async_trait]
impl VoteTransport for FakeVoteTransport {
    async fn vote(&self, commit_id: &str, vote: Vote, message: &str) -> Result<()> {
        if *self.fails.lock().unwrap() {
            return Err(AppError::Vote("review host down".to_string()));
        }
        self.votes
            .lock()
            .unwrap()
            .push((commit_id.to_string(), vote, message.to_string()));
        Ok(())
    }
}

/// Everything wired together against an in-memory database.
pub struct Harness {
    pub repo: Arc<SqliteJobRepository>,
    pub pool: Arc<FakeNodePool>,
    pub executor: Arc<ScriptedExecutor>,
    pub artifacts: Arc<FakeArtifactStore>,
    pub votes: Arc<FakeVoteTransport>,
    pub time: Arc<MockTime>,
    pub config: Arc<Config>,
    pub runner: Arc<JobRunner>,
    pub queue: JobQueue,
    collect_rx: Option<mpsc::UnboundedReceiver<i64>>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: Config) -> Self {
        let db = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&db).await.unwrap();

        let repo = Arc::new(SqliteJobRepository::new(db));
        let pool = Arc::new(FakeNodePool::with_nodes(&[(7, "10.0.0.7"), (8, "10.0.0.8")]));
        let executor = Arc::new(ScriptedExecutor::default());
        let artifacts = Arc::new(FakeArtifactStore::default());
        let votes = Arc::new(FakeVoteTransport::default());
        let time = Arc::new(MockTime::new(1_000_000));
        let config = Arc::new(config);

        let runner = Arc::new(JobRunner::new(
            repo.clone(),
            pool.clone(),
            executor.clone(),
            artifacts.clone(),
            time.clone(),
            config.clone(),
        ));
        let (queue, collect_rx) = JobQueue::new(
            repo.clone(),
            runner.clone(),
            votes.clone(),
            time.clone(),
            config.clone(),
        );

        Self {
            repo,
            pool,
            executor,
            artifacts,
            votes,
            time,
            config,
            runner,
            queue,
            collect_rx: Some(collect_rx),
        }
    }

    /// Next collector wakeup hint, if any.
    pub fn collect_hint(&mut self) -> Option<i64> {
        self.collect_rx.as_mut().and_then(|rx| rx.try_recv().ok())
    }

    /// Build the collector, consuming the wakeup channel.
    pub fn collector(&mut self) -> ResultCollector {
        ResultCollector::new(
            self.repo.clone(),
            self.runner.clone(),
            self.collect_rx.take().expect("collector already built"),
            Duration::from_secs(30),
        )
    }

    pub fn reaper(&self) -> NodeReaper {
        NodeReaper::new(
            self.repo.clone(),
            self.pool.clone(),
            self.time.clone(),
            self.config.clone(),
        )
    }

    pub async fn job(&self, id: i64) -> gatewatch_core::domain::Job {
        self.repo.find_by_id(id).await.unwrap().unwrap()
    }

    pub async fn update(&self, job: &gatewatch_core::domain::Job) {
        self.repo.update(job).await.unwrap();
    }

    pub fn time_now(&self) -> i64 {
        self.time.now_millis()
    }
}

/// Defaults tuned so nothing sleeps and probes fire immediately.
pub fn test_config() -> Config {
    Config {
        dispatch_settle_secs: 0,
        probe_grace_secs: 0,
        keep_failed: 0,
        node_min_hold_age_secs: 0,
        ..Config::default()
    }
}
