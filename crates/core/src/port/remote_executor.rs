// Remote Execution Port (Interface)

use std::path::Path;

use crate::error::Result;
use async_trait::async_trait;

/// Exit status and captured streams of a remote command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Command execution and file copy on a test node.
///
/// `Err` means the transport itself failed (unreachable host, spawn
/// failure); a command that ran and exited non-zero is `Ok` with that code.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run a command on the host, returning its exit code.
    async fn run(&self, host: &str, command: &[String]) -> Result<i32>;

    /// Run a command and capture stdout/stderr.
    async fn run_captured(&self, host: &str, command: &[String]) -> Result<CommandOutput>;

    /// Stream the stdout of a remote producer into a local consumer
    /// (tar-archive style log collection). Returns the consumer exit code.
    async fn pipe(&self, host: &str, producer: &[String], consumer: &[String]) -> Result<i32>;

    /// Download remote files matching the masks into `dest`. Individual
    /// masks that match nothing are tolerated.
    async fn fetch(&self, host: &str, source_masks: &[String], dest: &Path) -> Result<()>;
}
