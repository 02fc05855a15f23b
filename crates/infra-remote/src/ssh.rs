// SSH RemoteExecutor Implementation
//
// Shells out to the system ssh/scp binaries. Remote commands are passed as
// a single shell line, so redirections and `$(...)` in the command vector
// are interpreted on the remote side, matching what the runner scripts
// expect.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use gatewatch_core::error::{AppError, Result};
use gatewatch_core::port::{CommandOutput, RemoteExecutor};

const SSH_OPTS: [&str; 7] = [
    "-q",
    "-o",
    "BatchMode=yes",
    "-o",
    "UserKnownHostsFile=/dev/null",
    "-o",
    "StrictHostKeyChecking=no",
];

pub struct SshExecutor {
    username: String,
    key_path: String,
}

impl SshExecutor {
    pub fn new(username: impl Into<String>, key_path: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            key_path: key_path.into(),
        }
    }

    fn ssh_command(&self, host: &str, remote: &[String]) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.args(SSH_OPTS)
            .arg("-i")
            .arg(&self.key_path)
            .arg(format!("{}@{}", self.username, host))
            .arg(remote.join(" "));
        cmd
    }

    fn exit_code(status: std::process::ExitStatus) -> i32 {
        // Killed by signal maps to the shell convention.
        status.code().unwrap_or(-1)
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run(&self, host: &str, command: &[String]) -> Result<i32> {
        debug!(host, command = %command.join(" "), "ssh");
        let status = self
            .ssh_command(host, command)
            .stdin(Stdio::null())
            .status()
            .await
            .map_err(|e| AppError::Remote(format!("ssh to {}: {}", host, e)))?;
        Ok(Self::exit_code(status))
    }

    async fn run_captured(&self, host: &str, command: &[String]) -> Result<CommandOutput> {
        debug!(host, command = %command.join(" "), "ssh (captured)");
        let output = self
            .ssh_command(host, command)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| AppError::Remote(format!("ssh to {}: {}", host, e)))?;
        Ok(CommandOutput {
            code: Self::exit_code(output.status),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn pipe(&self, host: &str, producer: &[String], consumer: &[String]) -> Result<i32> {
        let Some((consumer_bin, consumer_args)) = consumer.split_first() else {
            return Err(AppError::Remote("empty consumer command".to_string()));
        };
        debug!(host, producer = %producer.join(" "), consumer = %consumer.join(" "), "ssh pipe");
        let mut remote = self
            .ssh_command(host, producer)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| AppError::Remote(format!("ssh to {}: {}", host, e)))?;

        let remote_stdout = remote
            .stdout
            .take()
            .ok_or_else(|| AppError::Remote("no stdout from remote producer".to_string()))?;
        let stdio: Stdio = remote_stdout
            .try_into()
            .map_err(|e| AppError::Remote(format!("pipe handoff: {}", e)))?;

        let local = Command::new(consumer_bin)
            .args(consumer_args)
            .stdin(stdio)
            .status()
            .await
            .map_err(|e| AppError::Remote(format!("local consumer: {}", e)))?;

        let remote_status = remote
            .wait()
            .await
            .map_err(|e| AppError::Remote(format!("ssh to {}: {}", host, e)))?;
        if !remote_status.success() {
            warn!(host, code = Self::exit_code(remote_status), "remote producer exited non-zero");
        }
        Ok(Self::exit_code(local))
    }

    async fn fetch(&self, host: &str, source_masks: &[String], dest: &Path) -> Result<()> {
        for mask in source_masks {
            debug!(host, mask = %mask, "scp");
            let status = Command::new("scp")
                .args(SSH_OPTS)
                .arg("-i")
                .arg(&self.key_path)
                .arg(format!("{}@{}:{}", self.username, host, mask))
                .arg(dest)
                .stdin(Stdio::null())
                .status()
                .await
                .map_err(|e| AppError::Remote(format!("scp from {}: {}", host, e)))?;
            // A mask that matches nothing exits non-zero; tolerate it.
            if !status.success() {
                warn!(host, mask = %mask, "scp matched nothing or failed");
            }
        }
        Ok(())
    }
}
