// Review Vote Transport
//
// Posts verdicts through the review host's ssh CLI. The message is
// single-quoted for the remote shell, with embedded quotes escaped.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

use gatewatch_core::error::{AppError, Result};
use gatewatch_core::port::{Vote, VoteTransport};

pub struct SshVoteTransport {
    host: String,
    port: u16,
    username: String,
    key_path: String,
}

impl SshVoteTransport {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        key_path: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            key_path: key_path.into(),
        }
    }
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[async_trait]
impl VoteTransport for SshVoteTransport {
    async fn vote(&self, commit_id: &str, vote: Vote, message: &str) -> Result<()> {
        let review = format!(
            "gerrit review -m {} --verified={} {}",
            shell_quote(message),
            vote,
            commit_id
        );
        info!(commit_id, vote = %vote, "posting review");

        let status = Command::new("ssh")
            .args(["-q", "-o", "BatchMode=yes"])
            .arg("-i")
            .arg(&self.key_path)
            .arg("-p")
            .arg(self.port.to_string())
            .arg(format!("{}@{}", self.username, self.host))
            .arg(&review)
            .stdin(Stdio::null())
            .status()
            .await
            .map_err(|e| AppError::Vote(format!("ssh to {}: {}", self.host, e)))?;

        if !status.success() {
            return Err(AppError::Vote(format!(
                "review command exited with {}",
                status.code().unwrap_or(-1)
            )));
        }
        Ok(())
    }
}
