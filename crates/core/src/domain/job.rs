// Job Domain Model
//
// One row per attempt to run the test suite against one patchset of one
// change. Rows are never deleted; a newer patchset supersedes the old row by
// marking it Obsolete.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::error::{DomainError, Result};

/// Result strings recorded on a job. An "Aborted: <reason>" result marks a
/// run that never produced a real verdict due to infrastructure failure.
pub mod result {
    pub const PASSED: &str = "Passed";
    pub const FAILED: &str = "Failed";
    pub const ABORTED_PREFIX: &str = "Aborted";
    pub const ABORTED_NO_IP: &str = "Aborted: No IP";
    pub const ABORTED_NO_RESULT: &str = "Aborted: No result found";
    pub const ABORTED_COPY_FAIL: &str = "Aborted: Failed to copy logs";
    pub const ABORTED_TIMED_OUT: &str = "Aborted: Timed out";
    pub const ABORTED_PROBE: &str = "Aborted: Exception checking for pid";
}

/// Job lifecycle state. Finished and Obsolete are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    Queued,
    Running,
    Collecting,
    Collected,
    Finished,
    Obsolete,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Finished | JobState::Obsolete)
    }

    /// All states, in lifecycle order.
    pub fn all() -> [JobState; 6] {
        [
            JobState::Queued,
            JobState::Running,
            JobState::Collecting,
            JobState::Collected,
            JobState::Finished,
            JobState::Obsolete,
        ]
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Queued => "Queued",
            JobState::Running => "Running",
            JobState::Collecting => "Collecting",
            JobState::Collected => "Collected",
            JobState::Finished => "Finished",
            JobState::Obsolete => "Obsolete",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for JobState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Queued" => Ok(JobState::Queued),
            "Running" => Ok(JobState::Running),
            "Collecting" => Ok(JobState::Collecting),
            "Collected" => Ok(JobState::Collected),
            "Finished" => Ok(JobState::Finished),
            "Obsolete" => Ok(JobState::Obsolete),
            other => Err(DomainError::UnknownState(other.to_string())),
        }
    }
}

/// Parse the change number out of a patchset ref.
///
/// `refs/changes/61/65261/7` -> `65261` (segment index 3).
pub fn change_num_from_ref(change_ref: &str) -> Result<&str> {
    change_ref
        .split('/')
        .nth(3)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| DomainError::InvalidChangeRef(change_ref.to_string()))
}

/// Durable job record.
///
/// All mutation goes through [`Job::apply`] so that `updated`,
/// `test_started` and `test_stopped` stay consistent. Timestamps are epoch
/// milliseconds injected by the caller, never read ambiently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Surrogate key; 0 until the row is inserted.
    pub id: i64,
    pub project_name: String,
    pub change_num: String,
    pub change_ref: String,
    pub commit_id: String,

    pub state: JobState,
    pub created: i64,
    pub updated: i64,
    pub test_started: Option<i64>,
    pub test_stopped: Option<i64>,

    /// Currently/previously assigned machine; 0 means "no machine".
    pub node_id: i64,
    pub node_ip: Option<String>,

    pub result: Option<String>,
    pub logs_url: Option<String>,
    pub report_url: Option<String>,
    /// Failing sub-test names captured at harvest, for later aggregation.
    pub failed: Option<String>,
}

/// Partial update applied through [`Job::apply`].
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub state: Option<JobState>,
    /// `Some(0)` drops machine ownership; `node_ip` is left intact so the
    /// last-known address stays visible in listings.
    pub node_id: Option<i64>,
    pub node_ip: Option<String>,
    pub result: Option<String>,
    pub logs_url: Option<String>,
    pub report_url: Option<String>,
    pub failed: Option<String>,
}

impl JobPatch {
    pub fn state(state: JobState) -> Self {
        Self {
            state: Some(state),
            ..Default::default()
        }
    }

    pub fn clear_node() -> Self {
        Self {
            node_id: Some(0),
            ..Default::default()
        }
    }

    pub fn result(result: impl Into<String>) -> Self {
        Self {
            result: Some(result.into()),
            ..Default::default()
        }
    }
}

impl Job {
    pub fn new(
        change_ref: impl Into<String>,
        project_name: impl Into<String>,
        commit_id: impl Into<String>,
        now_millis: i64,
    ) -> Result<Self> {
        let change_ref = change_ref.into();
        let change_num = change_num_from_ref(&change_ref)?.to_string();
        Ok(Self {
            id: 0,
            project_name: project_name.into(),
            change_num,
            change_ref,
            commit_id: commit_id.into(),
            state: JobState::Queued,
            created: now_millis,
            updated: now_millis,
            test_started: None,
            test_stopped: None,
            node_id: 0,
            node_ip: None,
            result: None,
            logs_url: None,
            report_url: None,
            failed: None,
        })
    }

    pub fn queued(&self) -> bool {
        self.state == JobState::Queued
    }

    /// True when the recorded result marks an infrastructure abort.
    pub fn is_aborted(&self) -> bool {
        self.result
            .as_deref()
            .is_some_and(|r| r.starts_with(result::ABORTED_PREFIX))
    }

    /// Apply a partial update.
    ///
    /// Leaving Running records `test_stopped`; entering Running records
    /// `test_started` and clears `test_stopped`. `updated` is refreshed on
    /// every call - it is the basis for staleness detection.
    pub fn apply(&mut self, patch: JobPatch, now_millis: i64) {
        let next_state = patch.state.unwrap_or(self.state);
        if self.state == JobState::Running && next_state != JobState::Running {
            self.test_stopped = Some(now_millis);
        }
        if patch.state == Some(JobState::Running) {
            self.test_started = Some(now_millis);
            self.test_stopped = None;
        }
        self.updated = now_millis;

        if let Some(state) = patch.state {
            self.state = state;
        }
        if let Some(node_id) = patch.node_id {
            self.node_id = node_id;
        }
        if let Some(node_ip) = patch.node_ip {
            self.node_ip = Some(node_ip);
        }
        if let Some(result) = patch.result {
            self.result = Some(result);
        }
        if let Some(logs_url) = patch.logs_url {
            self.logs_url = Some(logs_url);
        }
        if let Some(report_url) = patch.report_url {
            self.report_url = Some(report_url);
        }
        if let Some(failed) = patch.failed {
            self.failed = Some(failed);
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}/{}) {}",
            self.id, self.project_name, self.change_num, self.state
        )
    }
}
