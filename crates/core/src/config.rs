// Orchestrator configuration
//
// One explicit struct enumerating every recognized option with its type and
// default, loaded once from `GATEWATCH_*` environment variables at process
// start and passed by Arc into components. No global state.

use std::env;

use crate::error::{AppError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database path/URL for the job ledger.
    pub database_url: String,

    // Poll loop
    pub poll_interval_secs: u64,
    /// Exit if the event stream is silent for this long (a supervisor
    /// restarts the process). 0 disables the watchdog.
    pub event_timeout_secs: i64,

    // Event filtering
    pub branch: String,
    pub projects: Vec<String>,
    pub recheck_pattern: String,
    /// Our own review account; its comments never trigger jobs.
    pub ci_account: String,

    // Dispatch
    /// Global enable flag: queueing always works, dispatch can be
    /// suppressed for maintenance.
    pub jobs_enabled: bool,
    pub node_label: String,
    pub node_username: String,
    pub node_key_path: String,
    /// Repository holding the test-runner checkout performed on the node.
    pub runner_repo_url: String,
    /// Pause between writing the instruction file and launching it; the
    /// file is not always visible to an immediate follow-up connection.
    pub dispatch_settle_secs: u64,

    // Liveness
    /// Grace period after dispatch during which the job is assumed alive
    /// without probing.
    pub probe_grace_secs: i64,
    /// Hard wall-clock cutoff; detection is lazy (next poll).
    pub max_running_time_secs: i64,

    // Harvest
    /// Remote file masks downloaded into the staging directory.
    pub log_masks: Vec<String>,
    /// Host-level log paths collected as a streamed tarball.
    pub host_log_paths: Vec<String>,
    pub upload_attempts: u32,
    /// Pattern extracting failing sub-test names from captured FAIL lines.
    pub failure_pattern: String,

    // Voting
    pub vote: bool,
    /// Silence negative votes network-wide without silencing positive ones.
    pub vote_passed_only: bool,
    /// Template with `{result}`, `{log}` and `{report}` placeholders.
    pub vote_message: String,

    // Node retention / reaper
    /// How many terminal "Failed" jobs keep their node for post-mortem.
    pub keep_failed: usize,
    /// Retention window for kept failed nodes.
    pub keep_failed_max_age_secs: i64,
    /// Never reclaim a node held for less than this (the owning job row
    /// may not be committed yet).
    pub node_min_hold_age_secs: i64,
    pub reaper_interval_secs: u64,
    pub collector_idle_secs: u64,

    // Review system transport
    pub review_host: String,
    pub review_port: u16,
    pub review_username: String,
    pub review_key_path: String,

    // External services
    pub artifact_base_url: String,
    pub artifact_public_url: String,
    pub inventory_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "~/.gatewatch/jobs.db".to_string(),
            poll_interval_secs: 30,
            event_timeout_secs: 3600,
            branch: "master".to_string(),
            projects: Vec::new(),
            recheck_pattern: "^(recheck|recheck bug|recheck nobug)".to_string(),
            ci_account: "gatewatch-ci".to_string(),
            jobs_enabled: true,
            node_label: "devstack".to_string(),
            node_username: "jenkins".to_string(),
            node_key_path: "/etc/gatewatch/node_key".to_string(),
            runner_repo_url: "https://git.example.org/ci/test-runner".to_string(),
            dispatch_settle_secs: 5,
            probe_grace_secs: 300,
            max_running_time_secs: 3 * 3600 + 15 * 60,
            log_masks: vec![
                "workspace/testing/logs/*".to_string(),
                "run_test*".to_string(),
            ],
            host_log_paths: vec!["/var/log/messages".to_string()],
            upload_attempts: 3,
            failure_pattern: r"tempest\.[^ ()]+".to_string(),
            vote: true,
            vote_passed_only: true,
            vote_message: "{result}: logs at {log}\n\nRecheck supported; \
                           comment \"recheck\" to trigger a re-run."
                .to_string(),
            keep_failed: 10,
            keep_failed_max_age_secs: 86_400,
            node_min_hold_age_secs: 300,
            reaper_interval_secs: 60,
            collector_idle_secs: 30,
            review_host: "review.example.org".to_string(),
            review_port: 29418,
            review_username: "gatewatch-ci".to_string(),
            review_key_path: "/etc/gatewatch/review_key".to_string(),
            artifact_base_url: "http://logs.example.org/store".to_string(),
            artifact_public_url: "http://logs.example.org".to_string(),
            inventory_url: "http://nodepool.example.org:8080".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from `GATEWATCH_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        read_string("GATEWATCH_DB_PATH", &mut config.database_url);
        read_parsed("GATEWATCH_POLL_INTERVAL", &mut config.poll_interval_secs)?;
        read_parsed("GATEWATCH_EVENT_TIMEOUT", &mut config.event_timeout_secs)?;
        read_string("GATEWATCH_BRANCH", &mut config.branch);
        read_list("GATEWATCH_PROJECTS", &mut config.projects);
        read_string("GATEWATCH_RECHECK_PATTERN", &mut config.recheck_pattern);
        read_string("GATEWATCH_CI_ACCOUNT", &mut config.ci_account);
        read_bool("GATEWATCH_RUN_TESTS", &mut config.jobs_enabled)?;
        read_string("GATEWATCH_NODE_LABEL", &mut config.node_label);
        read_string("GATEWATCH_NODE_USERNAME", &mut config.node_username);
        read_string("GATEWATCH_NODE_KEY", &mut config.node_key_path);
        read_string("GATEWATCH_RUNNER_REPO", &mut config.runner_repo_url);
        read_parsed("GATEWATCH_DISPATCH_SETTLE", &mut config.dispatch_settle_secs)?;
        read_parsed("GATEWATCH_PROBE_GRACE", &mut config.probe_grace_secs)?;
        read_parsed("GATEWATCH_MAX_RUNNING_TIME", &mut config.max_running_time_secs)?;
        read_list("GATEWATCH_LOG_MASKS", &mut config.log_masks);
        read_list("GATEWATCH_HOST_LOG_PATHS", &mut config.host_log_paths);
        read_parsed("GATEWATCH_UPLOAD_ATTEMPTS", &mut config.upload_attempts)?;
        read_string("GATEWATCH_FAILURE_PATTERN", &mut config.failure_pattern);
        read_bool("GATEWATCH_VOTE", &mut config.vote)?;
        read_bool("GATEWATCH_VOTE_PASSED_ONLY", &mut config.vote_passed_only)?;
        read_string("GATEWATCH_VOTE_MESSAGE", &mut config.vote_message);
        read_parsed("GATEWATCH_KEEP_FAILED", &mut config.keep_failed)?;
        read_parsed(
            "GATEWATCH_KEEP_FAILED_TIMEOUT",
            &mut config.keep_failed_max_age_secs,
        )?;
        read_parsed(
            "GATEWATCH_NODE_MIN_HOLD_AGE",
            &mut config.node_min_hold_age_secs,
        )?;
        read_parsed("GATEWATCH_REAPER_INTERVAL", &mut config.reaper_interval_secs)?;
        read_parsed("GATEWATCH_COLLECTOR_IDLE", &mut config.collector_idle_secs)?;
        read_string("GATEWATCH_REVIEW_HOST", &mut config.review_host);
        read_parsed("GATEWATCH_REVIEW_PORT", &mut config.review_port)?;
        read_string("GATEWATCH_REVIEW_USERNAME", &mut config.review_username);
        read_string("GATEWATCH_REVIEW_KEY", &mut config.review_key_path);
        read_string("GATEWATCH_ARTIFACT_URL", &mut config.artifact_base_url);
        read_string("GATEWATCH_ARTIFACT_PUBLIC_URL", &mut config.artifact_public_url);
        read_string("GATEWATCH_INVENTORY_URL", &mut config.inventory_url);

        Ok(config)
    }

    /// Render the vote message template for a finished job.
    pub fn render_vote_message(&self, result: &str, log: &str, report: &str) -> String {
        self.vote_message
            .replace("{result}", result)
            .replace("{log}", log)
            .replace("{report}", report)
    }
}

fn read_string(key: &str, target: &mut String) {
    if let Ok(value) = env::var(key) {
        *target = value;
    }
}

fn read_list(key: &str, target: &mut Vec<String>) {
    if let Ok(value) = env::var(key) {
        *target = value
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }
}

fn read_bool(key: &str, target: &mut bool) -> Result<()> {
    if let Ok(value) = env::var(key) {
        *target = match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            other => {
                return Err(AppError::Config(format!(
                    "{}: expected a boolean, got {:?}",
                    key, other
                )))
            }
        };
    }
    Ok(())
}

fn read_parsed<T: std::str::FromStr>(key: &str, target: &mut T) -> Result<()>
where
    T::Err: std::fmt::Display,
{
    if let Ok(value) = env::var(key) {
        *target = value
            .parse()
            .map_err(|e| AppError::Config(format!("{}: {}", key, e)))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.poll_interval_secs, 30);
        assert_eq!(config.probe_grace_secs, 300);
        assert!(config.jobs_enabled);
        assert!(config.vote_passed_only);
    }

    #[test]
    fn vote_message_placeholders_are_rendered() {
        let config = Config::default();
        let msg = config.render_vote_message("Passed", "http://l", "http://r");
        assert!(msg.starts_with("Passed: logs at http://l"));
        assert!(!msg.contains("{result}"));
        assert!(!msg.contains("{log}"));
    }
}
