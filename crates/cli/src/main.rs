//! Gatewatch reporting CLI
//!
//! Read-only queries against the job ledger: job listings, the history of
//! one change, and an aggregated histogram of failing test names.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use regex::Regex;
use std::collections::HashMap;
use tabled::{Table, Tabled};

use gatewatch_core::domain::job::result;
use gatewatch_core::domain::{Job, JobState};
use gatewatch_core::port::{JobRepository, SystemTimeProvider, TimeProvider};
use gatewatch_core::Config;
use gatewatch_infra_sqlite::{create_pool, run_migrations, SqliteJobRepository};

#[derive(Parser)]
#[command(name = "gatewatch-report")]
#[command(about = "Gatewatch job ledger reports", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Job ledger database path
    #[arg(long, env = "GATEWATCH_DB_PATH")]
    db: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List jobs
    List {
        /// Comma-separated states to include (default: all but Obsolete)
        #[arg(long)]
        states: Option<String>,

        /// Only jobs updated within this window, e.g. 90m, 24h, 7d
        #[arg(long)]
        recent: Option<String>,
    },

    /// Show the full history of one patchset ref
    Show {
        /// Patchset ref, e.g. refs/changes/61/65261/7
        change_ref: String,
    },

    /// Aggregate failing test names across finished jobs
    Failures {
        /// Only jobs updated within this window, e.g. 24h, 7d
        #[arg(long)]
        recent: Option<String>,

        /// List the jobs whose failures contain this substring
        #[arg(long)]
        with_fail: Option<String>,

        /// Skip jobs with more failures than this (environment blowups)
        #[arg(long, default_value = "50")]
        max_fails: usize,

        /// Only report names seen at least this many times
        #[arg(long, default_value = "2")]
        min_dup: usize,
    },
}

#[derive(Tabled)]
struct JobLine {
    #[tabled(rename = "ID")]
    id: i64,
    #[tabled(rename = "Project")]
    project: String,
    #[tabled(rename = "Change")]
    change: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Result")]
    result: String,
    #[tabled(rename = "Updated")]
    updated: String,
    #[tabled(rename = "Node IP")]
    node_ip: String,
}

impl JobLine {
    fn from_job(job: &Job, now: i64) -> Self {
        // A parenthesised IP marks a machine already handed back.
        let node_ip = match (&job.node_ip, job.node_id) {
            (Some(ip), 0) => format!("({})", ip),
            (Some(ip), _) => ip.clone(),
            (None, _) => String::new(),
        };
        Self {
            id: job.id,
            project: job.project_name.clone(),
            change: job.change_ref.trim_start_matches("refs/changes/").to_string(),
            state: job.state.to_string(),
            result: job.result.clone().unwrap_or_default(),
            updated: format!("{} ago", humanize_millis(now - job.updated)),
            node_ip,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env().context("loading configuration")?;

    let db_path = cli.db.clone().unwrap_or_else(|| config.database_url.clone());
    let db_path = shellexpand::tilde(&db_path).into_owned();
    let pool = create_pool(&db_path)
        .await
        .with_context(|| format!("opening {}", db_path))?;
    run_migrations(&pool).await.context("running migrations")?;
    let repo = SqliteJobRepository::new(pool);

    let now = SystemTimeProvider.now_millis();

    match cli.command {
        Commands::List { states, recent } => list(&repo, states, recent, now).await,
        Commands::Show { change_ref } => show(&repo, &change_ref, now).await,
        Commands::Failures {
            recent,
            with_fail,
            max_fails,
            min_dup,
        } => failures(&repo, &config, recent, with_fail, max_fails, min_dup, now).await,
    }
}

async fn list(
    repo: &dyn JobRepository,
    states: Option<String>,
    recent: Option<String>,
    now: i64,
) -> Result<()> {
    let wanted = parse_states(states.as_deref())?;
    let cutoff = recent_cutoff(recent.as_deref(), now)?;

    let jobs: Vec<Job> = repo
        .find_recent(cutoff)
        .await?
        .into_iter()
        .filter(|j| wanted.contains(&j.state))
        .collect();

    if jobs.is_empty() {
        println!("{}", "no matching jobs".yellow());
        return Ok(());
    }

    let lines: Vec<JobLine> = jobs.iter().map(|j| JobLine::from_job(j, now)).collect();
    println!("{}", Table::new(lines));

    let mut tally: HashMap<JobState, usize> = HashMap::new();
    for job in &jobs {
        *tally.entry(job.state).or_insert(0) += 1;
    }
    let summary: Vec<String> = JobState::all()
        .into_iter()
        .filter_map(|s| tally.get(&s).map(|n| format!("{} {}", n, s)))
        .collect();
    println!("{} job(s): {}", jobs.len(), summary.join(", "));
    Ok(())
}

async fn show(repo: &dyn JobRepository, change_ref: &str, now: i64) -> Result<()> {
    let jobs = repo.find_by_change_ref(change_ref).await?;
    if jobs.is_empty() {
        println!("{}", format!("no jobs for {}", change_ref).yellow());
        return Ok(());
    }

    for job in &jobs {
        let header = format!("job {} [{}]", job.id, job.state);
        match job.result.as_deref() {
            Some(result::PASSED) => println!("{}", header.green().bold()),
            Some(result::FAILED) => println!("{}", header.red().bold()),
            _ => println!("{}", header.bold()),
        }
        println!("  project:  {}", job.project_name);
        println!("  commit:   {}", job.commit_id);
        println!("  created:  {} ago", humanize_millis(now - job.created));
        println!("  updated:  {} ago", humanize_millis(now - job.updated));
        if let (Some(started), Some(stopped)) = (job.test_started, job.test_stopped) {
            println!("  test ran: {}", humanize_millis(stopped - started));
        }
        if job.node_id != 0 || job.node_ip.is_some() {
            println!(
                "  node:     {} ({})",
                job.node_id,
                job.node_ip.as_deref().unwrap_or("-")
            );
        }
        if let Some(result) = &job.result {
            println!("  result:   {}", result);
        }
        if let Some(url) = &job.logs_url {
            println!("  logs:     {}", url);
        }
        if let Some(url) = &job.report_url {
            if job.logs_url.as_deref() != Some(url.as_str()) {
                println!("  report:   {}", url);
            }
        }
        if let Some(failed) = &job.failed {
            if !failed.is_empty() {
                println!("  failures:");
                for line in failed.lines() {
                    println!("    {}", line);
                }
            }
        }
        println!();
    }
    Ok(())
}

async fn failures(
    repo: &dyn JobRepository,
    config: &Config,
    recent: Option<String>,
    with_fail: Option<String>,
    max_fails: usize,
    min_dup: usize,
    now: i64,
) -> Result<()> {
    let pattern = Regex::new(&config.failure_pattern)
        .with_context(|| format!("bad failure pattern {:?}", config.failure_pattern))?;
    let cutoff = recent_cutoff(recent.as_deref(), now)?;

    let jobs: Vec<Job> = repo
        .find_recent(cutoff)
        .await?
        .into_iter()
        .filter(|j| j.result.as_deref() == Some(result::FAILED) || j.is_aborted())
        .collect();

    let summary = summarize_failures(&jobs, &pattern, with_fail.as_deref(), max_fails, min_dup);

    if summary.counts.is_empty() {
        println!("{}", "no repeated failures".yellow());
    } else {
        for (name, count) in &summary.counts {
            println!("{:>5}  {}", count.to_string().red(), name);
        }
    }

    if with_fail.is_some() && !summary.listed.is_empty() {
        println!();
        let lines: Vec<JobLine> = summary
            .listed
            .iter()
            .map(|j| JobLine::from_job(j, now))
            .collect();
        println!("{}", Table::new(lines));
    }
    Ok(())
}

struct FailureSummary<'a> {
    /// Jobs for the listing table: failures matching the substring plus
    /// every aborted run, which never produced verdicts to match against.
    listed: Vec<&'a Job>,
    /// Failing test names seen at least `min_dup` times, most frequent first.
    counts: Vec<(String, usize)>,
}

fn summarize_failures<'a>(
    jobs: &'a [Job],
    pattern: &Regex,
    with_fail: Option<&str>,
    max_fails: usize,
    min_dup: usize,
) -> FailureSummary<'a> {
    let mut histogram: HashMap<String, usize> = HashMap::new();
    let mut listed: Vec<&Job> = Vec::new();

    for job in jobs {
        if job.is_aborted() {
            listed.push(job);
            continue;
        }
        let names = failure_names(pattern, job.failed.as_deref().unwrap_or(""));
        if names.is_empty() || names.len() > max_fails {
            continue;
        }
        if let Some(needle) = with_fail {
            if names.iter().any(|n| n.contains(needle)) {
                listed.push(job);
            }
        }
        for name in names {
            *histogram.entry(name).or_insert(0) += 1;
        }
    }

    let mut counts: Vec<(String, usize)> = histogram
        .into_iter()
        .filter(|(_, count)| *count >= min_dup)
        .collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    FailureSummary { listed, counts }
}

/// Extract unique failing test names, folding attribute variants
/// (`name[gate,smoke]` and `name` count as the same test).
fn failure_names(pattern: &Regex, failed: &str) -> Vec<String> {
    let mut names: Vec<String> = pattern
        .find_iter(failed)
        .map(|m| {
            let name = m.as_str();
            name.split('[').next().unwrap_or(name).to_string()
        })
        .collect();
    names.sort();
    names.dedup();
    names
}

fn parse_states(states: Option<&str>) -> Result<Vec<JobState>> {
    match states {
        // Obsolete rows are history, not work; show them only on request.
        None => Ok(JobState::all()
            .into_iter()
            .filter(|s| *s != JobState::Obsolete)
            .collect()),
        Some(list) => list
            .split(',')
            .map(|s| {
                s.trim()
                    .parse::<JobState>()
                    .map_err(|e| anyhow::anyhow!("{}", e))
            })
            .collect(),
    }
}

fn recent_cutoff(recent: Option<&str>, now: i64) -> Result<Option<i64>> {
    match recent {
        None => Ok(None),
        Some(window) => {
            let millis = parse_window_millis(window)
                .with_context(|| format!("bad time window {:?}", window))?;
            Ok(Some(now - millis))
        }
    }
}

/// `90m`, `24h`, `7d`, or plain seconds.
fn parse_window_millis(window: &str) -> Result<i64> {
    let window = window.trim();
    let (digits, unit_ms) = match window.chars().last() {
        Some('m') => (&window[..window.len() - 1], 60_000),
        Some('h') => (&window[..window.len() - 1], 3_600_000),
        Some('d') => (&window[..window.len() - 1], 86_400_000),
        _ => (window, 1_000),
    };
    let value: i64 = digits.parse()?;
    Ok(value * unit_ms)
}

fn humanize_millis(millis: i64) -> String {
    let secs = millis.max(0) / 1000;
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86_400 {
        format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d{}h", secs / 86_400, (secs % 86_400) / 3600)
    }
}
