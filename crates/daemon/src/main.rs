//! Gatewatch - CI orchestrator daemon
//!
//! Composition root: wires the SQLite ledger, the SSH/HTTP adapters and
//! the background workers together, then runs the poll loop until Ctrl-C
//! or a fatal event-stream failure.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use gatewatch_core::application::{
    shutdown_channel, JobQueue, JobRunner, NodeReaper, ResultCollector,
};
use gatewatch_core::domain::{EventFilter, ReviewEvent};
use gatewatch_core::port::{EventSource, SystemTimeProvider, TimeProvider};
use gatewatch_core::Config;
use gatewatch_infra_remote::{
    HttpArtifactStore, HttpNodePool, SshExecutor, SshVoteTransport, StreamEventSource,
};
use gatewatch_infra_sqlite::{create_pool, run_migrations, SqliteJobRepository};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Logging: pretty for development, JSON for production.
    let log_format = std::env::var("GATEWATCH_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("gatewatch=info"))
        .context("failed to create env filter")?;

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .init();
        }
    }

    info!("gatewatch v{} starting", VERSION);

    // 2. Configuration.
    let config = Arc::new(Config::from_env().context("loading configuration")?);
    let filter =
        EventFilter::production(&config).context("building the event trigger filter")?;

    // 3. Database.
    let db_path = shellexpand::tilde(&config.database_url).into_owned();
    info!(db_path = %db_path, "initializing database");
    let pool = create_pool(&db_path).await.context("creating DB pool")?;
    run_migrations(&pool).await.context("running migrations")?;

    // 4. Dependency wiring.
    let time: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let repo = Arc::new(SqliteJobRepository::new(pool.clone()));
    let executor = Arc::new(SshExecutor::new(
        &config.node_username,
        &config.node_key_path,
    ));
    let artifacts = Arc::new(HttpArtifactStore::new(
        &config.artifact_base_url,
        &config.artifact_public_url,
        config.upload_attempts,
    ));
    let nodes = Arc::new(HttpNodePool::new(&config.inventory_url));
    let votes = Arc::new(SshVoteTransport::new(
        &config.review_host,
        config.review_port,
        &config.review_username,
        &config.review_key_path,
    ));

    let runner = Arc::new(JobRunner::new(
        repo.clone(),
        nodes.clone(),
        executor,
        artifacts,
        time.clone(),
        config.clone(),
    ));
    let (queue, collect_rx) = JobQueue::new(
        repo.clone(),
        runner.clone(),
        votes,
        time.clone(),
        config.clone(),
    );

    // 5. Background workers.
    let (shutdown_tx, shutdown_rx) = shutdown_channel();

    let collector = ResultCollector::new(
        repo.clone(),
        runner,
        collect_rx,
        Duration::from_secs(config.collector_idle_secs),
    );
    let collector_handle = tokio::spawn(collector.run(shutdown_rx.clone()));

    let reaper = NodeReaper::new(repo.clone(), nodes, time.clone(), config.clone());
    let reaper_handle = tokio::spawn(reaper.run(shutdown_rx.clone()));

    // 6. Event stream.
    let events = StreamEventSource::connect(
        &config.review_host,
        config.review_port,
        &config.review_username,
        &config.review_key_path,
    )
    .await
    .context("connecting to the review event stream")?;

    // 7. Poll loop.
    let outcome = poll_loop(&queue, &events, &filter, &*time, &config).await;

    info!("shutting down workers");
    shutdown_tx.shutdown();
    let _ = collector_handle.await;
    let _ = reaper_handle.await;

    outcome
}

/// Drain events, advance every job one step, sleep, repeat.
///
/// Each phase failure is logged and the loop continues; only a dead event
/// stream or event-stream silence past the watchdog window is fatal, and
/// relies on a supervisor restarting the process.
async fn poll_loop(
    queue: &JobQueue,
    events: &dyn EventSource,
    filter: &EventFilter,
    time: &dyn TimeProvider,
    config: &Config,
) -> Result<()> {
    let mut last_event_at = time.now_millis();

    loop {
        loop {
            match events.get_event().await {
                Ok(Some(event)) => {
                    last_event_at = time.now_millis();
                    if filter.matches(Some(&event)) {
                        if let Err(e) = queue_event(queue, &event).await {
                            error!(error = %e, "failed to queue job for event");
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => return Err(anyhow::anyhow!(e)).context("event stream failed"),
            }
        }

        if config.event_timeout_secs > 0
            && time.now_millis() - last_event_at > config.event_timeout_secs * 1000
        {
            anyhow::bail!(
                "no events for {} seconds, exiting for a supervisor restart",
                config.event_timeout_secs
            );
        }

        if let Err(e) = queue.post_results().await {
            error!(error = %e, "posting results failed");
        }
        if let Err(e) = queue.process_results().await {
            error!(error = %e, "processing results failed");
        }
        if let Err(e) = queue.trigger_jobs().await {
            error!(error = %e, "triggering jobs failed");
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received");
                return Ok(());
            }
            _ = tokio::time::sleep(Duration::from_secs(config.poll_interval_secs)) => {}
        }
    }
}

async fn queue_event(queue: &JobQueue, event: &ReviewEvent) -> gatewatch_core::Result<()> {
    let (Some(change), Some(patchset)) = (&event.change, &event.patchset) else {
        warn!("matched event carries no change/patchset, skipping");
        return Ok(());
    };
    let id = queue
        .add_job(&patchset.ref_name, &change.project, &patchset.revision)
        .await?;
    info!(
        job_id = id,
        project = %change.project,
        change_ref = %patchset.ref_name,
        "queued job for review event"
    );
    Ok(())
}
