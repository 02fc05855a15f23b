// Application Layer - orchestration services and background workers

pub mod collector;
pub mod queue;
pub mod reaper;
pub mod runner;
pub mod shutdown;

pub use collector::ResultCollector;
pub use queue::JobQueue;
pub use reaper::NodeReaper;
pub use runner::JobRunner;
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::domain::{Job, JobPatch};
use crate::error::Result;
use crate::port::JobRepository;

/// Apply a patch to a job and persist the row in one step. Keeps the
/// `updated`/`test_started`/`test_stopped` side effects of [`Job::apply`]
/// tied to every write.
pub(crate) async fn store(
    repo: &dyn JobRepository,
    job: &mut Job,
    patch: JobPatch,
    now_millis: i64,
) -> Result<()> {
    job.apply(patch, now_millis);
    repo.update(job).await
}
