// Job Repository Port (Interface)

use crate::domain::{Job, JobState};
use crate::error::Result;
use async_trait::async_trait;

/// Repository interface for the durable job ledger.
///
/// The job table is the single source of truth shared by the poll loop and
/// the background workers; the `state` column is their only coordination
/// signal.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a new job, returning the assigned row id.
    async fn insert(&self, job: &Job) -> Result<i64>;

    /// Persist the current field values of an existing row.
    async fn update(&self, job: &Job) -> Result<()>;

    async fn find_by_id(&self, id: i64) -> Result<Option<Job>>;

    /// All non-Obsolete rows for one (project, change) pair.
    async fn find_active(&self, project_name: &str, change_num: &str) -> Result<Vec<Job>>;

    /// All rows in one state, ordered by `updated`.
    async fn find_by_state(&self, state: JobState) -> Result<Vec<Job>>;

    /// All historical rows for one patchset ref.
    async fn find_by_change_ref(&self, change_ref: &str) -> Result<Vec<Job>>;

    /// All rows updated at or after the cutoff (all rows when `None`),
    /// ordered by `updated`.
    async fn find_recent(&self, updated_after: Option<i64>) -> Result<Vec<Job>>;

    /// All rows still referencing a machine (`node_id != 0`).
    async fn find_with_nodes(&self) -> Result<Vec<Job>>;
}
