// SQLite JobRepository Implementation

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, SqlitePool};
use std::str::FromStr;
use tracing::warn;

use gatewatch_core::domain::{Job, JobState};
use gatewatch_core::error::{AppError, Result};
use gatewatch_core::port::JobRepository;

// Helper to convert sqlx::Error to AppError with structured information
fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => {
            if let Some(code) = db_err.code() {
                let code_str = code.as_ref();
                // SQLite error codes: https://www.sqlite.org/rescode.html
                match code_str {
                    "5" => AppError::Database(format!(
                        "Database locked (SQLITE_BUSY): {}",
                        db_err.message()
                    )),
                    "13" => AppError::Database(format!("Database full: {}", db_err.message())),
                    _ => AppError::Database(format!(
                        "Database error [{}]: {}",
                        code_str,
                        db_err.message()
                    )),
                }
            } else {
                AppError::Database(format!("Database error: {}", db_err.message()))
            }
        }
        sqlx::Error::RowNotFound => AppError::Database("Row not found".to_string()),
        sqlx::Error::ColumnNotFound(col) => {
            AppError::Database(format!("Column not found: {}", col))
        }
        _ => AppError::Database(err.to_string()),
    }
}

fn is_busy(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err)
        if db_err.code().as_deref() == Some("5"))
}

/// Row mapping kept separate from the domain struct so that a bad `state`
/// string surfaces as a database error instead of a panic.
struct JobRow {
    id: i64,
    project_name: String,
    change_num: String,
    change_ref: String,
    commit_id: String,
    state: String,
    created: i64,
    updated: i64,
    test_started: Option<i64>,
    test_stopped: Option<i64>,
    node_id: i64,
    node_ip: Option<String>,
    result: Option<String>,
    logs_url: Option<String>,
    report_url: Option<String>,
    failed: Option<String>,
}

impl FromRow<'_, SqliteRow> for JobRow {
    fn from_row(row: &SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            project_name: row.try_get("project_name")?,
            change_num: row.try_get("change_num")?,
            change_ref: row.try_get("change_ref")?,
            commit_id: row.try_get("commit_id")?,
            state: row.try_get("state")?,
            created: row.try_get("created")?,
            updated: row.try_get("updated")?,
            test_started: row.try_get("test_started")?,
            test_stopped: row.try_get("test_stopped")?,
            node_id: row.try_get("node_id")?,
            node_ip: row.try_get("node_ip")?,
            result: row.try_get("result")?,
            logs_url: row.try_get("logs_url")?,
            report_url: row.try_get("report_url")?,
            failed: row.try_get("failed")?,
        })
    }
}

impl JobRow {
    fn into_job(self) -> Result<Job> {
        let state = JobState::from_str(&self.state)
            .map_err(|e| AppError::Database(format!("row {}: {}", self.id, e)))?;
        Ok(Job {
            id: self.id,
            project_name: self.project_name,
            change_num: self.change_num,
            change_ref: self.change_ref,
            commit_id: self.commit_id,
            state,
            created: self.created,
            updated: self.updated,
            test_started: self.test_started,
            test_stopped: self.test_stopped,
            node_id: self.node_id,
            node_ip: self.node_ip,
            result: self.result,
            logs_url: self.logs_url,
            report_url: self.report_url,
            failed: self.failed,
        })
    }
}

fn into_jobs(rows: Vec<JobRow>) -> Result<Vec<Job>> {
    rows.into_iter().map(JobRow::into_job).collect()
}

pub struct SqliteJobRepository {
    pool: SqlitePool,
}

impl SqliteJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    async fn insert(&self, job: &Job) -> Result<i64> {
        let do_insert = || {
            sqlx::query(
                r#"
                INSERT INTO jobs (
                    project_name, change_num, change_ref, commit_id,
                    state, created, updated, test_started, test_stopped,
                    node_id, node_ip, result, logs_url, report_url, failed
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&job.project_name)
            .bind(&job.change_num)
            .bind(&job.change_ref)
            .bind(&job.commit_id)
            .bind(job.state.to_string())
            .bind(job.created)
            .bind(job.updated)
            .bind(job.test_started)
            .bind(job.test_stopped)
            .bind(job.node_id)
            .bind(&job.node_ip)
            .bind(&job.result)
            .bind(&job.logs_url)
            .bind(&job.report_url)
            .bind(&job.failed)
        };

        let result = match do_insert().execute(&self.pool).await {
            Ok(r) => r,
            // One retry on a busy database; the busy timeout already
            // absorbed short contention, this covers a longer writer.
            Err(e) if is_busy(&e) => {
                warn!(job = %job, "insert hit SQLITE_BUSY, retrying once");
                do_insert().execute(&self.pool).await.map_err(map_sqlx_error)?
            }
            Err(e) => return Err(map_sqlx_error(e)),
        };

        Ok(result.last_insert_rowid())
    }

    async fn update(&self, job: &Job) -> Result<()> {
        let do_update = || {
            sqlx::query(
                r#"
                UPDATE jobs
                SET state = ?, updated = ?, test_started = ?, test_stopped = ?,
                    node_id = ?, node_ip = ?, result = ?, logs_url = ?,
                    report_url = ?, failed = ?
                WHERE id = ?
                "#,
            )
            .bind(job.state.to_string())
            .bind(job.updated)
            .bind(job.test_started)
            .bind(job.test_stopped)
            .bind(job.node_id)
            .bind(&job.node_ip)
            .bind(&job.result)
            .bind(&job.logs_url)
            .bind(&job.report_url)
            .bind(&job.failed)
            .bind(job.id)
        };

        let result = match do_update().execute(&self.pool).await {
            Ok(r) => r,
            Err(e) if is_busy(&e) => {
                warn!(job = %job, "update hit SQLITE_BUSY, retrying once");
                do_update().execute(&self.pool).await.map_err(map_sqlx_error)?
            }
            Err(e) => return Err(map_sqlx_error(e)),
        };

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("job {}", job.id)));
        }
        Ok(())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        row.map(JobRow::into_job).transpose()
    }

    async fn find_active(&self, project_name: &str, change_num: &str) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT * FROM jobs
            WHERE project_name = ? AND change_num = ? AND state != 'Obsolete'
            ORDER BY updated
            "#,
        )
        .bind(project_name)
        .bind(change_num)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        into_jobs(rows)
    }

    async fn find_by_state(&self, state: JobState) -> Result<Vec<Job>> {
        let rows =
            sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE state = ? ORDER BY updated")
                .bind(state.to_string())
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        into_jobs(rows)
    }

    async fn find_by_change_ref(&self, change_ref: &str) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(
            "SELECT * FROM jobs WHERE change_ref = ? ORDER BY created",
        )
        .bind(change_ref)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        into_jobs(rows)
    }

    async fn find_recent(&self, updated_after: Option<i64>) -> Result<Vec<Job>> {
        let rows = match updated_after {
            Some(cutoff) => {
                sqlx::query_as::<_, JobRow>(
                    "SELECT * FROM jobs WHERE updated >= ? ORDER BY updated",
                )
                .bind(cutoff)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, JobRow>("SELECT * FROM jobs ORDER BY updated")
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(map_sqlx_error)?;
        into_jobs(rows)
    }

    async fn find_with_nodes(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(
            "SELECT * FROM jobs WHERE node_id != 0 ORDER BY updated",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        into_jobs(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};
    use gatewatch_core::domain::JobPatch;

    async fn repo() -> SqliteJobRepository {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        SqliteJobRepository::new(pool)
    }

    fn job(change_ref: &str, now: i64) -> Job {
        Job::new(change_ref, "nova", "c0ff33", now).unwrap()
    }

    #[tokio::test]
    async fn insert_assigns_row_ids() {
        let repo = repo().await;
        let a = repo.insert(&job("refs/changes/61/65261/1", 100)).await.unwrap();
        let b = repo.insert(&job("refs/changes/61/65262/1", 200)).await.unwrap();
        assert!(b > a);

        let found = repo.find_by_id(a).await.unwrap().unwrap();
        assert_eq!(found.change_num, "65261");
        assert_eq!(found.state, JobState::Queued);
    }

    #[tokio::test]
    async fn update_round_trips_every_field() {
        let repo = repo().await;
        let mut j = job("refs/changes/61/65261/7", 100);
        j.id = repo.insert(&j).await.unwrap();

        j.apply(
            JobPatch {
                state: Some(JobState::Running),
                node_id: Some(42),
                node_ip: Some("10.0.0.9".to_string()),
                result: Some("".to_string()),
                ..Default::default()
            },
            5000,
        );
        repo.update(&j).await.unwrap();

        let found = repo.find_by_id(j.id).await.unwrap().unwrap();
        assert_eq!(found.state, JobState::Running);
        assert_eq!(found.node_id, 42);
        assert_eq!(found.node_ip.as_deref(), Some("10.0.0.9"));
        assert_eq!(found.test_started, Some(5000));
        assert_eq!(found.updated, 5000);
    }

    #[tokio::test]
    async fn update_of_missing_row_is_an_error() {
        let repo = repo().await;
        let mut j = job("refs/changes/61/65261/7", 100);
        j.id = 999;
        assert!(repo.update(&j).await.is_err());
    }

    #[tokio::test]
    async fn find_active_excludes_obsolete_rows() {
        let repo = repo().await;
        let mut old = job("refs/changes/61/65261/1", 100);
        old.id = repo.insert(&old).await.unwrap();
        old.apply(JobPatch::state(JobState::Obsolete), 200);
        repo.update(&old).await.unwrap();

        let mut new = job("refs/changes/61/65261/2", 300);
        new.id = repo.insert(&new).await.unwrap();

        let active = repo.find_active("nova", "65261").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, new.id);
    }

    #[tokio::test]
    async fn find_by_state_orders_by_updated() {
        let repo = repo().await;
        repo.insert(&job("refs/changes/61/65262/1", 200)).await.unwrap();
        repo.insert(&job("refs/changes/61/65261/1", 100)).await.unwrap();

        let queued = repo.find_by_state(JobState::Queued).await.unwrap();
        assert_eq!(queued.len(), 2);
        assert!(queued[0].updated <= queued[1].updated);
    }

    #[tokio::test]
    async fn find_recent_honors_the_cutoff() {
        let repo = repo().await;
        repo.insert(&job("refs/changes/61/65261/1", 100)).await.unwrap();
        repo.insert(&job("refs/changes/61/65262/1", 500)).await.unwrap();

        assert_eq!(repo.find_recent(None).await.unwrap().len(), 2);
        assert_eq!(repo.find_recent(Some(300)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn find_with_nodes_only_returns_owning_rows() {
        let repo = repo().await;
        let mut with_node = job("refs/changes/61/65261/1", 100);
        with_node.id = repo.insert(&with_node).await.unwrap();
        with_node.apply(
            JobPatch {
                node_id: Some(7),
                ..Default::default()
            },
            200,
        );
        repo.update(&with_node).await.unwrap();
        repo.insert(&job("refs/changes/61/65262/1", 100)).await.unwrap();

        let owning = repo.find_with_nodes().await.unwrap();
        assert_eq!(owning.len(), 1);
        assert_eq!(owning[0].node_id, 7);
    }
}
