use async_trait::async_trait;
use chrono::{DateTime, Utc};
use story_fanout_shared::{FanoutJob, FollowerCursor, JobId, JobStatus};
use uuid::Uuid;

use super::PostgresStore;
use crate::errors::StoreError;
use crate::interfaces::FanoutJobStore;

const JOB_COLUMNS: &str = "id, story_id, author_id, story_sequence, cursor, status, delivered, \
                           attempts, last_error, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    story_id: Uuid,
    author_id: String,
    story_sequence: i64,
    cursor: Option<String>,
    status: String,
    delivered: i64,
    attempts: i32,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for FanoutJob {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            story_id: row.story_id,
            author_id: row.author_id,
            story_sequence: row.story_sequence,
            cursor: row.cursor.map(FollowerCursor::new),
            status: row.status.parse()?,
            delivered: u64::try_from(row.delivered)
                .map_err(|_| StoreError::serialization("Negative delivered count"))?,
            attempts: u32::try_from(row.attempts)
                .map_err(|_| StoreError::serialization("Negative attempt count"))?,
            last_error: row.last_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Status strings a job may leave to reach `next`.
fn sources_of(next: JobStatus) -> Vec<String> {
    JobStatus::sources_of(next)
        .map(|status| status.as_str().to_string())
        .collect()
}

/// Insert a new job row through `executor`, a pool or an open transaction.
pub(super) async fn insert_job<'e, E>(job: &FanoutJob, executor: E) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO fanout_jobs
            (id, story_id, author_id, story_sequence, cursor, status, delivered,
             attempts, last_error, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(job.id)
    .bind(job.story_id)
    .bind(&job.author_id)
    .bind(job.story_sequence)
    .bind(job.cursor.as_ref().map(FollowerCursor::as_str))
    .bind(job.status.as_str())
    .bind(job.delivered as i64)
    .bind(job.attempts as i32)
    .bind(job.last_error.as_deref())
    .bind(job.created_at)
    .bind(job.updated_at)
    .execute(executor)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::conflict(format!("Job {} already exists", job.id))
        }
        other => other.into(),
    })?;

    Ok(())
}

impl PostgresStore {
    /// Explain why a guarded update touched no row.
    async fn rejected_update(&self, job_id: &JobId, next: JobStatus) -> StoreError {
        match self.get_job(job_id).await {
            Ok(Some(job)) => StoreError::conflict(format!(
                "Job {} cannot move from {} to {}",
                job_id, job.status, next
            )),
            Ok(None) => StoreError::not_found(format!("Job {job_id}")),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl FanoutJobStore for PostgresStore {
    async fn create_job(&self, job: &FanoutJob) -> Result<(), StoreError> {
        insert_job(job, &self.pool).await
    }

    async fn get_job(&self, job_id: &JobId) -> Result<Option<FanoutJob>, StoreError> {
        let row: Option<JobRow> =
            sqlx::query_as(&format!("SELECT {JOB_COLUMNS} FROM fanout_jobs WHERE id = $1"))
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(FanoutJob::try_from).transpose()
    }

    async fn begin_run(&self, job_id: &JobId) -> Result<FanoutJob, StoreError> {
        let row: Option<JobRow> = sqlx::query_as(&format!(
            "UPDATE fanout_jobs \
             SET status = $2, attempts = attempts + 1, last_error = NULL, updated_at = now() \
             WHERE id = $1 AND status = ANY($3) \
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(job_id)
        .bind(JobStatus::InProgress.as_str())
        .bind(sources_of(JobStatus::InProgress))
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => FanoutJob::try_from(row),
            None => Err(self.rejected_update(job_id, JobStatus::InProgress).await),
        }
    }

    async fn save_progress(
        &self,
        job_id: &JobId,
        cursor: Option<&FollowerCursor>,
        delivered: u64,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE fanout_jobs
            SET cursor = $2, delivered = $3, updated_at = now()
            WHERE id = $1 AND status = $4
            "#,
        )
        .bind(job_id)
        .bind(cursor.map(FollowerCursor::as_str))
        .bind(delivered as i64)
        .bind(JobStatus::InProgress.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.rejected_update(job_id, JobStatus::InProgress).await);
        }
        Ok(())
    }

    async fn mark_completed(&self, job_id: &JobId, delivered: u64) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE fanout_jobs
            SET status = $2, delivered = $3, updated_at = now()
            WHERE id = $1 AND status = ANY($4)
            "#,
        )
        .bind(job_id)
        .bind(JobStatus::Completed.as_str())
        .bind(delivered as i64)
        .bind(sources_of(JobStatus::Completed))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.rejected_update(job_id, JobStatus::Completed).await);
        }
        Ok(())
    }

    async fn mark_failed(&self, job_id: &JobId, error: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE fanout_jobs
            SET status = $2, last_error = $3, updated_at = now()
            WHERE id = $1 AND status = ANY($4)
            "#,
        )
        .bind(job_id)
        .bind(JobStatus::Failed.as_str())
        .bind(error)
        .bind(sources_of(JobStatus::Failed))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.rejected_update(job_id, JobStatus::Failed).await);
        }
        Ok(())
    }

    async fn list_jobs(
        &self,
        status: JobStatus,
        limit: usize,
    ) -> Result<Vec<FanoutJob>, StoreError> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM fanout_jobs \
             WHERE status = $1 ORDER BY created_at LIMIT $2"
        ))
        .bind(status.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(FanoutJob::try_from).collect()
    }

    async fn purge_completed(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM fanout_jobs WHERE status = $1 AND updated_at < $2")
            .bind(JobStatus::Completed.as_str())
            .bind(older_than)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
