use crate::error::{AppError, AppResult};
use crate::models::job::{ExportJob, JobStatus, Requester, RetentionPolicy, SourceType};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteRow};
use sqlx::{query::Query, Row, SqlitePool};
use std::collections::HashMap;

/// Read-side filter for the job table. `None` means "all".
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub source_type: Option<SourceType>,
    pub requested_by: Option<String>,
    pub search: Option<String>,
    pub requested_from: Option<DateTime<Utc>>,
    pub requested_to: Option<DateTime<Utc>>,
}

const JOB_COLUMNS: &str = "id, title, source_type, requested_by_id, requested_by_name, status, \
     requested_at, completed_at, retention_policy, expires_at, download_count, artifact_ref, \
     error_message";

/// Canonical store for export jobs. Every lifecycle transition is a single
/// conditional UPDATE on `status`, so the database row is the serialization
/// point per job.
#[derive(Clone)]
pub struct JobRepository {
    pool: SqlitePool,
}

impl JobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Allocate the next monotone job id and insert the job in `Pending`.
    pub async fn create_job(
        &self,
        title: String,
        source_type: SourceType,
        retention_policy: RetentionPolicy,
        requested_by: Requester,
    ) -> AppResult<ExportJob> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to start transaction: {e}")))?;

        let seq: i64 = sqlx::query(
            "UPDATE export_job_seq SET next_value = next_value + 1 WHERE id = 1 RETURNING next_value",
        )
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to allocate job id: {e}")))?
        .get("next_value");

        let job = ExportJob::new(
            format!("EXP_{seq:03}"),
            title,
            source_type,
            retention_policy,
            requested_by,
        );

        sqlx::query(
            r#"
            INSERT INTO export_jobs (id, title, title_search, source_type, requested_by_id,
                                     requested_by_name, status, requested_at, completed_at,
                                     retention_policy, expires_at, download_count, artifact_ref,
                                     error_message)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL, ?, NULL, 0, NULL, NULL)
            "#,
        )
        .bind(&job.id)
        .bind(&job.title)
        .bind(job.title.to_lowercase())
        .bind(job.source_type.to_string())
        .bind(&job.requested_by.id)
        .bind(&job.requested_by.display_name)
        .bind(job.status.to_string())
        .bind(job.requested_at)
        .bind(job.retention_policy.to_string())
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to create job: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to commit transaction: {e}")))?;

        Ok(job)
    }

    pub async fn get_job(&self, job_id: &str) -> AppResult<Option<ExportJob>> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM export_jobs WHERE id = ?"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to get job: {e}")))?;

        row.map(row_to_job).transpose()
    }

    /// Atomically claim a pending job for execution. At most one caller wins.
    pub async fn try_claim(&self, job_id: &str) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE export_jobs SET status = 'Processing' WHERE id = ? AND status = 'Pending'",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to claim job: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    /// Resolve a processing job to Completed. Fails the swap (returns false)
    /// if the job left Processing in the meantime, e.g. an accepted cancel.
    pub async fn try_complete(
        &self,
        job_id: &str,
        completed_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        artifact_ref: &str,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE export_jobs
            SET status = 'Completed', completed_at = ?, expires_at = ?, artifact_ref = ?
            WHERE id = ? AND status = 'Processing'
            "#,
        )
        .bind(completed_at)
        .bind(expires_at)
        .bind(artifact_ref)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to complete job: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn try_fail(
        &self,
        job_id: &str,
        completed_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        error: &str,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE export_jobs
            SET status = 'Failed', completed_at = ?, expires_at = ?, error_message = ?
            WHERE id = ? AND status = 'Processing'
            "#,
        )
        .bind(completed_at)
        .bind(expires_at)
        .bind(error)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to mark job failed: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    /// Cancel from a specific non-terminal state (Pending or Processing).
    pub async fn try_cancel(
        &self,
        job_id: &str,
        from: JobStatus,
        completed_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        reason: &str,
    ) -> AppResult<bool> {
        if from.is_terminal() {
            return Ok(false);
        }

        let result = sqlx::query(
            r#"
            UPDATE export_jobs
            SET status = 'Cancelled', completed_at = ?, expires_at = ?, error_message = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(completed_at)
        .bind(expires_at)
        .bind(reason)
        .bind(job_id)
        .bind(from.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to cancel job: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    /// Expire a job whose retention window has elapsed, clearing the
    /// artifact reference. Idempotent: an already-Expired job is untouched.
    pub async fn try_expire(&self, job_id: &str) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE export_jobs
            SET status = 'Expired', artifact_ref = NULL
            WHERE id = ? AND status IN ('Completed', 'Failed', 'Cancelled')
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to expire job: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    /// Linearizable per-job download counter bump, valid only while the
    /// artifact exists. Returns the new count, or None if the job is not in
    /// `Completed`.
    pub async fn increment_download_count(&self, job_id: &str) -> AppResult<Option<i64>> {
        let row = sqlx::query(
            r#"
            UPDATE export_jobs
            SET download_count = download_count + 1
            WHERE id = ? AND status = 'Completed'
            RETURNING download_count
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to record download: {e}")))?;

        Ok(row.map(|r| r.get("download_count")))
    }

    /// Pending job ids in submission order, for queue restoration and the
    /// periodic backpressure-recovery scan.
    pub async fn list_pending_ids(&self, limit: i64) -> AppResult<Vec<String>> {
        let rows = sqlx::query(
            "SELECT id FROM export_jobs WHERE status = 'Pending' ORDER BY requested_at ASC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to list pending jobs: {e}")))?;

        Ok(rows.iter().map(|r| r.get("id")).collect())
    }

    /// Jobs whose retention window elapsed before `now`.
    pub async fn list_expirable(&self, now: DateTime<Utc>) -> AppResult<Vec<ExportJob>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM export_jobs \
             WHERE status IN ('Completed', 'Failed', 'Cancelled') AND expires_at <= ?"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to list expirable jobs: {e}")))?;

        rows.into_iter().map(row_to_job).collect()
    }

    /// Hard-delete horizon: remove Expired rows long past their expiry.
    pub async fn delete_expired_before(&self, cutoff: DateTime<Utc>) -> AppResult<u64> {
        let result =
            sqlx::query("DELETE FROM export_jobs WHERE status = 'Expired' AND expires_at <= ?")
                .bind(cutoff)
                .execute(&self.pool)
                .await
                .map_err(|e| AppError::Internal(format!("Failed to delete expired jobs: {e}")))?;

        Ok(result.rows_affected())
    }

    /// Filtered page of the job table plus the total filtered count before
    /// pagination. `page` is 1-indexed; a page past the end yields an empty
    /// slice with the correct count.
    pub async fn query_jobs(
        &self,
        filter: &JobFilter,
        page: u32,
        page_size: u32,
    ) -> AppResult<(Vec<ExportJob>, i64)> {
        let where_clause = build_where_clause(filter);

        let count_sql = format!("SELECT COUNT(*) AS total FROM export_jobs {where_clause}");
        let total: i64 = bind_filter(sqlx::query(&count_sql), filter)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to count jobs: {e}")))?
            .get("total");

        let page = page.max(1);
        let offset = (page as i64 - 1) * page_size as i64;

        let select_sql = format!(
            "SELECT {JOB_COLUMNS} FROM export_jobs {where_clause} \
             ORDER BY requested_at DESC, id DESC LIMIT ? OFFSET ?"
        );
        let rows = bind_filter(sqlx::query(&select_sql), filter)
            .bind(page_size as i64)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to list jobs: {e}")))?;

        let jobs = rows.into_iter().map(row_to_job).collect::<AppResult<_>>()?;
        Ok((jobs, total))
    }

    pub async fn get_job_stats(&self) -> AppResult<HashMap<String, i64>> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM export_jobs GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to get job stats: {e}")))?;

        let mut stats = HashMap::new();
        for row in rows {
            let status: String = row.get("status");
            let count: i64 = row.get("count");
            stats.insert(status, count);
        }

        Ok(stats)
    }
}

fn build_where_clause(filter: &JobFilter) -> String {
    let mut conditions: Vec<&str> = Vec::new();
    if filter.status.is_some() {
        conditions.push("status = ?");
    }
    if filter.source_type.is_some() {
        conditions.push("source_type = ?");
    }
    if filter.requested_by.is_some() {
        conditions.push("requested_by_id = ?");
    }
    if filter.search.is_some() {
        // Ids are ASCII so LOWER() suffices; titles match against the
        // Rust-folded title_search column.
        conditions.push("(LOWER(id) LIKE ? OR title_search LIKE ?)");
    }
    if filter.requested_from.is_some() {
        conditions.push("requested_at >= ?");
    }
    if filter.requested_to.is_some() {
        conditions.push("requested_at <= ?");
    }

    if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    }
}

fn bind_filter<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    filter: &'q JobFilter,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    if let Some(status) = filter.status {
        query = query.bind(status.to_string());
    }
    if let Some(source_type) = filter.source_type {
        query = query.bind(source_type.to_string());
    }
    if let Some(requested_by) = &filter.requested_by {
        query = query.bind(requested_by.as_str());
    }
    if let Some(search) = &filter.search {
        let pattern = format!("%{}%", search.to_lowercase());
        query = query.bind(pattern.clone()).bind(pattern);
    }
    if let Some(from) = filter.requested_from {
        query = query.bind(from);
    }
    if let Some(to) = filter.requested_to {
        query = query.bind(to);
    }
    query
}

fn row_to_job(row: SqliteRow) -> AppResult<ExportJob> {
    let status_str: String = row.get("status");
    let status = JobStatus::parse(&status_str)
        .ok_or_else(|| AppError::Internal(format!("Unknown job status: {status_str}")))?;

    let source_str: String = row.get("source_type");
    let source_type = SourceType::parse(&source_str)
        .ok_or_else(|| AppError::Internal(format!("Unknown source type: {source_str}")))?;

    let policy_str: String = row.get("retention_policy");
    let retention_policy = RetentionPolicy::parse(&policy_str)
        .ok_or_else(|| AppError::Internal(format!("Unknown retention policy: {policy_str}")))?;

    Ok(ExportJob {
        id: row.get("id"),
        title: row.get("title"),
        source_type,
        requested_by: Requester {
            id: row.get("requested_by_id"),
            display_name: row.get("requested_by_name"),
        },
        status,
        requested_at: row.get("requested_at"),
        completed_at: row.get("completed_at"),
        retention_policy,
        expires_at: row.get("expires_at"),
        download_count: row.get("download_count"),
        artifact_ref: row.get("artifact_ref"),
        error_message: row.get("error_message"),
    })
}
