use crate::error::{AppError, AppResult};
use crate::services::job_repository::JobRepository;
use crate::services::metrics::{self, names};
use std::sync::Arc;
use tracing::debug;

/// Download accounting. Owns exactly one mutation: the per-job counter
/// bump, which the store applies as a single conditional update so
/// concurrent downloads never lose an increment.
#[derive(Clone)]
pub struct DownloadTracker {
    repository: Arc<JobRepository>,
}

impl DownloadTracker {
    pub fn new(repository: Arc<JobRepository>) -> Self {
        Self { repository }
    }

    /// Record one successful download, returning the new count. Rejected
    /// unless the job is Completed: an Expired job's artifact is gone even
    /// though its historical counter remains visible.
    pub async fn record_download(&self, job_id: &str) -> AppResult<i64> {
        if let Some(count) = self.repository.increment_download_count(job_id).await? {
            debug!("Recorded download {} for job {}", count, job_id);
            metrics::get_metrics()
                .increment_counter(names::DOWNLOADS_RECORDED)
                .await;
            return Ok(count);
        }

        match self.repository.get_job(job_id).await? {
            None => Err(AppError::NotFound(format!("Job not found: {job_id}"))),
            Some(job) => Err(AppError::NotDownloadable(format!(
                "Job {} is {}, artifact unavailable",
                job_id, job.status
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::{JobStatus, Requester, RetentionPolicy, SourceType};
    use chrono::Utc;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn harness() -> (DownloadTracker, Arc<JobRepository>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("jobs.db").display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        let repository = Arc::new(JobRepository::new(pool));
        (DownloadTracker::new(repository.clone()), repository, dir)
    }

    async fn job_in_status(repo: &JobRepository, status: JobStatus) -> String {
        let job = repo
            .create_job(
                "download test".to_string(),
                SourceType::ReportRun,
                RetentionPolicy::SevenDays,
                Requester {
                    id: "u-1".to_string(),
                    display_name: "User".to_string(),
                },
            )
            .await
            .unwrap();
        let now = Utc::now();
        let expires = job.expiry_for(now);
        match status {
            JobStatus::Pending => {}
            JobStatus::Processing => {
                repo.try_claim(&job.id).await.unwrap();
            }
            JobStatus::Completed => {
                repo.try_claim(&job.id).await.unwrap();
                repo.try_complete(&job.id, now, expires, "blob/a").await.unwrap();
            }
            JobStatus::Failed => {
                repo.try_claim(&job.id).await.unwrap();
                repo.try_fail(&job.id, now, expires, "boom").await.unwrap();
            }
            JobStatus::Cancelled => {
                repo.try_cancel(&job.id, JobStatus::Pending, now, expires, "cancelled")
                    .await
                    .unwrap();
            }
            JobStatus::Expired => {
                repo.try_claim(&job.id).await.unwrap();
                repo.try_complete(&job.id, now, expires, "blob/a").await.unwrap();
                repo.try_expire(&job.id).await.unwrap();
            }
        }
        job.id
    }

    #[tokio::test]
    async fn increments_by_exactly_one_per_call() {
        let (tracker, repository, _dir) = harness().await;
        let id = job_in_status(&repository, JobStatus::Completed).await;

        assert_eq!(tracker.record_download(&id).await.unwrap(), 1);
        assert_eq!(tracker.record_download(&id).await.unwrap(), 2);
        assert_eq!(tracker.record_download(&id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn rejects_every_non_completed_status_without_mutating() {
        let (tracker, repository, _dir) = harness().await;
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Failed,
            JobStatus::Cancelled,
            JobStatus::Expired,
        ] {
            let id = job_in_status(&repository, status).await;
            assert!(matches!(
                tracker.record_download(&id).await,
                Err(AppError::NotDownloadable(_))
            ));
            let stored = repository.get_job(&id).await.unwrap().unwrap();
            assert_eq!(stored.download_count, 0, "counter mutated in {status}");
        }
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let (tracker, _repository, _dir) = harness().await;
        assert!(matches!(
            tracker.record_download("EXP_404").await,
            Err(AppError::NotFound(_))
        ));
    }
}
