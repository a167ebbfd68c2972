use crate::error::{AppError, AppResult};
use crate::models::job::{ExportJob, Requester, RetentionPolicy, SourceType};
use crate::services::job_queue::{EnqueueOutcome, JobQueue};
use crate::services::job_repository::JobRepository;
use crate::services::metrics::{self, names};
use std::sync::Arc;
use tracing::{info, warn};

const MAX_TITLE_LENGTH: usize = 500;

/// Raw submission input; validated into typed variants before any write.
#[derive(Debug, Clone)]
pub struct NewJobRequest {
    pub title: String,
    pub source_type: String,
    pub retention_policy: String,
    pub requested_by_id: String,
    pub requested_by_name: String,
}

#[derive(Debug)]
pub struct SubmissionOutcome {
    pub job: ExportJob,
    /// False when the execution queue was full: the job exists in Pending
    /// and will be picked up by the periodic pending scan.
    pub queued: bool,
}

/// Validates export requests and admits them as Pending jobs. Duplicate
/// submissions are intentionally independent jobs; near-identical titles
/// for different periods are a normal pattern here.
#[derive(Clone)]
pub struct SubmissionService {
    repository: Arc<JobRepository>,
    queue: Arc<JobQueue>,
}

impl SubmissionService {
    pub fn new(repository: Arc<JobRepository>, queue: Arc<JobQueue>) -> Self {
        Self { repository, queue }
    }

    pub async fn submit(&self, request: NewJobRequest) -> AppResult<SubmissionOutcome> {
        let title = request.title.trim();
        if title.is_empty() {
            return Err(AppError::Validation("title must not be empty".to_string()));
        }
        if title.chars().count() > MAX_TITLE_LENGTH {
            return Err(AppError::Validation(format!(
                "title exceeds {MAX_TITLE_LENGTH} characters"
            )));
        }

        let source_type = SourceType::parse(&request.source_type).ok_or_else(|| {
            AppError::Validation(format!("unrecognized source type: {}", request.source_type))
        })?;
        let retention_policy = RetentionPolicy::parse(&request.retention_policy).ok_or_else(|| {
            AppError::Validation(format!(
                "unrecognized retention policy: {}",
                request.retention_policy
            ))
        })?;

        if request.requested_by_id.trim().is_empty() {
            return Err(AppError::Validation(
                "requester identity must not be empty".to_string(),
            ));
        }

        let job = self
            .repository
            .create_job(
                title.to_string(),
                source_type,
                retention_policy,
                Requester {
                    id: request.requested_by_id,
                    display_name: request.requested_by_name,
                },
            )
            .await?;

        metrics::get_metrics().increment_counter(names::JOBS_SUBMITTED).await;
        info!(
            "Created job {} ({}, retention {})",
            job.id, job.source_type, job.retention_policy
        );

        let queued = match self.queue.try_enqueue(job.id.clone()).await {
            EnqueueOutcome::Queued => true,
            EnqueueOutcome::Full | EnqueueOutcome::ShuttingDown => {
                warn!(
                    "Execution queue full, job {} deferred to the pending scan",
                    job.id
                );
                metrics::get_metrics()
                    .increment_counter(names::SUBMISSIONS_DEFERRED)
                    .await;
                false
            }
        };

        Ok(SubmissionOutcome { job, queued })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::JobStatus;
    use crate::services::job_repository::JobFilter;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn service(queue_size: usize) -> (SubmissionService, Arc<JobRepository>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("jobs.db").display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        let repository = Arc::new(JobRepository::new(pool));
        let service = SubmissionService::new(repository.clone(), JobQueue::new(queue_size));
        (service, repository, dir)
    }

    fn request() -> NewJobRequest {
        NewJobRequest {
            title: "Monthly export".to_string(),
            source_type: "REPORT_RUN".to_string(),
            retention_policy: "30_DAYS".to_string(),
            requested_by_id: "u-7".to_string(),
            requested_by_name: "Tran Thi B".to_string(),
        }
    }

    #[tokio::test]
    async fn creates_pending_job_and_enqueues() {
        let (service, repository, _dir) = service(8).await;
        let outcome = service.submit(request()).await.unwrap();
        assert!(outcome.queued);
        assert_eq!(outcome.job.status, JobStatus::Pending);

        let stored = repository.get_job(&outcome.job.id).await.unwrap().unwrap();
        assert_eq!(stored.title, "Monthly export");
        assert_eq!(stored.requested_by.id, "u-7");
    }

    #[tokio::test]
    async fn rejects_invalid_input_without_creating_a_job() {
        let (service, repository, _dir) = service(8).await;

        let cases = [
            NewJobRequest {
                title: "   ".to_string(),
                ..request()
            },
            NewJobRequest {
                source_type: "SPREADSHEET".to_string(),
                ..request()
            },
            NewJobRequest {
                retention_policy: "14_DAYS".to_string(),
                ..request()
            },
            NewJobRequest {
                requested_by_id: "".to_string(),
                ..request()
            },
        ];
        for case in cases {
            assert!(matches!(
                service.submit(case).await,
                Err(AppError::Validation(_))
            ));
        }

        let (_, total) = repository
            .query_jobs(&JobFilter::default(), 1, 10)
            .await
            .unwrap();
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn title_bound_counts_characters_not_bytes() {
        let (service, _repository, _dir) = service(8).await;

        // 500 two-byte characters is exactly at the limit.
        let at_limit = NewJobRequest {
            title: "á".repeat(MAX_TITLE_LENGTH),
            ..request()
        };
        assert!(service.submit(at_limit).await.is_ok());

        let over_limit = NewJobRequest {
            title: "á".repeat(MAX_TITLE_LENGTH + 1),
            ..request()
        };
        assert!(matches!(
            service.submit(over_limit).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn full_queue_defers_but_still_creates_the_job() {
        let (service, repository, _dir) = service(1).await;

        let first = service.submit(request()).await.unwrap();
        assert!(first.queued);

        let second = service.submit(request()).await.unwrap();
        assert!(!second.queued);
        // Duplicate-looking submissions are distinct jobs.
        assert_ne!(first.job.id, second.job.id);

        let stored = repository.get_job(&second.job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Pending);
    }
}
