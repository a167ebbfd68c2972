use crate::error::{AppError, AppResult};
use crate::models::job::{ExportJob, JobStatus, Requester, RetentionPolicy, SourceType};
use crate::services::job_repository::{JobFilter, JobRepository};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

const MAX_PAGE_SIZE: u32 = 100;
const DEFAULT_PAGE_SIZE: u32 = 20;

/// Raw table-view query as it arrives from a client. Filter fields accept
/// the literal value, "all", or absence interchangeably.
#[derive(Debug, Clone, Default)]
pub struct JobQuery {
    pub status: Option<String>,
    pub source_type: Option<String>,
    pub requested_by: Option<String>,
    pub search: Option<String>,
    pub requested_from: Option<DateTime<Utc>>,
    pub requested_to: Option<DateTime<Utc>>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct JobSummary {
    pub id: String,
    pub title: String,
    pub source_type: SourceType,
    pub requested_by: Requester,
    pub status: JobStatus,
    pub requested_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retention_policy: RetentionPolicy,
    pub expires_at: Option<DateTime<Utc>>,
    pub download_count: i64,
    pub downloadable: bool,
    pub error_message: Option<String>,
}

impl From<&ExportJob> for JobSummary {
    fn from(job: &ExportJob) -> Self {
        Self {
            id: job.id.clone(),
            title: job.title.clone(),
            source_type: job.source_type,
            requested_by: job.requested_by.clone(),
            status: job.status,
            requested_at: job.requested_at,
            completed_at: job.completed_at,
            retention_policy: job.retention_policy,
            expires_at: job.expires_at,
            download_count: job.download_count,
            downloadable: job.is_downloadable(),
            error_message: job.error_message.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JobPage {
    pub jobs: Vec<JobSummary>,
    pub total_count: i64,
    pub page: u32,
    pub page_size: u32,
}

/// Read side of the job table. Never owns a lifecycle transition.
#[derive(Clone)]
pub struct JobQueryService {
    repository: Arc<JobRepository>,
}

impl JobQueryService {
    pub fn new(repository: Arc<JobRepository>) -> Self {
        Self { repository }
    }

    pub async fn query(&self, query: JobQuery) -> AppResult<JobPage> {
        let filter = JobFilter {
            status: parse_filter(query.status.as_deref(), JobStatus::parse, "status")?,
            source_type: parse_filter(query.source_type.as_deref(), SourceType::parse, "source type")?,
            requested_by: normalize(query.requested_by),
            search: normalize(query.search),
            requested_from: query.requested_from,
            requested_to: query.requested_to,
        };

        let page = query.page.unwrap_or(1).max(1);
        let page_size = query
            .page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);

        let (jobs, total_count) = self.repository.query_jobs(&filter, page, page_size).await?;

        Ok(JobPage {
            jobs: jobs.iter().map(JobSummary::from).collect(),
            total_count,
            page,
            page_size,
        })
    }
}

/// "all" (any case), empty, and absent all mean no filter.
fn normalize(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let v = v.trim().to_string();
        if v.is_empty() || v.eq_ignore_ascii_case("all") {
            None
        } else {
            Some(v)
        }
    })
}

fn parse_filter<T>(
    value: Option<&str>,
    parse: impl Fn(&str) -> Option<T>,
    what: &str,
) -> AppResult<Option<T>> {
    match normalize(value.map(str::to_string)) {
        None => Ok(None),
        Some(v) => parse(&v)
            .map(Some)
            .ok_or_else(|| AppError::Validation(format!("Invalid {what} filter: {v}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::Requester;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn harness() -> (JobQueryService, Arc<JobRepository>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("jobs.db").display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        let repository = Arc::new(JobRepository::new(pool));
        (JobQueryService::new(repository.clone()), repository, dir)
    }

    async fn seed(repo: &JobRepository, title: &str, source: SourceType, user: &str) -> ExportJob {
        repo.create_job(
            title.to_string(),
            source,
            RetentionPolicy::SevenDays,
            Requester {
                id: user.to_string(),
                display_name: format!("User {user}"),
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn all_and_empty_filters_are_no_filters() {
        let (service, repository, _dir) = harness().await;
        seed(&repository, "a", SourceType::ReportRun, "u-1").await;
        seed(&repository, "b", SourceType::AuditExcerpt, "u-2").await;

        let page = service
            .query(JobQuery {
                status: Some("All".to_string()),
                source_type: Some("".to_string()),
                requested_by: Some("all".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total_count, 2);
    }

    #[tokio::test]
    async fn unknown_filter_value_is_a_validation_error() {
        let (service, _repository, _dir) = harness().await;
        let result = service
            .query(JobQuery {
                status: Some("Archived".to_string()),
                ..Default::default()
            })
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn orders_newest_first_with_id_tiebreak() {
        let (service, repository, _dir) = harness().await;
        for i in 0..3 {
            seed(&repository, &format!("job {i}"), SourceType::ReportRun, "u-1").await;
        }

        let page = service.query(JobQuery::default()).await.unwrap();
        let ids: Vec<_> = page.jobs.iter().map(|j| j.id.as_str()).collect();
        // Same-instant submissions fall back to descending id.
        let mut sorted = ids.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(ids, sorted);
    }

    #[tokio::test]
    async fn filters_by_requester() {
        let (service, repository, _dir) = harness().await;
        seed(&repository, "mine", SourceType::ReportRun, "u-1").await;
        seed(&repository, "theirs", SourceType::ReportRun, "u-2").await;

        let page = service
            .query(JobQuery {
                requested_by: Some("u-2".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total_count, 1);
        assert_eq!(page.jobs[0].title, "theirs");
    }

    #[tokio::test]
    async fn page_size_is_clamped() {
        let (service, _repository, _dir) = harness().await;
        let page = service
            .query(JobQuery {
                page_size: Some(10_000),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.page_size, MAX_PAGE_SIZE);
    }
}
