use crate::error::{AppError, AppResult};
use crate::models::job::JobStatus;
use crate::services::{
    BlobStore, CancelOutcome, DownloadTracker, ExecutionCoordinator, JobQueryService,
    JobRepository, SubmissionService,
};
use crate::services::query::{JobQuery, JobSummary};
use crate::services::submission::NewJobRequest;
use actix_web::http::header::{ContentDisposition, DispositionType};
use actix_web::{delete, get, post, web, Responder};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

const MAX_JOB_ID_LENGTH: usize = 100;

pub struct AppState {
    pub submission_service: SubmissionService,
    pub query_service: JobQueryService,
    pub download_tracker: DownloadTracker,
    pub job_repository: Arc<JobRepository>,
    pub coordinator: Arc<ExecutionCoordinator>,
    pub blob_store: Arc<dyn BlobStore>,
}

#[derive(Deserialize, Debug)]
pub struct SubmitRequest {
    pub title: String,
    pub source_type: String,
    pub retention_policy: String,
    pub requested_by: RequesterPayload,
}

#[derive(Deserialize, Debug)]
pub struct RequesterPayload {
    pub id: String,
    pub display_name: String,
}

#[derive(Serialize, Debug)]
pub struct SubmitResponse {
    #[serde(flatten)]
    pub job: JobSummary,
    /// False when the execution queue was full at admission; the job is
    /// still Pending and will be picked up by the periodic pending scan.
    pub queued: bool,
}

#[derive(Deserialize, Debug, Default)]
pub struct ListParams {
    pub status: Option<String>,
    pub source_type: Option<String>,
    pub requested_by: Option<String>,
    pub search: Option<String>,
    #[serde(rename = "from")]
    pub requested_from: Option<DateTime<Utc>>,
    #[serde(rename = "to")]
    pub requested_to: Option<DateTime<Utc>>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Serialize, Debug)]
pub struct CancelResponse {
    pub id: String,
    pub status: JobStatus,
    pub message: String,
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(submit_export)
        .service(list_exports)
        .service(get_export)
        .service(cancel_export)
        .service(download_artifact);
}

fn validate_job_id(job_id: &str) -> AppResult<()> {
    if job_id.is_empty() || job_id.len() > MAX_JOB_ID_LENGTH {
        return Err(AppError::Validation("Invalid job id".to_string()));
    }
    Ok(())
}

#[post("/exports")]
#[instrument(skip(data, request), fields(title = %request.title))]
async fn submit_export(
    data: web::Data<Arc<AppState>>,
    request: web::Json<SubmitRequest>,
) -> AppResult<impl Responder> {
    info!(
        "Submitting export '{}' for {}",
        request.title, request.requested_by.display_name
    );

    let request = request.into_inner();
    let outcome = data
        .submission_service
        .submit(NewJobRequest {
            title: request.title,
            source_type: request.source_type,
            retention_policy: request.retention_policy,
            requested_by_id: request.requested_by.id,
            requested_by_name: request.requested_by.display_name,
        })
        .await?;

    info!(
        "Created job {} (queued: {})",
        outcome.job.id, outcome.queued
    );

    Ok(web::Json(SubmitResponse {
        job: JobSummary::from(&outcome.job),
        queued: outcome.queued,
    }))
}

#[get("/exports")]
#[instrument(skip(data, params))]
async fn list_exports(
    data: web::Data<Arc<AppState>>,
    params: web::Query<ListParams>,
) -> AppResult<impl Responder> {
    let params = params.into_inner();
    debug!("Listing exports: {:?}", params);

    let page = data
        .query_service
        .query(JobQuery {
            status: params.status,
            source_type: params.source_type,
            requested_by: params.requested_by,
            search: params.search,
            requested_from: params.requested_from,
            requested_to: params.requested_to,
            page: params.page,
            page_size: params.page_size,
        })
        .await?;

    Ok(web::Json(page))
}

#[get("/exports/{job_id}")]
#[instrument(skip(data), fields(job_id = %job_id))]
async fn get_export(
    data: web::Data<Arc<AppState>>,
    job_id: web::Path<String>,
) -> AppResult<impl Responder> {
    validate_job_id(job_id.as_str())?;

    let job = data
        .job_repository
        .get_job(job_id.as_str())
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Job not found: {job_id}")))?;

    debug!("Job {} status: {:?}", job_id, job.status);
    Ok(web::Json(JobSummary::from(&job)))
}

#[delete("/exports/{job_id}")]
#[instrument(skip(data), fields(job_id = %job_id))]
async fn cancel_export(
    data: web::Data<Arc<AppState>>,
    job_id: web::Path<String>,
) -> AppResult<impl Responder> {
    validate_job_id(job_id.as_str())?;
    info!("Cancel requested for job {}", job_id);

    match data
        .coordinator
        .request_cancel(job_id.as_str(), "cancelled by requester")
        .await?
    {
        CancelOutcome::Cancelled => Ok(web::Json(CancelResponse {
            id: job_id.to_string(),
            status: JobStatus::Cancelled,
            message: "Job cancelled".to_string(),
        })),
        CancelOutcome::NotCancellable(status) => Err(AppError::Validation(format!(
            "Cannot cancel job in status {status}"
        ))),
        CancelOutcome::NotFound => {
            Err(AppError::NotFound(format!("Job not found: {job_id}")))
        }
    }
}

#[get("/exports/{job_id}/artifact")]
#[instrument(skip(data, req), fields(job_id = %job_id))]
async fn download_artifact(
    data: web::Data<Arc<AppState>>,
    job_id: web::Path<String>,
    req: actix_web::HttpRequest,
) -> AppResult<impl Responder> {
    validate_job_id(job_id.as_str())?;

    let job = data
        .job_repository
        .get_job(job_id.as_str())
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Job not found: {job_id}")))?;

    let artifact_ref = job.artifact_ref.clone().ok_or_else(|| {
        AppError::NotDownloadable(format!(
            "Job {} is {}, artifact unavailable",
            job.id, job.status
        ))
    })?;

    let path = data.blob_store.resolve(&artifact_ref);
    if !path.exists() {
        error!("Artifact missing on disk for job {}: {:?}", job_id, path);
        return Err(AppError::Store(format!(
            "Artifact for job {job_id} not found on disk"
        )));
    }

    // The conditional increment is the gate: it only succeeds while the job
    // is still Completed, so a concurrent expiry loses no accounting.
    let count = data.download_tracker.record_download(job_id.as_str()).await?;
    info!("Streaming artifact for job {} (download #{count})", job_id);

    let file = actix_files::NamedFile::open(&path)
        .map_err(|e| AppError::Store(format!("Failed to open artifact: {e}")))?;

    Ok(file
        .use_etag(true)
        .use_last_modified(true)
        .set_content_type(mime::APPLICATION_JSON)
        .set_content_disposition(ContentDisposition {
            disposition: DispositionType::Attachment,
            parameters: vec![actix_web::http::header::DispositionParam::Filename(
                artifact_ref,
            )],
        })
        .into_response(&req))
}
