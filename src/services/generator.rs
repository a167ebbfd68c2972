use crate::error::{AppError, AppResult};
use crate::models::job::ExportJob;
use crate::services::blob_store::BlobStore;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// External execution engine that produces an export artifact. The core only
/// learns whether it succeeded; the cancellation token is the cooperative
/// abort signal and the engine is expected (not guaranteed) to observe it.
#[async_trait]
pub trait ReportGenerator: Send + Sync {
    async fn execute(&self, job: &ExportJob, cancel: CancellationToken) -> AppResult<String>;
}

/// Built-in generator that renders a JSON manifest of the job through the
/// blob store. Stands in for the real extraction engine, which lives outside
/// this service.
pub struct ManifestGenerator {
    blob_store: Arc<dyn BlobStore>,
}

impl ManifestGenerator {
    pub fn new(blob_store: Arc<dyn BlobStore>) -> Self {
        Self { blob_store }
    }
}

#[async_trait]
impl ReportGenerator for ManifestGenerator {
    async fn execute(&self, job: &ExportJob, cancel: CancellationToken) -> AppResult<String> {
        if cancel.is_cancelled() {
            return Err(AppError::Execution("execution aborted".to_string()));
        }

        let manifest = serde_json::json!({
            "job_id": job.id,
            "title": job.title,
            "source_type": job.source_type.to_string(),
            "requested_by": job.requested_by.id,
            "requested_at": job.requested_at,
        });
        let bytes = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| AppError::Execution(format!("Failed to render manifest: {e}")))?;

        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Generator observed cancel for job {}", job.id);
                Err(AppError::Execution("execution aborted".to_string()))
            }
            result = self.blob_store.put(&job.id, &bytes) => result,
        }
    }
}
