use crate::error::AppResult;
use crate::models::job::JobStatus;
use crate::services::blob_store::BlobStore;
use crate::services::generator::ReportGenerator;
use crate::services::job_queue::{EnqueueOutcome, JobQueue};
use crate::services::job_repository::JobRepository;
use crate::services::metrics::{self, names};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Outcome of an explicit cancel request.
#[derive(Debug, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    /// The job had already reached a state the cancel cannot leave.
    NotCancellable(JobStatus),
    NotFound,
}

/// Cancellation tokens for in-flight executions, keyed by job id. Cancel is
/// cooperative: signalling the token asks the generator to stop, while the
/// store-side compare-and-swap guarantees the job never resolves to
/// Completed or Failed after an accepted cancel.
#[derive(Clone, Default)]
pub struct CancelRegistry {
    inner: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    async fn register(&self, job_id: &str, token: CancellationToken) {
        self.inner.lock().await.insert(job_id.to_string(), token);
    }

    async fn remove(&self, job_id: &str) {
        self.inner.lock().await.remove(job_id);
    }

    async fn signal(&self, job_id: &str) -> bool {
        if let Some(token) = self.inner.lock().await.get(job_id) {
            token.cancel();
            true
        } else {
            false
        }
    }
}

/// Bounded worker pool driving jobs through Processing to a terminal state.
/// Workers claim jobs by compare-and-swap, so a job id appearing twice in
/// the queue (or surfacing through both the queue and the pending scan) is
/// executed at most once.
pub struct ExecutionCoordinator {
    repository: Arc<JobRepository>,
    queue: Arc<JobQueue>,
    generator: Arc<dyn ReportGenerator>,
    blob_store: Arc<dyn BlobStore>,
    cancels: CancelRegistry,
    slots: Arc<Semaphore>,
    processing_timeout: Duration,
    pending_scan_interval: Duration,
}

impl ExecutionCoordinator {
    pub fn new(
        repository: Arc<JobRepository>,
        queue: Arc<JobQueue>,
        generator: Arc<dyn ReportGenerator>,
        blob_store: Arc<dyn BlobStore>,
        max_concurrent_jobs: usize,
        processing_timeout: Duration,
        pending_scan_interval: Duration,
    ) -> Self {
        Self {
            repository,
            queue,
            generator,
            blob_store,
            cancels: CancelRegistry::new(),
            slots: Arc::new(Semaphore::new(max_concurrent_jobs)),
            processing_timeout,
            pending_scan_interval,
        }
    }

    pub fn cancel_registry(&self) -> CancelRegistry {
        self.cancels.clone()
    }

    /// Run the dispatch loop until the process exits. The first pending scan
    /// fires immediately, which doubles as queue restoration after restart.
    pub fn start(self: Arc<Self>) {
        tokio::spawn(async move {
            info!(
                "Execution coordinator started ({} execution slots)",
                self.slots.available_permits()
            );
            let mut scan = tokio::time::interval(self.pending_scan_interval);
            loop {
                tokio::select! {
                    _ = self.queue.notified() => {}
                    _ = scan.tick() => {
                        if let Err(e) = self.refill_from_store().await {
                            warn!("Pending scan failed: {}", e);
                        }
                    }
                }
                self.drain_queue().await;
            }
        });
    }

    /// Feed Pending jobs from the store into the queue. Covers jobs whose
    /// submission hit a full queue and jobs left over from a previous run.
    pub async fn refill_from_store(&self) -> AppResult<usize> {
        let pending = self.repository.list_pending_ids(256).await?;
        let mut added = 0;
        for job_id in pending {
            match self.queue.try_enqueue(job_id).await {
                EnqueueOutcome::Queued => added += 1,
                EnqueueOutcome::Full | EnqueueOutcome::ShuttingDown => break,
            }
        }
        if added > 0 {
            debug!("Pending scan queued {} jobs", added);
        }
        metrics::get_metrics()
            .set_gauge(names::QUEUE_DEPTH, self.queue.len().await as f64)
            .await;
        Ok(added)
    }

    async fn drain_queue(self: &Arc<Self>) {
        loop {
            let permit = match self.slots.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let Some(job_id) = self.queue.pop().await else {
                break;
            };

            let coordinator = Arc::clone(self);
            tokio::spawn(async move {
                coordinator.execute_one(&job_id).await;
                drop(permit);
                coordinator.queue.wake();
            });
        }
    }

    /// Drive one job from Pending to a terminal-execution state. Public so
    /// integration tests can run the lifecycle without the dispatch loop.
    pub async fn execute_one(&self, job_id: &str) {
        match self.repository.try_claim(job_id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("Job {} no longer pending, skipping", job_id);
                return;
            }
            Err(e) => {
                error!("Failed to claim job {}: {}", job_id, e);
                return;
            }
        }

        let job = match self.repository.get_job(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                error!("Claimed job {} vanished from the store", job_id);
                return;
            }
            Err(e) => {
                error!("Failed to load claimed job {}: {}", job_id, e);
                return;
            }
        };

        info!("Executing job {} ({})", job.id, job.source_type);

        let token = CancellationToken::new();
        self.cancels.register(job_id, token.clone()).await;
        let result = timeout(
            self.processing_timeout,
            self.generator.execute(&job, token.clone()),
        )
        .await;
        self.cancels.remove(job_id).await;

        let now = Utc::now();
        let expires = job.expiry_for(now);

        match result {
            Ok(Ok(artifact_ref)) => {
                match self
                    .repository
                    .try_complete(job_id, now, expires, &artifact_ref)
                    .await
                {
                    Ok(true) => {
                        info!("Job {} completed, artifact {}", job_id, artifact_ref);
                        metrics::get_metrics().increment_counter(names::JOBS_COMPLETED).await;
                    }
                    Ok(false) => {
                        // A cancel was accepted while the generator ran; the
                        // produced artifact has no owning job.
                        warn!(
                            "Job {} left Processing during execution, discarding artifact {}",
                            job_id, artifact_ref
                        );
                        if let Err(e) = self.blob_store.delete(&artifact_ref).await {
                            warn!("Failed to discard orphan artifact {}: {}", artifact_ref, e);
                        }
                    }
                    Err(e) => error!("Failed to record completion of job {}: {}", job_id, e),
                }
            }
            Ok(Err(e)) => {
                warn!("Job {} failed: {}", job_id, e);
                match self
                    .repository
                    .try_fail(job_id, now, expires, &e.to_string())
                    .await
                {
                    Ok(true) => {
                        metrics::get_metrics().increment_counter(names::JOBS_FAILED).await;
                    }
                    Ok(false) => debug!("Job {} already resolved, dropping failure", job_id),
                    Err(e) => error!("Failed to record failure of job {}: {}", job_id, e),
                }
            }
            Err(_) => {
                // Generator overran the allowed processing window (possibly
                // after ignoring a cancel); force a terminal state.
                token.cancel();
                let msg = format!(
                    "execution timed out after {}s",
                    self.processing_timeout.as_secs()
                );
                warn!("Job {}: {}", job_id, msg);
                match self.repository.try_fail(job_id, now, expires, &msg).await {
                    Ok(true) => {
                        metrics::get_metrics().increment_counter(names::JOBS_FAILED).await;
                    }
                    Ok(false) => debug!("Job {} already resolved, dropping timeout", job_id),
                    Err(e) => error!("Failed to record timeout of job {}: {}", job_id, e),
                }
            }
        }
    }

    /// Explicit cancel from the requester or an operator. Pending jobs are
    /// cancelled directly; Processing jobs are cancelled in the store first
    /// (so no later completion can land) and then signalled.
    pub async fn request_cancel(&self, job_id: &str, reason: &str) -> AppResult<CancelOutcome> {
        let Some(job) = self.repository.get_job(job_id).await? else {
            return Ok(CancelOutcome::NotFound);
        };

        let now = Utc::now();
        let expires = job.expiry_for(now);

        if job.status == JobStatus::Pending
            && self
                .repository
                .try_cancel(job_id, JobStatus::Pending, now, expires, reason)
                .await?
        {
            info!("Cancelled pending job {}", job_id);
            metrics::get_metrics().increment_counter(names::JOBS_CANCELLED).await;
            return Ok(CancelOutcome::Cancelled);
        }

        // Either it was Processing to begin with, or a worker claimed it
        // between the read and the swap above.
        if self
            .repository
            .try_cancel(job_id, JobStatus::Processing, now, expires, reason)
            .await?
        {
            let signalled = self.cancels.signal(job_id).await;
            info!(
                "Cancelled processing job {} (in-flight signal: {})",
                job_id, signalled
            );
            metrics::get_metrics().increment_counter(names::JOBS_CANCELLED).await;
            return Ok(CancelOutcome::Cancelled);
        }

        let status = self
            .repository
            .get_job(job_id)
            .await?
            .map(|j| j.status)
            .unwrap_or(job.status);
        Ok(CancelOutcome::NotCancellable(status))
    }
}
