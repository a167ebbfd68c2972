use crate::error::AppResult;
use crate::services::blob_store::BlobStore;
use crate::services::job_repository::JobRepository;
use crate::services::metrics::{self, names};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, sleep};
use tracing::{error, info, warn};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub purge_failures: usize,
    pub hard_deleted: u64,
}

/// Periodic retention enforcement: jobs whose window elapsed are moved to
/// Expired and their artifacts purged. The only path that clears an
/// artifact reference.
#[derive(Clone)]
pub struct RetentionSweeper {
    repository: Arc<JobRepository>,
    blob_store: Arc<dyn BlobStore>,
    sweep_interval: Duration,
    hard_delete_after_days: Option<u32>,
}

impl RetentionSweeper {
    pub fn new(
        repository: Arc<JobRepository>,
        blob_store: Arc<dyn BlobStore>,
        sweep_interval: Duration,
        hard_delete_after_days: Option<u32>,
    ) -> Self {
        Self {
            repository,
            blob_store,
            sweep_interval,
            hard_delete_after_days,
        }
    }

    /// Run sweeps on a fixed interval until the process exits.
    pub async fn run(&self) {
        info!(
            "Retention sweeper started ({}s interval, hard delete: {:?} days)",
            self.sweep_interval.as_secs(),
            self.hard_delete_after_days
        );

        // Let startup settle before the first pass.
        sleep(Duration::from_secs(10)).await;

        let mut ticker = interval(self.sweep_interval);
        loop {
            ticker.tick().await;
            match self.sweep_once(Utc::now()).await {
                Ok(report) if report.expired > 0 || report.hard_deleted > 0 => {
                    info!(
                        "Sweep expired {} jobs ({} purge failures, {} rows hard-deleted)",
                        report.expired, report.purge_failures, report.hard_deleted
                    );
                }
                Ok(_) => {}
                Err(e) => error!("Retention sweep failed: {}", e),
            }
        }
    }

    /// One sweep pass evaluating eligibility against `now`. Each job is
    /// handled independently; a purge failure leaves that job for the next
    /// cycle and never blocks the rest.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> AppResult<SweepReport> {
        let mut report = SweepReport::default();

        for job in self.repository.list_expirable(now).await? {
            if let Some(artifact_ref) = &job.artifact_ref {
                if let Err(e) = self.blob_store.delete(artifact_ref).await {
                    warn!(
                        "Failed to purge artifact {} for job {}: {}, retrying next sweep",
                        artifact_ref, job.id, e
                    );
                    report.purge_failures += 1;
                    continue;
                }
            }

            match self.repository.try_expire(&job.id).await {
                Ok(true) => {
                    info!("Job {} expired ({})", job.id, job.retention_policy);
                    metrics::get_metrics().increment_counter(names::JOBS_EXPIRED).await;
                    report.expired += 1;
                }
                // Lost a race with another sweep; nothing left to do.
                Ok(false) => {}
                Err(e) => {
                    warn!("Failed to expire job {}: {}", job.id, e);
                }
            }
        }

        if let Some(days) = self.hard_delete_after_days {
            let cutoff = now - ChronoDuration::days(days as i64);
            report.hard_deleted = self.repository.delete_expired_before(cutoff).await?;
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppError, AppResult};
    use crate::models::job::{ExportJob, JobStatus, Requester, RetentionPolicy, SourceType};
    use async_trait::async_trait;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct FlakyBlobStore {
        fail_deletes: AtomicBool,
        deleted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl BlobStore for FlakyBlobStore {
        async fn put(&self, job_id: &str, _bytes: &[u8]) -> AppResult<String> {
            Ok(format!("{job_id}.json"))
        }

        async fn delete(&self, artifact_ref: &str) -> AppResult<()> {
            if self.fail_deletes.load(Ordering::SeqCst) {
                return Err(AppError::Store("blob store unavailable".to_string()));
            }
            self.deleted.lock().await.push(artifact_ref.to_string());
            Ok(())
        }

        fn resolve(&self, artifact_ref: &str) -> PathBuf {
            PathBuf::from(artifact_ref)
        }
    }

    struct Harness {
        sweeper: RetentionSweeper,
        repository: Arc<JobRepository>,
        blob_store: Arc<FlakyBlobStore>,
        _dir: tempfile::TempDir,
    }

    async fn harness(hard_delete_after_days: Option<u32>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("jobs.db").display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();

        let repository = Arc::new(JobRepository::new(pool));
        let blob_store = Arc::new(FlakyBlobStore::default());
        let sweeper = RetentionSweeper::new(
            repository.clone(),
            blob_store.clone(),
            Duration::from_secs(300),
            hard_delete_after_days,
        );
        Harness {
            sweeper,
            repository,
            blob_store,
            _dir: dir,
        }
    }

    async fn completed_job(h: &Harness, policy: RetentionPolicy, done: DateTime<Utc>) -> ExportJob {
        let job = h
            .repository
            .create_job(
                "sweep test".to_string(),
                SourceType::ReportRun,
                policy,
                Requester {
                    id: "u-1".to_string(),
                    display_name: "User".to_string(),
                },
            )
            .await
            .unwrap();
        h.repository.try_claim(&job.id).await.unwrap();
        h.repository
            .try_complete(&job.id, done, job.expiry_for(done), &format!("{}.json", job.id))
            .await
            .unwrap();
        h.repository.get_job(&job.id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn expires_past_window_and_purges_artifact() {
        let h = harness(None).await;
        let done = Utc::now();
        let job = completed_job(&h, RetentionPolicy::SevenDays, done).await;

        // Inside the window: untouched.
        let report = h.sweeper.sweep_once(done + ChronoDuration::days(6)).await.unwrap();
        assert_eq!(report.expired, 0);

        // Past the window: expired, artifact gone.
        let report = h.sweeper.sweep_once(done + ChronoDuration::days(8)).await.unwrap();
        assert_eq!(report.expired, 1);

        let stored = h.repository.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Expired);
        assert!(stored.artifact_ref.is_none());
        assert_eq!(
            h.blob_store.deleted.lock().await.as_slice(),
            [format!("{}.json", job.id)]
        );
    }

    #[tokio::test]
    async fn sweep_is_idempotent() {
        let h = harness(None).await;
        let done = Utc::now();
        completed_job(&h, RetentionPolicy::SevenDays, done).await;

        let later = done + ChronoDuration::days(8);
        assert_eq!(h.sweeper.sweep_once(later).await.unwrap().expired, 1);
        assert_eq!(h.sweeper.sweep_once(later).await.unwrap().expired, 0);
    }

    #[tokio::test]
    async fn purge_failure_defers_that_job_only() {
        let h = harness(None).await;
        let done = Utc::now();
        let with_artifact = completed_job(&h, RetentionPolicy::SevenDays, done).await;

        // A failed job has no artifact to purge, so it expires regardless.
        let failed = h
            .repository
            .create_job(
                "failed job".to_string(),
                SourceType::AuditExcerpt,
                RetentionPolicy::SevenDays,
                Requester {
                    id: "u-2".to_string(),
                    display_name: "User Two".to_string(),
                },
            )
            .await
            .unwrap();
        h.repository.try_claim(&failed.id).await.unwrap();
        h.repository
            .try_fail(&failed.id, done, failed.expiry_for(done), "boom")
            .await
            .unwrap();

        h.blob_store.fail_deletes.store(true, Ordering::SeqCst);
        let later = done + ChronoDuration::days(8);
        let report = h.sweeper.sweep_once(later).await.unwrap();
        assert_eq!(report.purge_failures, 1);
        assert_eq!(report.expired, 1);

        let stuck = h.repository.get_job(&with_artifact.id).await.unwrap().unwrap();
        assert_eq!(stuck.status, JobStatus::Completed);

        // Next cycle succeeds once the store recovers.
        h.blob_store.fail_deletes.store(false, Ordering::SeqCst);
        let report = h.sweeper.sweep_once(later).await.unwrap();
        assert_eq!(report.expired, 1);
        let recovered = h.repository.get_job(&with_artifact.id).await.unwrap().unwrap();
        assert_eq!(recovered.status, JobStatus::Expired);
    }

    #[tokio::test]
    async fn hard_delete_removes_long_expired_rows() {
        let h = harness(Some(30)).await;
        let done = Utc::now() - ChronoDuration::days(60);
        let job = completed_job(&h, RetentionPolicy::SevenDays, done).await;

        let report = h.sweeper.sweep_once(Utc::now()).await.unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(report.hard_deleted, 1);
        assert!(h.repository.get_job(&job.id).await.unwrap().is_none());
    }
}
