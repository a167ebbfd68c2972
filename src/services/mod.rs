pub mod blob_store;
pub mod coordinator;
pub mod downloads;
pub mod generator;
pub mod job_queue;
pub mod job_repository;
pub mod metrics;
pub mod query;
pub mod submission;
pub mod sweeper;

pub use blob_store::{BlobStore, LocalBlobStore};
pub use coordinator::{CancelOutcome, ExecutionCoordinator};
pub use downloads::DownloadTracker;
pub use generator::{ManifestGenerator, ReportGenerator};
pub use job_queue::JobQueue;
pub use job_repository::JobRepository;
pub use query::JobQueryService;
pub use submission::SubmissionService;
pub use sweeper::RetentionSweeper;
