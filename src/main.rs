use exportd::api::monitoring::{configure_monitoring_routes, MonitoringState};
use exportd::api::routes::{configure_routes, AppState};
use exportd::config::load_config;
use exportd::database::{create_database_pool, run_migrations};
use exportd::middleware::{Cors, RequestTracking, SecurityHeaders};
use exportd::monitoring::HealthChecker;
use exportd::services::{
    BlobStore, DownloadTracker, ExecutionCoordinator, JobQueryService, JobQueue, JobRepository,
    LocalBlobStore, ManifestGenerator, RetentionSweeper, SubmissionService,
};
use actix_web::{web, App, HttpServer};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_actix_web::TracingLogger;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Initialize structured logging
    init_logging();

    info!("Starting Export Job Center v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = load_config();
    let server_config = config.server.clone();

    // Initialize database
    let database_url = std::env::var("EXPORTD_DATABASE_URL")
        .unwrap_or_else(|_| "sqlite:///app/storage/exportd.db".to_string());

    info!("Connecting to database: {}", database_url);
    let pool = create_database_pool(&database_url)
        .await
        .expect("Failed to create database pool");

    // Run database migrations
    info!("Running database migrations");
    run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");

    // Initialize artifact store
    let artifact_dir = PathBuf::from(&config.storage.artifact_dir);
    let blob_store: Arc<dyn BlobStore> = Arc::new(
        LocalBlobStore::new(artifact_dir.clone())
            .await
            .expect("Failed to initialize artifact store"),
    );
    info!("Artifact store initialized: {}", config.storage.artifact_dir);

    // Initialize services
    info!("Initializing services");
    let job_repository = Arc::new(JobRepository::new(pool.clone()));
    let job_queue = JobQueue::new(config.queue.max_queue_size);
    let generator = Arc::new(ManifestGenerator::new(blob_store.clone()));

    let coordinator = Arc::new(ExecutionCoordinator::new(
        job_repository.clone(),
        job_queue.clone(),
        generator,
        blob_store.clone(),
        config.queue.max_concurrent_jobs,
        config.execution.processing_timeout,
        config.queue.pending_scan_interval,
    ));

    let app_state = Arc::new(AppState {
        submission_service: SubmissionService::new(job_repository.clone(), job_queue.clone()),
        query_service: JobQueryService::new(job_repository.clone()),
        download_tracker: DownloadTracker::new(job_repository.clone()),
        job_repository: job_repository.clone(),
        coordinator: coordinator.clone(),
        blob_store: blob_store.clone(),
    });

    // Start the dispatch loop. Its first pending scan restores any jobs
    // left in Pending by a previous run.
    coordinator.start();

    // Start retention sweeper if enabled
    if config.retention.enabled {
        info!(
            "Starting retention sweeper (interval: {:?})",
            config.retention.sweep_interval
        );
        let sweeper = RetentionSweeper::new(
            job_repository.clone(),
            blob_store.clone(),
            config.retention.sweep_interval,
            config.retention.hard_delete_after_days,
        );
        tokio::spawn(async move {
            sweeper.run().await;
        });
    } else {
        info!("Retention sweeper disabled");
    }

    // Initialize monitoring
    let monitoring_state = Arc::new(MonitoringState {
        health_checker: HealthChecker::new(pool.clone(), artifact_dir),
    });

    // Configure CORS
    let cors_config = std::env::var("EXPORTD_CORS_ORIGINS")
        .map(|origins| Cors::new(origins.split(',').map(|s| s.trim().to_string()).collect()))
        .unwrap_or_else(|_| Cors::restrictive());

    info!(
        "Starting exportd server on {}:{}",
        server_config.host, server_config.port
    );

    HttpServer::new(move || {
        App::new()
            .wrap(RequestTracking) // Request correlation IDs and timing
            .wrap(TracingLogger::default())
            .wrap(SecurityHeaders)
            .wrap(cors_config.clone())
            .app_data(web::Data::new(app_state.clone()))
            .app_data(web::Data::new(monitoring_state.clone()))
            .app_data(web::PayloadConfig::new(server_config.max_payload_size))
            .app_data(web::JsonConfig::default().limit(4096))
            .configure(configure_routes)
            .configure(configure_monitoring_routes)
    })
    .client_request_timeout(server_config.client_timeout)
    .keep_alive(server_config.keep_alive)
    .bind((server_config.host, server_config.port))?
    .run()
    .await
}

fn init_logging() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let log_level =
        std::env::var("RUST_LOG").unwrap_or_else(|_| "exportd=info,actix_web=info".to_string());
    let log_format = std::env::var("EXPORTD_LOG_FORMAT").unwrap_or_else(|_| "json".to_string());

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level));

    if log_format == "json" {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty())
            .init();
    }
}
