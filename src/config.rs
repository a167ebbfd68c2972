use std::time::Duration;

#[derive(Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub queue: QueueConfig,
    pub execution: ExecutionConfig,
    pub retention: RetentionConfig,
    pub storage: StorageConfig,
}

#[derive(Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub client_timeout: Duration,
    pub keep_alive: Duration,
    pub max_payload_size: usize,
}

#[derive(Clone)]
pub struct QueueConfig {
    pub max_concurrent_jobs: usize,
    pub max_queue_size: usize,
    /// How often the coordinator re-scans the store for Pending jobs that
    /// never made it into the queue (backpressure recovery).
    pub pending_scan_interval: Duration,
}

#[derive(Clone)]
pub struct ExecutionConfig {
    /// Maximum wall-clock duration of one Report Generator call. A job is
    /// forced to Failed when this elapses, including after a cancel the
    /// generator did not observe.
    pub processing_timeout: Duration,
}

#[derive(Clone)]
pub struct RetentionConfig {
    pub enabled: bool,
    pub sweep_interval: Duration,
    /// Optional horizon after which Expired rows are removed entirely.
    pub hard_delete_after_days: Option<u32>,
}

#[derive(Clone)]
pub struct StorageConfig {
    pub artifact_dir: String,
}

impl Default for Config {
    fn default() -> Self {
        let parse_env_var = |key: &str, default: &str| -> String {
            std::env::var(key).unwrap_or_else(|_| default.to_string())
        };

        let parse_env_number = |key: &str, default: u64| -> u64 {
            std::env::var(key)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default)
        };

        let parse_env_duration = |key: &str, default_secs: u64| -> Duration {
            Duration::from_secs(parse_env_number(key, default_secs))
        };

        Config {
            server: ServerConfig {
                host: parse_env_var("EXPORTD_HOST", "0.0.0.0"),
                port: parse_env_number("EXPORTD_PORT", 8080) as u16,
                client_timeout: parse_env_duration("EXPORTD_CLIENT_TIMEOUT", 60),
                keep_alive: parse_env_duration("EXPORTD_KEEP_ALIVE", 60),
                max_payload_size: parse_env_number("EXPORTD_MAX_PAYLOAD", 1024 * 1024) as usize,
            },
            queue: QueueConfig {
                max_concurrent_jobs: parse_env_number("EXPORTD_MAX_CONCURRENT_JOBS", 4) as usize,
                max_queue_size: parse_env_number("EXPORTD_MAX_QUEUE_SIZE", 256) as usize,
                pending_scan_interval: parse_env_duration("EXPORTD_PENDING_SCAN_INTERVAL", 30),
            },
            execution: ExecutionConfig {
                processing_timeout: parse_env_duration("EXPORTD_PROCESSING_TIMEOUT", 600),
            },
            retention: RetentionConfig {
                enabled: parse_env_var("EXPORTD_RETENTION_ENABLED", "true").to_lowercase()
                    == "true",
                sweep_interval: parse_env_duration("EXPORTD_SWEEP_INTERVAL_SECS", 300),
                hard_delete_after_days: std::env::var("EXPORTD_HARD_DELETE_DAYS")
                    .ok()
                    .and_then(|s| s.parse().ok()),
            },
            storage: StorageConfig {
                artifact_dir: parse_env_var("EXPORTD_ARTIFACT_DIR", "/app/artifacts"),
            },
        }
    }
}

pub fn load_config() -> Config {
    Config::default()
}
