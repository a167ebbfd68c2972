use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub checks: HealthChecks,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthChecks {
    pub database: CheckResult,
    pub artifact_store: CheckResult,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CheckResult {
    pub status: String,
    pub message: Option<String>,
    pub response_time_ms: Option<u64>,
}

pub struct HealthChecker {
    start_time: SystemTime,
    database_pool: SqlitePool,
    artifact_dir: PathBuf,
}

impl HealthChecker {
    pub fn new(database_pool: SqlitePool, artifact_dir: PathBuf) -> Self {
        Self {
            start_time: SystemTime::now(),
            database_pool,
            artifact_dir,
        }
    }

    pub async fn get_health_status(&self) -> HealthStatus {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let uptime = SystemTime::now()
            .duration_since(self.start_time)
            .unwrap_or_default()
            .as_secs();

        let checks = HealthChecks {
            database: self.check_database().await,
            artifact_store: self.check_artifact_store().await,
        };

        let overall_status = if checks.database.status == "healthy"
            && checks.artifact_store.status == "healthy"
        {
            "healthy"
        } else if checks.database.status == "critical" {
            "critical"
        } else {
            "degraded"
        };

        HealthStatus {
            status: overall_status.to_string(),
            timestamp: now,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: uptime,
            checks,
        }
    }

    pub async fn database_healthy(&self) -> bool {
        self.check_database().await.status == "healthy"
    }

    async fn check_database(&self) -> CheckResult {
        let start = SystemTime::now();

        match sqlx::query("SELECT 1").fetch_one(&self.database_pool).await {
            Ok(_) => {
                let duration = start.elapsed().unwrap_or_default().as_millis() as u64;
                CheckResult {
                    status: "healthy".to_string(),
                    message: Some("Database connection successful".to_string()),
                    response_time_ms: Some(duration),
                }
            }
            Err(e) => CheckResult {
                status: "critical".to_string(),
                message: Some(format!("Database connection failed: {e}")),
                response_time_ms: None,
            },
        }
    }

    async fn check_artifact_store(&self) -> CheckResult {
        match tokio::fs::metadata(&self.artifact_dir).await {
            Ok(meta) if meta.is_dir() => CheckResult {
                status: "healthy".to_string(),
                message: Some("Artifact directory accessible".to_string()),
                response_time_ms: Some(0),
            },
            Ok(_) => CheckResult {
                status: "degraded".to_string(),
                message: Some("Artifact path is not a directory".to_string()),
                response_time_ms: None,
            },
            Err(e) => CheckResult {
                status: "critical".to_string(),
                message: Some(format!("Artifact directory inaccessible: {e}")),
                response_time_ms: None,
            },
        }
    }
}
