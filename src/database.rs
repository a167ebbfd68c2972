use crate::error::{AppError, AppResult};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;

pub async fn create_database_pool(database_url: &str) -> AppResult<SqlitePool> {
    let db_path = database_url.trim_start_matches("sqlite://");
    tracing::info!("Database file path: {}", db_path);

    if let Some(parent) = Path::new(db_path).parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to create database directory: {e}")))?;
    }

    // Create the database file if it does not exist yet.
    let connection_url = if database_url.contains('?') {
        format!("{database_url}&create-if-missing=true")
    } else {
        format!("{database_url}?mode=rwc")
    };

    let max_connections = std::env::var("EXPORTD_DB_MAX_CONNECTIONS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| {
            let cpus = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4);
            (cpus * 4).clamp(10, 100)
        });

    tracing::info!("Configuring database pool with {} max connections", max_connections);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections as u32)
        .connect(&connection_url)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to create database pool: {e}")))?;

    Ok(pool)
}

pub async fn run_migrations(pool: &SqlitePool) -> AppResult<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to run migrations: {e}")))?;

    // WAL mode lets the query side read while a worker writes.
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(pool)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to set journal mode: {e}")))?;

    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(pool)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to set synchronous mode: {e}")))?;

    sqlx::query("PRAGMA cache_size = 1000")
        .execute(pool)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to set cache size: {e}")))?;

    Ok(())
}
