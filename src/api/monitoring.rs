use crate::error::{AppError, AppResult};
use crate::middleware::request_tracking::get_request_metrics;
use crate::monitoring::HealthChecker;
use crate::services::metrics;
use actix_web::{get, web, HttpResponse, Responder};
use std::sync::Arc;

pub struct MonitoringState {
    pub health_checker: HealthChecker,
}

pub fn configure_monitoring_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(health_check)
        .service(health_check_detailed)
        .service(metrics_endpoint)
        .service(metrics_prometheus)
        .service(readiness_check)
        .service(liveness_check);
}

#[get("/health")]
async fn health_check(data: web::Data<Arc<MonitoringState>>) -> AppResult<impl Responder> {
    let health_status = data.health_checker.get_health_status().await;

    match health_status.status.as_str() {
        "healthy" | "degraded" => Ok(web::Json(health_status)),
        _ => Err(AppError::Internal("Service unhealthy".to_string())),
    }
}

#[get("/health/detailed")]
async fn health_check_detailed(data: web::Data<Arc<MonitoringState>>) -> AppResult<impl Responder> {
    let health_status = data.health_checker.get_health_status().await;
    Ok(web::Json(health_status))
}

#[get("/metrics")]
async fn metrics_endpoint(_data: web::Data<Arc<MonitoringState>>) -> AppResult<impl Responder> {
    let (total_requests, error_requests, total_duration_ms) = get_request_metrics().snapshot();
    Ok(web::Json(serde_json::json!({
        "jobs": metrics::get_metrics().get_json_format().await,
        "requests": {
            "total": total_requests,
            "errors": error_requests,
            "total_duration_ms": total_duration_ms,
        }
    })))
}

#[get("/metrics/prometheus")]
async fn metrics_prometheus(_data: web::Data<Arc<MonitoringState>>) -> AppResult<impl Responder> {
    let prometheus_format = metrics::get_metrics().get_prometheus_format().await;
    Ok(HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4; charset=utf-8")
        .body(prometheus_format))
}

#[get("/health/ready")]
async fn readiness_check(data: web::Data<Arc<MonitoringState>>) -> AppResult<impl Responder> {
    if data.health_checker.database_healthy().await {
        Ok(web::Json(serde_json::json!({
            "status": "ready",
            "timestamp": std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs()
        })))
    } else {
        Err(AppError::Internal("Service not ready".to_string()))
    }
}

#[get("/health/live")]
async fn liveness_check(_data: web::Data<Arc<MonitoringState>>) -> AppResult<impl Responder> {
    Ok(web::Json(serde_json::json!({
        "status": "alive",
        "timestamp": std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    })))
}
