use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage,
};
use std::future::{ready, Future, Ready};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// Attaches a correlation id to every request and logs its outcome with
/// timing, tallying totals into a process-wide counter.
pub struct RequestTracking;

impl<S, B> Transform<S, ServiceRequest> for RequestTracking
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = RequestTrackingMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestTrackingMiddleware { service }))
    }
}

pub struct RequestTrackingMiddleware<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for RequestTrackingMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let start_time = Instant::now();
        let correlation_id = Uuid::new_v4().to_string();
        let method = req.method().to_string();
        let path = req.path().to_string();

        req.extensions_mut().insert(correlation_id.clone());

        let span = tracing::info_span!(
            "http_request",
            correlation_id = %correlation_id,
            method = %method,
            path = %path
        );

        let fut = self.service.call(req);

        Box::pin(async move {
            let _guard = span.enter();

            let result = fut.await;
            let duration_ms = start_time.elapsed().as_millis() as f64;

            match &result {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if status >= 400 {
                        warn!(
                            correlation_id = %correlation_id,
                            status = status,
                            duration_ms = duration_ms,
                            "Request completed with error"
                        );
                    } else {
                        info!(
                            correlation_id = %correlation_id,
                            status = status,
                            duration_ms = duration_ms,
                            "Request completed"
                        );
                    }
                    REQUEST_METRICS.record_request(duration_ms, status >= 400);
                }
                Err(error) => {
                    warn!(
                        correlation_id = %correlation_id,
                        error = %error,
                        duration_ms = duration_ms,
                        "Request failed"
                    );
                    REQUEST_METRICS.record_request(duration_ms, true);
                }
            }

            result
        })
    }
}

pub struct RequestMetrics {
    total_requests: AtomicUsize,
    error_requests: AtomicUsize,
    total_duration_ms: AtomicU64,
}

impl RequestMetrics {
    const fn new() -> Self {
        Self {
            total_requests: AtomicUsize::new(0),
            error_requests: AtomicUsize::new(0),
            total_duration_ms: AtomicU64::new(0),
        }
    }

    fn record_request(&self, duration_ms: f64, is_error: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_duration_ms
            .fetch_add(duration_ms as u64, Ordering::Relaxed);
        if is_error {
            self.error_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> (usize, usize, u64) {
        (
            self.total_requests.load(Ordering::Relaxed),
            self.error_requests.load(Ordering::Relaxed),
            self.total_duration_ms.load(Ordering::Relaxed),
        )
    }
}

static REQUEST_METRICS: RequestMetrics = RequestMetrics::new();

/// Process-wide request counters, surfaced through the metrics endpoint.
pub fn get_request_metrics() -> &'static RequestMetrics {
    &REQUEST_METRICS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_requests() {
        let (total_before, errors_before, duration_before) = get_request_metrics().snapshot();

        REQUEST_METRICS.record_request(12.0, false);
        REQUEST_METRICS.record_request(8.0, true);

        let (total, errors, duration) = get_request_metrics().snapshot();
        assert_eq!(total - total_before, 2);
        assert_eq!(errors - errors_before, 1);
        assert!(duration - duration_before >= 20);
    }
}
