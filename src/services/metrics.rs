use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Counter {
    pub value: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gauge {
    pub value: f64,
}

/// In-process job lifecycle metrics: submissions, terminal outcomes,
/// downloads, sweep results. Exposed as JSON and Prometheus text via the
/// monitoring routes.
pub struct MetricsRegistry {
    counters: RwLock<HashMap<String, Counter>>,
    gauges: RwLock<HashMap<String, Gauge>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(HashMap::new()),
            gauges: RwLock::new(HashMap::new()),
        }
    }

    pub async fn increment_counter(&self, name: &str) {
        let mut counters = self.counters.write().await;
        counters
            .entry(name.to_string())
            .or_insert(Counter { value: 0 })
            .value += 1;
    }

    pub async fn set_gauge(&self, name: &str, value: f64) {
        let mut gauges = self.gauges.write().await;
        gauges.insert(name.to_string(), Gauge { value });
    }

    pub async fn get_prometheus_format(&self) -> String {
        let mut output = String::new();

        let counters = self.counters.read().await;
        let mut counter_names: Vec<_> = counters.keys().collect();
        counter_names.sort();
        for name in counter_names {
            output.push_str(&format!("# TYPE {name} counter\n"));
            output.push_str(&format!("{name} {}\n", counters[name].value));
        }

        let gauges = self.gauges.read().await;
        let mut gauge_names: Vec<_> = gauges.keys().collect();
        gauge_names.sort();
        for name in gauge_names {
            output.push_str(&format!("# TYPE {name} gauge\n"));
            output.push_str(&format!("{name} {}\n", gauges[name].value));
        }

        output
    }

    pub async fn get_json_format(&self) -> serde_json::Value {
        serde_json::json!({
            "counters": *self.counters.read().await,
            "gauges": *self.gauges.read().await,
            "timestamp": Utc::now()
        })
    }
}

static METRICS: std::sync::OnceLock<MetricsRegistry> = std::sync::OnceLock::new();

pub fn get_metrics() -> &'static MetricsRegistry {
    METRICS.get_or_init(|| {
        info!("Initializing global metrics registry");
        MetricsRegistry::new()
    })
}

pub mod names {
    pub const JOBS_SUBMITTED: &str = "exportd_jobs_submitted_total";
    pub const JOBS_COMPLETED: &str = "exportd_jobs_completed_total";
    pub const JOBS_FAILED: &str = "exportd_jobs_failed_total";
    pub const JOBS_CANCELLED: &str = "exportd_jobs_cancelled_total";
    pub const JOBS_EXPIRED: &str = "exportd_jobs_expired_total";
    pub const DOWNLOADS_RECORDED: &str = "exportd_downloads_recorded_total";
    pub const SUBMISSIONS_DEFERRED: &str = "exportd_submissions_deferred_total";
    pub const QUEUE_DEPTH: &str = "exportd_queue_depth";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counters_accumulate_and_render() {
        let registry = MetricsRegistry::new();
        registry.increment_counter(names::JOBS_SUBMITTED).await;
        registry.increment_counter(names::JOBS_SUBMITTED).await;
        registry.set_gauge(names::QUEUE_DEPTH, 3.0).await;

        let text = registry.get_prometheus_format().await;
        assert!(text.contains("exportd_jobs_submitted_total 2"));
        assert!(text.contains("exportd_queue_depth 3"));
    }
}
