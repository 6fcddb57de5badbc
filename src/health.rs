use std::sync::Arc;
use crate::metrics::{MetricsCollector, HealthStatus};
use crate::config::{Config, ConfirmationMode};
use crate::prometheus_metrics::PrometheusMetrics;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_seconds: u64,
    pub version: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MetricsResponse {
    pub metrics: crate::metrics::Metrics,
    pub health_status: String,
}

pub struct HealthChecker {
    metrics: Arc<MetricsCollector>,
    prometheus: PrometheusMetrics,
    config: Config,
    start_time: std::time::Instant,
}

impl HealthChecker {
    pub fn new(metrics: Arc<MetricsCollector>, config: Config) -> Self {
        Self {
            metrics,
            prometheus: PrometheusMetrics::new(),
            config,
            start_time: std::time::Instant::now(),
        }
    }

    pub fn get_health(&self) -> HealthResponse {
        HealthResponse {
            status: self.metrics.get_health_status().to_string(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn get_metrics(&self) -> MetricsResponse {
        MetricsResponse {
            metrics: self.metrics.get_metrics(),
            health_status: self.metrics.get_health_status().to_string(),
        }
    }

    /// Current counters in Prometheus text format.
    pub fn get_prometheus_metrics(&self) -> Result<String, std::fmt::Error> {
        self.prometheus.update_from_metrics(&self.metrics.get_metrics());
        self.prometheus.export_metrics()
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.metrics.get_health_status(), HealthStatus::Healthy)
    }

    pub fn get_detailed_status(&self) -> DetailedStatus {
        let metrics = self.metrics.get_metrics();
        let resolved = metrics.claims_confirmed + metrics.claims_rejected + metrics.claims_failed;

        DetailedStatus {
            health: self.metrics.get_health_status().to_string(),
            uptime_seconds: metrics.uptime_seconds,
            claims_submitted: metrics.claims_submitted,
            claims_confirmed: metrics.claims_confirmed,
            claims_rejected: metrics.claims_rejected,
            claims_failed: metrics.claims_failed,
            claims_cancelled: metrics.claims_cancelled,
            confirmation_rate: if resolved > 0 {
                metrics.claims_confirmed as f64 / resolved as f64
            } else {
                0.0
            },
            average_confirmation_ms: metrics.average_confirmation_ms,
            consecutive_poll_failures: metrics.consecutive_poll_failures,
            error_counts: ErrorCounts {
                network_errors: metrics.network_errors,
                validation_errors: metrics.validation_errors,
                decode_errors: metrics.decode_errors,
                rejections: metrics.rejections,
            },
            config_summary: ConfigSummary {
                api_url: self.config.api_url.clone(),
                catalog_url: self.config.catalog_url().to_string(),
                confirmation_mode: self.config.confirmation_mode(),
                terminal_count: self.config.terminal_count,
                poll_interval_ms: self.config.poll_interval_ms,
                claim_timeout_ms: self.config.claim_timeout_ms,
                max_retries: self.config.max_retries,
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DetailedStatus {
    pub health: String,
    pub uptime_seconds: u64,
    pub claims_submitted: u64,
    pub claims_confirmed: u64,
    pub claims_rejected: u64,
    pub claims_failed: u64,
    pub claims_cancelled: u64,
    pub confirmation_rate: f64,
    pub average_confirmation_ms: f64,
    pub consecutive_poll_failures: u32,
    pub error_counts: ErrorCounts,
    pub config_summary: ConfigSummary,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorCounts {
    pub network_errors: u64,
    pub validation_errors: u64,
    pub decode_errors: u64,
    pub rejections: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigSummary {
    pub api_url: String,
    pub catalog_url: String,
    pub confirmation_mode: ConfirmationMode,
    pub terminal_count: u32,
    pub poll_interval_ms: u64,
    pub claim_timeout_ms: u64,
    pub max_retries: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::ClaimOutcome;

    #[test]
    fn detailed_status_reflects_outcomes_and_config() {
        let metrics = Arc::new(MetricsCollector::new());
        metrics.record_outcome(ClaimOutcome::Confirmed);
        metrics.record_outcome(ClaimOutcome::Confirmed);
        metrics.record_outcome(ClaimOutcome::Rejected);
        metrics.record_outcome(ClaimOutcome::Failed);

        let config = Config { push_url: Some("http://push".into()), ..Config::default() };
        let checker = HealthChecker::new(metrics, config);
        let status = checker.get_detailed_status();

        assert_eq!(status.confirmation_rate, 0.5);
        assert_eq!(status.config_summary.confirmation_mode, ConfirmationMode::Push);
        assert_eq!(status.config_summary.catalog_url, "http://localhost:5000");
        assert!(checker.is_healthy());
    }
}
