use prometheus_client::{
    encoding::text::encode,
    metrics::{counter::Counter, gauge::Gauge},
    registry::Registry,
};
use crate::metrics::Metrics;

/// Prometheus view of the [`MetricsCollector`](crate::metrics::MetricsCollector) snapshot.
pub struct PrometheusMetrics {
    registry: Registry,

    // Counters
    claims_submitted: Counter,
    claims_confirmed: Counter,
    claims_rejected: Counter,
    claims_failed: Counter,
    claims_cancelled: Counter,
    polls: Counter,
    poll_failures: Counter,
    network_errors: Counter,
    validation_errors: Counter,
    decode_errors: Counter,
    rejections: Counter,

    // Gauges
    uptime_seconds: Gauge<i64>,
    consecutive_poll_failures: Gauge<i64>,
    average_confirmation_ms: Gauge<i64>,
    max_confirmation_ms: Gauge<i64>,
}

impl Default for PrometheusMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PrometheusMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let claims_submitted = Counter::default();
        let claims_confirmed = Counter::default();
        let claims_rejected = Counter::default();
        let claims_failed = Counter::default();
        let claims_cancelled = Counter::default();
        let polls = Counter::default();
        let poll_failures = Counter::default();
        let network_errors = Counter::default();
        let validation_errors = Counter::default();
        let decode_errors = Counter::default();
        let rejections = Counter::default();

        let uptime_seconds = Gauge::default();
        let consecutive_poll_failures = Gauge::default();
        let average_confirmation_ms = Gauge::default();
        let max_confirmation_ms = Gauge::default();

        registry.register("kai_rewards_claims_submitted", "Claims that entered supervisor confirmation", claims_submitted.clone());
        registry.register("kai_rewards_claims_confirmed", "Claims confirmed by a supervisor", claims_confirmed.clone());
        registry.register("kai_rewards_claims_rejected", "Claims rejected by the backend", claims_rejected.clone());
        registry.register("kai_rewards_claims_failed", "Claims that timed out or lost their confirmation channel", claims_failed.clone());
        registry.register("kai_rewards_claims_cancelled", "Claims cancelled by the user", claims_cancelled.clone());
        registry.register("kai_rewards_polls", "Claim status polls issued", polls.clone());
        registry.register("kai_rewards_poll_failures", "Claim status polls that failed", poll_failures.clone());
        registry.register("kai_rewards_network_errors", "Backend calls that failed at the transport level", network_errors.clone());
        registry.register("kai_rewards_validation_errors", "Claim inputs refused locally", validation_errors.clone());
        registry.register("kai_rewards_decode_errors", "Scanned payloads that did not decode", decode_errors.clone());
        registry.register("kai_rewards_rejections", "Business rejections returned by the backend", rejections.clone());
        registry.register("kai_rewards_uptime_seconds", "Client uptime in seconds", uptime_seconds.clone());
        registry.register("kai_rewards_consecutive_poll_failures", "Status polls failed in a row", consecutive_poll_failures.clone());
        registry.register("kai_rewards_average_confirmation_ms", "Mean time from submit to confirmation in milliseconds", average_confirmation_ms.clone());
        registry.register("kai_rewards_max_confirmation_ms", "Longest time from submit to confirmation in milliseconds", max_confirmation_ms.clone());

        Self {
            registry,
            claims_submitted,
            claims_confirmed,
            claims_rejected,
            claims_failed,
            claims_cancelled,
            polls,
            poll_failures,
            network_errors,
            validation_errors,
            decode_errors,
            rejections,
            uptime_seconds,
            consecutive_poll_failures,
            average_confirmation_ms,
            max_confirmation_ms,
        }
    }

    pub fn update_from_metrics(&self, metrics: &Metrics) {
        sync(&self.claims_submitted, metrics.claims_submitted);
        sync(&self.claims_confirmed, metrics.claims_confirmed);
        sync(&self.claims_rejected, metrics.claims_rejected);
        sync(&self.claims_failed, metrics.claims_failed);
        sync(&self.claims_cancelled, metrics.claims_cancelled);
        sync(&self.polls, metrics.polls);
        sync(&self.poll_failures, metrics.poll_failures);
        sync(&self.network_errors, metrics.network_errors);
        sync(&self.validation_errors, metrics.validation_errors);
        sync(&self.decode_errors, metrics.decode_errors);
        sync(&self.rejections, metrics.rejections);

        self.uptime_seconds.set(metrics.uptime_seconds as i64);
        self.consecutive_poll_failures.set(i64::from(metrics.consecutive_poll_failures));
        self.average_confirmation_ms.set(metrics.average_confirmation_ms as i64);
        self.max_confirmation_ms.set(metrics.max_confirmation_ms as i64);
    }

    pub fn export_metrics(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        encode(&mut buffer, &self.registry)?;
        Ok(buffer)
    }
}

// Counters only move forward, so catch up by the difference.
fn sync(counter: &Counter, total: u64) {
    let current = counter.get();
    if total > current {
        counter.inc_by(total - current);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{ClaimOutcome, MetricsCollector};

    #[test]
    fn exports_collector_snapshot() {
        let collector = MetricsCollector::new();
        collector.record_outcome(ClaimOutcome::Submitted);
        collector.record_outcome(ClaimOutcome::Confirmed);
        collector.record_poll(false);

        let prometheus = PrometheusMetrics::new();
        prometheus.update_from_metrics(&collector.get_metrics());
        prometheus.update_from_metrics(&collector.get_metrics());

        let text = prometheus.export_metrics().unwrap();
        assert!(text.contains("kai_rewards_claims_confirmed_total 1"));
        assert!(text.contains("kai_rewards_poll_failures_total 1"));
        assert!(text.contains("kai_rewards_consecutive_poll_failures 1"));
    }
}
