use std::sync::atomic::{AtomicU64, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metrics {
    // Claim outcomes
    pub claims_submitted: u64,
    pub claims_confirmed: u64,
    pub claims_rejected: u64,
    pub claims_failed: u64,
    pub claims_cancelled: u64,

    // Confirmation wait
    pub polls: u64,
    pub poll_failures: u64,
    pub consecutive_poll_failures: u32,
    pub average_confirmation_ms: f64,
    pub min_confirmation_ms: u64,
    pub max_confirmation_ms: u64,

    // Error metrics
    pub network_errors: u64,
    pub validation_errors: u64,
    pub decode_errors: u64,
    pub rejections: u64,

    // Health metrics
    pub uptime_seconds: u64,
    pub last_confirmation: Option<u64>,
}

#[derive(Debug)]
pub struct MetricsCollector {
    claims_submitted: AtomicU64,
    claims_confirmed: AtomicU64,
    claims_rejected: AtomicU64,
    claims_failed: AtomicU64,
    claims_cancelled: AtomicU64,
    polls: AtomicU64,
    poll_failures: AtomicU64,
    consecutive_poll_failures: AtomicU32,
    network_errors: AtomicU64,
    validation_errors: AtomicU64,
    decode_errors: AtomicU64,
    rejections: AtomicU64,

    start_time: Instant,
    last_confirmation: Mutex<Option<Instant>>,

    // Time from submit to supervisor confirmation
    total_confirmation_ms: AtomicU64,
    min_confirmation_ms: AtomicU64,
    max_confirmation_ms: AtomicU64,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            claims_submitted: AtomicU64::new(0),
            claims_confirmed: AtomicU64::new(0),
            claims_rejected: AtomicU64::new(0),
            claims_failed: AtomicU64::new(0),
            claims_cancelled: AtomicU64::new(0),
            polls: AtomicU64::new(0),
            poll_failures: AtomicU64::new(0),
            consecutive_poll_failures: AtomicU32::new(0),
            network_errors: AtomicU64::new(0),
            validation_errors: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
            start_time: Instant::now(),
            last_confirmation: Mutex::new(None),
            total_confirmation_ms: AtomicU64::new(0),
            min_confirmation_ms: AtomicU64::new(u64::MAX),
            max_confirmation_ms: AtomicU64::new(0),
        }
    }

    pub fn record_outcome(&self, outcome: ClaimOutcome) {
        let counter = match outcome {
            ClaimOutcome::Submitted => &self.claims_submitted,
            ClaimOutcome::Confirmed => &self.claims_confirmed,
            ClaimOutcome::Rejected => &self.claims_rejected,
            ClaimOutcome::Failed => &self.claims_failed,
            ClaimOutcome::Cancelled => &self.claims_cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_confirmation(&self, waited: Duration) {
        let ms = waited.as_millis() as u64;
        self.total_confirmation_ms.fetch_add(ms, Ordering::Relaxed);

        if let Ok(mut last) = self.last_confirmation.lock() {
            *last = Some(Instant::now());
        }

        let mut current_min = self.min_confirmation_ms.load(Ordering::Relaxed);
        while ms < current_min {
            match self.min_confirmation_ms.compare_exchange_weak(
                current_min, ms, Ordering::Relaxed, Ordering::Relaxed
            ) {
                Ok(_) => break,
                Err(new_min) => current_min = new_min,
            }
        }

        let mut current_max = self.max_confirmation_ms.load(Ordering::Relaxed);
        while ms > current_max {
            match self.max_confirmation_ms.compare_exchange_weak(
                current_max, ms, Ordering::Relaxed, Ordering::Relaxed
            ) {
                Ok(_) => break,
                Err(new_max) => current_max = new_max,
            }
        }
    }

    pub fn record_poll(&self, success: bool) {
        self.polls.fetch_add(1, Ordering::Relaxed);
        if success {
            self.consecutive_poll_failures.store(0, Ordering::Relaxed);
        } else {
            self.poll_failures.fetch_add(1, Ordering::Relaxed);
            self.consecutive_poll_failures.fetch_add(1, Ordering::Relaxed);
            self.network_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_error(&self, error_type: ErrorType) {
        match error_type {
            ErrorType::Network => self.network_errors.fetch_add(1, Ordering::Relaxed),
            ErrorType::Validation => self.validation_errors.fetch_add(1, Ordering::Relaxed),
            ErrorType::Decode => self.decode_errors.fetch_add(1, Ordering::Relaxed),
            ErrorType::Rejection => self.rejections.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn get_metrics(&self) -> Metrics {
        let claims_confirmed = self.claims_confirmed.load(Ordering::Relaxed);
        let total_confirmation_ms = self.total_confirmation_ms.load(Ordering::Relaxed);
        let min_confirmation_ms = self.min_confirmation_ms.load(Ordering::Relaxed);

        let average_confirmation_ms = if claims_confirmed > 0 {
            total_confirmation_ms as f64 / claims_confirmed as f64
        } else {
            0.0
        };

        let last_confirmation = if let Ok(last) = self.last_confirmation.lock() {
            last.map(|time| time.duration_since(self.start_time).as_secs())
        } else {
            None
        };

        Metrics {
            claims_submitted: self.claims_submitted.load(Ordering::Relaxed),
            claims_confirmed,
            claims_rejected: self.claims_rejected.load(Ordering::Relaxed),
            claims_failed: self.claims_failed.load(Ordering::Relaxed),
            claims_cancelled: self.claims_cancelled.load(Ordering::Relaxed),
            polls: self.polls.load(Ordering::Relaxed),
            poll_failures: self.poll_failures.load(Ordering::Relaxed),
            consecutive_poll_failures: self.consecutive_poll_failures.load(Ordering::Relaxed),
            average_confirmation_ms,
            min_confirmation_ms: if min_confirmation_ms == u64::MAX { 0 } else { min_confirmation_ms },
            max_confirmation_ms: self.max_confirmation_ms.load(Ordering::Relaxed),
            network_errors: self.network_errors.load(Ordering::Relaxed),
            validation_errors: self.validation_errors.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            rejections: self.rejections.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            last_confirmation,
        }
    }

    /// Health is driven by the backend's reachability as seen by status polls.
    pub fn get_health_status(&self) -> HealthStatus {
        let consecutive = self.consecutive_poll_failures.load(Ordering::Relaxed);
        let polls = self.polls.load(Ordering::Relaxed);
        let failures = self.poll_failures.load(Ordering::Relaxed);

        let failure_rate = if polls > 0 {
            failures as f64 / polls as f64
        } else {
            0.0
        };

        if consecutive >= 10 {
            HealthStatus::Critical
        } else if consecutive >= 5 || failure_rate > 0.5 {
            HealthStatus::Unhealthy
        } else if consecutive >= 2 || failure_rate > 0.2 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Submitted,
    Confirmed,
    Rejected,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    Network,
    Validation,
    Decode,
    Rejection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Critical,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
            HealthStatus::Critical => write!(f, "critical"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consecutive_poll_failures_degrade_health() {
        let metrics = MetricsCollector::new();
        for _ in 0..8 {
            metrics.record_poll(true);
        }
        assert_eq!(metrics.get_health_status(), HealthStatus::Healthy);

        metrics.record_poll(false);
        metrics.record_poll(false);
        assert_eq!(metrics.get_health_status(), HealthStatus::Degraded);

        metrics.record_poll(true);
        assert_eq!(metrics.get_metrics().consecutive_poll_failures, 0);
    }

    #[test]
    fn confirmation_latency_tracks_min_and_max() {
        let metrics = MetricsCollector::new();
        for ms in [900, 300, 1200] {
            metrics.record_outcome(ClaimOutcome::Confirmed);
            metrics.record_confirmation(Duration::from_millis(ms));
        }
        let snapshot = metrics.get_metrics();
        assert_eq!(snapshot.min_confirmation_ms, 300);
        assert_eq!(snapshot.max_confirmation_ms, 1200);
        assert_eq!(snapshot.average_confirmation_ms, 800.0);
        assert!(snapshot.last_confirmation.is_some());
    }
}
