use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::ApiError;
use crate::metrics::{ErrorType, MetricsCollector};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_retry_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
            backoff_multiplier: 2.0,
            max_retry_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_delay: config.get_retry_delay(),
            ..Self::default()
        }
    }
}

/// Retries idempotent backend calls and accounts for their failures.
///
/// Business rejections are returned immediately; retrying them cannot succeed.
pub struct ErrorHandler {
    retry_config: RetryConfig,
    metrics: Arc<MetricsCollector>,
}

impl ErrorHandler {
    pub fn new(metrics: Arc<MetricsCollector>) -> Self {
        Self {
            retry_config: RetryConfig::default(),
            metrics,
        }
    }

    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    pub async fn execute_with_retry<F, Fut, T>(&self, name: &str, operation: F) -> Result<T, ApiError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut delay = self.retry_config.retry_delay;
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(error) if error.is_rejection() => {
                    self.metrics.record_error(ErrorType::Rejection);
                    return Err(error);
                }
                Err(error) => {
                    self.metrics.record_error(ErrorType::Network);
                    if attempt >= self.retry_config.max_retries {
                        tracing::error!("{} failed after {} attempts: {}", name, attempt + 1, error);
                        return Err(error);
                    }
                    tracing::warn!("{} failed (attempt {}): {}. Retrying in {:?}", name, attempt + 1, error, delay);
                    tokio::time::sleep(delay).await;

                    // Exponential backoff
                    delay = Duration::from_secs_f64(
                        (delay.as_secs_f64() * self.retry_config.backoff_multiplier)
                            .min(self.retry_config.max_retry_delay.as_secs_f64())
                    );
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn handler(metrics: Arc<MetricsCollector>) -> ErrorHandler {
        ErrorHandler::new(metrics).with_retry_config(RetryConfig {
            max_retries: 2,
            retry_delay: Duration::from_millis(10),
            ..RetryConfig::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn retries_server_errors_until_success() {
        let metrics = Arc::new(MetricsCollector::new());
        let calls = AtomicU32::new(0);
        let result = handler(metrics.clone())
            .execute_with_retry("refresh", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ApiError::Server { status: 503, body: String::new() })
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(metrics.get_metrics().network_errors, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let metrics = Arc::new(MetricsCollector::new());
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = handler(metrics)
            .execute_with_retry("refresh", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ApiError::Server { status: 500, body: String::new() })
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn rejections_are_not_retried() {
        let metrics = Arc::new(MetricsCollector::new());
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = handler(metrics.clone())
            .execute_with_retry("claim", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ApiError::Rejected { status: 409, message: "duplicate".into() })
            })
            .await;
        assert!(result.unwrap_err().is_rejection());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.get_metrics().rejections, 1);
    }
}
