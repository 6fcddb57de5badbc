//! Confirmation transports.
//!
//! A transport turns a [`ClaimKey`] into a [`Watch`]: a lazy, finite sequence
//! of confirmation events. Two strategies exist, status polling (here) and a
//! push channel (see [`crate::push`]). Both are consumed through [`Watch`],
//! which enforces single delivery and idempotent stop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

use crate::backend::RewardBackend;
use crate::error::TransportError;
use crate::metrics::MetricsCollector;
use crate::types::{ClaimKey, Receipt};

const DEFAULT_CONFIRMED_MESSAGE: &str = "Claim confirmed";
const DEFAULT_REJECTED_MESSAGE: &str = "Claim was rejected";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Confirmed,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationEvent {
    pub key: ClaimKey,
    pub outcome: Outcome,
    pub message: String,
    pub receipt: Option<Receipt>,
}

impl ConfirmationEvent {
    pub fn confirmed(key: ClaimKey, message: Option<String>, receipt: Option<Receipt>) -> Self {
        Self {
            key,
            outcome: Outcome::Confirmed,
            message: non_empty(message).unwrap_or_else(|| DEFAULT_CONFIRMED_MESSAGE.to_string()),
            receipt,
        }
    }

    pub fn rejected(key: ClaimKey, message: Option<String>) -> Self {
        Self {
            key,
            outcome: Outcome::Rejected,
            message: non_empty(message).unwrap_or_else(|| DEFAULT_REJECTED_MESSAGE.to_string()),
            receipt: None,
        }
    }
}

fn non_empty(message: Option<String>) -> Option<String> {
    message.filter(|m| !m.trim().is_empty())
}

pub type EventStream = BoxStream<'static, Result<ConfirmationEvent, TransportError>>;

#[async_trait]
pub trait ConfirmationTransport: Send + Sync {
    /// Starts waiting for the outcome of the claim identified by `key`.
    async fn watch(&self, key: &ClaimKey) -> Result<Watch, TransportError>;

    fn name(&self) -> &'static str;
}

/// An active confirmation wait.
///
/// Yields at most one item: the first confirmation for its key, or the error
/// that ended the wait. Events for other keys are dropped. Once an item has
/// been yielded, or after [`Watch::stop`], the underlying stream is released
/// and no further polling or delivery happens.
pub struct Watch {
    key: ClaimKey,
    stream: Option<EventStream>,
}

impl Watch {
    pub fn new(key: ClaimKey, stream: EventStream) -> Self {
        Self { key, stream: Some(stream) }
    }

    pub fn key(&self) -> &ClaimKey {
        &self.key
    }

    pub fn is_active(&self) -> bool {
        self.stream.is_some()
    }

    pub async fn next(&mut self) -> Option<Result<ConfirmationEvent, TransportError>> {
        loop {
            let stream = self.stream.as_mut()?;
            match stream.next().await {
                Some(Ok(event)) if event.key != self.key => {
                    tracing::debug!("Dropping confirmation for {} while watching {}", event.key, self.key);
                }
                Some(item) => {
                    self.stream = None;
                    return Some(item);
                }
                None => {
                    self.stream = None;
                    return None;
                }
            }
        }
    }

    /// Stops the wait. Safe to call any number of times.
    pub fn stop(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!("Stopped watching {}", self.key);
        }
    }
}

impl Drop for Watch {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Polls `GET /reward/claimStatus` every `interval` until the claim resolves.
///
/// Failed polls are logged and retried on the next tick. After
/// `max_attempts` polls without an outcome the watch ends with
/// [`TransportError::TimedOut`].
pub struct PollingTransport {
    backend: Arc<dyn RewardBackend>,
    interval: Duration,
    max_attempts: u32,
    metrics: Arc<MetricsCollector>,
}

impl PollingTransport {
    pub fn new(
        backend: Arc<dyn RewardBackend>,
        interval: Duration,
        max_attempts: u32,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self { backend, interval, max_attempts, metrics }
    }
}

struct PollState {
    backend: Arc<dyn RewardBackend>,
    key: ClaimKey,
    interval: Duration,
    max_attempts: u32,
    attempt: u32,
    metrics: Arc<MetricsCollector>,
}

impl PollState {
    async fn poll_once(&mut self) -> Option<Result<ConfirmationEvent, TransportError>> {
        if self.attempt >= self.max_attempts {
            tracing::warn!("No outcome for {} after {} polls", self.key, self.attempt);
            return Some(Err(TransportError::TimedOut));
        }
        tokio::time::sleep(self.interval).await;
        self.attempt += 1;

        match self.backend.claim_status(&self.key).await {
            Ok(status) => {
                self.metrics.record_poll(true);
                if status.claimed {
                    Some(Ok(ConfirmationEvent::confirmed(self.key.clone(), status.message, status.receipt)))
                } else if status.rejected {
                    Some(Ok(ConfirmationEvent::rejected(self.key.clone(), status.message)))
                } else {
                    tracing::debug!("Claim {} still pending (poll {})", self.key, self.attempt);
                    None
                }
            }
            Err(e) => {
                self.metrics.record_poll(false);
                tracing::warn!("Status poll {} for {} failed: {}", self.attempt, self.key, e);
                None
            }
        }
    }
}

#[async_trait]
impl ConfirmationTransport for PollingTransport {
    async fn watch(&self, key: &ClaimKey) -> Result<Watch, TransportError> {
        let state = PollState {
            backend: Arc::clone(&self.backend),
            key: key.clone(),
            interval: self.interval,
            max_attempts: self.max_attempts,
            attempt: 0,
            metrics: Arc::clone(&self.metrics),
        };

        let stream = stream::unfold(Some(state), |state| async move {
            let mut state = state?;
            loop {
                if let Some(item) = state.poll_once().await {
                    return Some((item, None));
                }
            }
        });

        Ok(Watch::new(key.clone(), stream.boxed()))
    }

    fn name(&self) -> &'static str {
        "poll"
    }
}
