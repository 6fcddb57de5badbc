//! Supervisor side of a claim: decode a scanned QR payload and confirm it.

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;

use crate::backend::RewardBackend;
use crate::error::{ApiError, DecodeError, ValidationError};
use crate::metrics::{ErrorType, MetricsCollector};
use crate::qr;
use crate::types::ClaimKey;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Claim for {0} was already confirmed")]
    AlreadyConfirmed(ClaimKey),
    #[error(transparent)]
    Api(#[from] ApiError),
}

pub struct SupervisorScanner {
    backend: Arc<dyn RewardBackend>,
    metrics: Arc<MetricsCollector>,
    terminal_count: u32,
    confirmed: HashSet<ClaimKey>,
}

impl SupervisorScanner {
    pub fn new(backend: Arc<dyn RewardBackend>, metrics: Arc<MetricsCollector>, terminal_count: u32) -> Self {
        Self { backend, metrics, terminal_count, confirmed: HashSet::new() }
    }

    /// Forwards a scanned payload to `/reward/claim` and returns the backend message.
    ///
    /// Payloads that do not decode are never sent. A payload that was already
    /// confirmed by this scanner is refused until [`reset`](Self::reset).
    pub async fn confirm_scanned(&mut self, text: &str) -> Result<String, ScanError> {
        let request = qr::decode(text).inspect_err(|e| {
            self.metrics.record_error(ErrorType::Decode);
            tracing::warn!("Rejected scanned payload: {}", e);
        })?;
        qr::validate(&request, self.terminal_count).inspect_err(|_| {
            self.metrics.record_error(ErrorType::Validation);
        })?;

        let key = request.key();
        if self.confirmed.contains(&key) {
            return Err(ScanError::AlreadyConfirmed(key));
        }

        match self.backend.claim(&request).await {
            Ok(message) => {
                tracing::info!("Scanned claim {} for user {} confirmed", key, request.user_id);
                self.confirmed.insert(key);
                Ok(message)
            }
            Err(e) => {
                let kind = if e.is_rejection() { ErrorType::Rejection } else { ErrorType::Network };
                self.metrics.record_error(kind);
                Err(e.into())
            }
        }
    }

    pub fn reset(&mut self) {
        self.confirmed.clear();
    }
}
