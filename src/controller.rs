//! Claim session controller.
//!
//! Drives a single claim from input to outcome:
//!
//! ```text
//! Idle --submit(valid)--> AwaitingSupervisor
//! AwaitingSupervisor --cancel--> Idle
//! AwaitingSupervisor --confirmation(Confirmed)--> Confirmed
//! AwaitingSupervisor --confirmation(Rejected)--> Rejected
//! AwaitingSupervisor --transport error / timeout--> Failed
//! Confirmed | Rejected | Failed --dismiss--> Idle
//! ```
//!
//! The controller is the only owner of session state. Transports hand it
//! events through a [`Watch`]; anything that arrives for another claim, or
//! after the session left `AwaitingSupervisor`, is ignored.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::backend::RewardBackend;
use crate::config::Config;
use crate::error::{ApiError, ClaimError, TransportError};
use crate::error_handling::{ErrorHandler, RetryConfig};
use crate::metrics::{ClaimOutcome, ErrorType, MetricsCollector};
use crate::qr;
use crate::store::SessionStore;
use crate::tier::{Tier, TierTracker};
use crate::transport::{ConfirmationEvent, ConfirmationTransport, Outcome, Watch};
use crate::types::{ClaimRequest, Receipt, UserDetails, UserId};

const TIMED_OUT_MESSAGE: &str = "Timed out waiting for supervisor confirmation. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimState {
    Idle,
    AwaitingSupervisor,
    Confirmed,
    Rejected,
    Failed,
}

impl ClaimState {
    pub fn is_result(self) -> bool {
        matches!(self, ClaimState::Confirmed | ClaimState::Rejected | ClaimState::Failed)
    }
}

impl fmt::Display for ClaimState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClaimState::Idle => write!(f, "idle"),
            ClaimState::AwaitingSupervisor => write!(f, "awaiting supervisor"),
            ClaimState::Confirmed => write!(f, "confirmed"),
            ClaimState::Rejected => write!(f, "rejected"),
            ClaimState::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClaimSession {
    pub request: ClaimRequest,
    pub state: ClaimState,
    pub created_at: DateTime<Utc>,
    pub result_message: Option<String>,
    pub result_receipt: Option<Receipt>,
}

/// User-facing notices produced by the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    ClaimResult { state: ClaimState, message: String },
    TierAchieved { tier: Tier, points: u64 },
}

pub struct ClaimController {
    backend: Arc<dyn RewardBackend>,
    transport: Arc<dyn ConfirmationTransport>,
    store: Arc<SessionStore>,
    metrics: Arc<MetricsCollector>,
    errors: ErrorHandler,
    tiers: TierTracker,
    terminal_count: u32,
    claim_timeout: std::time::Duration,

    session: Option<ClaimSession>,
    watch: Option<Watch>,
    started: Option<Instant>,
    notifications: Vec<Notification>,
}

impl ClaimController {
    pub fn new(
        config: &Config,
        backend: Arc<dyn RewardBackend>,
        transport: Arc<dyn ConfirmationTransport>,
        store: Arc<SessionStore>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        let errors = ErrorHandler::new(Arc::clone(&metrics))
            .with_retry_config(RetryConfig::from_config(config));
        Self {
            backend,
            transport,
            store,
            metrics,
            errors,
            tiers: TierTracker::new(),
            terminal_count: config.terminal_count,
            claim_timeout: config.get_claim_timeout(),
            session: None,
            watch: None,
            started: None,
            notifications: Vec::new(),
        }
    }

    pub fn state(&self) -> ClaimState {
        self.session.as_ref().map_or(ClaimState::Idle, |s| s.state)
    }

    pub fn session(&self) -> Option<&ClaimSession> {
        self.session.as_ref()
    }

    /// Whether a confirmation wait is still running.
    pub fn is_watching(&self) -> bool {
        self.watch.as_ref().is_some_and(Watch::is_active)
    }

    /// The QR payload of the active session.
    pub fn qr_payload(&self) -> Option<String> {
        self.session.as_ref().and_then(|s| qr::encode(&s.request).ok())
    }

    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
    }

    /// Submits a claim for the logged-in user.
    pub async fn submit_for_current_user(&mut self, terminal_id: &str, pos_no: &str) -> Result<String, ClaimError> {
        let user = self.store.require_user()?;
        self.store.record_activity();
        self.submit(ClaimRequest::new(terminal_id, pos_no, user.user_id)).await
    }

    /// Validates the request, starts the confirmation wait and returns the QR payload.
    ///
    /// Nothing touches the network when validation fails. If the wait cannot
    /// be started the session stays `Idle` so the user can retry.
    pub async fn submit(&mut self, request: ClaimRequest) -> Result<String, ClaimError> {
        if self.state() == ClaimState::AwaitingSupervisor {
            return Err(ClaimError::InFlight);
        }

        let request = ClaimRequest {
            terminal_id: request.terminal_id.trim().to_string(),
            pos_no: request.pos_no.trim().to_string(),
            user_id: request.user_id,
        };
        if let Err(e) = qr::validate(&request, self.terminal_count) {
            self.metrics.record_error(ErrorType::Validation);
            return Err(e.into());
        }
        let payload = qr::encode(&request)?;

        if self.state().is_result() {
            self.reset();
        }

        let key = request.key();
        let watch = match self.transport.watch(&key).await {
            Ok(watch) => watch,
            Err(e) => {
                self.metrics.record_error(ErrorType::Network);
                tracing::warn!("Could not start {} confirmation for {}: {}", self.transport.name(), key, e);
                return Err(e.into());
            }
        };

        tracing::info!("Claim {} submitted, awaiting supervisor ({})", key, self.transport.name());
        self.metrics.record_outcome(ClaimOutcome::Submitted);
        self.session = Some(ClaimSession {
            request,
            state: ClaimState::AwaitingSupervisor,
            created_at: Utc::now(),
            result_message: None,
            result_receipt: None,
        });
        self.watch = Some(watch);
        self.started = Some(Instant::now());
        Ok(payload)
    }

    /// Abandons the pending claim. No network call is made.
    pub fn cancel(&mut self) -> Result<(), ClaimError> {
        let state = self.state();
        if state != ClaimState::AwaitingSupervisor {
            return Err(ClaimError::InvalidState { op: "cancel", state });
        }
        self.reset();
        self.metrics.record_outcome(ClaimOutcome::Cancelled);
        tracing::info!("Claim cancelled");
        Ok(())
    }

    /// Clears a finished claim's result.
    pub fn dismiss(&mut self) -> Result<(), ClaimError> {
        let state = self.state();
        if !state.is_result() {
            return Err(ClaimError::InvalidState { op: "dismiss", state });
        }
        self.reset();
        Ok(())
    }

    /// Explicit "Confirm Claim" step: asks the backend to confirm the pending claim.
    ///
    /// A business rejection ends the session as `Rejected`. Network failures
    /// are returned and leave the session waiting, so the step can be retried.
    /// A successful call returns the backend message; the outcome itself still
    /// arrives through the transport.
    pub async fn confirm_claim(&mut self) -> Result<String, ClaimError> {
        let state = self.state();
        let request = match &self.session {
            Some(session) if state == ClaimState::AwaitingSupervisor => session.request.clone(),
            _ => return Err(ClaimError::InvalidState { op: "confirm", state }),
        };

        match self.backend.claim(&request).await {
            Ok(message) => {
                tracing::info!("Claim {} accepted by backend: {}", request.key(), message);
                Ok(message)
            }
            Err(ApiError::Rejected { message, .. }) => {
                self.metrics.record_error(ErrorType::Rejection);
                let event = ConfirmationEvent::rejected(request.key(), Some(message.clone()));
                self.on_confirmation_event(event).await;
                Ok(message)
            }
            Err(e) => {
                self.metrics.record_error(ErrorType::Network);
                Err(e.into())
            }
        }
    }

    /// Applies a transport event. Returns whether it changed the session.
    pub async fn on_confirmation_event(&mut self, event: ConfirmationEvent) -> bool {
        let current = self.state();
        let session = match self.session.as_mut() {
            Some(s) if current == ClaimState::AwaitingSupervisor && s.request.key() == event.key => s,
            _ => {
                tracing::debug!("Ignoring {:?} for {} in state {}", event.outcome, event.key, current);
                return false;
            }
        };

        let state = match event.outcome {
            Outcome::Confirmed => ClaimState::Confirmed,
            Outcome::Rejected => ClaimState::Rejected,
        };
        session.state = state;
        session.result_message = Some(event.message.clone());
        session.result_receipt = event.receipt;
        let user_id = session.request.user_id;

        self.stop_watch();
        tracing::info!("Claim {} {}: {}", event.key, state, event.message);
        self.notifications.push(Notification::ClaimResult { state, message: event.message });

        match state {
            ClaimState::Confirmed => {
                self.metrics.record_outcome(ClaimOutcome::Confirmed);
                if let Some(started) = self.started.take() {
                    self.metrics.record_confirmation(started.elapsed());
                }
                if let Err(e) = self.refresh_profile(user_id).await {
                    tracing::error!("Balance refresh after claim failed: {}", e);
                }
            }
            _ => self.metrics.record_outcome(ClaimOutcome::Rejected),
        }
        true
    }

    /// Waits for the next transition of the pending claim.
    ///
    /// Returns `None` when nothing is pending. The wait is bounded by the
    /// configured claim timeout, measured from submit.
    pub async fn next_transition(&mut self) -> Option<ClaimState> {
        if self.state() != ClaimState::AwaitingSupervisor {
            return None;
        }
        let deadline = self.started? + self.claim_timeout;
        let watch = self.watch.as_mut()?;

        let item = match tokio::time::timeout_at(deadline, watch.next()).await {
            Ok(item) => item,
            Err(_) => {
                self.fail(TIMED_OUT_MESSAGE.to_string());
                return Some(self.state());
            }
        };

        match item {
            Some(Ok(event)) => {
                self.on_confirmation_event(event).await;
            }
            Some(Err(TransportError::TimedOut)) => self.fail(TIMED_OUT_MESSAGE.to_string()),
            Some(Err(e)) => self.fail(format!("Could not confirm claim: {}", e)),
            None => self.fail("Confirmation stopped before the claim was resolved".to_string()),
        }
        Some(self.state())
    }

    /// Drives the pending claim to its outcome.
    pub async fn await_outcome(&mut self) -> ClaimState {
        while let Some(state) = self.next_transition().await {
            if state != ClaimState::AwaitingSupervisor {
                return state;
            }
        }
        self.state()
    }

    /// Re-reads the user's balance and fires any owed tier celebration.
    pub async fn refresh_profile(&mut self, user_id: UserId) -> Result<UserDetails, ApiError> {
        let backend = Arc::clone(&self.backend);
        let details = self.errors
            .execute_with_retry("user details", || backend.user_details(user_id))
            .await?;

        if let Err(e) = self.store.apply_details(&details) {
            tracing::debug!("Session not updated from refreshed details: {}", e);
        }

        if let Some(tier) = self.tiers.evaluate(&details) {
            tracing::info!("User {} reached {} tier with {} points", user_id, tier, details.user_points);
            self.notifications.push(Notification::TierAchieved { tier, points: details.user_points });

            let update = tier.congratulation_update(&details);
            if let Err(e) = self.errors
                .execute_with_retry("congratulation status", || backend.update_congratulation_status(&update))
                .await
            {
                tracing::error!("Could not record {} congratulation for user {}: {}", tier, user_id, e);
            }
        }
        Ok(details)
    }

    fn fail(&mut self, message: String) {
        self.stop_watch();
        if let Some(session) = self.session.as_mut() {
            session.state = ClaimState::Failed;
            session.result_message = Some(message.clone());
        }
        self.metrics.record_outcome(ClaimOutcome::Failed);
        tracing::warn!("Claim failed: {}", message);
        self.notifications.push(Notification::ClaimResult { state: ClaimState::Failed, message });
    }

    fn stop_watch(&mut self) {
        if let Some(mut watch) = self.watch.take() {
            watch.stop();
        }
    }

    fn reset(&mut self) {
        self.stop_watch();
        self.session = None;
        self.started = None;
    }
}

impl Drop for ClaimController {
    fn drop(&mut self) {
        if self.state() == ClaimState::AwaitingSupervisor {
            tracing::debug!("Claim controller dropped while awaiting supervisor");
        }
        self.reset();
    }
}
