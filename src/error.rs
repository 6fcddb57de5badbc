//! Error taxonomy for the rewards client.
//!
//! Validation and decode errors are produced locally and never reach the
//! network. [`ApiError`] covers a single backend call, [`TransportError`] the
//! confirmation wait, and [`ClaimError`] is what the claim controller surfaces.

use thiserror::Error;

use crate::controller::ClaimState;
use crate::store::StoreError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Terminal is required")]
    MissingTerminal,
    #[error("SI No is required")]
    MissingPosNo,
    #[error("Unknown terminal {terminal}: expected 1 to {max}")]
    UnknownTerminal { terminal: String, max: u32 },
    #[error("{0} is required")]
    MissingField(&'static str),
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Malformed claim payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Invalid claim payload: {0}")]
    Invalid(#[from] ValidationError),
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    /// The backend refused the request; `message` is shown to the user verbatim.
    #[error("{message}")]
    Rejected { status: u16, message: String },
    #[error("Backend error {status}: {body}")]
    Server { status: u16, body: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(#[from] serde_json::Error),
}

impl ApiError {
    pub fn is_rejection(&self) -> bool {
        matches!(self, ApiError::Rejected { .. })
    }
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("Confirmation channel closed")]
    ChannelClosed,
    #[error("Timed out waiting for supervisor confirmation")]
    TimedOut,
    #[error("Could not subscribe to confirmation channel: {0}")]
    Subscribe(String),
}

#[derive(Error, Debug)]
pub enum ClaimError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("A claim is already waiting for supervisor confirmation")]
    InFlight,
    #[error("Cannot {op} while {state}")]
    InvalidState { op: &'static str, state: ClaimState },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Encoding claim payload failed: {0}")]
    Encode(#[from] serde_json::Error),
}
