//! QR payload codec.
//!
//! The payload is a JSON object with exactly `terminalId`, `posNo` and
//! `userId`, in that order. It carries no nonce or signature.

use crate::error::{DecodeError, ValidationError};
use crate::types::ClaimRequest;

pub fn encode(request: &ClaimRequest) -> Result<String, serde_json::Error> {
    serde_json::to_string(request)
}

pub fn decode(text: &str) -> Result<ClaimRequest, DecodeError> {
    let request: ClaimRequest = serde_json::from_str(text.trim())?;
    validate_fields(&request)?;
    Ok(request)
}

/// Checks that both claim fields are present.
pub fn validate_fields(request: &ClaimRequest) -> Result<(), ValidationError> {
    if request.terminal_id.trim().is_empty() {
        return Err(ValidationError::MissingTerminal);
    }
    if request.pos_no.trim().is_empty() {
        return Err(ValidationError::MissingPosNo);
    }
    Ok(())
}

/// Full input validation: fields present and terminal within `1..=terminal_count`.
pub fn validate(request: &ClaimRequest, terminal_count: u32) -> Result<(), ValidationError> {
    validate_fields(request)?;
    match request.terminal_id.trim().parse::<u32>() {
        Ok(n) if (1..=terminal_count).contains(&n) => Ok(()),
        _ => Err(ValidationError::UnknownTerminal {
            terminal: request.terminal_id.clone(),
            max: terminal_count,
        }),
    }
}
