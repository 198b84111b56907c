//! Opaque encode/decode of wire messages.
//!
//! The serialization codec is an external concern consumed as plain
//! byte-vector encode/decode; JSON is the concrete codec behind the helpers,
//! but nothing outside this module depends on that.

use super::GatewayError;
use crate::message::{CompletionEvent, DispatchCommand};

/// Encode a dispatch command for publication.
pub fn encode_command(command: &DispatchCommand) -> Result<Vec<u8>, GatewayError> {
    serde_json::to_vec(command).map_err(|source| GatewayError::Codec { source })
}

/// Decode a dispatch command (worker side, and tests).
pub fn decode_command(payload: &[u8]) -> Result<DispatchCommand, GatewayError> {
    serde_json::from_slice(payload).map_err(|source| GatewayError::Codec { source })
}

/// Encode a completion event for publication (worker side, and tests).
pub fn encode_completion(event: &CompletionEvent) -> Result<Vec<u8>, GatewayError> {
    serde_json::to_vec(event).map_err(|source| GatewayError::Codec { source })
}

/// Decode an inbound completion event.
pub fn decode_completion(payload: &[u8]) -> Result<CompletionEvent, GatewayError> {
    serde_json::from_slice(payload).map_err(|source| GatewayError::Codec { source })
}
