//! Signaling session error types.
//!
//! Network-origin failures are delivered through the failing request's
//! `PendingRequest`; state-machine misuse is rejected before any transport call.
//! Unknown peer ids are not errors at all (they are logged no-ops).

use crate::actors::ConnectionState;
use crate::media::MediaError;
use crate::transport::TransportError;
use thiserror::Error;

/// Signaling session error type.
#[derive(Debug, Clone, Error)]
pub enum SignalingError {
    /// Connecting, sending, or awaiting a reply failed at the transport.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The room requires a key, or the supplied key was wrong.
    ///
    /// Recoverable: prompt for a key and call `join_room` again.
    #[error("Room '{room}' requires a valid key")]
    Authentication { room: String },

    /// The operation is not valid in the current connection state.
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: ConnectionState,
    },

    /// Another round-trip request is still in flight.
    #[error("Cannot start a new request while {pending} is pending")]
    Busy { pending: &'static str },

    /// The server refused the request for a reason other than the room key.
    #[error("Request rejected by server: {0}")]
    Rejected(String),

    /// The media engine failed to create or attach a stream.
    #[error("Media engine error: {0}")]
    Media(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The session actor is gone or dropped a reply channel.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SignalingError {
    /// Whether the caller can reasonably retry the same operation.
    ///
    /// Transport failures, key prompts, busy rejections, and server refusals
    /// are recoverable. State misuse, media, config, and internal errors
    /// indicate a programming or environment problem.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            SignalingError::Transport(_)
            | SignalingError::Authentication { .. }
            | SignalingError::Busy { .. }
            | SignalingError::Rejected(_) => true,
            SignalingError::InvalidState { .. }
            | SignalingError::Media(_)
            | SignalingError::Config(_)
            | SignalingError::Internal(_) => false,
        }
    }

    /// Whether this error is the key prompt produced by a protected room.
    #[must_use]
    pub fn is_authentication(&self) -> bool {
        matches!(self, SignalingError::Authentication { .. })
    }
}

impl From<TransportError> for SignalingError {
    fn from(err: TransportError) -> Self {
        SignalingError::Transport(err.to_string())
    }
}

impl From<MediaError> for SignalingError {
    fn from(err: MediaError) -> Self {
        SignalingError::Media(err.to_string())
    }
}
