//! Message types for the session actor.
//!
//! Round-trip operations reply twice: the oneshot in the message carries the
//! synchronous accept/reject decision, and an accepted request hands back a
//! [`PendingRequest`] that resolves when the server answers.

use crate::errors::SignalingError;
use crate::media::{MediaKind, StreamHandle};
use crate::observer::{ObserverId, SessionObserver};
use crate::registry::Peer;
use crate::room::Room;
use crate::transport::ServerEndpoint;
use common::secret::SecretString;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Weak;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Connection and room state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No transport connection.
    Disconnected,
    /// Transport connect in flight.
    Connecting,
    /// Connected, not in a room.
    Connected,
    /// Join request in flight.
    JoiningRoom,
    /// In a room.
    InRoom,
}

impl ConnectionState {
    /// Returns the state as a log field.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::JoiningRoom => "joining room",
            ConnectionState::InRoom => "in room",
        }
    }

    /// Whether a transport connection is established.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connected | ConnectionState::JoiningRoom | ConnectionState::InRoom
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The local participant's stream and mute flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalState {
    pub stream: StreamHandle,
    pub audio_muted: bool,
    pub video_muted: bool,
}

impl LocalState {
    /// Mute flag for the given kind.
    #[must_use]
    pub fn is_muted(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Audio => self.audio_muted,
            MediaKind::Video => self.video_muted,
        }
    }
}

/// Immutable view of the session, published after every mutation.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub state: ConnectionState,
    pub room: Option<Room>,
    pub local: LocalState,
    /// Remote peers in insertion order.
    pub peers: Vec<Peer>,
}

/// Reply channel for a round-trip acceptance decision.
pub type AcceptReply = oneshot::Sender<Result<PendingRequest, SignalingError>>;

/// Messages sent to the `SessionActor`.
#[derive(Debug)]
pub enum SessionMessage {
    /// Connect the transport.
    Connect {
        endpoint: ServerEndpoint,
        respond_to: AcceptReply,
    },

    /// Join (or switch to) a room.
    JoinRoom {
        room: String,
        key: Option<SecretString>,
        respond_to: AcceptReply,
    },

    /// Leave the current room. No-op outside a room.
    LeaveRoom {
        respond_to: oneshot::Sender<Result<(), SignalingError>>,
    },

    /// Lock the current room with a key.
    LockRoom {
        key: SecretString,
        respond_to: AcceptReply,
    },

    /// Unlock the current room.
    UnlockRoom { respond_to: AcceptReply },

    /// Set a local mute flag.
    SetLocalMute {
        kind: MediaKind,
        muted: bool,
        respond_to: oneshot::Sender<Result<(), SignalingError>>,
    },

    /// Leave any room and close the transport.
    Disconnect { respond_to: oneshot::Sender<()> },

    /// Register an observer.
    AddObserver {
        observer: Weak<dyn SessionObserver>,
        respond_to: oneshot::Sender<ObserverId>,
    },

    /// Deregister an observer.
    RemoveObserver {
        id: ObserverId,
        respond_to: oneshot::Sender<bool>,
    },
}

/// An accepted round-trip request awaiting the server's answer.
///
/// Resolves exactly once. Dropping it does not cancel the request.
#[derive(Debug)]
#[must_use = "a pending request reports whether the server accepted it"]
pub struct PendingRequest {
    operation: &'static str,
    receiver: oneshot::Receiver<Result<(), SignalingError>>,
}

impl PendingRequest {
    pub(crate) fn new(
        operation: &'static str,
        receiver: oneshot::Receiver<Result<(), SignalingError>>,
    ) -> Self {
        Self {
            operation,
            receiver,
        }
    }

    /// Operation this request belongs to (e.g. "join room").
    pub fn operation(&self) -> &'static str {
        self.operation
    }
}

impl Future for PendingRequest {
    type Output = Result<(), SignalingError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let operation = self.operation;
        Pin::new(&mut self.receiver).poll(cx).map(|result| match result {
            Ok(outcome) => outcome,
            Err(_) => Err(SignalingError::Internal(format!(
                "{operation} reply dropped by session"
            ))),
        })
    }
}
