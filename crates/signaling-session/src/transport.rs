//! Transport port: the bidirectional signaling channel consumed by the session.
//!
//! The session never establishes sockets or encodes frames itself. An
//! application supplies a [`Transport`] that connects to the signaling server,
//! delivers [`InboundEvent`]s on a channel, and accepts [`OutboundEvent`]s.
//!
//! Events are serde-serializable and adjacently tagged so a transport can put
//! them on the wire directly:
//!
//! ```text
//! {"event": "join-room", "payload": {"request_id": "...", "room": "lobby", "key": null}}
//! {"event": "stream-added", "payload": {"peer_id": "alice", "stream_id": "a1"}}
//! ```

use crate::media::MediaKind;
use async_trait::async_trait;
use common::secret::{ExposeSecret, SecretString};
use common::types::{PeerId, RequestId};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

/// Address of a signaling server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEndpoint {
    /// Host name or IP address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Whether to use TLS.
    pub secure: bool,
}

impl ServerEndpoint {
    /// Create an endpoint.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, secure: bool) -> Self {
        Self {
            host: host.into(),
            port,
            secure,
        }
    }

    /// WebSocket URL for this endpoint (`ws://` or `wss://`).
    #[must_use]
    pub fn url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

impl fmt::Display for ServerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

/// Errors raised by a [`Transport`] implementation.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Connection could not be established.
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    /// An outbound event could not be queued or written.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// The connection is not open.
    #[error("Connection closed")]
    Closed,
}

/// Why the server refused a join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum JoinRejection {
    /// The room is locked and the key was missing or wrong.
    PasswordRequired,
    /// The room has no free slots.
    RoomFull,
    /// Any other refusal.
    Other { message: String },
}

impl fmt::Display for JoinRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinRejection::PasswordRequired => f.write_str("password required"),
            JoinRejection::RoomFull => f.write_str("room full"),
            JoinRejection::Other { message } => f.write_str(message),
        }
    }
}

/// Outcome carried by a join reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum JoinOutcome {
    /// Joined; `locked` is the room's lock state at join time.
    Joined { locked: bool },
    /// Refused.
    Rejected(JoinRejection),
}

/// Events sent by the session to the signaling server.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum OutboundEvent {
    /// Ask to join a room, optionally with its key.
    JoinRoom {
        request_id: RequestId,
        room: String,
        #[serde(serialize_with = "expose_optional_key")]
        key: Option<SecretString>,
    },
    /// Leave the current room. Fire-and-forget.
    LeaveRoom { room: String },
    /// Lock the current room with a key.
    LockRoom {
        request_id: RequestId,
        room: String,
        #[serde(serialize_with = "expose_key")]
        key: SecretString,
    },
    /// Remove the lock from the current room.
    UnlockRoom { request_id: RequestId, room: String },
    /// Tell peers the local audio/video mute flag changed.
    MuteToggle { kind: MediaKind, muted: bool },
}

impl OutboundEvent {
    /// Event name as it appears on the wire (bounded set, used as a metric label).
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            OutboundEvent::JoinRoom { .. } => "join-room",
            OutboundEvent::LeaveRoom { .. } => "leave-room",
            OutboundEvent::LockRoom { .. } => "lock-room",
            OutboundEvent::UnlockRoom { .. } => "unlock-room",
            OutboundEvent::MuteToggle { .. } => "mute-toggle",
        }
    }

    /// Request ID for round-trip events.
    #[must_use]
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            OutboundEvent::JoinRoom { request_id, .. }
            | OutboundEvent::LockRoom { request_id, .. }
            | OutboundEvent::UnlockRoom { request_id, .. } => Some(*request_id),
            OutboundEvent::LeaveRoom { .. } | OutboundEvent::MuteToggle { .. } => None,
        }
    }
}

/// Events delivered by the signaling server to the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum InboundEvent {
    /// Reply to a `join-room` request.
    JoinResult {
        request_id: RequestId,
        outcome: JoinOutcome,
    },
    /// Reply to a `lock-room` request. `error` is set when refused.
    LockResult {
        request_id: RequestId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Reply to an `unlock-room` request. `error` is set when refused.
    UnlockResult {
        request_id: RequestId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// A peer joined and exposed a media stream.
    #[serde(alias = "peer-joined")]
    StreamAdded { peer_id: PeerId, stream_id: String },
    /// A peer left or its stream went away.
    #[serde(alias = "peer-left")]
    StreamRemoved { peer_id: PeerId },
    /// A peer toggled its audio or video mute.
    PeerMuteToggle {
        peer_id: PeerId,
        kind: MediaKind,
        muted: bool,
    },
    /// The room's lock state changed (possibly by another member).
    LockChanged { locked: bool },
}

impl InboundEvent {
    /// Event name (bounded set, used as a metric label).
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            InboundEvent::JoinResult { .. } => "join-result",
            InboundEvent::LockResult { .. } => "lock-result",
            InboundEvent::UnlockResult { .. } => "unlock-result",
            InboundEvent::StreamAdded { .. } => "stream-added",
            InboundEvent::StreamRemoved { .. } => "stream-removed",
            InboundEvent::PeerMuteToggle { .. } => "peer-mute-toggle",
            InboundEvent::LockChanged { .. } => "lock-changed",
        }
    }
}

fn expose_optional_key<S: Serializer>(
    key: &Option<SecretString>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match key {
        Some(key) => serializer.serialize_some(key.expose_secret()),
        None => serializer.serialize_none(),
    }
}

fn expose_key<S: Serializer>(key: &SecretString, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(key.expose_secret())
}

/// Bidirectional signaling channel.
///
/// Implementations own connection establishment, reconnection policy, and
/// wire encoding. Dropping the sender half of the channel returned by
/// [`Transport::connect`] tells the session the connection was lost.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection and return the channel inbound events arrive on.
    async fn connect(
        &self,
        endpoint: &ServerEndpoint,
    ) -> Result<mpsc::Receiver<InboundEvent>, TransportError>;

    /// Queue an event for delivery. Must not wait on the network.
    fn send(&self, event: OutboundEvent) -> Result<(), TransportError>;

    /// Close the connection. Idempotent.
    fn disconnect(&self);
}
