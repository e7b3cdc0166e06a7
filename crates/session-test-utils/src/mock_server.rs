//! In-memory signaling server for session testing.
//!
//! Implements [`Transport`] and answers round-trip requests the way a real
//! server would:
//! - Joins succeed unless the room is full or protected by a different key
//! - Locks and unlocks succeed (and update the room's key) unless refused
//! - Leave and mute-toggle events are recorded without a reply
//!
//! Tests drive remote activity with [`MockSignalingServer::peer_joined`] and
//! friends, and simulate connection loss with
//! [`MockSignalingServer::close_connection`].
//!
//! # Example
//!
//! ```rust,ignore
//! use session_test_utils::MockSignalingServer;
//!
//! let server = MockSignalingServer::builder()
//!     .with_protected_room("vault", "s3cret")
//!     .with_full_room("packed")
//!     .build();
//!
//! // Hand `Arc::new(server.clone())` to `SessionActor::spawn` and keep `server`
//! // to push events and inspect what the session sent.
//! ```

use async_trait::async_trait;
use common::secret::ExposeSecret;
use common::types::{PeerId, RequestId};
use signaling_session::media::MediaKind;
use signaling_session::transport::{
    InboundEvent, JoinOutcome, JoinRejection, OutboundEvent, ServerEndpoint, Transport,
    TransportError,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::fixtures::TestPeer;

/// Inbound channel capacity per connection.
const INBOUND_BUFFER: usize = 64;

/// Mock signaling server.
#[derive(Debug, Clone, Default)]
pub struct MockSignalingServer {
    inner: Arc<Mutex<MockServerInner>>,
}

#[derive(Debug, Default)]
struct MockServerInner {
    /// Room name -> key required to join.
    protected_rooms: HashMap<String, String>,
    /// Rooms that refuse every join.
    full_rooms: HashSet<String>,
    /// Reason every connect fails with, if set.
    refuse_connect: Option<String>,
    /// Reason every lock/unlock fails with, if set.
    refuse_lock_changes: Option<String>,
    /// When set, round-trip requests get no automatic reply.
    manual_replies: bool,
    /// When set, `send` fails.
    failing_sends: bool,
    /// Sender half of the current connection's inbound channel.
    inbound: Option<mpsc::Sender<InboundEvent>>,
    /// Every event the session sent, in order.
    sent: Vec<OutboundEvent>,
    /// Every endpoint the session connected to.
    connects: Vec<ServerEndpoint>,
    disconnects: usize,
}

impl MockSignalingServer {
    /// Create a new MockSignalingServer builder.
    #[must_use]
    pub fn builder() -> MockSignalingServerBuilder {
        MockSignalingServerBuilder::default()
    }

    /// Create a server with open rooms and automatic replies.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an inbound event on the current connection.
    ///
    /// # Panics
    ///
    /// Panics if no connection is open or the inbound buffer is full.
    pub fn push(&self, event: InboundEvent) {
        let inner = self.inner.lock().unwrap();
        inner
            .inbound
            .as_ref()
            .expect("no open connection")
            .try_send(event)
            .expect("inbound buffer full or session gone");
    }

    /// A peer joined the room with its stream.
    pub fn peer_joined(&self, peer: &TestPeer) {
        self.push(InboundEvent::StreamAdded {
            peer_id: peer.peer_id.clone(),
            stream_id: peer.stream_id.clone(),
        });
    }

    /// A peer left the room.
    pub fn peer_left(&self, peer_id: &str) {
        self.push(InboundEvent::StreamRemoved {
            peer_id: PeerId::new(peer_id),
        });
    }

    /// A peer toggled a mute flag.
    pub fn peer_muted(&self, peer_id: &str, kind: MediaKind, muted: bool) {
        self.push(InboundEvent::PeerMuteToggle {
            peer_id: PeerId::new(peer_id),
            kind,
            muted,
        });
    }

    /// Another member locked or unlocked the room.
    pub fn lock_changed(&self, locked: bool) {
        self.push(InboundEvent::LockChanged { locked });
    }

    /// Answer the most recent join request (manual reply mode).
    ///
    /// # Panics
    ///
    /// Panics if the session never sent a join.
    pub fn reply_to_join(&self, outcome: JoinOutcome) {
        let request_id = self
            .last_request_id("join-room")
            .expect("no join request sent");
        self.push(InboundEvent::JoinResult {
            request_id,
            outcome,
        });
    }

    /// Answer the most recent lock request (manual reply mode).
    ///
    /// # Panics
    ///
    /// Panics if the session never sent a lock.
    pub fn reply_to_lock(&self, error: Option<&str>) {
        let request_id = self
            .last_request_id("lock-room")
            .expect("no lock request sent");
        self.push(InboundEvent::LockResult {
            request_id,
            error: error.map(str::to_string),
        });
    }

    /// Drop the connection from the server side.
    pub fn close_connection(&self) {
        self.inner.lock().unwrap().inbound = None;
    }

    /// Whether a connection is open.
    pub fn is_connected(&self) -> bool {
        self.inner.lock().unwrap().inbound.is_some()
    }

    /// Every event the session sent, in order.
    pub fn sent_events(&self) -> Vec<OutboundEvent> {
        self.inner.lock().unwrap().sent.clone()
    }

    /// Names of every event the session sent, in order.
    pub fn sent_names(&self) -> Vec<&'static str> {
        self.inner
            .lock()
            .unwrap()
            .sent
            .iter()
            .map(OutboundEvent::name)
            .collect()
    }

    /// Number of sent events with the given name.
    pub fn sent_count(&self, name: &str) -> usize {
        self.sent_names().into_iter().filter(|n| *n == name).count()
    }

    /// Mute toggles the session announced, in order.
    pub fn mute_toggles(&self) -> Vec<(MediaKind, bool)> {
        self.inner
            .lock()
            .unwrap()
            .sent
            .iter()
            .filter_map(|event| match event {
                OutboundEvent::MuteToggle { kind, muted } => Some((*kind, *muted)),
                _ => None,
            })
            .collect()
    }

    /// Request ID of the most recent sent event with the given name.
    pub fn last_request_id(&self, name: &str) -> Option<RequestId> {
        self.inner
            .lock()
            .unwrap()
            .sent
            .iter()
            .rev()
            .find(|event| event.name() == name)
            .and_then(OutboundEvent::request_id)
    }

    /// Key currently protecting a room.
    pub fn room_key(&self, room: &str) -> Option<String> {
        self.inner.lock().unwrap().protected_rooms.get(room).cloned()
    }

    /// Endpoints the session connected to.
    pub fn connects(&self) -> Vec<ServerEndpoint> {
        self.inner.lock().unwrap().connects.clone()
    }

    /// Number of `disconnect` calls.
    pub fn disconnect_count(&self) -> usize {
        self.inner.lock().unwrap().disconnects
    }
}

impl MockServerInner {
    /// The reply a real server would send for `event`, if any.
    fn reply_for(&mut self, event: &OutboundEvent) -> Option<InboundEvent> {
        if self.manual_replies {
            return None;
        }

        match event {
            OutboundEvent::JoinRoom {
                request_id,
                room,
                key,
            } => {
                let outcome = if self.full_rooms.contains(room) {
                    JoinOutcome::Rejected(JoinRejection::RoomFull)
                } else {
                    match self.protected_rooms.get(room) {
                        Some(required) => {
                            let matches = key
                                .as_ref()
                                .is_some_and(|k| k.expose_secret() == required.as_str());
                            if matches {
                                JoinOutcome::Joined { locked: true }
                            } else {
                                JoinOutcome::Rejected(JoinRejection::PasswordRequired)
                            }
                        }
                        None => JoinOutcome::Joined { locked: false },
                    }
                };
                Some(InboundEvent::JoinResult {
                    request_id: *request_id,
                    outcome,
                })
            }
            OutboundEvent::LockRoom {
                request_id,
                room,
                key,
            } => {
                let error = self.refuse_lock_changes.clone();
                if error.is_none() {
                    self.protected_rooms
                        .insert(room.clone(), key.expose_secret().to_string());
                }
                Some(InboundEvent::LockResult {
                    request_id: *request_id,
                    error,
                })
            }
            OutboundEvent::UnlockRoom { request_id, room } => {
                let error = self.refuse_lock_changes.clone();
                if error.is_none() {
                    self.protected_rooms.remove(room);
                }
                Some(InboundEvent::UnlockResult {
                    request_id: *request_id,
                    error,
                })
            }
            OutboundEvent::LeaveRoom { .. } | OutboundEvent::MuteToggle { .. } => None,
        }
    }
}

#[async_trait]
impl Transport for MockSignalingServer {
    async fn connect(
        &self,
        endpoint: &ServerEndpoint,
    ) -> Result<mpsc::Receiver<InboundEvent>, TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.connects.push(endpoint.clone());

        if let Some(reason) = &inner.refuse_connect {
            return Err(TransportError::ConnectFailed(reason.clone()));
        }

        let (tx, rx) = mpsc::channel(INBOUND_BUFFER);
        inner.inbound = Some(tx);
        Ok(rx)
    }

    fn send(&self, event: OutboundEvent) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.inbound.is_none() {
            return Err(TransportError::Closed);
        }
        if inner.failing_sends {
            return Err(TransportError::SendFailed("mock send failure".to_string()));
        }

        let reply = inner.reply_for(&event);
        inner.sent.push(event);

        if let (Some(reply), Some(tx)) = (reply, inner.inbound.as_ref()) {
            tx.try_send(reply)
                .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        }
        Ok(())
    }

    fn disconnect(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.inbound = None;
        inner.disconnects += 1;
    }
}

/// Builder for MockSignalingServer configuration.
#[derive(Debug, Default)]
pub struct MockSignalingServerBuilder {
    inner: MockServerInner,
}

impl MockSignalingServerBuilder {
    /// Require `key` to join `room`. The room reports itself locked.
    #[must_use]
    pub fn with_protected_room(mut self, room: &str, key: &str) -> Self {
        self.inner
            .protected_rooms
            .insert(room.to_string(), key.to_string());
        self
    }

    /// Refuse every join to `room` as full.
    #[must_use]
    pub fn with_full_room(mut self, room: &str) -> Self {
        self.inner.full_rooms.insert(room.to_string());
        self
    }

    /// Fail every connect with `reason`.
    #[must_use]
    pub fn refuse_connections(mut self, reason: &str) -> Self {
        self.inner.refuse_connect = Some(reason.to_string());
        self
    }

    /// Refuse every lock and unlock with `reason`.
    #[must_use]
    pub fn refuse_lock_changes(mut self, reason: &str) -> Self {
        self.inner.refuse_lock_changes = Some(reason.to_string());
        self
    }

    /// Never reply automatically; use `reply_to_*`.
    #[must_use]
    pub fn with_manual_replies(mut self) -> Self {
        self.inner.manual_replies = true;
        self
    }

    /// Fail every send.
    #[must_use]
    pub fn with_failing_sends(mut self) -> Self {
        self.inner.failing_sends = true;
        self
    }

    /// Build the MockSignalingServer.
    #[must_use]
    pub fn build(self) -> MockSignalingServer {
        MockSignalingServer {
            inner: Arc::new(Mutex::new(self.inner)),
        }
    }
}
