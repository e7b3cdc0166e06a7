//! `SessionActor` - owns all state of one signaling session.
//!
//! Each `SessionActor`:
//! - Owns the connection state, the current room, the peer registry and the
//!   local mute flags
//! - Serializes local API calls (mailbox) with inbound transport events
//! - Tracks at most one in-flight round-trip request (connect, join, lock,
//!   unlock) and fails it after the configured timeout
//! - Publishes a [`SessionSnapshot`] after every mutation, before notifying
//!   observers
//!
//! # Request Lifecycle
//!
//! 1. The handle sends a message; the actor validates state and either rejects
//!    it (`InvalidState`, `Busy`) or sends the request and answers with a
//!    [`PendingRequest`]
//! 2. The matching server reply (by request ID) resolves the pending request
//! 3. Replies for requests that are no longer pending are logged and dropped

use super::messages::{
    AcceptReply, ConnectionState, LocalState, PendingRequest, SessionMessage, SessionSnapshot,
};
use super::metrics::MailboxMonitor;
use crate::config::SessionConfig;
use crate::errors::SignalingError;
use crate::media::{MediaEngine, MediaKind, StreamHandle};
use crate::observability::{
    record_inbound_event, record_notification, record_request, record_request_duration,
    set_remote_peers, Operation, Outcome,
};
use crate::observer::{ObserverId, ObserverSet, SessionEvent, SessionObserver};
use crate::registry::{Peer, PeerRegistry};
use crate::room::RoomController;
use crate::transport::{
    InboundEvent, JoinOutcome, JoinRejection, OutboundEvent, ServerEndpoint, Transport,
    TransportError,
};
use common::secret::SecretString;
use common::types::{PeerId, RequestId};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Handle to a `SessionActor`.
///
/// Cheap to clone. Read accessors are synchronous and never wait on the
/// session task.
#[derive(Clone)]
pub struct SessionHandle {
    sender: mpsc::Sender<SessionMessage>,
    snapshot: watch::Receiver<SessionSnapshot>,
    mailbox: Arc<MailboxMonitor>,
    cancel_token: CancellationToken,
    session_id: String,
    default_port: u16,
    default_secure: bool,
}

impl SessionHandle {
    /// Get the session ID.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn call<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<T>) -> SessionMessage,
    ) -> Result<T, SignalingError> {
        let (tx, rx) = oneshot::channel();
        self.mailbox.record_enqueue();
        if let Err(e) = self.sender.send(message(tx)).await {
            self.mailbox.record_send_failed();
            return Err(SignalingError::Internal(format!("channel send failed: {e}")));
        }

        rx.await
            .map_err(|e| SignalingError::Internal(format!("response receive failed: {e}")))
    }

    /// Connect to a signaling server.
    ///
    /// Valid only while `Disconnected`.
    pub async fn connect(&self, endpoint: ServerEndpoint) -> Result<PendingRequest, SignalingError> {
        self.call(|respond_to| SessionMessage::Connect {
            endpoint,
            respond_to,
        })
        .await?
    }

    /// Connect to `host` using the configured default port and TLS flag.
    pub async fn connect_to_host(
        &self,
        host: impl Into<String>,
    ) -> Result<PendingRequest, SignalingError> {
        self.connect(ServerEndpoint::new(
            host,
            self.default_port,
            self.default_secure,
        ))
        .await
    }

    /// Join a room, optionally with its key.
    ///
    /// Valid while `Connected` or `InRoom` (switches rooms). A missing or wrong
    /// key fails with `Authentication` and fires `password_required`.
    pub async fn join_room(
        &self,
        room: impl Into<String>,
        key: Option<SecretString>,
    ) -> Result<PendingRequest, SignalingError> {
        let room = room.into();
        self.call(|respond_to| SessionMessage::JoinRoom {
            room,
            key,
            respond_to,
        })
        .await?
    }

    /// Leave the current room. No-op outside a room.
    pub async fn leave_room(&self) -> Result<(), SignalingError> {
        self.call(|respond_to| SessionMessage::LeaveRoom { respond_to })
            .await?
    }

    /// Lock the current room with a key.
    pub async fn lock_room(&self, key: SecretString) -> Result<PendingRequest, SignalingError> {
        self.call(|respond_to| SessionMessage::LockRoom { key, respond_to })
            .await?
    }

    /// Unlock the current room.
    pub async fn unlock_room(&self) -> Result<PendingRequest, SignalingError> {
        self.call(|respond_to| SessionMessage::UnlockRoom { respond_to })
            .await?
    }

    /// Mute or unmute local audio.
    pub async fn set_local_audio_muted(&self, muted: bool) -> Result<(), SignalingError> {
        self.set_local_muted(MediaKind::Audio, muted).await
    }

    /// Mute or unmute local video.
    pub async fn set_local_video_muted(&self, muted: bool) -> Result<(), SignalingError> {
        self.set_local_muted(MediaKind::Video, muted).await
    }

    async fn set_local_muted(&self, kind: MediaKind, muted: bool) -> Result<(), SignalingError> {
        self.call(|respond_to| SessionMessage::SetLocalMute {
            kind,
            muted,
            respond_to,
        })
        .await?
    }

    /// Leave any room and close the transport. The session can connect again.
    pub async fn disconnect(&self) -> Result<(), SignalingError> {
        self.call(|respond_to| SessionMessage::Disconnect { respond_to })
            .await
    }

    /// Register an observer. The session holds it weakly.
    pub async fn add_observer<O>(&self, observer: &Arc<O>) -> Result<ObserverId, SignalingError>
    where
        O: SessionObserver + 'static,
    {
        let weak: Weak<O> = Arc::downgrade(observer);
        let observer: Weak<dyn SessionObserver> = weak;
        self.call(|respond_to| SessionMessage::AddObserver {
            observer,
            respond_to,
        })
        .await
    }

    /// Deregister an observer. Returns whether it was registered.
    pub async fn remove_observer(&self, id: ObserverId) -> Result<bool, SignalingError> {
        self.call(|respond_to| SessionMessage::RemoveObserver { id, respond_to })
            .await
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.snapshot.borrow().state
    }

    /// Copy of the latest published session state.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver notified on every published state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    /// The local capture stream.
    #[must_use]
    pub fn local_stream(&self) -> StreamHandle {
        self.snapshot.borrow().local.stream.clone()
    }

    #[must_use]
    pub fn local_audio_muted(&self) -> bool {
        self.snapshot.borrow().local.audio_muted
    }

    #[must_use]
    pub fn local_video_muted(&self) -> bool {
        self.snapshot.borrow().local.video_muted
    }

    /// Name of the current room.
    #[must_use]
    pub fn room_name(&self) -> Option<String> {
        self.snapshot
            .borrow()
            .room
            .as_ref()
            .map(|room| room.name().to_string())
    }

    /// Key the current room was joined or locked with.
    #[must_use]
    pub fn room_key(&self) -> Option<SecretString> {
        self.snapshot
            .borrow()
            .room
            .as_ref()
            .and_then(|room| room.key().cloned())
    }

    /// Whether the current room is locked. `false` outside a room.
    #[must_use]
    pub fn is_room_locked(&self) -> bool {
        self.snapshot
            .borrow()
            .room
            .as_ref()
            .is_some_and(|room| room.is_locked())
    }

    /// Remote peers in insertion order.
    #[must_use]
    pub fn remote_peers(&self) -> Vec<Peer> {
        self.snapshot.borrow().peers.clone()
    }

    /// Look up a remote peer.
    #[must_use]
    pub fn remote_peer(&self, peer_id: &PeerId) -> Option<Peer> {
        self.snapshot
            .borrow()
            .peers
            .iter()
            .find(|peer| &peer.peer_id == peer_id)
            .cloned()
    }

    /// Messages queued for the session but not yet processed.
    #[must_use]
    pub fn mailbox_depth(&self) -> usize {
        self.mailbox.current_depth()
    }

    /// Stop the session. Leaves the room and closes the transport.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the session has been shut down.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// Results of work the actor hands off to spawned tasks.
enum InternalEvent {
    ConnectCompleted {
        request_id: RequestId,
        result: Result<mpsc::Receiver<InboundEvent>, TransportError>,
    },
}

/// What an in-flight request will change once answered.
enum PendingKind {
    Connect,
    Join {
        room: String,
        key: Option<SecretString>,
        previous_state: ConnectionState,
    },
    Lock {
        key: SecretString,
    },
    Unlock,
}

impl PendingKind {
    fn operation(&self) -> Operation {
        match self {
            PendingKind::Connect => Operation::Connect,
            PendingKind::Join { .. } => Operation::Join,
            PendingKind::Lock { .. } => Operation::Lock,
            PendingKind::Unlock => Operation::Unlock,
        }
    }
}

const fn label(operation: Operation) -> &'static str {
    match operation {
        Operation::Connect => "connect",
        Operation::Join => "join room",
        Operation::Lock => "lock room",
        Operation::Unlock => "unlock room",
    }
}

struct PendingOp {
    request_id: RequestId,
    kind: PendingKind,
    reply: oneshot::Sender<Result<(), SignalingError>>,
    started: Instant,
    deadline: Instant,
}

/// The session actor.
pub struct SessionActor {
    session_id: String,
    config: SessionConfig,
    receiver: mpsc::Receiver<SessionMessage>,
    /// Used to hand observers a handle without keeping the mailbox open.
    weak_sender: mpsc::WeakSender<SessionMessage>,
    internal_tx: mpsc::UnboundedSender<InternalEvent>,
    internal_rx: mpsc::UnboundedReceiver<InternalEvent>,
    cancel_token: CancellationToken,
    transport: Arc<dyn Transport>,
    media: Arc<dyn MediaEngine>,
    /// Inbound events of the current connection.
    inbound: Option<mpsc::Receiver<InboundEvent>>,
    endpoint: Option<ServerEndpoint>,
    state: ConnectionState,
    pending: Option<PendingOp>,
    room: RoomController,
    registry: PeerRegistry,
    local: LocalState,
    observers: ObserverSet,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    snapshot_rx: watch::Receiver<SessionSnapshot>,
    mailbox: Arc<MailboxMonitor>,
}

impl SessionActor {
    /// Spawn a new session actor.
    ///
    /// Creates the local stream through the media engine, then starts the
    /// actor task in `Disconnected`.
    ///
    /// # Errors
    ///
    /// Returns `Media` if the local stream cannot be created and `Config` if
    /// the mailbox capacity is zero.
    pub fn spawn(
        config: SessionConfig,
        transport: Arc<dyn Transport>,
        media: Arc<dyn MediaEngine>,
        cancel_token: CancellationToken,
    ) -> Result<(SessionHandle, JoinHandle<()>), SignalingError> {
        if config.mailbox_capacity == 0 {
            return Err(SignalingError::Config(
                "mailbox capacity must be greater than zero".to_string(),
            ));
        }

        let session_id = Uuid::new_v4().to_string();
        let stream = media.create_local_stream(config.allow_video)?;
        let local = LocalState {
            stream,
            audio_muted: false,
            video_muted: false,
        };

        let (sender, receiver) = mpsc::channel(config.mailbox_capacity);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot {
            state: ConnectionState::Disconnected,
            room: None,
            local: local.clone(),
            peers: Vec::new(),
        });
        let mailbox = Arc::new(MailboxMonitor::new(session_id.clone()));

        info!(
            target: "signaling.session",
            session_id = %session_id,
            allow_video = config.allow_video,
            local_stream = %local.stream.id(),
            "Session created"
        );

        let handle = SessionHandle {
            sender: sender.clone(),
            snapshot: snapshot_rx.clone(),
            mailbox: Arc::clone(&mailbox),
            cancel_token: cancel_token.clone(),
            session_id: session_id.clone(),
            default_port: config.default_port,
            default_secure: config.default_secure,
        };

        let actor = Self {
            session_id,
            config,
            receiver,
            weak_sender: sender.downgrade(),
            internal_tx,
            internal_rx,
            cancel_token,
            transport,
            media,
            inbound: None,
            endpoint: None,
            state: ConnectionState::Disconnected,
            pending: None,
            room: RoomController::new(),
            registry: PeerRegistry::new(),
            local,
            observers: ObserverSet::new(),
            snapshot_tx,
            snapshot_rx,
            mailbox,
        };

        let task_handle = tokio::spawn(actor.run());

        Ok((handle, task_handle))
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "signaling.session", fields(session_id = %self.session_id))]
    async fn run(mut self) {
        info!(
            target: "signaling.session",
            session_id = %self.session_id,
            "SessionActor started"
        );

        loop {
            let deadline = self.pending.as_ref().map(|pending| pending.deadline);

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "signaling.session",
                        session_id = %self.session_id,
                        "SessionActor received cancellation signal"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.handle_message(message);
                            self.mailbox.record_dequeue();
                        }
                        None => {
                            info!(
                                target: "signaling.session",
                                session_id = %self.session_id,
                                "SessionActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }

                Some(event) = self.internal_rx.recv() => {
                    self.handle_internal(event);
                }

                event = next_inbound(&mut self.inbound) => {
                    match event {
                        Some(event) => self.handle_inbound(event),
                        None => self.handle_transport_lost(),
                    }
                }

                () = wait_for_deadline(deadline) => {
                    self.handle_timeout();
                }
            }
        }

        self.close(SignalingError::Internal("session shut down".to_string()));

        info!(
            target: "signaling.session",
            session_id = %self.session_id,
            messages_processed = self.mailbox.messages_processed(),
            peak_mailbox_depth = self.mailbox.peak_depth(),
            mailbox_level = ?self.mailbox.current_level(),
            "SessionActor stopped"
        );
    }

    /// Handle a single message.
    fn handle_message(&mut self, message: SessionMessage) {
        match message {
            SessionMessage::Connect {
                endpoint,
                respond_to,
            } => {
                let result = self.handle_connect(endpoint);
                reply(respond_to, result);
            }

            SessionMessage::JoinRoom {
                room,
                key,
                respond_to,
            } => {
                let result = self.handle_join(room, key);
                reply(respond_to, result);
            }

            SessionMessage::LeaveRoom { respond_to } => {
                let result = self.handle_leave();
                let _ = respond_to.send(result);
            }

            SessionMessage::LockRoom { key, respond_to } => {
                let result = self.handle_lock(key);
                reply(respond_to, result);
            }

            SessionMessage::UnlockRoom { respond_to } => {
                let result = self.handle_unlock();
                reply(respond_to, result);
            }

            SessionMessage::SetLocalMute {
                kind,
                muted,
                respond_to,
            } => {
                let result = self.handle_set_local_mute(kind, muted);
                let _ = respond_to.send(result);
            }

            SessionMessage::Disconnect { respond_to } => {
                self.close(SignalingError::Transport(
                    "disconnected before reply".to_string(),
                ));
                let _ = respond_to.send(());
            }

            SessionMessage::AddObserver {
                observer,
                respond_to,
            } => {
                let id = self.observers.add(observer);
                let _ = respond_to.send(id);
            }

            SessionMessage::RemoveObserver { id, respond_to } => {
                let removed = self.observers.remove(id);
                let _ = respond_to.send(removed);
            }
        }
    }

    /// Start a transport connection.
    #[instrument(skip_all, fields(session_id = %self.session_id, endpoint = %endpoint))]
    fn handle_connect(&mut self, endpoint: ServerEndpoint) -> Result<PendingRequest, SignalingError> {
        self.check_idle(Operation::Connect)?;
        if self.state != ConnectionState::Disconnected {
            return Err(self.reject(
                Operation::Connect,
                SignalingError::InvalidState {
                    operation: label(Operation::Connect),
                    state: self.state,
                },
            ));
        }

        let request_id = RequestId::new();
        let request = self.start_request(request_id, PendingKind::Connect);
        self.state = ConnectionState::Connecting;
        self.endpoint = Some(endpoint.clone());

        info!(
            target: "signaling.session",
            session_id = %self.session_id,
            endpoint = %endpoint,
            "Connecting to signaling server"
        );

        let transport = Arc::clone(&self.transport);
        let internal_tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = transport.connect(&endpoint).await;
            if internal_tx
                .send(InternalEvent::ConnectCompleted { request_id, result })
                .is_err()
            {
                // Session is gone; don't leave the connection open.
                transport.disconnect();
            }
        });

        self.publish();
        Ok(request)
    }

    /// Send a join request.
    #[instrument(skip_all, fields(session_id = %self.session_id, room = %room))]
    fn handle_join(
        &mut self,
        room: String,
        key: Option<SecretString>,
    ) -> Result<PendingRequest, SignalingError> {
        self.check_idle(Operation::Join)?;
        if !matches!(
            self.state,
            ConnectionState::Connected | ConnectionState::InRoom
        ) {
            return Err(self.reject(
                Operation::Join,
                SignalingError::InvalidState {
                    operation: label(Operation::Join),
                    state: self.state,
                },
            ));
        }

        let request_id = RequestId::new();
        let event = OutboundEvent::JoinRoom {
            request_id,
            room: room.clone(),
            key: key.clone(),
        };
        if let Err(e) = self.transport.send(event) {
            return Ok(self.failed_request(Operation::Join, e));
        }

        info!(
            target: "signaling.session",
            session_id = %self.session_id,
            room = %room,
            with_key = key.is_some(),
            switching_from = ?self.room.name(),
            "Joining room"
        );

        let previous_state = self.state;
        let request = self.start_request(
            request_id,
            PendingKind::Join {
                room,
                key,
                previous_state,
            },
        );
        self.state = ConnectionState::JoiningRoom;
        self.publish();
        Ok(request)
    }

    /// Leave the current room.
    fn handle_leave(&mut self) -> Result<(), SignalingError> {
        if let Some(pending) = &self.pending {
            return Err(SignalingError::Busy {
                pending: label(pending.kind.operation()),
            });
        }
        if self.state != ConnectionState::InRoom {
            debug!(
                target: "signaling.session",
                session_id = %self.session_id,
                state = %self.state,
                "Leave outside a room, ignoring"
            );
            return Ok(());
        }

        let removed = self.leave_current_room();
        self.state = ConnectionState::Connected;
        self.publish();
        self.notify_all(removed);
        Ok(())
    }

    /// Send a lock request.
    fn handle_lock(&mut self, key: SecretString) -> Result<PendingRequest, SignalingError> {
        let room = self.require_room(Operation::Lock)?;

        let request_id = RequestId::new();
        let event = OutboundEvent::LockRoom {
            request_id,
            room: room.clone(),
            key: key.clone(),
        };
        if let Err(e) = self.transport.send(event) {
            return Ok(self.failed_request(Operation::Lock, e));
        }

        debug!(
            target: "signaling.session",
            session_id = %self.session_id,
            room = %room,
            "Locking room"
        );
        Ok(self.start_request(request_id, PendingKind::Lock { key }))
    }

    /// Send an unlock request.
    fn handle_unlock(&mut self) -> Result<PendingRequest, SignalingError> {
        let room = self.require_room(Operation::Unlock)?;

        let request_id = RequestId::new();
        let event = OutboundEvent::UnlockRoom {
            request_id,
            room: room.clone(),
        };
        if let Err(e) = self.transport.send(event) {
            return Ok(self.failed_request(Operation::Unlock, e));
        }

        debug!(
            target: "signaling.session",
            session_id = %self.session_id,
            room = %room,
            "Unlocking room"
        );
        Ok(self.start_request(request_id, PendingKind::Unlock))
    }

    /// Apply a local mute flag.
    fn handle_set_local_mute(&mut self, kind: MediaKind, muted: bool) -> Result<(), SignalingError> {
        if !self.state.is_connected() {
            return Err(SignalingError::InvalidState {
                operation: match kind {
                    MediaKind::Audio => "set audio mute",
                    MediaKind::Video => "set video mute",
                },
                state: self.state,
            });
        }

        let flag = match kind {
            MediaKind::Audio => &mut self.local.audio_muted,
            MediaKind::Video => &mut self.local.video_muted,
        };
        if *flag == muted {
            return Ok(());
        }
        *flag = muted;

        self.media
            .set_local_track_enabled(&self.local.stream, kind, !muted);
        if self.state == ConnectionState::InRoom {
            self.send_mute_toggle(kind, muted);
        }

        debug!(
            target: "signaling.session",
            session_id = %self.session_id,
            kind = %kind,
            muted,
            "Local mute changed"
        );
        self.publish();
        Ok(())
    }

    fn handle_internal(&mut self, event: InternalEvent) {
        match event {
            InternalEvent::ConnectCompleted { request_id, result } => {
                self.handle_connect_completed(request_id, result);
            }
        }
    }

    fn handle_connect_completed(
        &mut self,
        request_id: RequestId,
        result: Result<mpsc::Receiver<InboundEvent>, TransportError>,
    ) {
        let Some(pending) = self.take_pending(request_id, Operation::Connect) else {
            // The stale receiver is dropped here. The transport is only closed
            // when no newer connection is live or being set up.
            let idle = self.state == ConnectionState::Disconnected && self.pending.is_none();
            if result.is_ok() {
                debug!(
                    target: "signaling.session",
                    session_id = %self.session_id,
                    request_id = %request_id,
                    closing = idle,
                    "Stale connection completed, dropping it"
                );
                if idle {
                    self.transport.disconnect();
                }
            }
            return;
        };

        match result {
            Ok(inbound) => {
                self.inbound = Some(inbound);
                self.state = ConnectionState::Connected;
                info!(
                    target: "signaling.session",
                    session_id = %self.session_id,
                    endpoint = ?self.endpoint.as_ref().map(ServerEndpoint::url),
                    "Connected to signaling server"
                );
                self.publish();
                self.complete(pending, Ok(()), Outcome::Success);
            }
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                self.endpoint = None;
                warn!(
                    target: "signaling.session",
                    session_id = %self.session_id,
                    error = %e,
                    "Connect failed"
                );
                self.publish();
                self.complete(pending, Err(e.into()), Outcome::Failure);
            }
        }
    }

    /// Handle an event from the signaling server.
    fn handle_inbound(&mut self, event: InboundEvent) {
        record_inbound_event(event.name());

        match event {
            InboundEvent::JoinResult {
                request_id,
                outcome,
            } => self.handle_join_result(request_id, outcome),

            InboundEvent::LockResult { request_id, error } => {
                self.handle_lock_result(request_id, Operation::Lock, error);
            }

            InboundEvent::UnlockResult { request_id, error } => {
                self.handle_lock_result(request_id, Operation::Unlock, error);
            }

            InboundEvent::StreamAdded { peer_id, stream_id } => {
                self.handle_stream_added(peer_id, &stream_id);
            }

            InboundEvent::StreamRemoved { peer_id } => self.handle_stream_removed(&peer_id),

            InboundEvent::PeerMuteToggle {
                peer_id,
                kind,
                muted,
            } => {
                if !self.in_room("peer-mute-toggle") {
                    return;
                }
                if let Some(event) = self.registry.set_peer_muted(&peer_id, kind, muted) {
                    self.publish();
                    self.notify(event);
                }
            }

            InboundEvent::LockChanged { locked } => {
                if let Some(event) = self.room.set_locked(locked) {
                    self.publish();
                    self.notify(event);
                }
            }
        }
    }

    fn handle_join_result(&mut self, request_id: RequestId, outcome: JoinOutcome) {
        let Some(pending) = self.take_pending(request_id, Operation::Join) else {
            return;
        };
        let PendingKind::Join {
            room,
            key,
            previous_state,
        } = &pending.kind
        else {
            return;
        };
        let room = room.clone();

        match outcome {
            JoinOutcome::Joined { locked } => {
                // Switching rooms: the previous room's peers go away first.
                let removed = self.release_peers();
                self.room.enter(room.clone(), key.clone(), locked);
                self.state = ConnectionState::InRoom;
                self.announce_local_mutes();

                info!(
                    target: "signaling.session",
                    session_id = %self.session_id,
                    room = %room,
                    locked,
                    "Joined room"
                );
                self.publish();
                self.notify_all(removed);
                self.complete(pending, Ok(()), Outcome::Success);
            }
            JoinOutcome::Rejected(rejection) => {
                self.state = *previous_state;
                warn!(
                    target: "signaling.session",
                    session_id = %self.session_id,
                    room = %room,
                    reason = %rejection,
                    "Join rejected"
                );
                self.publish();

                let error = match rejection {
                    JoinRejection::PasswordRequired => {
                        self.notify(SessionEvent::PasswordRequired { room: room.clone() });
                        SignalingError::Authentication { room }
                    }
                    other => SignalingError::Rejected(other.to_string()),
                };
                self.complete(pending, Err(error), Outcome::Failure);
            }
        }
    }

    fn handle_lock_result(
        &mut self,
        request_id: RequestId,
        operation: Operation,
        error: Option<String>,
    ) {
        let Some(pending) = self.take_pending(request_id, operation) else {
            return;
        };

        if let Some(message) = error {
            warn!(
                target: "signaling.room",
                session_id = %self.session_id,
                operation = label(operation),
                error = %message,
                "Lock change refused"
            );
            self.complete(pending, Err(SignalingError::Rejected(message)), Outcome::Failure);
            return;
        }

        let event = match &pending.kind {
            PendingKind::Lock { key } => {
                self.room.set_key(Some(key.clone()));
                self.room.set_locked(true)
            }
            _ => {
                self.room.set_key(None);
                self.room.set_locked(false)
            }
        };

        self.publish();
        if let Some(event) = event {
            self.notify(event);
        }
        self.complete(pending, Ok(()), Outcome::Success);
    }

    fn handle_stream_added(&mut self, peer_id: PeerId, stream_id: &str) {
        if !self.in_room("stream-added") {
            return;
        }
        if self.registry.contains(&peer_id) {
            warn!(
                target: "signaling.registry",
                session_id = %self.session_id,
                peer_id = %peer_id,
                "Duplicate stream-added for known peer, ignoring"
            );
            return;
        }

        let stream = match self.media.attach_remote_stream(&peer_id, stream_id) {
            Ok(stream) => stream,
            Err(e) => {
                warn!(
                    target: "signaling.session",
                    session_id = %self.session_id,
                    peer_id = %peer_id,
                    error = %e,
                    "Failed to attach remote stream"
                );
                return;
            }
        };

        if let Some(event) = self.registry.add_peer(peer_id, stream) {
            set_remote_peers(self.registry.len());
            self.publish();
            self.notify(event);
        }
    }

    fn handle_stream_removed(&mut self, peer_id: &PeerId) {
        if !self.in_room("stream-removed") {
            return;
        }

        if let Some(event) = self.registry.remove_peer(peer_id) {
            if let SessionEvent::StreamRemoved(peer) = &event {
                self.media.release_remote_stream(&peer.peer_id, &peer.stream);
            }
            set_remote_peers(self.registry.len());
            self.publish();
            self.notify(event);
        }
    }

    /// The inbound channel closed: the connection is gone.
    fn handle_transport_lost(&mut self) {
        warn!(
            target: "signaling.session",
            session_id = %self.session_id,
            state = %self.state,
            peers = self.registry.len(),
            "Transport connection lost"
        );

        self.inbound = None;
        let removed = self.release_peers();
        self.room.clear();
        self.endpoint = None;
        let pending = self.pending.take();
        self.state = ConnectionState::Disconnected;
        self.transport.disconnect();

        self.publish();
        self.notify_all(removed);
        if let Some(pending) = pending {
            self.complete(
                pending,
                Err(SignalingError::Transport("connection lost".to_string())),
                Outcome::Failure,
            );
        }
    }

    /// The pending request's deadline passed.
    fn handle_timeout(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        let operation = pending.kind.operation();

        warn!(
            target: "signaling.session",
            session_id = %self.session_id,
            operation = label(operation),
            timeout_ms = self.config.request_timeout.as_millis(),
            "Request timed out"
        );

        match &pending.kind {
            PendingKind::Connect => {
                self.state = ConnectionState::Disconnected;
                self.endpoint = None;
                self.transport.disconnect();
            }
            PendingKind::Join { previous_state, .. } => self.state = *previous_state,
            PendingKind::Lock { .. } | PendingKind::Unlock => {}
        }

        self.publish();
        let error = SignalingError::Transport(format!(
            "{} timed out after {}ms",
            label(operation),
            self.config.request_timeout.as_millis()
        ));
        self.complete(pending, Err(error), Outcome::Timeout);
    }

    /// Leave any room, fail the pending request and close the transport.
    fn close(&mut self, reason: SignalingError) {
        if self.state == ConnectionState::Disconnected && self.pending.is_none() {
            return;
        }

        info!(
            target: "signaling.session",
            session_id = %self.session_id,
            state = %self.state,
            "Disconnecting"
        );

        let removed = self.leave_current_room();
        let pending = self.pending.take();
        self.inbound = None;
        self.endpoint = None;
        self.transport.disconnect();
        self.state = ConnectionState::Disconnected;

        self.publish();
        self.notify_all(removed);
        if let Some(pending) = pending {
            self.complete(pending, Err(reason), Outcome::Failure);
        }
    }

    /// Release all peers, clear the room and tell the server.
    fn leave_current_room(&mut self) -> Vec<SessionEvent> {
        let removed = self.release_peers();
        if let Some(room) = self.room.clear() {
            let name = room.name().to_string();
            if let Err(e) = self.transport.send(OutboundEvent::LeaveRoom { room: name.clone() }) {
                warn!(
                    target: "signaling.session",
                    session_id = %self.session_id,
                    room = %name,
                    error = %e,
                    "Failed to send leave"
                );
            }
            info!(
                target: "signaling.session",
                session_id = %self.session_id,
                room = %name,
                peers_removed = removed.len(),
                "Left room"
            );
        }
        removed
    }

    /// Empty the registry, releasing every remote stream.
    fn release_peers(&mut self) -> Vec<SessionEvent> {
        let removed = self.registry.drain();
        for event in &removed {
            if let SessionEvent::StreamRemoved(peer) = event {
                self.media.release_remote_stream(&peer.peer_id, &peer.stream);
            }
        }
        if !removed.is_empty() {
            set_remote_peers(0);
        }
        removed
    }

    /// Tell a newly joined room which local kinds are muted.
    fn announce_local_mutes(&self) {
        for kind in [MediaKind::Audio, MediaKind::Video] {
            if self.local.is_muted(kind) {
                self.send_mute_toggle(kind, true);
            }
        }
    }

    fn send_mute_toggle(&self, kind: MediaKind, muted: bool) {
        if let Err(e) = self.transport.send(OutboundEvent::MuteToggle { kind, muted }) {
            warn!(
                target: "signaling.session",
                session_id = %self.session_id,
                kind = %kind,
                error = %e,
                "Failed to send mute toggle"
            );
        }
    }

    fn check_idle(&self, operation: Operation) -> Result<(), SignalingError> {
        match &self.pending {
            Some(pending) => Err(self.reject(
                operation,
                SignalingError::Busy {
                    pending: label(pending.kind.operation()),
                },
            )),
            None => Ok(()),
        }
    }

    /// Name of the current room, or the reason a room operation is refused.
    fn require_room(&self, operation: Operation) -> Result<String, SignalingError> {
        self.check_idle(operation)?;
        match self.room.name() {
            Some(name) if self.state == ConnectionState::InRoom => Ok(name.to_string()),
            _ => Err(self.reject(
                operation,
                SignalingError::InvalidState {
                    operation: label(operation),
                    state: self.state,
                },
            )),
        }
    }

    fn reject(&self, operation: Operation, error: SignalingError) -> SignalingError {
        debug!(
            target: "signaling.session",
            session_id = %self.session_id,
            operation = label(operation),
            error = %error,
            "Request rejected locally"
        );
        record_request(operation, Outcome::RejectedLocally);
        error
    }

    fn in_room(&self, event: &'static str) -> bool {
        if self.state == ConnectionState::InRoom {
            return true;
        }
        debug!(
            target: "signaling.session",
            session_id = %self.session_id,
            event,
            state = %self.state,
            "Room event outside a room, ignoring"
        );
        false
    }

    fn start_request(&mut self, request_id: RequestId, kind: PendingKind) -> PendingRequest {
        let (reply, receiver) = oneshot::channel();
        let started = Instant::now();
        let operation = kind.operation();
        self.pending = Some(PendingOp {
            request_id,
            kind,
            reply,
            started,
            deadline: started + self.config.request_timeout,
        });
        PendingRequest::new(label(operation), receiver)
    }

    /// A request whose send failed; resolves immediately with the error.
    fn failed_request(&self, operation: Operation, error: TransportError) -> PendingRequest {
        warn!(
            target: "signaling.session",
            session_id = %self.session_id,
            operation = label(operation),
            error = %error,
            "Failed to send request"
        );
        record_request(operation, Outcome::Failure);

        let (reply, receiver) = oneshot::channel();
        let _ = reply.send(Err(error.into()));
        PendingRequest::new(label(operation), receiver)
    }

    fn take_pending(&mut self, request_id: RequestId, operation: Operation) -> Option<PendingOp> {
        let matches = self
            .pending
            .as_ref()
            .is_some_and(|p| p.request_id == request_id && p.kind.operation() == operation);
        if !matches {
            debug!(
                target: "signaling.session",
                session_id = %self.session_id,
                request_id = %request_id,
                operation = label(operation),
                "Reply for a request that is not pending, ignoring"
            );
            return None;
        }
        self.pending.take()
    }

    fn complete(&self, pending: PendingOp, result: Result<(), SignalingError>, outcome: Outcome) {
        let operation = pending.kind.operation();
        record_request(operation, outcome);
        record_request_duration(operation, pending.started.elapsed());

        if pending.reply.send(result).is_err() {
            debug!(
                target: "signaling.session",
                session_id = %self.session_id,
                operation = label(operation),
                "Requester went away before the reply"
            );
        }
    }

    /// Publish the current state to handles.
    fn publish(&self) {
        self.snapshot_tx.send_replace(SessionSnapshot {
            state: self.state,
            room: self.room.current().cloned(),
            local: self.local.clone(),
            peers: self.registry.snapshot(),
        });
    }

    fn notify(&mut self, event: SessionEvent) {
        let session = match &event {
            SessionEvent::PasswordRequired { .. } => self.session_handle(),
            _ => None,
        };
        if self.observers.dispatch(session.as_ref(), &event) > 0 {
            record_notification(event.name());
        }
    }

    fn notify_all(&mut self, events: Vec<SessionEvent>) {
        for event in events {
            self.notify(event);
        }
    }

    /// A handle for observer callbacks, if any handle is still alive.
    fn session_handle(&self) -> Option<SessionHandle> {
        let sender = self.weak_sender.upgrade()?;
        Some(SessionHandle {
            sender,
            snapshot: self.snapshot_rx.clone(),
            mailbox: Arc::clone(&self.mailbox),
            cancel_token: self.cancel_token.clone(),
            session_id: self.session_id.clone(),
            default_port: self.config.default_port,
            default_secure: self.config.default_secure,
        })
    }
}

fn reply(respond_to: AcceptReply, result: Result<PendingRequest, SignalingError>) {
    // A dropped PendingRequest is fine: the request still completes.
    let _ = respond_to.send(result);
}

async fn next_inbound(inbound: &mut Option<mpsc::Receiver<InboundEvent>>) -> Option<InboundEvent> {
    match inbound {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn wait_for_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::media::MediaError;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::Notify;

    const TEST_WAIT: Duration = Duration::from_secs(5);

    /// Accepts connections and records outbound events; never replies.
    #[derive(Default)]
    struct SilentTransport {
        sent: Mutex<Vec<&'static str>>,
        inbound: Mutex<Option<mpsc::Sender<InboundEvent>>>,
        disconnects: Mutex<u32>,
    }

    #[async_trait]
    impl Transport for SilentTransport {
        async fn connect(
            &self,
            _endpoint: &ServerEndpoint,
        ) -> Result<mpsc::Receiver<InboundEvent>, TransportError> {
            let (tx, rx) = mpsc::channel(16);
            *self.inbound.lock().unwrap() = Some(tx);
            Ok(rx)
        }

        fn send(&self, event: OutboundEvent) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push(event.name());
            Ok(())
        }

        fn disconnect(&self) {
            *self.disconnects.lock().unwrap() += 1;
            self.inbound.lock().unwrap().take();
        }
    }

    /// Holds the first connect open until `release_first` is called.
    #[derive(Default)]
    struct GatedTransport {
        gate: Notify,
        connects: Mutex<u32>,
        /// Inbound senders by connect attempt (0 = first).
        inbound: Mutex<Vec<(u32, mpsc::Sender<InboundEvent>)>>,
        disconnects: Mutex<u32>,
    }

    impl GatedTransport {
        fn release_first(&self) {
            self.gate.notify_one();
        }

        fn inbound_for(&self, attempt: u32) -> Option<mpsc::Sender<InboundEvent>> {
            self.inbound
                .lock()
                .unwrap()
                .iter()
                .find(|(n, _)| *n == attempt)
                .map(|(_, tx)| tx.clone())
        }
    }

    #[async_trait]
    impl Transport for GatedTransport {
        async fn connect(
            &self,
            _endpoint: &ServerEndpoint,
        ) -> Result<mpsc::Receiver<InboundEvent>, TransportError> {
            let attempt = {
                let mut connects = self.connects.lock().unwrap();
                *connects += 1;
                *connects - 1
            };
            if attempt == 0 {
                self.gate.notified().await;
            }
            let (tx, rx) = mpsc::channel(16);
            self.inbound.lock().unwrap().push((attempt, tx));
            Ok(rx)
        }

        fn send(&self, _event: OutboundEvent) -> Result<(), TransportError> {
            Ok(())
        }

        fn disconnect(&self) {
            *self.disconnects.lock().unwrap() += 1;
        }
    }

    struct FakeMedia;

    impl MediaEngine for FakeMedia {
        fn create_local_stream(&self, allow_video: bool) -> Result<StreamHandle, MediaError> {
            Ok(StreamHandle::new(if allow_video { "local-av" } else { "local-a" }))
        }

        fn set_local_track_enabled(&self, _stream: &StreamHandle, _kind: MediaKind, _on: bool) {}

        fn attach_remote_stream(
            &self,
            peer_id: &PeerId,
            stream_id: &str,
        ) -> Result<StreamHandle, MediaError> {
            Ok(StreamHandle::new(format!("{peer_id}/{stream_id}")))
        }

        fn release_remote_stream(&self, _peer_id: &PeerId, _stream: &StreamHandle) {}
    }

    struct NoCamera;

    impl MediaEngine for NoCamera {
        fn create_local_stream(&self, _allow_video: bool) -> Result<StreamHandle, MediaError> {
            Err(MediaError::CaptureUnavailable("no device".to_string()))
        }

        fn set_local_track_enabled(&self, _stream: &StreamHandle, _kind: MediaKind, _on: bool) {}

        fn attach_remote_stream(
            &self,
            _peer_id: &PeerId,
            stream_id: &str,
        ) -> Result<StreamHandle, MediaError> {
            Err(MediaError::UnknownStream(stream_id.to_string()))
        }

        fn release_remote_stream(&self, _peer_id: &PeerId, _stream: &StreamHandle) {}
    }

    fn spawn_session(
        transport: Arc<SilentTransport>,
    ) -> (SessionHandle, JoinHandle<()>, CancellationToken) {
        let cancel_token = CancellationToken::new();
        let (handle, task) = SessionActor::spawn(
            SessionConfig::default(),
            transport,
            Arc::new(FakeMedia),
            cancel_token.clone(),
        )
        .unwrap();
        (handle, task, cancel_token)
    }

    #[tokio::test]
    async fn test_session_actor_spawn() {
        let (handle, _task, _cancel) = spawn_session(Arc::new(SilentTransport::default()));

        assert!(!handle.session_id().is_empty());
        assert_eq!(handle.state(), ConnectionState::Disconnected);
        assert_eq!(handle.local_stream().id(), "local-av");
        assert!(!handle.local_audio_muted());
        assert!(handle.room_name().is_none());
        assert!(handle.remote_peers().is_empty());
        assert!(!handle.is_cancelled());

        handle.shutdown();
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn test_spawn_fails_without_local_stream() {
        let result = SessionActor::spawn(
            SessionConfig::default(),
            Arc::new(SilentTransport::default()),
            Arc::new(NoCamera),
            CancellationToken::new(),
        );
        assert!(matches!(result, Err(SignalingError::Media(_))));
    }

    #[tokio::test]
    async fn test_spawn_rejects_zero_mailbox() {
        let config = SessionConfig {
            mailbox_capacity: 0,
            ..SessionConfig::default()
        };
        let result = SessionActor::spawn(
            config,
            Arc::new(SilentTransport::default()),
            Arc::new(FakeMedia),
            CancellationToken::new(),
        );
        assert!(matches!(result, Err(SignalingError::Config(_))));
    }

    #[tokio::test]
    async fn test_connect_then_invalid_second_connect() {
        let (handle, _task, _cancel) = spawn_session(Arc::new(SilentTransport::default()));

        let pending = handle.connect_to_host("localhost").await.unwrap();
        assert_eq!(pending.operation(), "connect");
        tokio::time::timeout(TEST_WAIT, pending)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(handle.state(), ConnectionState::Connected);

        let again = handle.connect_to_host("localhost").await;
        assert!(matches!(
            again,
            Err(SignalingError::InvalidState {
                operation: "connect",
                state: ConnectionState::Connected
            })
        ));
    }

    #[tokio::test]
    async fn test_room_operations_rejected_outside_room() {
        let transport = Arc::new(SilentTransport::default());
        let (handle, _task, _cancel) = spawn_session(Arc::clone(&transport));

        let lock = handle.lock_room(SecretString::from("k")).await;
        assert!(matches!(
            lock,
            Err(SignalingError::InvalidState {
                operation: "lock room",
                state: ConnectionState::Disconnected
            })
        ));

        let join = handle.join_room("lobby", None).await;
        assert!(matches!(join, Err(SignalingError::InvalidState { .. })));

        let mute = handle.set_local_audio_muted(true).await;
        assert!(matches!(mute, Err(SignalingError::InvalidState { .. })));

        // Nothing reached the transport.
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_second_join_while_pending_is_busy() {
        let transport = Arc::new(SilentTransport::default());
        let (handle, _task, _cancel) = spawn_session(Arc::clone(&transport));

        handle
            .connect_to_host("localhost")
            .await
            .unwrap()
            .await
            .unwrap();

        let _first = handle.join_room("lobby", None).await.unwrap();
        assert_eq!(handle.state(), ConnectionState::JoiningRoom);

        let second = handle.join_room("other", None).await;
        assert!(matches!(
            second,
            Err(SignalingError::Busy {
                pending: "join room"
            })
        ));

        let leave = handle.leave_room().await;
        assert!(matches!(leave, Err(SignalingError::Busy { .. })));

        assert_eq!(*transport.sent.lock().unwrap(), vec!["join-room"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_times_out_and_reverts() {
        let (handle, _task, _cancel) = spawn_session(Arc::new(SilentTransport::default()));

        handle
            .connect_to_host("localhost")
            .await
            .unwrap()
            .await
            .unwrap();

        let pending = handle.join_room("lobby", None).await.unwrap();
        let result = pending.await;

        assert!(matches!(result, Err(SignalingError::Transport(msg)) if msg.contains("timed out")));
        assert_eq!(handle.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_shutdown_disconnects_transport() {
        let transport = Arc::new(SilentTransport::default());
        let (handle, task, cancel) = spawn_session(Arc::clone(&transport));

        handle
            .connect_to_host("localhost")
            .await
            .unwrap()
            .await
            .unwrap();

        cancel.cancel();
        tokio::time::timeout(TEST_WAIT, task).await.unwrap().unwrap();

        assert_eq!(handle.state(), ConnectionState::Disconnected);
        assert_eq!(*transport.disconnects.lock().unwrap(), 1);

        let after = handle.leave_room().await;
        assert!(matches!(after, Err(SignalingError::Internal(_))));
        assert_eq!(handle.mailbox_depth(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_connect_does_not_close_newer_connection() {
        let transport = Arc::new(GatedTransport::default());
        let config = SessionConfig {
            request_timeout: Duration::from_millis(100),
            ..SessionConfig::default()
        };
        let (handle, _task) = SessionActor::spawn(
            config,
            Arc::clone(&transport) as Arc<dyn Transport>,
            Arc::new(FakeMedia),
            CancellationToken::new(),
        )
        .unwrap();

        let first = handle.connect_to_host("localhost").await.unwrap().await;
        assert!(matches!(first, Err(SignalingError::Transport(msg)) if msg.contains("timed out")));
        assert_eq!(handle.state(), ConnectionState::Disconnected);
        let disconnects_after_timeout = *transport.disconnects.lock().unwrap();

        handle
            .connect_to_host("localhost")
            .await
            .unwrap()
            .await
            .unwrap();
        assert_eq!(handle.state(), ConnectionState::Connected);

        // The late first connect completes; the session drops its receiver.
        transport.release_first();
        let stale = tokio::time::timeout(TEST_WAIT, async {
            loop {
                if let Some(tx) = transport.inbound_for(0) {
                    return tx;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        tokio::time::timeout(TEST_WAIT, stale.closed())
            .await
            .unwrap();

        assert_eq!(handle.state(), ConnectionState::Connected);
        assert_eq!(
            *transport.disconnects.lock().unwrap(),
            disconnects_after_timeout
        );
        let live = transport.inbound_for(1).unwrap();
        assert!(!live.is_closed());
    }
}
