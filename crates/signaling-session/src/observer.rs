//! Observer notifications.
//!
//! Observers implement only the notifications they care about: every method of
//! [`SessionObserver`] has an empty default. The session keeps observers as
//! [`Weak`] references and never extends their lifetime; an observer that has
//! been dropped is pruned on the next dispatch.
//!
//! Notifications are delivered on the session task, after the session
//! snapshot has been updated, so an observer reading the handle's accessors
//! sees the state the notification describes. Callbacks must not block; to
//! issue a follow-up request (e.g. retry a join with a key), spawn a task.

use crate::actors::SessionHandle;
use crate::registry::Peer;
use common::types::PeerId;
use std::sync::Weak;
use tracing::{debug, trace};

/// A session-driven change, one per discrete state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A join was refused because the room needs a (different) key.
    PasswordRequired { room: String },
    /// A peer's stream was added to the registry.
    StreamAdded(Peer),
    /// A peer was removed from the registry.
    StreamRemoved(Peer),
    /// A peer's audio mute flag changed.
    PeerAudioMuteChanged { peer_id: PeerId, muted: bool },
    /// A peer's video mute flag changed.
    PeerVideoMuteChanged { peer_id: PeerId, muted: bool },
    /// The room's lock state changed.
    LockChanged { locked: bool },
}

impl SessionEvent {
    /// Notification name (bounded set, used as a metric label).
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            SessionEvent::PasswordRequired { .. } => "password_required",
            SessionEvent::StreamAdded(_) => "stream_added",
            SessionEvent::StreamRemoved(_) => "stream_removed",
            SessionEvent::PeerAudioMuteChanged { .. } => "peer_audio_mute_changed",
            SessionEvent::PeerVideoMuteChanged { .. } => "peer_video_mute_changed",
            SessionEvent::LockChanged { .. } => "lock_changed",
        }
    }
}

/// Receives session notifications. Implement any subset.
pub trait SessionObserver: Send + Sync {
    /// The room needs a key. Prompt the user and call `join_room` again.
    fn password_required(&self, _session: &SessionHandle, _room: &str) {}

    /// A remote peer's stream is available.
    fn stream_added(&self, _peer: &Peer) {}

    /// A remote peer left; its stream has been released.
    fn stream_removed(&self, _peer: &Peer) {}

    /// A remote peer toggled its audio mute.
    fn peer_audio_mute_changed(&self, _peer_id: &PeerId, _muted: bool) {}

    /// A remote peer toggled its video mute.
    fn peer_video_mute_changed(&self, _peer_id: &PeerId, _muted: bool) {}

    /// The room was locked or unlocked.
    fn lock_changed(&self, _locked: bool) {}
}

/// Token returned by observer registration, used to deregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Non-owning set of observers.
#[derive(Debug, Default)]
pub struct ObserverSet {
    next_id: u64,
    observers: Vec<(ObserverId, Weak<dyn SessionObserver>)>,
}

impl ObserverSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer.
    pub fn add(&mut self, observer: Weak<dyn SessionObserver>) -> ObserverId {
        self.next_id += 1;
        let id = ObserverId(self.next_id);
        self.observers.push((id, observer));
        debug!(target: "signaling.observer", observers = self.observers.len(), "Observer registered");
        id
    }

    /// Deregister an observer. Returns whether it was registered.
    pub fn remove(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(existing, _)| *existing != id);
        before != self.observers.len()
    }

    /// Number of registered observers that are still alive.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.observers
            .iter()
            .filter(|(_, weak)| weak.strong_count() > 0)
            .count()
    }

    /// Deliver an event to every live observer, pruning dropped ones.
    ///
    /// `session` is passed to `password_required`; without a live handle that
    /// notification is skipped since nobody could act on it.
    /// Returns the number of observers notified.
    pub fn dispatch(&mut self, session: Option<&SessionHandle>, event: &SessionEvent) -> usize {
        self.observers.retain(|(_, weak)| weak.strong_count() > 0);

        let mut notified = 0;
        for (_, weak) in &self.observers {
            let Some(observer) = weak.upgrade() else {
                continue;
            };

            match event {
                SessionEvent::PasswordRequired { room } => {
                    let Some(session) = session else {
                        continue;
                    };
                    observer.password_required(session, room);
                }
                SessionEvent::StreamAdded(peer) => observer.stream_added(peer),
                SessionEvent::StreamRemoved(peer) => observer.stream_removed(peer),
                SessionEvent::PeerAudioMuteChanged { peer_id, muted } => {
                    observer.peer_audio_mute_changed(peer_id, *muted);
                }
                SessionEvent::PeerVideoMuteChanged { peer_id, muted } => {
                    observer.peer_video_mute_changed(peer_id, *muted);
                }
                SessionEvent::LockChanged { locked } => observer.lock_changed(*locked),
            }
            notified += 1;
        }

        trace!(
            target: "signaling.observer",
            notification = event.name(),
            notified,
            "Notification dispatched"
        );
        notified
    }
}
