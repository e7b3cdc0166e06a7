//! Peer registry: the remote participants of the current room.
//!
//! The registry is owned by the session actor and mutated only from its task.
//! Every mutating call returns the [`SessionEvent`] describing the change, or
//! `None` when the call was a no-op, so the caller can publish state and then
//! notify observers exactly once per real change.
//!
//! Iteration order is insertion order and is stable across mutations of other
//! entries.

use crate::media::{MediaKind, StreamHandle};
use crate::observer::SessionEvent;
use common::types::PeerId;
use tracing::{debug, warn};

/// A remote participant and the state of its media.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    /// Server-assigned identifier, unique within the room.
    pub peer_id: PeerId,
    /// Handle to the peer's stream in the media engine.
    pub stream: StreamHandle,
    /// Whether the peer muted its audio.
    pub audio_muted: bool,
    /// Whether the peer muted its video.
    pub video_muted: bool,
    /// When the peer was added (Unix seconds).
    pub added_at: i64,
}

impl Peer {
    fn new(peer_id: PeerId, stream: StreamHandle) -> Self {
        Self {
            peer_id,
            stream,
            audio_muted: false,
            video_muted: false,
            added_at: chrono::Utc::now().timestamp(),
        }
    }

    /// Mute flag for the given kind.
    #[must_use]
    pub fn is_muted(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Audio => self.audio_muted,
            MediaKind::Video => self.video_muted,
        }
    }
}

/// Ordered set of peers keyed by [`PeerId`].
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: Vec<Peer>,
}

impl PeerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of peers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether there are no peers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Whether a peer with this ID is present.
    #[must_use]
    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.position(peer_id).is_some()
    }

    /// Look up a peer.
    #[must_use]
    pub fn get(&self, peer_id: &PeerId) -> Option<&Peer> {
        self.peers.iter().find(|p| &p.peer_id == peer_id)
    }

    /// Iterate peers in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.peers.iter()
    }

    /// Copy of the current peers in insertion order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Peer> {
        self.peers.clone()
    }

    /// Insert a peer.
    ///
    /// A second add for an ID already present is rejected: the existing entry
    /// is left untouched and no event is produced.
    pub fn add_peer(&mut self, peer_id: PeerId, stream: StreamHandle) -> Option<SessionEvent> {
        if self.contains(&peer_id) {
            warn!(
                target: "signaling.registry",
                peer_id = %peer_id,
                "Duplicate stream-added for known peer, ignoring"
            );
            return None;
        }

        let peer = Peer::new(peer_id, stream);
        debug!(
            target: "signaling.registry",
            peer_id = %peer.peer_id,
            total_peers = self.peers.len() + 1,
            "Peer added"
        );
        self.peers.push(peer.clone());
        Some(SessionEvent::StreamAdded(peer))
    }

    /// Remove a peer. Unknown IDs are a no-op.
    pub fn remove_peer(&mut self, peer_id: &PeerId) -> Option<SessionEvent> {
        let Some(index) = self.position(peer_id) else {
            debug!(
                target: "signaling.registry",
                peer_id = %peer_id,
                "Remove for unknown peer, ignoring"
            );
            return None;
        };

        let peer = self.peers.remove(index);
        debug!(
            target: "signaling.registry",
            peer_id = %peer.peer_id,
            remaining_peers = self.peers.len(),
            "Peer removed"
        );
        Some(SessionEvent::StreamRemoved(peer))
    }

    /// Update a peer's audio mute flag.
    pub fn set_peer_audio_muted(&mut self, peer_id: &PeerId, muted: bool) -> Option<SessionEvent> {
        self.set_peer_muted(peer_id, MediaKind::Audio, muted)
    }

    /// Update a peer's video mute flag.
    pub fn set_peer_video_muted(&mut self, peer_id: &PeerId, muted: bool) -> Option<SessionEvent> {
        self.set_peer_muted(peer_id, MediaKind::Video, muted)
    }

    /// Update one of a peer's mute flags.
    ///
    /// Produces an event only when the peer exists and the flag actually changed.
    pub fn set_peer_muted(
        &mut self,
        peer_id: &PeerId,
        kind: MediaKind,
        muted: bool,
    ) -> Option<SessionEvent> {
        let peer = self.peers.iter_mut().find(|p| &p.peer_id == peer_id)?;

        let flag = match kind {
            MediaKind::Audio => &mut peer.audio_muted,
            MediaKind::Video => &mut peer.video_muted,
        };
        if *flag == muted {
            return None;
        }
        *flag = muted;

        let peer_id = peer_id.clone();
        Some(match kind {
            MediaKind::Audio => SessionEvent::PeerAudioMuteChanged { peer_id, muted },
            MediaKind::Video => SessionEvent::PeerVideoMuteChanged { peer_id, muted },
        })
    }

    /// Remove every peer, returning one removal event per peer in insertion order.
    pub fn drain(&mut self) -> Vec<SessionEvent> {
        self.peers.drain(..).map(SessionEvent::StreamRemoved).collect()
    }

    fn position(&self, peer_id: &PeerId) -> Option<usize> {
        self.peers.iter().position(|p| &p.peer_id == peer_id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn stream(id: &str) -> StreamHandle {
        StreamHandle::new(id)
    }

    fn ids(registry: &PeerRegistry) -> Vec<String> {
        registry.iter().map(|p| p.peer_id.to_string()).collect()
    }

    #[test]
    fn test_add_peer_emits_stream_added() {
        let mut registry = PeerRegistry::new();

        let event = registry.add_peer(PeerId::new("alice"), stream("s-a"));

        assert!(matches!(
            &event,
            Some(SessionEvent::StreamAdded(peer))
                if peer.peer_id == "alice"
                    && peer.stream.id() == "s-a"
                    && !peer.audio_muted
                    && !peer.video_muted
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_add_is_rejected() {
        let mut registry = PeerRegistry::new();
        registry.add_peer(PeerId::new("alice"), stream("s1"));

        let second = registry.add_peer(PeerId::new("alice"), stream("s2"));

        assert!(second.is_none());
        assert_eq!(registry.len(), 1);
        // Original stream is kept.
        assert_eq!(registry.get(&PeerId::new("alice")).unwrap().stream.id(), "s1");
    }

    #[test]
    fn test_remove_unknown_peer_is_noop() {
        let mut registry = PeerRegistry::new();
        assert!(registry.remove_peer(&PeerId::new("ghost")).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_returns_removed_peer() {
        let mut registry = PeerRegistry::new();
        registry.add_peer(PeerId::new("alice"), stream("s-a"));
        registry.add_peer(PeerId::new("bob"), stream("s-b"));

        let event = registry.remove_peer(&PeerId::new("alice"));

        assert!(matches!(
            event,
            Some(SessionEvent::StreamRemoved(ref peer)) if peer.peer_id == "alice"
        ));
        assert_eq!(ids(&registry), vec!["bob"]);
    }

    #[test]
    fn test_iteration_order_is_insertion_order() {
        let mut registry = PeerRegistry::new();
        for id in ["carol", "alice", "bob"] {
            registry.add_peer(PeerId::new(id), stream(id));
        }
        registry.remove_peer(&PeerId::new("alice"));
        registry.add_peer(PeerId::new("dave"), stream("dave"));

        assert_eq!(ids(&registry), vec!["carol", "bob", "dave"]);
    }

    #[test]
    fn test_mute_fires_only_on_change() {
        let mut registry = PeerRegistry::new();
        registry.add_peer(PeerId::new("alice"), stream("s-a"));
        let alice = PeerId::new("alice");

        let first = registry.set_peer_audio_muted(&alice, true);
        let second = registry.set_peer_audio_muted(&alice, true);

        assert_eq!(
            first,
            Some(SessionEvent::PeerAudioMuteChanged {
                peer_id: alice.clone(),
                muted: true
            })
        );
        assert!(second.is_none());
        assert!(registry.get(&alice).unwrap().audio_muted);
        assert!(!registry.get(&alice).unwrap().video_muted);
    }

    #[test]
    fn test_video_mute_is_independent_of_audio() {
        let mut registry = PeerRegistry::new();
        registry.add_peer(PeerId::new("alice"), stream("s-a"));
        let alice = PeerId::new("alice");

        registry.set_peer_audio_muted(&alice, true);
        let event = registry.set_peer_video_muted(&alice, true);

        assert!(matches!(
            event,
            Some(SessionEvent::PeerVideoMuteChanged { muted: true, .. })
        ));
        let peer = registry.get(&alice).unwrap();
        assert!(peer.is_muted(MediaKind::Audio));
        assert!(peer.is_muted(MediaKind::Video));
    }

    #[test]
    fn test_mute_for_unknown_peer_is_noop() {
        let mut registry = PeerRegistry::new();
        assert!(registry
            .set_peer_video_muted(&PeerId::new("ghost"), true)
            .is_none());
    }

    #[test]
    fn test_drain_emits_one_removal_per_peer() {
        let mut registry = PeerRegistry::new();
        registry.add_peer(PeerId::new("alice"), stream("s-a"));
        registry.add_peer(PeerId::new("bob"), stream("s-b"));

        let events = registry.drain();

        assert_eq!(events.len(), 2);
        assert!(events
            .iter()
            .all(|e| matches!(e, SessionEvent::StreamRemoved(_))));
        assert!(registry.is_empty());
        assert!(registry.drain().is_empty());
    }

    #[test]
    fn test_net_effect_of_add_remove_sequence() {
        // Deterministic pseudo-random sequence of adds/removes over a small id space.
        let mut registry = PeerRegistry::new();
        let mut expected = BTreeSet::new();
        let mut seed: u32 = 7;

        for _ in 0..500 {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let id = format!("peer-{}", (seed >> 8) % 12);
            if (seed >> 4) % 3 == 0 {
                registry.remove_peer(&PeerId::new(id.as_str()));
                expected.remove(&id);
            } else {
                registry.add_peer(PeerId::new(id.as_str()), stream(&id));
                expected.insert(id);
            }

            let actual: BTreeSet<String> = ids(&registry).into_iter().collect();
            assert_eq!(actual, expected);
            assert_eq!(registry.len(), expected.len());
        }
    }
}
