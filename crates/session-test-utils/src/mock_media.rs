//! Recording media engine for session testing.
//!
//! Hands out predictable stream handles (`local`, `remote/<peer>/<stream>`)
//! and records every call so tests can check that remote streams are
//! released and local tracks follow the mute flags.

use common::types::PeerId;
use signaling_session::media::{MediaEngine, MediaError, MediaKind, StreamHandle};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Mock media engine.
#[derive(Debug, Clone, Default)]
pub struct MockMediaEngine {
    inner: Arc<Mutex<MockMediaInner>>,
}

#[derive(Debug, Default)]
struct MockMediaInner {
    /// Fail local stream creation.
    no_capture: bool,
    /// Peers whose streams fail to attach.
    failing_peers: HashSet<PeerId>,
    /// `allow_video` of the local stream, once created.
    local_video: Option<bool>,
    /// Last enabled flag per local track kind.
    tracks: HashMap<MediaKind, bool>,
    attached: Vec<PeerId>,
    released: Vec<PeerId>,
}

impl MockMediaEngine {
    /// Create an engine where everything succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail local stream creation (no capture device).
    #[must_use]
    pub fn without_capture(self) -> Self {
        self.inner.lock().unwrap().no_capture = true;
        self
    }

    /// Fail attaching `peer_id`'s stream.
    #[must_use]
    pub fn with_failing_peer(self, peer_id: &str) -> Self {
        self.inner
            .lock()
            .unwrap()
            .failing_peers
            .insert(PeerId::new(peer_id));
        self
    }

    /// Whether the local stream was created with video. `None` before creation.
    pub fn local_video(&self) -> Option<bool> {
        self.inner.lock().unwrap().local_video
    }

    /// Whether a local track is enabled. Tracks start enabled.
    pub fn is_track_enabled(&self, kind: MediaKind) -> bool {
        self.inner
            .lock()
            .unwrap()
            .tracks
            .get(&kind)
            .copied()
            .unwrap_or(true)
    }

    /// Peers whose streams were attached, in order.
    pub fn attached(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .attached
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    /// Peers whose streams were released, in order.
    pub fn released(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .released
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    /// Attached streams not yet released.
    pub fn live_remote_streams(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.attached.len().saturating_sub(inner.released.len())
    }
}

impl MediaEngine for MockMediaEngine {
    fn create_local_stream(&self, allow_video: bool) -> Result<StreamHandle, MediaError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.no_capture {
            return Err(MediaError::CaptureUnavailable(
                "no capture device".to_string(),
            ));
        }
        inner.local_video = Some(allow_video);
        Ok(StreamHandle::new("local"))
    }

    fn set_local_track_enabled(&self, _stream: &StreamHandle, kind: MediaKind, enabled: bool) {
        self.inner.lock().unwrap().tracks.insert(kind, enabled);
    }

    fn attach_remote_stream(
        &self,
        peer_id: &PeerId,
        stream_id: &str,
    ) -> Result<StreamHandle, MediaError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.failing_peers.contains(peer_id) {
            return Err(MediaError::UnknownStream(stream_id.to_string()));
        }
        inner.attached.push(peer_id.clone());
        Ok(StreamHandle::new(format!("remote/{peer_id}/{stream_id}")))
    }

    fn release_remote_stream(&self, peer_id: &PeerId, _stream: &StreamHandle) {
        self.inner.lock().unwrap().released.push(peer_id.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_attach_and_release() {
        let media = MockMediaEngine::new();
        let alice = PeerId::new("alice");

        let stream = media.attach_remote_stream(&alice, "s1").unwrap();
        assert_eq!(stream.id(), "remote/alice/s1");
        assert_eq!(media.live_remote_streams(), 1);

        media.release_remote_stream(&alice, &stream);
        assert_eq!(media.released(), vec!["alice"]);
        assert_eq!(media.live_remote_streams(), 0);
    }

    #[test]
    fn test_without_capture() {
        let media = MockMediaEngine::new().without_capture();
        assert!(media.create_local_stream(true).is_err());
        assert!(media.local_video().is_none());
    }

    #[test]
    fn test_track_state() {
        let media = MockMediaEngine::new();
        let local = media.create_local_stream(false).unwrap();
        assert_eq!(media.local_video(), Some(false));
        assert!(media.is_track_enabled(MediaKind::Audio));

        media.set_local_track_enabled(&local, MediaKind::Audio, false);
        assert!(!media.is_track_enabled(MediaKind::Audio));
    }
}
