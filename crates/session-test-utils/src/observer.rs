//! Observer that records every notification.
//!
//! # Example
//!
//! ```rust,ignore
//! let observer = Arc::new(RecordingObserver::new());
//! session.add_observer(&observer).await.unwrap();
//!
//! // ... drive the session ...
//!
//! assert_eq!(observer.count("stream_added"), 1);
//! ```

use common::secret::SecretString;
use common::types::PeerId;
use signaling_session::{Peer, SessionEvent, SessionHandle, SessionObserver};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

/// Records notifications in arrival order.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<SessionEvent>>,
    /// Key used to retry a join from `password_required`.
    retry_key: Option<String>,
    changed: Notify,
}

impl RecordingObserver {
    /// Create an observer that only records.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an observer that answers `password_required` by retrying the
    /// join with `key`, as a UI prompting the user would.
    #[must_use]
    pub fn retrying_with_key(key: &str) -> Self {
        Self {
            retry_key: Some(key.to_string()),
            ..Self::default()
        }
    }

    fn record(&self, event: SessionEvent) {
        self.events.lock().unwrap().push(event);
        self.changed.notify_waiters();
    }

    /// Every notification so far.
    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Number of notifications with the given name (see `SessionEvent::name`).
    pub fn count(&self, name: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| event.name() == name)
            .count()
    }

    /// Peer IDs of `stream_removed` notifications, in order.
    pub fn removed_peers(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| match event {
                SessionEvent::StreamRemoved(peer) => Some(peer.peer_id.to_string()),
                _ => None,
            })
            .collect()
    }

    /// Values of `lock_changed` notifications, in order.
    pub fn lock_changes(&self) -> Vec<bool> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| match event {
                SessionEvent::LockChanged { locked } => Some(*locked),
                _ => None,
            })
            .collect()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    /// Wait until at least `n` notifications named `name` arrived.
    ///
    /// # Panics
    ///
    /// Panics after five seconds.
    pub async fn wait_for_count(&self, name: &str, n: usize) {
        let wait = async {
            loop {
                let changed = self.changed.notified();
                if self.count(name) >= n {
                    return;
                }
                changed.await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {n} {name} notifications"));
    }
}

impl SessionObserver for RecordingObserver {
    fn password_required(&self, session: &SessionHandle, room: &str) {
        self.record(SessionEvent::PasswordRequired {
            room: room.to_string(),
        });

        if let Some(key) = &self.retry_key {
            let session = session.clone();
            let room = room.to_string();
            let key = SecretString::from(key.as_str());
            tokio::spawn(async move {
                if let Ok(pending) = session.join_room(room, Some(key)).await {
                    let _ = pending.await;
                }
            });
        }
    }

    fn stream_added(&self, peer: &Peer) {
        self.record(SessionEvent::StreamAdded(peer.clone()));
    }

    fn stream_removed(&self, peer: &Peer) {
        self.record(SessionEvent::StreamRemoved(peer.clone()));
    }

    fn peer_audio_mute_changed(&self, peer_id: &PeerId, muted: bool) {
        self.record(SessionEvent::PeerAudioMuteChanged {
            peer_id: peer_id.clone(),
            muted,
        });
    }

    fn peer_video_mute_changed(&self, peer_id: &PeerId, muted: bool) {
        self.record(SessionEvent::PeerVideoMuteChanged {
            peer_id: peer_id.clone(),
            muted,
        });
    }

    fn lock_changed(&self, locked: bool) {
        self.record(SessionEvent::LockChanged { locked });
    }
}
