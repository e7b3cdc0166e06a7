//! Pre-configured test data and session setup helpers.
//!
//! Provides:
//! - Rooms, open or protected by a key
//! - Peers with predictable stream IDs
//! - Spawning sessions against the mocks, already connected or in a room

use crate::mock_media::MockMediaEngine;
use crate::mock_server::MockSignalingServer;
use common::secret::SecretString;
use common::types::PeerId;
use signaling_session::{SessionActor, SessionConfig, SessionHandle, SessionSnapshot};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// How long helpers wait on the session before failing the test.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Test room fixture.
#[derive(Debug, Clone)]
pub struct TestRoom {
    /// Room name.
    pub name: String,
    /// Key, for protected rooms.
    pub key: Option<String>,
}

impl TestRoom {
    /// A room anyone can join.
    #[must_use]
    pub fn open(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: None,
        }
    }

    /// A room protected by `key`.
    #[must_use]
    pub fn protected(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: Some(key.into()),
        }
    }

    /// An open room with a random name.
    #[must_use]
    pub fn random() -> Self {
        Self::open(format!("room-{}", Uuid::new_v4()))
    }

    /// The key as a secret, for `join_room`.
    #[must_use]
    pub fn secret_key(&self) -> Option<SecretString> {
        self.key.as_deref().map(SecretString::from)
    }
}

/// Test peer fixture.
#[derive(Debug, Clone)]
pub struct TestPeer {
    /// Peer ID.
    pub peer_id: PeerId,
    /// Stream ID the peer announces.
    pub stream_id: String,
}

impl TestPeer {
    /// Create a peer whose stream ID is `<id>-stream`.
    #[must_use]
    pub fn new(id: &str) -> Self {
        Self {
            peer_id: PeerId::new(id),
            stream_id: format!("{id}-stream"),
        }
    }
}

/// Configuration for tests: defaults with a short request timeout.
#[must_use]
pub fn test_config() -> SessionConfig {
    SessionConfig {
        request_timeout: Duration::from_secs(2),
        ..SessionConfig::default()
    }
}

/// Spawn a `Disconnected` session against the mocks.
///
/// # Panics
///
/// Panics if the session cannot be spawned.
pub fn spawn_session(
    server: &MockSignalingServer,
    media: &MockMediaEngine,
    config: SessionConfig,
) -> (SessionHandle, JoinHandle<()>) {
    SessionActor::spawn(
        config,
        Arc::new(server.clone()),
        Arc::new(media.clone()),
        CancellationToken::new(),
    )
    .expect("failed to spawn session")
}

/// Spawn a session and connect it.
///
/// # Panics
///
/// Panics if the connect fails.
pub async fn connected_session(
    server: &MockSignalingServer,
    media: &MockMediaEngine,
) -> (SessionHandle, JoinHandle<()>) {
    let (session, task) = spawn_session(server, media, test_config());
    session
        .connect_to_host("localhost")
        .await
        .expect("connect rejected")
        .await
        .expect("connect failed");
    (session, task)
}

/// Spawn a session, connect it and join `room`.
///
/// # Panics
///
/// Panics if any step fails.
pub async fn session_in_room(
    server: &MockSignalingServer,
    media: &MockMediaEngine,
    room: &TestRoom,
) -> (SessionHandle, JoinHandle<()>) {
    let (session, task) = connected_session(server, media).await;
    session
        .join_room(room.name.clone(), room.secret_key())
        .await
        .expect("join rejected")
        .await
        .expect("join failed");
    (session, task)
}

/// Wait until the session publishes a snapshot matching `predicate`.
///
/// # Panics
///
/// Panics after [`WAIT_TIMEOUT`] or if the session is gone.
pub async fn wait_for_snapshot<F>(session: &SessionHandle, predicate: F) -> SessionSnapshot
where
    F: FnMut(&SessionSnapshot) -> bool,
{
    let mut updates = session.subscribe();
    let snapshot = tokio::time::timeout(WAIT_TIMEOUT, updates.wait_for(predicate))
        .await
        .expect("timed out waiting for session state")
        .expect("session gone");
    snapshot.clone()
}
