//! Integration tests for the session lifecycle.
//!
//! Covers connect, join, leave, disconnect and shutdown against the mock
//! signaling server, including request timeouts, the single in-flight request
//! rule, and teardown when the server drops the connection.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use common::types::PeerId;
use session_test_utils::*;
use signaling_session::media::MediaKind;
use signaling_session::transport::{JoinOutcome, ServerEndpoint};
use signaling_session::{ConnectionState, SessionConfig, SignalingError};

#[tokio::test]
async fn test_end_to_end_single_peer() {
    let server = MockSignalingServer::new();
    let media = MockMediaEngine::new();
    let observer = Arc::new(RecordingObserver::new());

    let (session, _task) = spawn_session(&server, &media, test_config());
    session.add_observer(&observer).await.unwrap();

    session
        .connect_to_host("localhost")
        .await
        .unwrap()
        .await
        .unwrap();
    assert_eq!(session.state(), ConnectionState::Connected);

    session.join_room("lobby", None).await.unwrap().await.unwrap();
    assert_eq!(session.state(), ConnectionState::InRoom);
    assert_eq!(session.room_name().as_deref(), Some("lobby"));
    assert!(!session.is_room_locked());

    server.peer_joined(&TestPeer::new("alice"));
    wait_for_snapshot(&session, |s| s.peers.len() == 1).await;

    let peers = session.remote_peers();
    assert_eq!(peers.len(), 1);
    let alice = peers.first().unwrap();
    assert_eq!(alice.peer_id, "alice");
    assert_eq!(alice.stream.id(), "remote/alice/alice-stream");
    assert_eq!(observer.count("stream_added"), 1);

    server.peer_muted("alice", MediaKind::Audio, true);
    wait_for_snapshot(&session, |s| s.peers.iter().any(|p| p.audio_muted)).await;

    let alice = session.remote_peer(&PeerId::new("alice")).unwrap();
    assert!(alice.audio_muted);
    assert!(!alice.video_muted);
    assert_eq!(observer.count("peer_audio_mute_changed"), 1);

    session.leave_room().await.unwrap();

    assert!(session.remote_peers().is_empty());
    assert_eq!(session.state(), ConnectionState::Connected);
    assert!(session.room_name().is_none());
    assert_eq!(observer.removed_peers(), vec!["alice"]);
    assert_eq!(media.released(), vec!["alice"]);
    assert_eq!(server.sent_names(), vec!["join-room", "leave-room"]);
}

#[tokio::test]
async fn test_connect_uses_configured_defaults() {
    let server = MockSignalingServer::new();
    let media = MockMediaEngine::new();
    let config = SessionConfig {
        default_port: 9443,
        default_secure: true,
        ..test_config()
    };

    let (session, _task) = spawn_session(&server, &media, config);
    session
        .connect_to_host("signal.example.com")
        .await
        .unwrap()
        .await
        .unwrap();

    let connects = server.connects();
    assert_eq!(connects.len(), 1);
    assert_eq!(
        connects.first().unwrap().url(),
        "wss://signal.example.com:9443"
    );
}

#[tokio::test]
async fn test_connect_explicit_endpoint() {
    let server = MockSignalingServer::new();
    let media = MockMediaEngine::new();
    let (session, _task) = spawn_session(&server, &media, test_config());

    let endpoint = ServerEndpoint::new("10.0.0.5", 7000, false);
    session.connect(endpoint.clone()).await.unwrap().await.unwrap();

    assert_eq!(server.connects(), vec![endpoint]);
    assert_eq!(session.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_connect_failure_returns_to_disconnected() {
    let server = MockSignalingServer::builder()
        .refuse_connections("connection refused")
        .build();
    let media = MockMediaEngine::new();
    let (session, _task) = spawn_session(&server, &media, test_config());

    let result = session.connect_to_host("localhost").await.unwrap().await;

    assert!(matches!(result, Err(SignalingError::Transport(msg)) if msg.contains("refused")));
    assert_eq!(session.state(), ConnectionState::Disconnected);

    // A failed connect does not block a retry.
    let retry = session.connect_to_host("localhost").await.unwrap().await;
    assert!(retry.is_err());
    assert_eq!(server.connects().len(), 2);
}

#[tokio::test]
async fn test_operations_rejected_in_wrong_state() {
    let server = MockSignalingServer::new();
    let media = MockMediaEngine::new();
    let (session, _task) = spawn_session(&server, &media, test_config());

    let join = session.join_room("lobby", None).await;
    assert!(matches!(
        join,
        Err(SignalingError::InvalidState {
            operation: "join room",
            state: ConnectionState::Disconnected
        })
    ));

    session
        .connect_to_host("localhost")
        .await
        .unwrap()
        .await
        .unwrap();

    let lock = session
        .lock_room(common::secret::SecretString::from("k"))
        .await;
    assert!(matches!(
        lock,
        Err(SignalingError::InvalidState {
            operation: "lock room",
            state: ConnectionState::Connected
        })
    ));

    let unlock = session.unlock_room().await;
    assert!(matches!(
        unlock,
        Err(SignalingError::InvalidState {
            operation: "unlock room",
            ..
        })
    ));

    // Rejected locally: nothing reached the server.
    assert!(server.sent_names().is_empty());
}

#[tokio::test]
async fn test_second_request_while_join_pending_is_busy() {
    let server = MockSignalingServer::builder().with_manual_replies().build();
    let media = MockMediaEngine::new();
    let (session, _task) = connected_session(&server, &media).await;

    let first = session.join_room("lobby", None).await.unwrap();
    assert_eq!(session.state(), ConnectionState::JoiningRoom);

    let second = session.join_room("other", None).await;
    assert!(matches!(
        second,
        Err(SignalingError::Busy {
            pending: "join room"
        })
    ));

    let leave = session.leave_room().await;
    assert!(matches!(leave, Err(SignalingError::Busy { .. })));
    assert!(leave.unwrap_err().is_recoverable());

    assert_eq!(server.sent_count("join-room"), 1);

    server.reply_to_join(JoinOutcome::Joined { locked: false });
    first.await.unwrap();

    assert_eq!(session.state(), ConnectionState::InRoom);
    assert_eq!(session.room_name().as_deref(), Some("lobby"));
}

#[tokio::test(start_paused = true)]
async fn test_join_timeout_reverts_and_ignores_late_reply() {
    let server = MockSignalingServer::builder().with_manual_replies().build();
    let media = MockMediaEngine::new();
    let (session, _task) = connected_session(&server, &media).await;

    let pending = session.join_room("lobby", None).await.unwrap();
    let result = pending.await;

    assert!(matches!(result, Err(SignalingError::Transport(msg)) if msg.contains("timed out")));
    assert_eq!(session.state(), ConnectionState::Connected);

    // The server answers after the deadline; the session stays out of the room.
    server.reply_to_join(JoinOutcome::Joined { locked: false });
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(session.state(), ConnectionState::Connected);
    assert!(session.room_name().is_none());

    // And a new join is accepted.
    let retry = session.join_room("lobby", None).await.unwrap();
    server.reply_to_join(JoinOutcome::Joined { locked: false });
    retry.await.unwrap();
    assert_eq!(session.state(), ConnectionState::InRoom);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_is_configurable() {
    let server = MockSignalingServer::builder().with_manual_replies().build();
    let media = MockMediaEngine::new();
    let config = SessionConfig {
        request_timeout: Duration::from_millis(250),
        ..test_config()
    };
    let (session, _task) = spawn_session(&server, &media, config);
    session
        .connect_to_host("localhost")
        .await
        .unwrap()
        .await
        .unwrap();

    let started = tokio::time::Instant::now();
    let result = session.join_room("lobby", None).await.unwrap().await;

    assert!(result.is_err());
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(250));
    assert!(elapsed < Duration::from_secs(2));
}

#[tokio::test]
async fn test_leave_with_peers_then_noop() {
    let server = MockSignalingServer::new();
    let media = MockMediaEngine::new();
    let observer = Arc::new(RecordingObserver::new());
    let (session, _task) = session_in_room(&server, &media, &TestRoom::open("lobby")).await;
    session.add_observer(&observer).await.unwrap();

    for id in ["alice", "bob", "carol"] {
        server.peer_joined(&TestPeer::new(id));
    }
    wait_for_snapshot(&session, |s| s.peers.len() == 3).await;

    session.leave_room().await.unwrap();

    assert_eq!(observer.count("stream_removed"), 3);
    assert_eq!(observer.removed_peers(), vec!["alice", "bob", "carol"]);
    assert_eq!(session.state(), ConnectionState::Connected);
    assert_eq!(media.live_remote_streams(), 0);

    observer.clear();
    session.leave_room().await.unwrap();

    assert!(observer.events().is_empty());
    assert_eq!(session.state(), ConnectionState::Connected);
    assert_eq!(server.sent_count("leave-room"), 1);
}

#[tokio::test]
async fn test_transport_loss_tears_down_room() {
    let server = MockSignalingServer::new();
    let media = MockMediaEngine::new();
    let observer = Arc::new(RecordingObserver::new());
    let (session, _task) = session_in_room(&server, &media, &TestRoom::open("lobby")).await;
    session.add_observer(&observer).await.unwrap();

    server.peer_joined(&TestPeer::new("alice"));
    server.peer_joined(&TestPeer::new("bob"));
    wait_for_snapshot(&session, |s| s.peers.len() == 2).await;

    server.close_connection();
    let snapshot = wait_for_snapshot(&session, |s| s.state == ConnectionState::Disconnected).await;

    assert!(snapshot.room.is_none());
    assert!(snapshot.peers.is_empty());
    assert_eq!(observer.removed_peers(), vec!["alice", "bob"]);
    assert_eq!(media.released(), vec!["alice", "bob"]);

    // The session can reconnect.
    session
        .connect_to_host("localhost")
        .await
        .unwrap()
        .await
        .unwrap();
    assert_eq!(session.state(), ConnectionState::Connected);
    assert_eq!(server.connects().len(), 2);
}

#[tokio::test]
async fn test_transport_loss_fails_pending_request() {
    let server = MockSignalingServer::builder().with_manual_replies().build();
    let media = MockMediaEngine::new();
    let (session, _task) = connected_session(&server, &media).await;

    let pending = session.join_room("lobby", None).await.unwrap();
    server.close_connection();

    let result = pending.await;
    assert!(matches!(result, Err(SignalingError::Transport(msg)) if msg.contains("lost")));
    assert_eq!(session.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_disconnect_leaves_room_and_closes_transport() {
    let server = MockSignalingServer::new();
    let media = MockMediaEngine::new();
    let observer = Arc::new(RecordingObserver::new());
    let (session, _task) = session_in_room(&server, &media, &TestRoom::open("lobby")).await;
    session.add_observer(&observer).await.unwrap();

    server.peer_joined(&TestPeer::new("alice"));
    wait_for_snapshot(&session, |s| s.peers.len() == 1).await;

    session.disconnect().await.unwrap();

    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert_eq!(server.sent_count("leave-room"), 1);
    assert_eq!(server.disconnect_count(), 1);
    assert_eq!(observer.removed_peers(), vec!["alice"]);

    // Disconnecting again is a no-op.
    session.disconnect().await.unwrap();
    assert_eq!(server.disconnect_count(), 1);
}

#[tokio::test]
async fn test_shutdown_leaves_room() {
    let server = MockSignalingServer::new();
    let media = MockMediaEngine::new();
    let (session, task) = session_in_room(&server, &media, &TestRoom::open("lobby")).await;

    session.shutdown();
    tokio::time::timeout(WAIT_TIMEOUT, task)
        .await
        .unwrap()
        .unwrap();

    assert!(session.is_cancelled());
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert_eq!(server.sent_count("leave-room"), 1);
    assert_eq!(server.disconnect_count(), 1);

    let after = session.join_room("lobby", None).await;
    assert!(matches!(after, Err(SignalingError::Internal(_))));
}

#[tokio::test]
async fn test_spawn_without_capture_device_fails() {
    let server = MockSignalingServer::new();
    let media = MockMediaEngine::new().without_capture();

    let result = signaling_session::SessionActor::spawn(
        test_config(),
        Arc::new(server),
        Arc::new(media),
        tokio_util::sync::CancellationToken::new(),
    );

    assert!(matches!(result, Err(SignalingError::Media(_))));
}

#[tokio::test]
async fn test_audio_only_session() {
    let server = MockSignalingServer::new();
    let media = MockMediaEngine::new();
    let config = SessionConfig {
        allow_video: false,
        ..test_config()
    };

    let (session, _task) = spawn_session(&server, &media, config);

    assert_eq!(media.local_video(), Some(false));
    assert_eq!(session.local_stream().id(), "local");
}
