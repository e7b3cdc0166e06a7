//! # Session Test Utilities
//!
//! Shared test utilities for the room signaling session.
//!
//! This crate provides mock implementations of the session's ports and test
//! fixtures for exercising the session without a real signaling server or
//! media stack.
//!
//! ## Modules
//!
//! - `mock_server` - In-memory signaling server implementing `Transport`
//! - `mock_media` - Recording `MediaEngine`
//! - `observer` - Observer that records every notification
//! - `fixtures` - Test rooms, peers and session setup helpers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use session_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let server = MockSignalingServer::builder()
//!         .with_protected_room("vault", "s3cret")
//!         .build();
//!     let media = MockMediaEngine::new();
//!
//!     let (session, _task) = connected_session(&server, &media).await;
//!     session.join_room("lobby", None).await.unwrap().await.unwrap();
//!
//!     server.peer_joined(&TestPeer::new("alice"));
//!     wait_for_snapshot(&session, |s| s.peers.len() == 1).await;
//! }
//! ```

pub mod fixtures;
pub mod mock_media;
pub mod mock_server;
pub mod observer;

pub use fixtures::*;
pub use mock_media::MockMediaEngine;
pub use mock_server::{MockSignalingServer, MockSignalingServerBuilder};
pub use observer::RecordingObserver;
