//! Room Signaling Session Library
//!
//! Client-side signaling for multi-peer media rooms:
//!
//! - Connection and room state machine (connect, join, leave, lock, unlock)
//! - Peer registry of remote participants and their mute state
//! - Observer notifications for stream, mute, lock and key-prompt changes
//! - Transport and media engine ports supplied by the application
//!
//! # Architecture
//!
//! ```text
//! Application ──► SessionHandle ──► SessionActor ──► Transport ──► signaling server
//!      ▲                               │    ▲
//!      │                               │    └── InboundEvent
//!      └────── SessionObserver ◄───────┤
//!                                      └──► MediaEngine
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! let (session, _task) = SessionActor::spawn(config, transport, media, CancellationToken::new())?;
//! session.add_observer(&observer).await?;
//! session.connect_to_host("signal.example.com").await?.await?;
//! session.join_room("lobby", None).await?.await?;
//! ```
//!
//! # Modules
//!
//! - [`actors`] - Session actor and handle
//! - [`config`] - Configuration from environment
//! - [`errors`] - Error types
//! - [`observer`] - Observer trait and notifications
//! - [`registry`] - Peer registry
//! - [`room`] - Room and lock state
//! - [`transport`] - Transport port and wire events
//! - [`media`] - Media engine port
//! - [`observability`] - Logging setup and metrics

pub mod actors;
pub mod config;
pub mod errors;
pub mod media;
pub mod observability;
pub mod observer;
pub mod registry;
pub mod room;
pub mod transport;

pub use actors::{ConnectionState, PendingRequest, SessionActor, SessionHandle, SessionSnapshot};
pub use config::SessionConfig;
pub use errors::SignalingError;
pub use observer::{ObserverId, SessionEvent, SessionObserver};
pub use registry::Peer;
