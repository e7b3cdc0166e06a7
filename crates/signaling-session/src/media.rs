//! Media engine port.
//!
//! The session owns no capture, codec, or RTP machinery. It asks the
//! application's [`MediaEngine`] for stream handles and toggles local tracks
//! through it so mute state and the actual media stay in step.

use common::types::PeerId;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Which half of a stream a mute flag applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    /// Returns the kind as a string for logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque reference to a stream owned by the media engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamHandle {
    id: String,
}

impl StreamHandle {
    /// Wrap an engine-specific stream identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// Engine-specific identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Media engine failures.
#[derive(Debug, Clone, Error)]
pub enum MediaError {
    /// No capture device, or the device refused to open.
    #[error("Capture unavailable: {0}")]
    CaptureUnavailable(String),

    /// The remote stream reference is unknown to the engine.
    #[error("Unknown remote stream: {0}")]
    UnknownStream(String),
}

/// Application-provided media engine.
///
/// Calls are made from the session actor and must not block for long.
pub trait MediaEngine: Send + Sync {
    /// Create the local capture stream. Called once, when the session is spawned.
    fn create_local_stream(&self, allow_video: bool) -> Result<StreamHandle, MediaError>;

    /// Enable or disable one kind of track on the local stream.
    fn set_local_track_enabled(&self, stream: &StreamHandle, kind: MediaKind, enabled: bool);

    /// Resolve the stream a peer announced into a handle the application can render.
    fn attach_remote_stream(
        &self,
        peer_id: &PeerId,
        stream_id: &str,
    ) -> Result<StreamHandle, MediaError>;

    /// Release a remote stream once its peer is gone.
    fn release_remote_stream(&self, peer_id: &PeerId, stream: &StreamHandle);
}
