//! Room and lock state.
//!
//! The controller performs no I/O. The session actor drives it from confirmed
//! server replies and inbound lock-changed events.

use crate::observer::SessionEvent;
use common::secret::SecretString;
use tracing::debug;

/// The room the session is currently in.
#[derive(Debug, Clone)]
pub struct Room {
    name: String,
    key: Option<SecretString>,
    locked: bool,
}

impl Room {
    /// Room name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Key used to join or lock the room, if any.
    #[must_use]
    pub fn key(&self) -> Option<&SecretString> {
        self.key.as_ref()
    }

    /// Whether the room is locked.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked
    }
}

/// Holds the current [`Room`], if any.
#[derive(Debug, Default)]
pub struct RoomController {
    current: Option<Room>,
}

impl RoomController {
    /// Create a controller outside of any room.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter a room after a confirmed join, replacing any previous one.
    pub fn enter(&mut self, name: String, key: Option<SecretString>, locked: bool) {
        debug!(target: "signaling.room", room = %name, locked, "Entered room");
        self.current = Some(Room { name, key, locked });
    }

    /// Leave the current room, returning it.
    pub fn clear(&mut self) -> Option<Room> {
        self.current.take()
    }

    /// The current room.
    #[must_use]
    pub fn current(&self) -> Option<&Room> {
        self.current.as_ref()
    }

    /// Current room name.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.current.as_ref().map(Room::name)
    }

    /// Current room key.
    #[must_use]
    pub fn key(&self) -> Option<&SecretString> {
        self.current.as_ref().and_then(Room::key)
    }

    /// Whether the current room is locked. `false` outside a room.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.current.as_ref().is_some_and(Room::is_locked)
    }

    /// Replace the key of the current room.
    pub fn set_key(&mut self, key: Option<SecretString>) {
        if let Some(room) = self.current.as_mut() {
            room.key = key;
        }
    }

    /// Apply a lock state.
    ///
    /// Returns a `LockChanged` event only when in a room and the flag changed.
    pub fn set_locked(&mut self, locked: bool) -> Option<SessionEvent> {
        let room = self.current.as_mut()?;
        if room.locked == locked {
            return None;
        }
        room.locked = locked;
        debug!(target: "signaling.room", room = %room.name, locked, "Lock state changed");
        Some(SessionEvent::LockChanged { locked })
    }
}
