//! Actor model implementation for the signaling session.
//!
//! ```text
//! SessionHandle (cloneable, held by the application and by observers)
//! └── SessionActor (one per session, owns all session state)
//!     ├── mailbox:   local API calls
//!     ├── inbound:   events from the Transport
//!     └── internal:  completions of spawned transport connects
//! ```
//!
//! # Key Design Decisions
//!
//! - **Single writer**: registry, room and local state are mutated only on the
//!   actor task, so inbound events and local calls never interleave
//! - **One request in flight**: a second connect/join/lock/unlock (or a leave)
//!   while one is pending is rejected with `Busy`
//! - **Snapshot reads**: accessors read a `watch` snapshot published before
//!   observers are notified
//! - **CancellationToken**: cancelling leaves the room and closes the transport
//!
//! # Modules
//!
//! - [`session`] - `SessionActor` and `SessionHandle`
//! - [`messages`] - Message, state and snapshot types
//! - [`metrics`] - Mailbox monitoring

pub mod messages;
pub mod metrics;
pub mod session;

// Re-export primary types
pub use messages::{ConnectionState, LocalState, PendingRequest, SessionMessage, SessionSnapshot};
pub use metrics::{MailboxLevel, MailboxMonitor};
pub use session::{SessionActor, SessionHandle};
