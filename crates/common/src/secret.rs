//! Secret types for protecting sensitive values from accidental logging.
//!
//! This module re-exports types from the [`secrecy`] crate. Room keys are the
//! main secret handled by the signaling client: they travel from the
//! application into join and lock requests and are only exposed when the
//! request is encoded for the wire.
//!
//! # Compile-Time Safety
//!
//! `SecretString` implements `Debug` with redaction, so any struct or message
//! enum deriving `Debug` that carries a room key is safe to log via `{:?}` or
//! tracing fields.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct JoinRequest {
//!     room: String,
//!     key: Option<SecretString>,
//! }
//!
//! let req = JoinRequest {
//!     room: "lobby".to_string(),
//!     key: Some(SecretString::from("hunter2")),
//! };
//!
//! // Safe: the key is redacted
//! println!("{:?}", req);
//!
//! // Access requires an explicit call
//! let key: &str = req.key.as_ref().map(|k| k.expose_secret()).unwrap_or_default();
//! assert_eq!(key, "hunter2");
//! ```

// Re-export the main types from secrecy
pub use secrecy::{ExposeSecret, SecretBox, SecretString};
