//! Common utilities and types shared across the room signaling crates.

#![warn(clippy::pedantic)]

/// Module for identifier newtypes (peers, requests)
pub mod types;

/// Module for common configuration
pub mod config;

/// Module for secret types that prevent accidental logging
pub mod secret;
