//! Observability for the signaling session
//!
//! # Privacy by Default
//!
//! Room keys are held as `SecretString` and never logged. Peer IDs and room
//! names appear in log fields but never as metric labels.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `signaling_inbound_events_total` | Counter | `event` | Inbound transport events dispatched |
//! | `signaling_requests_total` | Counter | `operation`, `outcome` | Round-trip request results |
//! | `signaling_request_duration_seconds` | Histogram | `operation` | Round-trip request latency |
//! | `signaling_remote_peers` | Gauge | none | Current registry size |
//! | `signaling_notifications_total` | Counter | `notification` | Notifications delivered to at least one observer |

pub mod logging;
pub mod metrics;

// Re-exports for convenience
pub use logging::init_logging;
pub use metrics::{
    record_inbound_event, record_notification, record_request, record_request_duration,
    set_remote_peers, Operation, Outcome,
};
