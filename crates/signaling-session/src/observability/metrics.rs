//! Metrics definitions for the signaling session.
//!
//! All metrics follow Prometheus naming conventions:
//! - `signaling_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `event`: inbound event names (7 values)
//! - `operation`: connect, join, lock, unlock
//! - `outcome`: success, failure, timeout, rejected_locally
//! - `notification`: observer notification names (6 values)
//!
//! Peer IDs and room names are never used as labels.
//!
//! The library only emits through the `metrics` facade. Installing a recorder
//! (e.g. a Prometheus exporter) is up to the embedding application.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Round-trip operations tracked by request metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Connect,
    Join,
    Lock,
    Unlock,
}

impl Operation {
    /// Returns the operation as a metric label / log field.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Operation::Connect => "connect",
            Operation::Join => "join",
            Operation::Lock => "lock",
            Operation::Unlock => "unlock",
        }
    }
}

/// How a round-trip operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    Timeout,
    RejectedLocally,
}

impl Outcome {
    /// Returns the outcome as a metric label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::Timeout => "timeout",
            Outcome::RejectedLocally => "rejected_locally",
        }
    }
}

/// Record an inbound transport event.
///
/// Metric: `signaling_inbound_events_total`
/// Labels: `event`
pub fn record_inbound_event(event: &'static str) {
    counter!("signaling_inbound_events_total", "event" => event).increment(1);
}

/// Record the end of a round-trip request.
///
/// Metric: `signaling_requests_total`
/// Labels: `operation`, `outcome`
pub fn record_request(operation: Operation, outcome: Outcome) {
    counter!(
        "signaling_requests_total",
        "operation" => operation.as_str(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Record how long a round-trip request took to resolve.
///
/// Metric: `signaling_request_duration_seconds`
/// Labels: `operation`
pub fn record_request_duration(operation: Operation, duration: Duration) {
    histogram!(
        "signaling_request_duration_seconds",
        "operation" => operation.as_str()
    )
    .record(duration.as_secs_f64());
}

/// Set the number of peers in the registry.
///
/// Metric: `signaling_remote_peers`
/// Labels: none
pub fn set_remote_peers(count: usize) {
    // usize to f64 conversion is safe for realistic room sizes (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("signaling_remote_peers").set(count as f64);
}

/// Record an observer notification that reached at least one observer.
///
/// Metric: `signaling_notifications_total`
/// Labels: `notification`
pub fn record_notification(notification: &'static str) {
    counter!("signaling_notifications_total", "notification" => notification).increment(1);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    #[test]
    fn test_label_values() {
        assert_eq!(Operation::Connect.as_str(), "connect");
        assert_eq!(Operation::Unlock.as_str(), "unlock");
        assert_eq!(Outcome::RejectedLocally.as_str(), "rejected_locally");
    }

    #[test]
    fn test_request_counter_is_labelled() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_request(Operation::Join, Outcome::Success);
            record_request(Operation::Join, Outcome::Success);
            record_request(Operation::Lock, Outcome::Timeout);
        });

        let counters: Vec<(String, Vec<(String, String)>, u64)> = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .filter_map(|(key, _, _, value)| match value {
                DebugValue::Counter(n) => {
                    let labels = key
                        .key()
                        .labels()
                        .map(|l| (l.key().to_string(), l.value().to_string()))
                        .collect();
                    Some((key.key().name().to_string(), labels, n))
                }
                _ => None,
            })
            .collect();

        let join_success = counters.iter().find(|(name, labels, _)| {
            name == "signaling_requests_total"
                && labels.contains(&("operation".to_string(), "join".to_string()))
                && labels.contains(&("outcome".to_string(), "success".to_string()))
        });
        assert_eq!(join_success.map(|(_, _, n)| *n), Some(2));

        let lock_timeout = counters.iter().find(|(_, labels, _)| {
            labels.contains(&("operation".to_string(), "lock".to_string()))
                && labels.contains(&("outcome".to_string(), "timeout".to_string()))
        });
        assert_eq!(lock_timeout.map(|(_, _, n)| *n), Some(1));
    }

    #[test]
    fn test_remote_peers_gauge() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            set_remote_peers(3);
        });

        let gauge = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .find(|(key, _, _, _)| key.key().name() == "signaling_remote_peers")
            .map(|(_, _, _, value)| value);

        assert!(matches!(gauge, Some(DebugValue::Gauge(v)) if v.into_inner() == 3.0));
    }
}
