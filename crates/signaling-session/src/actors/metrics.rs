//! Session mailbox monitoring.
//!
//! Mailbox depth thresholds for the session actor:
//!
//! | Level    | Depth    |
//! |----------|----------|
//! | Normal   | < 32     |
//! | Warning  | 32-128   |
//! | Critical | > 128    |
//!
//! A single client session rarely queues more than a handful of messages;
//! sustained depth means an observer callback is blocking the session task.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, warn};

/// Mailbox depth above which the level is `Warning`.
pub const SESSION_MAILBOX_NORMAL: usize = 32;
/// Mailbox depth above which the level is `Critical`.
pub const SESSION_MAILBOX_WARNING: usize = 128;

/// Mailbox depth level for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    /// Below normal threshold.
    Normal,
    /// Between normal and warning thresholds.
    Warning,
    /// Above warning threshold.
    Critical,
}

/// Tracks queue depth and throughput of the session mailbox.
#[derive(Debug)]
pub struct MailboxMonitor {
    /// Session identifier for log fields.
    session_id: String,
    /// Messages sent but not yet processed.
    depth: AtomicUsize,
    /// Peak depth since last reset.
    peak_depth: AtomicUsize,
    /// Total messages processed.
    messages_processed: AtomicU64,
}

impl MailboxMonitor {
    /// Create a monitor for the given session.
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
            messages_processed: AtomicU64::new(0),
        }
    }

    /// Record a message being added to the mailbox.
    pub fn record_enqueue(&self) {
        let new_depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_depth.fetch_max(new_depth, Ordering::Relaxed);

        let level = level_for_depth(new_depth);
        if level == MailboxLevel::Critical {
            warn!(
                target: "signaling.mailbox",
                session_id = %self.session_id,
                depth = new_depth,
                threshold = SESSION_MAILBOX_WARNING,
                "Mailbox depth critical"
            );
        } else if level == MailboxLevel::Warning && new_depth == SESSION_MAILBOX_NORMAL + 1 {
            // Log once when crossing into the warning band
            debug!(
                target: "signaling.mailbox",
                session_id = %self.session_id,
                depth = new_depth,
                "Mailbox depth elevated"
            );
        }
    }

    /// Record a message being processed.
    pub fn record_dequeue(&self) {
        // Saturating: a dequeue without a matching enqueue must not wrap.
        let _ = self
            .depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| {
                Some(d.saturating_sub(1))
            });
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Undo an enqueue whose message never reached the mailbox.
    pub fn record_send_failed(&self) {
        let _ = self
            .depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| {
                Some(d.saturating_sub(1))
            });
    }

    /// Current mailbox depth.
    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    /// Peak mailbox depth.
    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    /// Total messages processed.
    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    /// Current mailbox level.
    #[must_use]
    pub fn current_level(&self) -> MailboxLevel {
        level_for_depth(self.current_depth())
    }
}

fn level_for_depth(depth: usize) -> MailboxLevel {
    if depth > SESSION_MAILBOX_WARNING {
        MailboxLevel::Critical
    } else if depth > SESSION_MAILBOX_NORMAL {
        MailboxLevel::Warning
    } else {
        MailboxLevel::Normal
    }
}
