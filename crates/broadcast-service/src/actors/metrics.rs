//! Coordinator mailbox monitoring and shared session counters.
//!
//! | Depth       | Level    |
//! |-------------|----------|
//! | < 100       | Normal   |
//! | 100 - 500   | Warning  |
//! | > 500       | Critical |

use crate::observability::metrics::{
    set_coordinator_mailbox_depth, set_presenter_active, set_viewers_active,
};

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Mailbox depth above which the coordinator is considered backed up.
pub const COORDINATOR_MAILBOX_NORMAL: usize = 100;
/// Mailbox depth above which every enqueue logs a warning.
pub const COORDINATOR_MAILBOX_WARNING: usize = 500;

/// Mailbox depth level for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    Normal,
    Warning,
    Critical,
}

/// Tracks the coordinator mailbox depth.
///
/// The handle records enqueues as it sends, the actor records dequeues as
/// it processes, so `current_depth` is the number of queued requests.
#[derive(Debug, Default)]
pub struct MailboxMonitor {
    depth: AtomicUsize,
    peak_depth: AtomicUsize,
    messages_processed: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record a message being added to the mailbox.
    pub fn record_enqueue(&self) {
        let new_depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_depth.fetch_max(new_depth, Ordering::Relaxed);
        set_coordinator_mailbox_depth(new_depth);

        match level_for_depth(new_depth) {
            MailboxLevel::Critical => warn!(
                target: "bs.actor.mailbox",
                depth = new_depth,
                threshold = COORDINATOR_MAILBOX_WARNING,
                "Coordinator mailbox depth critical"
            ),
            MailboxLevel::Warning if new_depth == COORDINATOR_MAILBOX_NORMAL + 1 => debug!(
                target: "bs.actor.mailbox",
                depth = new_depth,
                "Coordinator mailbox depth elevated"
            ),
            _ => {}
        }
    }

    /// Record a message being taken off the mailbox.
    pub fn record_dequeue(&self) {
        let previous = self
            .depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| {
                Some(d.saturating_sub(1))
            })
            .unwrap_or_default();
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
        set_coordinator_mailbox_depth(previous.saturating_sub(1));
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn current_level(&self) -> MailboxLevel {
        level_for_depth(self.current_depth())
    }
}

fn level_for_depth(depth: usize) -> MailboxLevel {
    if depth > COORDINATOR_MAILBOX_WARNING {
        MailboxLevel::Critical
    } else if depth > COORDINATOR_MAILBOX_NORMAL {
        MailboxLevel::Warning
    } else {
        MailboxLevel::Normal
    }
}

/// Lock-free view of the broadcast for readers outside the actor.
///
/// Written only by the coordinator; mirrored into the Prometheus gauges.
#[derive(Debug, Default)]
pub struct BroadcastMetrics {
    presenter_active: AtomicBool,
    viewers: AtomicUsize,
}

/// Snapshot of [`BroadcastMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastMetricsSnapshot {
    pub presenter_active: bool,
    pub viewers: usize,
}

impl BroadcastMetrics {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_presenter_active(&self, active: bool) {
        self.presenter_active.store(active, Ordering::SeqCst);
        set_presenter_active(active);
    }

    pub fn set_viewers(&self, count: usize) {
        self.viewers.store(count, Ordering::SeqCst);
        set_viewers_active(count);
    }

    #[must_use]
    pub fn snapshot(&self) -> BroadcastMetricsSnapshot {
        BroadcastMetricsSnapshot {
            presenter_active: self.presenter_active.load(Ordering::SeqCst),
            viewers: self.viewers.load(Ordering::SeqCst),
        }
    }
}
