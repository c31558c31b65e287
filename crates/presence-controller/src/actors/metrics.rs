//! Actor metrics and mailbox monitoring.
//!
//! Mailbox depth thresholds:
//!
//! | Actor Type | Normal | Warning | Critical |
//! |------------|--------|---------|----------|
//! | Room       | < 100  | 100-500 | > 500    |
//! | Connection | < 50   | 50-200  | > 200    |
//!
//! Prometheus metrics are emitted with the `pc_` prefix.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Mailbox depth thresholds for room actors.
pub const ROOM_MAILBOX_NORMAL: usize = 100;
pub const ROOM_MAILBOX_WARNING: usize = 500;

/// Mailbox depth thresholds for connection actors.
pub const CONNECTION_MAILBOX_NORMAL: usize = 50;
pub const CONNECTION_MAILBOX_WARNING: usize = 200;

/// Actor type for metrics labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    /// PresenceCoordinatorActor (singleton).
    Coordinator,
    /// RoomActor (one per meeting with a live roster).
    Room,
    /// ConnectionActor (one per transport connection).
    Connection,
}

impl ActorType {
    /// Returns the actor type as a string for metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActorType::Coordinator => "coordinator",
            ActorType::Room => "room",
            ActorType::Connection => "connection",
        }
    }

    /// Returns the warning threshold for this actor type.
    #[must_use]
    pub const fn warning_threshold(&self) -> usize {
        match self {
            ActorType::Coordinator | ActorType::Room => ROOM_MAILBOX_WARNING,
            ActorType::Connection => CONNECTION_MAILBOX_WARNING,
        }
    }

    /// Returns the normal threshold for this actor type.
    #[must_use]
    pub const fn normal_threshold(&self) -> usize {
        match self {
            ActorType::Coordinator | ActorType::Room => ROOM_MAILBOX_NORMAL,
            ActorType::Connection => CONNECTION_MAILBOX_NORMAL,
        }
    }
}

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

/// Mailbox monitor for tracking queue depth and dropped deliveries.
///
/// Depth is sampled from the channel's queue length each time the actor
/// dequeues a message, so it reflects the backlog still waiting rather
/// than in-flight bookkeeping.
#[derive(Debug)]
pub struct MailboxMonitor {
    /// Actor type for labeling.
    actor_type: ActorType,
    /// Actor identifier (meeting_id, connection_id, etc.).
    actor_id: String,
    /// Last sampled mailbox depth.
    depth: AtomicUsize,
    /// Peak sampled depth since creation.
    peak_depth: AtomicUsize,
    /// Last observed level, for transition logging.
    last_level: AtomicUsize,
    /// Total messages processed.
    messages_processed: AtomicU64,
    /// Messages dropped because the mailbox was full.
    messages_dropped: AtomicU64,
}

impl MailboxMonitor {
    /// Create a new mailbox monitor for the given actor.
    #[must_use]
    pub fn new(actor_type: ActorType, actor_id: impl Into<String>) -> Self {
        Self {
            actor_type,
            actor_id: actor_id.into(),
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
            last_level: AtomicUsize::new(MailboxLevel::Normal as usize),
            messages_processed: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
        }
    }

    /// Record one processed message and the backlog still queued behind it.
    ///
    /// `queued` is the channel length sampled right after the dequeue.
    pub fn record_processed(&self, queued: usize) {
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
        self.depth.store(queued, Ordering::Relaxed);

        // Update peak if necessary
        let mut current_peak = self.peak_depth.load(Ordering::Relaxed);
        while queued > current_peak {
            match self.peak_depth.compare_exchange_weak(
                current_peak,
                queued,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current_peak = actual,
            }
        }

        // Log on level transitions only
        let level = self.level_for_depth(queued);
        let previous = self.last_level.swap(level as usize, Ordering::Relaxed);
        if level as usize == previous {
            return;
        }
        match level {
            MailboxLevel::Critical => {
                warn!(
                    target: "pc.actor.mailbox",
                    actor_type = self.actor_type.as_str(),
                    actor_id = %self.actor_id,
                    depth = queued,
                    threshold = self.actor_type.warning_threshold(),
                    "Mailbox depth critical"
                );
            }
            MailboxLevel::Warning => {
                debug!(
                    target: "pc.actor.mailbox",
                    actor_type = self.actor_type.as_str(),
                    actor_id = %self.actor_id,
                    depth = queued,
                    "Mailbox depth elevated"
                );
            }
            MailboxLevel::Normal => {
                debug!(
                    target: "pc.actor.mailbox",
                    actor_type = self.actor_type.as_str(),
                    actor_id = %self.actor_id,
                    depth = queued,
                    "Mailbox depth back to normal"
                );
            }
        }
    }

    /// Record a delivery dropped because the mailbox was full.
    pub fn record_drop(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("pc_deliveries_dropped_total").increment(1);
        warn!(
            target: "pc.actor.mailbox",
            actor_type = self.actor_type.as_str(),
            actor_id = %self.actor_id,
            dropped = self.messages_dropped.load(Ordering::Relaxed),
            "Message dropped due to backpressure"
        );
    }

    /// Get the current mailbox depth.
    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    /// Get the peak mailbox depth.
    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    /// Get total messages processed.
    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    /// Get total messages dropped.
    #[must_use]
    pub fn messages_dropped(&self) -> u64 {
        self.messages_dropped.load(Ordering::Relaxed)
    }

    /// Get the current mailbox level.
    #[must_use]
    pub fn current_level(&self) -> MailboxLevel {
        self.level_for_depth(self.current_depth())
    }

    /// Determine mailbox level for a given depth.
    fn level_for_depth(&self, depth: usize) -> MailboxLevel {
        if depth > self.actor_type.warning_threshold() {
            MailboxLevel::Critical
        } else if depth > self.actor_type.normal_threshold() {
            MailboxLevel::Warning
        } else {
            MailboxLevel::Normal
        }
    }
}

/// Presence counts shared between the actor system (which updates values)
/// and the observability surface (which reads them).
///
/// All fields are atomic for lock-free concurrent access.
#[derive(Debug, Default)]
pub struct CoordinatorMetrics {
    /// Number of non-empty rosters.
    active_meetings: AtomicUsize,
    /// Sum of roster sizes across all meetings.
    active_sessions: AtomicUsize,
    /// Total room actor panics (indicates bugs).
    actor_panics: AtomicU64,
}

/// Snapshot of coordinator metrics at a point in time.
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorMetricsSnapshot {
    /// Number of non-empty rosters.
    pub active_meetings: usize,
    /// Sum of roster sizes across all meetings.
    pub active_sessions: usize,
}

impl CoordinatorMetrics {
    /// Create a new shared metrics instance.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Increment the active meeting count.
    pub fn meeting_created(&self) {
        let count = self.active_meetings.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::gauge!("pc_active_meetings").set(count as f64);
    }

    /// Decrement the active meeting count.
    pub fn meeting_removed(&self) {
        let count = self.active_meetings.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::gauge!("pc_active_meetings").set(count as f64);
    }

    /// Increment the active session count.
    pub fn session_added(&self) {
        let count = self.active_sessions.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::gauge!("pc_active_sessions").set(count as f64);
    }

    /// Decrement the active session count.
    pub fn session_removed(&self) {
        let count = self.active_sessions.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::gauge!("pc_active_sessions").set(count as f64);
    }

    /// Record a room actor panic.
    pub fn record_panic(&self, actor_type: ActorType) {
        self.actor_panics.fetch_add(1, Ordering::Relaxed);
        tracing::error!(
            target: "pc.actor.panic",
            actor_type = actor_type.as_str(),
            total_panics = self.actor_panics.load(Ordering::Relaxed),
            "Actor panic detected - indicates bug, investigation required"
        );
    }

    /// Get the active meeting count.
    #[must_use]
    pub fn active_meetings(&self) -> usize {
        self.active_meetings.load(Ordering::SeqCst)
    }

    /// Get the active session count.
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::SeqCst)
    }

    /// Take an atomic snapshot of current counts.
    #[must_use]
    pub fn snapshot(&self) -> CoordinatorMetricsSnapshot {
        CoordinatorMetricsSnapshot {
            active_meetings: self.active_meetings.load(Ordering::SeqCst),
            active_sessions: self.active_sessions.load(Ordering::SeqCst),
        }
    }
}
