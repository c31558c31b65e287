//! Message types for actor communication.
//!
//! All actor communication uses typed messages over mpsc channels, with
//! oneshot channels for request/response patterns. Each inbound transport
//! event becomes exactly one of these commands.

use tokio::sync::{mpsc, oneshot};

use crate::actors::connection::ConnectionActorHandle;
use crate::actors::room::RoomActorHandle;
use crate::errors::PcError;
use crate::events::{Event, ParticipantInfo};

/// Messages handled by the `PresenceCoordinatorActor`.
pub enum CoordinatorMessage {
    /// A transport connection was established (lifecycle hook). Spawns a
    /// connection actor wired to the transport's outbound channel.
    ConnectionOpened {
        connection_id: String,
        outbound: mpsc::Sender<Event>,
        respond_to: oneshot::Sender<Result<ConnectionActorHandle, PcError>>,
    },

    /// A transport connection closed or its liveness timeout expired.
    /// The removal fans out to every room, since the meeting is not known
    /// for a bare disconnect.
    ConnectionClosed {
        connection_id: String,
        respond_to: oneshot::Sender<Result<(), PcError>>,
    },

    /// Look up a registered connection.
    GetConnection {
        connection_id: String,
        respond_to: oneshot::Sender<Option<ConnectionActorHandle>>,
    },

    /// Get the room for a meeting, creating it lazily for a join.
    EnsureRoom {
        meeting_id: String,
        respond_to: oneshot::Sender<Result<RoomActorHandle, PcError>>,
    },

    /// Get the room for a meeting if it has a live roster.
    GetRoom {
        meeting_id: String,
        respond_to: oneshot::Sender<Option<RoomActorHandle>>,
    },

    /// Observability snapshot.
    GetStats {
        respond_to: oneshot::Sender<CoordinatorStats>,
    },

    /// Graceful shutdown with a deadline for room/connection task joins.
    Shutdown {
        deadline: std::time::Duration,
        respond_to: oneshot::Sender<()>,
    },
}

/// Messages handled by a `RoomActor`.
#[derive(Debug)]
pub enum RoomMessage {
    /// Insert a new session or, for an already-present `user_id`, replace
    /// that session's connection in place (reconnect path).
    Join {
        connection_id: String,
        user_id: String,
        display_name: Option<String>,
        connection: ConnectionActorHandle,
        max_participants: u32,
        respond_to: oneshot::Sender<Result<JoinOutcome, PcError>>,
    },

    /// Remove the session for `connection_id`. Idempotent: a no-op when the
    /// connection is not in this roster.
    Remove {
        connection_id: String,
        respond_to: Option<oneshot::Sender<Result<(), PcError>>>,
    },

    /// Room broadcast including the sender. No roster mutation.
    Chat {
        connection_id: String,
        user_id: String,
        display_name: Option<String>,
        text: String,
    },

    /// Room broadcast excluding the sender. No roster mutation.
    Typing {
        connection_id: String,
        user_id: String,
        display_name: Option<String>,
        started: bool,
    },

    /// Current roster contents, in join order.
    GetRoster {
        respond_to: oneshot::Sender<Vec<ParticipantInfo>>,
    },
}

/// Messages handled by a `ConnectionActor`.
#[derive(Debug)]
pub enum ConnectionMessage {
    /// Forward an event to the client over the transport channel.
    Deliver { event: Event },

    /// Drain queued deliveries and stop.
    Close { reason: String },
}

/// Result of a successful join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    /// True when an existing session's connection was replaced in place
    /// instead of a new roster entry being created.
    pub reconnected: bool,
    /// Roster size after the join was applied.
    pub roster_size: usize,
}

/// Coordinator-level observability counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorStats {
    /// Number of non-empty rosters.
    pub active_meetings: usize,
    /// Sum of roster sizes across all meetings.
    pub total_sessions: usize,
}
