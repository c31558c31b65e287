//! Actor hierarchy for the presence controller.
//!
//! ```text
//! PresenceCoordinatorActor (singleton)
//!     |
//!     +-- RoomActor (one per meeting with a live roster)
//!     |
//!     +-- ConnectionActor (one per client transport connection)
//! ```
//!
//! All cross-actor communication goes through typed messages over bounded
//! mpsc channels. Rooms serialize every mutation of their roster on their
//! own task, so no roster lock exists anywhere.

pub mod connection;
pub mod coordinator;
pub mod messages;
pub mod metrics;
pub mod room;

pub use connection::{ConnectionActor, ConnectionActorHandle};
pub use coordinator::PresenceCoordinatorActorHandle;
pub use messages::{CoordinatorStats, JoinOutcome};
pub use metrics::{ActorType, CoordinatorMetrics, MailboxMonitor};
pub use room::RoomActorHandle;
