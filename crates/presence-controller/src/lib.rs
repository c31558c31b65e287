//! Presence Controller (PC) Service Library
//!
//! This library provides the core functionality for the Presence
//! Controller - a stateful WebSocket coordination server responsible for:
//!
//! - Real-time meeting presence tracking (who is in which meeting, live)
//! - Capacity enforcement against per-meeting participant bounds
//! - Roster event fan-out (joins, leaves, chat, typing indicators)
//! - Best-effort synchronization of presence facts to the meeting directory
//! - Graceful shutdown with connection draining
//!
//! # Architecture
//!
//! The PC uses an actor model hierarchy:
//!
//! ```text
//! PresenceCoordinatorActor (singleton per PC instance)
//! ├── supervises N RoomActors
//! │   └── RoomActor (one per meeting with a live roster)
//! │       └── owns the roster, serializes every mutation
//! └── registers N ConnectionActors
//!     └── ConnectionActor (one per WebSocket connection)
//! ```
//!
//! # Key Design Decisions
//!
//! - **One actor per meeting**: roster mutations are serialized per meeting,
//!   never behind a global lock
//! - **Rosters live in memory**: the durable meeting record stays in Redis
//!   and receives best-effort writes that never gate presence operations
//! - **Fire-and-forget fan-out**: event delivery to a stalled client drops
//!   rather than blocking the room
//! - **userId identity**: a user reconnecting into a roster replaces their
//!   connection in place, with no capacity check and no duplicate join event
//!
//! # Modules
//!
//! - [`actors`] - Actor model implementation
//! - [`service`] - Validated command layer between transport and actors
//! - [`gateway`] - WebSocket transport
//! - [`directory`] - Meeting directory interface and implementations
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with appropriate error codes

pub mod actors;
pub mod capacity;
pub mod config;
pub mod directory;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod observability;
pub mod service;
pub mod sync;
