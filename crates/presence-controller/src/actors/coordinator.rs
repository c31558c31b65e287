//! `PresenceCoordinatorActor` - singleton supervisor for rooms and connections.
//!
//! The coordinator is the top-level actor in the hierarchy:
//!
//! - Singleton per process
//! - Owns the registry of connection actors (the CONNECTED state)
//! - Creates `RoomActor` instances lazily on first join and reaps their
//!   tasks once a roster empties, which is how rosters get deleted
//! - Owns the root `CancellationToken` for graceful shutdown
//! - Monitors child actor health (panic detection via `JoinHandle`)
//!
//! Callers fetch room and connection handles from the coordinator and talk
//! to rooms directly, so per-meeting traffic never funnels through a single
//! mailbox.
//!
//! # Graceful Shutdown
//!
//! On SIGTERM, the coordinator:
//! 1. Sets `accepting_new = false`
//! 2. Cancels the root `CancellationToken` (propagates to all children)
//! 3. Waits for room and connection tasks to finish under a deadline

use crate::directory::MeetingDirectory;
use crate::errors::PcError;
use crate::events::Event;

use super::connection::{ConnectionActor, ConnectionActorHandle};
use super::messages::{CoordinatorMessage, CoordinatorStats};
use super::metrics::{ActorType, CoordinatorMetrics, MailboxMonitor};
use super::room::{RoomActor, RoomActorHandle};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the coordinator mailbox.
const COORDINATOR_CHANNEL_BUFFER: usize = 1000;

/// Interval for reaping finished room actors between messages.
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Handle to the `PresenceCoordinatorActor`.
///
/// This is the public interface for interacting with the coordinator.
/// All methods are async and return results via oneshot channels.
#[derive(Clone)]
pub struct PresenceCoordinatorActorHandle {
    sender: mpsc::Sender<CoordinatorMessage>,
    cancel_token: CancellationToken,
}

impl PresenceCoordinatorActorHandle {
    /// Create a new `PresenceCoordinatorActor` and return a handle to it.
    ///
    /// This spawns the actor task and returns immediately.
    #[must_use]
    pub fn new(
        pc_id: String,
        directory: Arc<dyn MeetingDirectory>,
        metrics: Arc<CoordinatorMetrics>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(COORDINATOR_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = PresenceCoordinatorActor::new(
            pc_id,
            receiver,
            cancel_token.clone(),
            directory,
            metrics,
        );

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
        }
    }

    /// Register a transport connection and spawn its connection actor.
    pub async fn connection_opened(
        &self,
        connection_id: String,
        outbound: mpsc::Sender<Event>,
    ) -> Result<ConnectionActorHandle, PcError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(CoordinatorMessage::ConnectionOpened {
                connection_id,
                outbound,
                respond_to: tx,
            })
            .await
            .map_err(|e| PcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| PcError::Internal(format!("response receive failed: {e}")))?
    }

    /// Deregister a transport connection and remove its session, wherever
    /// it is.
    pub async fn connection_closed(&self, connection_id: String) -> Result<(), PcError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(CoordinatorMessage::ConnectionClosed {
                connection_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| PcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| PcError::Internal(format!("response receive failed: {e}")))?
    }

    /// Look up a registered connection.
    pub async fn get_connection(
        &self,
        connection_id: String,
    ) -> Result<Option<ConnectionActorHandle>, PcError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(CoordinatorMessage::GetConnection {
                connection_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| PcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| PcError::Internal(format!("response receive failed: {e}")))
    }

    /// Get the room for a meeting, creating it lazily.
    pub async fn ensure_room(&self, meeting_id: String) -> Result<RoomActorHandle, PcError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(CoordinatorMessage::EnsureRoom {
                meeting_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| PcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| PcError::Internal(format!("response receive failed: {e}")))?
    }

    /// Get the room for a meeting if it has a live roster.
    pub async fn get_room(&self, meeting_id: String) -> Result<Option<RoomActorHandle>, PcError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(CoordinatorMessage::GetRoom {
                meeting_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| PcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| PcError::Internal(format!("response receive failed: {e}")))
    }

    /// Get the current presence counts.
    pub async fn get_stats(&self) -> Result<CoordinatorStats, PcError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(CoordinatorMessage::GetStats { respond_to: tx })
            .await
            .map_err(|e| PcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| PcError::Internal(format!("response receive failed: {e}")))
    }

    /// Initiate graceful shutdown.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), PcError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(CoordinatorMessage::Shutdown {
                deadline,
                respond_to: tx,
            })
            .await
            .map_err(|e| PcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| PcError::Internal(format!("response receive failed: {e}")))
    }

    /// Cancel the actor (for immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Get a child token for spawning child actors.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

/// Internal state for a managed room.
struct ManagedRoom {
    /// Handle to the room actor.
    handle: RoomActorHandle,
    /// Join handle for monitoring the actor task.
    task_handle: JoinHandle<()>,
}

/// Internal state for a registered connection.
struct ManagedConnection {
    /// Handle to the connection actor.
    handle: ConnectionActorHandle,
    /// Join handle for monitoring the actor task.
    task_handle: JoinHandle<()>,
}

/// The `PresenceCoordinatorActor` implementation.
///
/// This struct owns the actor state and runs the message loop.
pub struct PresenceCoordinatorActor {
    /// Instance ID.
    pc_id: String,
    /// Message receiver.
    receiver: mpsc::Receiver<CoordinatorMessage>,
    /// Cancellation token (root).
    cancel_token: CancellationToken,
    /// Rooms with live rosters, by meeting ID.
    rooms: HashMap<String, ManagedRoom>,
    /// Registered connections by connection ID.
    connections: HashMap<String, ManagedConnection>,
    /// Whether the coordinator is accepting new connections and rooms.
    accepting_new: bool,
    /// Deadline for child task joins during graceful shutdown.
    shutdown_deadline: Duration,
    /// Durable store, handed to each room for persistence sync.
    directory: Arc<dyn MeetingDirectory>,
    /// Shared presence counts.
    metrics: Arc<CoordinatorMetrics>,
    /// Mailbox monitor.
    mailbox: MailboxMonitor,
}

impl PresenceCoordinatorActor {
    /// Create a new coordinator actor (not started).
    fn new(
        pc_id: String,
        receiver: mpsc::Receiver<CoordinatorMessage>,
        cancel_token: CancellationToken,
        directory: Arc<dyn MeetingDirectory>,
        metrics: Arc<CoordinatorMetrics>,
    ) -> Self {
        let mailbox = MailboxMonitor::new(ActorType::Coordinator, &pc_id);

        Self {
            pc_id,
            receiver,
            cancel_token,
            rooms: HashMap::new(),
            connections: HashMap::new(),
            accepting_new: true,
            shutdown_deadline: Duration::from_secs(30),
            directory,
            metrics,
            mailbox,
        }
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "pc.actor.coordinator", fields(pc_id = %self.pc_id))]
    async fn run(mut self) {
        info!(
            target: "pc.actor.coordinator",
            pc_id = %self.pc_id,
            "PresenceCoordinatorActor started"
        );

        let mut health_check = tokio::time::interval(HEALTH_CHECK_INTERVAL);

        loop {
            tokio::select! {
                // Handle cancellation
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "pc.actor.coordinator",
                        pc_id = %self.pc_id,
                        "PresenceCoordinatorActor received cancellation signal"
                    );
                    self.graceful_shutdown(self.shutdown_deadline).await;
                    break;
                }

                // Reap finished room actors
                _ = health_check.tick() => {
                    self.check_room_health().await;
                }

                // Handle messages
                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_processed(self.receiver.len());
                            self.handle_message(message).await;
                        }
                        None => {
                            info!(
                                target: "pc.actor.coordinator",
                                pc_id = %self.pc_id,
                                "PresenceCoordinatorActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "pc.actor.coordinator",
            pc_id = %self.pc_id,
            rooms_remaining = self.rooms.len(),
            connections_remaining = self.connections.len(),
            messages_processed = self.mailbox.messages_processed(),
            "PresenceCoordinatorActor stopped"
        );
    }

    /// Handle a single message.
    async fn handle_message(&mut self, message: CoordinatorMessage) {
        match message {
            CoordinatorMessage::ConnectionOpened {
                connection_id,
                outbound,
                respond_to,
            } => {
                let result = self.connection_opened(connection_id, outbound);
                let _ = respond_to.send(result);
            }

            CoordinatorMessage::ConnectionClosed {
                connection_id,
                respond_to,
            } => {
                let result = self.connection_closed(&connection_id).await;
                let _ = respond_to.send(result);
            }

            CoordinatorMessage::GetConnection {
                connection_id,
                respond_to,
            } => {
                let handle = self
                    .connections
                    .get(&connection_id)
                    .map(|managed| managed.handle.clone());
                let _ = respond_to.send(handle);
            }

            CoordinatorMessage::EnsureRoom {
                meeting_id,
                respond_to,
            } => {
                let result = self.ensure_room(meeting_id);
                let _ = respond_to.send(result);
            }

            CoordinatorMessage::GetRoom {
                meeting_id,
                respond_to,
            } => {
                let handle = self
                    .rooms
                    .get(&meeting_id)
                    .filter(|managed| !managed.task_handle.is_finished() && !managed.handle.is_closed())
                    .map(|managed| managed.handle.clone());
                let _ = respond_to.send(handle);
            }

            CoordinatorMessage::GetStats { respond_to } => {
                let snapshot = self.metrics.snapshot();
                let _ = respond_to.send(CoordinatorStats {
                    active_meetings: snapshot.active_meetings,
                    total_sessions: snapshot.active_sessions,
                });
            }

            CoordinatorMessage::Shutdown {
                deadline,
                respond_to,
            } => {
                self.initiate_shutdown(deadline);
                let _ = respond_to.send(());
            }
        }
    }

    /// Register a connection and spawn its actor.
    fn connection_opened(
        &mut self,
        connection_id: String,
        outbound: mpsc::Sender<Event>,
    ) -> Result<ConnectionActorHandle, PcError> {
        if !self.accepting_new {
            return Err(PcError::Draining);
        }

        // Connection IDs are unique across the process
        if self.connections.contains_key(&connection_id) {
            return Err(PcError::Validation(
                "Connection already registered".to_string(),
            ));
        }

        let connection_token = self.cancel_token.child_token();
        let (handle, task_handle) =
            ConnectionActor::spawn(connection_id.clone(), outbound, connection_token);

        self.connections.insert(
            connection_id.clone(),
            ManagedConnection {
                handle: handle.clone(),
                task_handle,
            },
        );

        debug!(
            target: "pc.actor.coordinator",
            pc_id = %self.pc_id,
            connection_id = %connection_id,
            total_connections = self.connections.len(),
            "Connection registered"
        );

        Ok(handle)
    }

    /// Deregister a connection and remove its session from whichever roster
    /// holds it. The per-room removal is idempotent, so fanning out to all
    /// rooms is safe.
    async fn connection_closed(&mut self, connection_id: &str) -> Result<(), PcError> {
        if let Some(managed) = self.connections.remove(connection_id) {
            managed.handle.cancel();

            // Reap the connection task off the message loop
            let connection_id_owned = connection_id.to_string();
            let pc_id = self.pc_id.clone();
            tokio::spawn(async move {
                if tokio::time::timeout(Duration::from_secs(5), managed.task_handle)
                    .await
                    .is_err()
                {
                    warn!(
                        target: "pc.actor.coordinator",
                        pc_id = %pc_id,
                        connection_id = %connection_id_owned,
                        "Connection actor cleanup timed out"
                    );
                }
            });
        }

        for (meeting_id, managed) in &self.rooms {
            if let Err(e) = managed.handle.disconnected(connection_id.to_string()).await {
                debug!(
                    target: "pc.actor.coordinator",
                    pc_id = %self.pc_id,
                    meeting_id = %meeting_id,
                    connection_id = %connection_id,
                    error = %e,
                    "Disconnect fan-out to finished room skipped"
                );
            }
        }

        debug!(
            target: "pc.actor.coordinator",
            pc_id = %self.pc_id,
            connection_id = %connection_id,
            total_connections = self.connections.len(),
            "Connection deregistered"
        );

        Ok(())
    }

    /// Get or lazily create the room actor for a meeting.
    fn ensure_room(&mut self, meeting_id: String) -> Result<RoomActorHandle, PcError> {
        if !self.accepting_new {
            return Err(PcError::Draining);
        }

        // Reuse the live room; replace one whose roster emptied. The closed
        // check catches a room whose run loop ended but whose task the
        // runtime has not yet marked finished.
        if let Some(managed) = self.rooms.get(&meeting_id) {
            if !managed.task_handle.is_finished() && !managed.handle.is_closed() {
                return Ok(managed.handle.clone());
            }
            // Roster emptied between health checks, recreate
            self.rooms.remove(&meeting_id);
            self.metrics.meeting_removed();
        }

        debug!(
            target: "pc.actor.coordinator",
            pc_id = %self.pc_id,
            meeting_id = %meeting_id,
            "Creating new room actor"
        );

        let room_token = self.cancel_token.child_token();
        let (handle, task_handle) = RoomActor::spawn(
            meeting_id.clone(),
            room_token,
            Arc::clone(&self.directory),
            Arc::clone(&self.metrics),
        );

        self.rooms.insert(
            meeting_id.clone(),
            ManagedRoom {
                handle: handle.clone(),
                task_handle,
            },
        );

        self.metrics.meeting_created();

        info!(
            target: "pc.actor.coordinator",
            pc_id = %self.pc_id,
            meeting_id = %meeting_id,
            total_rooms = self.rooms.len(),
            "Room actor created"
        );

        Ok(handle)
    }

    /// Initiate graceful shutdown.
    fn initiate_shutdown(&mut self, deadline: Duration) {
        info!(
            target: "pc.actor.coordinator",
            pc_id = %self.pc_id,
            room_count = self.rooms.len(),
            connection_count = self.connections.len(),
            deadline_secs = deadline.as_secs(),
            "Initiating graceful shutdown"
        );

        // Stop accepting new connections and rooms
        self.accepting_new = false;
        self.shutdown_deadline = deadline;

        // Cancel the root token (propagates to all children)
        self.cancel_token.cancel();
    }

    /// Perform graceful shutdown.
    async fn graceful_shutdown(&mut self, deadline: Duration) {
        info!(
            target: "pc.actor.coordinator",
            pc_id = %self.pc_id,
            room_count = self.rooms.len(),
            "Performing graceful shutdown"
        );

        self.accepting_new = false;

        // Cancel all children (already done via parent token, but be explicit)
        for managed in self.rooms.values() {
            managed.handle.cancel();
        }
        for managed in self.connections.values() {
            managed.handle.cancel();
        }

        // Wait for room tasks to complete
        for (meeting_id, managed) in self.rooms.drain() {
            match tokio::time::timeout(deadline, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "pc.actor.coordinator",
                        pc_id = %self.pc_id,
                        meeting_id = %meeting_id,
                        "Room actor completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "pc.actor.coordinator",
                        pc_id = %self.pc_id,
                        meeting_id = %meeting_id,
                        error = ?e,
                        "Room actor task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "pc.actor.coordinator",
                        pc_id = %self.pc_id,
                        meeting_id = %meeting_id,
                        "Room actor shutdown timed out"
                    );
                }
            }
            self.metrics.meeting_removed();
        }

        // Then the connection tasks
        for (connection_id, managed) in self.connections.drain() {
            if tokio::time::timeout(Duration::from_secs(5), managed.task_handle)
                .await
                .is_err()
            {
                warn!(
                    target: "pc.actor.coordinator",
                    pc_id = %self.pc_id,
                    connection_id = %connection_id,
                    "Connection actor shutdown timed out"
                );
            }
        }

        info!(
            target: "pc.actor.coordinator",
            pc_id = %self.pc_id,
            "Graceful shutdown complete"
        );
    }

    /// Reap room actors whose roster emptied or whose task failed.
    async fn check_room_health(&mut self) {
        let finished: Vec<String> = self
            .rooms
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(meeting_id, _)| meeting_id.clone())
            .collect();

        for meeting_id in finished {
            if let Some(managed) = self.rooms.remove(&meeting_id) {
                match managed.task_handle.await {
                    Ok(()) => {
                        // Clean exit: the roster emptied
                        info!(
                            target: "pc.actor.coordinator",
                            pc_id = %self.pc_id,
                            meeting_id = %meeting_id,
                            "Room actor exited cleanly, roster deleted"
                        );
                    }
                    Err(join_error) => {
                        if join_error.is_panic() {
                            error!(
                                target: "pc.actor.coordinator",
                                pc_id = %self.pc_id,
                                meeting_id = %meeting_id,
                                error = ?join_error,
                                "Room actor panicked - indicates bug, investigation required"
                            );
                            self.metrics.record_panic(ActorType::Room);
                        }
                    }
                }

                self.metrics.meeting_removed();
            }
        }
    }
}
