//! `RoomActor` - per-meeting actor that owns that meeting's roster.
//!
//! Each `RoomActor`:
//! - Owns the ordered roster of sessions for one meeting
//! - Applies every roster mutation on its own task, so join/reconnect/leave
//!   for one meeting are serialized while unrelated meetings never contend
//! - Fans out events to member connections
//! - Triggers the persistence synchronizer after each mutation without
//!   awaiting the durable store
//!
//! # Lifecycle
//!
//! Created lazily by the coordinator on the first join to a meeting. The
//! run loop exits once the roster becomes empty; the coordinator reaps the
//! finished task, which is how an empty roster gets deleted.

use crate::capacity::can_admit;
use crate::directory::MeetingDirectory;
use crate::errors::PcError;
use crate::events::{chat_message_id, Event, ParticipantInfo};
use crate::sync;

use super::connection::ConnectionActorHandle;
use super::messages::{JoinOutcome, RoomMessage};
use super::metrics::{ActorType, CoordinatorMetrics, MailboxMonitor};

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the room mailbox.
const ROOM_CHANNEL_BUFFER: usize = 500;

/// Handle to a `RoomActor`.
#[derive(Clone)]
pub struct RoomActorHandle {
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
    meeting_id: String,
}

impl RoomActorHandle {
    /// Get the meeting ID.
    #[must_use]
    pub fn meeting_id(&self) -> &str {
        &self.meeting_id
    }

    /// Whether the room actor has exited and no longer accepts messages.
    ///
    /// Flips true the moment the run loop ends, before the coordinator has
    /// observed the finished task. A join racing the last leave uses this
    /// to tell a dead room from a live one.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Admit a session into the roster, or replace an existing session's
    /// connection in place when the user is already present.
    pub async fn join(
        &self,
        connection_id: String,
        user_id: String,
        display_name: Option<String>,
        connection: ConnectionActorHandle,
        max_participants: u32,
    ) -> Result<JoinOutcome, PcError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RoomMessage::Join {
                connection_id,
                user_id,
                display_name,
                connection,
                max_participants,
                respond_to: tx,
            })
            .await
            .map_err(|e| PcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| PcError::Internal(format!("response receive failed: {e}")))?
    }

    /// Explicit leave. Resolves once the removal has been applied.
    pub async fn leave(&self, connection_id: String) -> Result<(), PcError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RoomMessage::Remove {
                connection_id,
                respond_to: Some(tx),
            })
            .await
            .map_err(|e| PcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| PcError::Internal(format!("response receive failed: {e}")))?
    }

    /// Transport-detected disconnect. Fire-and-forget: the removal is a
    /// no-op when the connection was never in this roster.
    pub async fn disconnected(&self, connection_id: String) -> Result<(), PcError> {
        self.sender
            .send(RoomMessage::Remove {
                connection_id,
                respond_to: None,
            })
            .await
            .map_err(|e| PcError::Internal(format!("channel send failed: {e}")))
    }

    /// Broadcast a chat message to the whole roster, including the sender.
    pub async fn chat(
        &self,
        connection_id: String,
        user_id: String,
        display_name: Option<String>,
        text: String,
    ) -> Result<(), PcError> {
        self.sender
            .send(RoomMessage::Chat {
                connection_id,
                user_id,
                display_name,
                text,
            })
            .await
            .map_err(|e| PcError::Internal(format!("channel send failed: {e}")))
    }

    /// Broadcast a typing indicator to everyone except the sender.
    pub async fn typing(
        &self,
        connection_id: String,
        user_id: String,
        display_name: Option<String>,
        started: bool,
    ) -> Result<(), PcError> {
        self.sender
            .send(RoomMessage::Typing {
                connection_id,
                user_id,
                display_name,
                started,
            })
            .await
            .map_err(|e| PcError::Internal(format!("channel send failed: {e}")))
    }

    /// Current roster contents, in join order.
    pub async fn roster(&self) -> Result<Vec<ParticipantInfo>, PcError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RoomMessage::GetRoster { respond_to: tx })
            .await
            .map_err(|e| PcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| PcError::Internal(format!("response receive failed: {e}")))
    }

    /// Cancel the room actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// One connection's membership record within the roster.
struct Session {
    connection_id: String,
    user_id: String,
    display_name: Option<String>,
    joined_at: DateTime<Utc>,
    connection: ConnectionActorHandle,
}

impl Session {
    fn to_info(&self) -> ParticipantInfo {
        ParticipantInfo {
            user_id: self.user_id.clone(),
            display_name: self.display_name.clone(),
            joined_at: self.joined_at,
        }
    }
}

/// The `RoomActor` implementation.
pub struct RoomActor {
    /// Meeting ID.
    meeting_id: String,
    /// Message receiver.
    receiver: mpsc::Receiver<RoomMessage>,
    /// Cancellation token (child of the coordinator's token).
    cancel_token: CancellationToken,
    /// Ordered roster. `user_id` is unique within it; order is join order.
    roster: Vec<Session>,
    /// Durable store, consumed only by fire-and-forget sync tasks.
    directory: Arc<dyn MeetingDirectory>,
    /// Shared presence counts.
    metrics: Arc<CoordinatorMetrics>,
    /// Mailbox monitor.
    mailbox: MailboxMonitor,
}

impl RoomActor {
    /// Spawn a new room actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        meeting_id: String,
        cancel_token: CancellationToken,
        directory: Arc<dyn MeetingDirectory>,
        metrics: Arc<CoordinatorMetrics>,
    ) -> (RoomActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);

        let actor = Self {
            meeting_id: meeting_id.clone(),
            receiver,
            cancel_token: cancel_token.clone(),
            roster: Vec::new(),
            directory,
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Room, &meeting_id),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RoomActorHandle {
            sender,
            cancel_token,
            meeting_id,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "pc.actor.room", fields(meeting_id = %self.meeting_id))]
    async fn run(mut self) {
        info!(
            target: "pc.actor.room",
            meeting_id = %self.meeting_id,
            "RoomActor started"
        );

        let mut processed_any = false;

        loop {
            tokio::select! {
                // Handle cancellation
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "pc.actor.room",
                        meeting_id = %self.meeting_id,
                        "RoomActor received cancellation signal"
                    );
                    self.graceful_shutdown();
                    break;
                }

                // Handle messages
                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_processed(self.receiver.len());
                            self.handle_message(message);
                            processed_any = true;

                            // An empty roster has no reason to exist; the
                            // coordinator reaps the finished task
                            if self.roster.is_empty() {
                                debug!(
                                    target: "pc.actor.room",
                                    meeting_id = %self.meeting_id,
                                    "Roster empty, exiting"
                                );
                                break;
                            }
                        }
                        None => {
                            info!(
                                target: "pc.actor.room",
                                meeting_id = %self.meeting_id,
                                "RoomActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "pc.actor.room",
            meeting_id = %self.meeting_id,
            roster_size = self.roster.len(),
            messages_processed = self.mailbox.messages_processed(),
            processed_any = processed_any,
            "RoomActor stopped"
        );
    }

    /// Handle a single message.
    fn handle_message(&mut self, message: RoomMessage) {
        match message {
            RoomMessage::Join {
                connection_id,
                user_id,
                display_name,
                connection,
                max_participants,
                respond_to,
            } => {
                let result = self.handle_join(
                    connection_id,
                    user_id,
                    display_name,
                    connection,
                    max_participants,
                );
                let _ = respond_to.send(result);
            }

            RoomMessage::Remove {
                connection_id,
                respond_to,
            } => {
                self.handle_remove(&connection_id);
                if let Some(tx) = respond_to {
                    let _ = tx.send(Ok(()));
                }
            }

            RoomMessage::Chat {
                connection_id,
                user_id,
                display_name,
                text,
            } => {
                self.handle_chat(&connection_id, user_id, display_name, text);
            }

            RoomMessage::Typing {
                connection_id,
                user_id,
                display_name,
                started,
            } => {
                let event = if started {
                    Event::TypingStart {
                        user_id,
                        display_name,
                    }
                } else {
                    Event::TypingStop {
                        user_id,
                        display_name,
                    }
                };
                self.broadcast_except(&connection_id, &event);
            }

            RoomMessage::GetRoster { respond_to } => {
                let roster = self.roster.iter().map(Session::to_info).collect();
                let _ = respond_to.send(roster);
            }
        }
    }

    /// Handle a join or reconnect.
    ///
    /// A `user_id` already present in the roster has its connection replaced
    /// in place: roster size is unchanged, the capacity guard is bypassed,
    /// and no participant-joined broadcast is sent beyond the snapshot
    /// refresh. Anything else is a fresh admission gated by the capacity
    /// guard.
    #[instrument(skip_all, fields(meeting_id = %self.meeting_id, user_id = %user_id))]
    fn handle_join(
        &mut self,
        connection_id: String,
        user_id: String,
        display_name: Option<String>,
        connection: ConnectionActorHandle,
        max_participants: u32,
    ) -> Result<JoinOutcome, PcError> {
        let reconnected = if let Some(session) =
            self.roster.iter_mut().find(|s| s.user_id == user_id)
        {
            debug!(
                target: "pc.actor.room",
                old_connection_id = %session.connection_id,
                new_connection_id = %connection_id,
                "Reconnect, replacing connection in place"
            );
            session.connection_id = connection_id;
            session.connection = connection;
            true
        } else {
            if !can_admit(self.roster.len(), max_participants) {
                metrics::counter!("pc_capacity_rejections_total").increment(1);
                warn!(
                    target: "pc.actor.room",
                    roster_size = self.roster.len(),
                    max_participants = max_participants,
                    "Join rejected, roster at capacity"
                );
                return Err(PcError::CapacityExceeded {
                    limit: max_participants,
                });
            }

            self.roster.push(Session {
                connection_id,
                user_id: user_id.clone(),
                display_name: display_name.clone(),
                joined_at: Utc::now(),
                connection,
            });
            self.metrics.session_added();
            metrics::counter!("pc_joins_total").increment(1);
            false
        };

        // Durable reconciliation is fire-and-forget; both writes are
        // idempotent so the reconnect path reuses them unchanged
        let _ = sync::sync_join(
            Arc::clone(&self.directory),
            self.meeting_id.clone(),
            user_id.clone(),
            self.roster.len(),
        );

        // Snapshot to the whole room, then the join announcement to
        // everyone but the subject
        self.broadcast(&self.snapshot());
        if !reconnected {
            let joined = Event::ParticipantJoined {
                user_id: user_id.clone(),
                display_name,
                timestamp: Utc::now(),
            };
            self.broadcast_to_others(&user_id, &joined);
        }

        info!(
            target: "pc.actor.room",
            roster_size = self.roster.len(),
            reconnected = reconnected,
            "Participant joined"
        );

        Ok(JoinOutcome {
            reconnected,
            roster_size: self.roster.len(),
        })
    }

    /// Remove the session for `connection_id`. Idempotent.
    ///
    /// Explicit leave and transport disconnect both land here - the only
    /// removal path there is.
    fn handle_remove(&mut self, connection_id: &str) {
        let Some(index) = self
            .roster
            .iter()
            .position(|s| s.connection_id == connection_id)
        else {
            debug!(
                target: "pc.actor.room",
                meeting_id = %self.meeting_id,
                connection_id = %connection_id,
                "Remove for unknown connection, ignoring"
            );
            return;
        };

        let session = self.roster.remove(index);
        self.metrics.session_removed();
        metrics::counter!("pc_leaves_total").increment(1);

        let _ = sync::sync_roster_size(
            Arc::clone(&self.directory),
            self.meeting_id.clone(),
            self.roster.len(),
        );

        let left = Event::ParticipantLeft {
            user_id: session.user_id.clone(),
            display_name: session.display_name.clone(),
            timestamp: Utc::now(),
        };
        self.broadcast(&left);
        self.broadcast(&self.snapshot());

        info!(
            target: "pc.actor.room",
            meeting_id = %self.meeting_id,
            user_id = %session.user_id,
            roster_size = self.roster.len(),
            "Participant removed"
        );
    }

    /// Stamp and broadcast a chat message to the whole roster, sender
    /// included. Content is never persisted.
    fn handle_chat(
        &self,
        connection_id: &str,
        user_id: String,
        display_name: Option<String>,
        text: String,
    ) {
        let timestamp = Utc::now();
        let event = Event::ChatMessage {
            message_id: chat_message_id(timestamp, connection_id),
            meeting_id: self.meeting_id.clone(),
            user_id,
            display_name,
            text,
            timestamp,
        };
        self.broadcast(&event);
    }

    /// Full-roster snapshot event.
    fn snapshot(&self) -> Event {
        Event::PresenceSnapshot {
            meeting_id: self.meeting_id.clone(),
            participants: self.roster.iter().map(Session::to_info).collect(),
            count: self.roster.len(),
        }
    }

    /// Deliver an event to every session in the roster.
    fn broadcast(&self, event: &Event) {
        for session in &self.roster {
            session.connection.deliver(event.clone());
        }
    }

    /// Deliver an event to every session except the one for
    /// `except_connection_id`.
    fn broadcast_except(&self, except_connection_id: &str, event: &Event) {
        for session in &self.roster {
            if session.connection_id != except_connection_id {
                session.connection.deliver(event.clone());
            }
        }
    }

    /// Deliver an event to every session except the one for `except_user_id`.
    fn broadcast_to_others(&self, except_user_id: &str, event: &Event) {
        for session in &self.roster {
            if session.user_id != except_user_id {
                session.connection.deliver(event.clone());
            }
        }
    }

    /// Shutdown path: release session counts and publish a zero headcount.
    fn graceful_shutdown(&mut self) {
        for _ in &self.roster {
            self.metrics.session_removed();
        }
        self.roster.clear();

        let _ = sync::sync_roster_size(Arc::clone(&self.directory), self.meeting_id.clone(), 0);
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::actors::connection::ConnectionActor;
    use crate::directory::InMemoryMeetingDirectory;
    use std::time::Duration;

    struct TestRoom {
        handle: RoomActorHandle,
        task: JoinHandle<()>,
        directory: Arc<InMemoryMeetingDirectory>,
        metrics: Arc<CoordinatorMetrics>,
        cancel_token: CancellationToken,
    }

    async fn spawn_room(meeting_id: &str, max_participants: u32) -> TestRoom {
        let directory = Arc::new(InMemoryMeetingDirectory::new());
        directory.insert_meeting(meeting_id, max_participants).await;
        let metrics = CoordinatorMetrics::new();
        let cancel_token = CancellationToken::new();

        let (handle, task) = RoomActor::spawn(
            meeting_id.to_string(),
            cancel_token.clone(),
            directory.clone(),
            metrics.clone(),
        );

        TestRoom {
            handle,
            task,
            directory,
            metrics,
            cancel_token,
        }
    }

    fn spawn_connection(connection_id: &str) -> (ConnectionActorHandle, mpsc::Receiver<Event>) {
        let (outbound, rx) = mpsc::channel(32);
        let (handle, _task) = ConnectionActor::spawn(
            connection_id.to_string(),
            outbound,
            CancellationToken::new(),
        );
        (handle, rx)
    }

    async fn recv_event(rx: &mut mpsc::Receiver<Event>) -> Event {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    async fn join(
        room: &TestRoom,
        connection_id: &str,
        user_id: &str,
        max: u32,
    ) -> (Result<JoinOutcome, PcError>, mpsc::Receiver<Event>) {
        let (conn, rx) = spawn_connection(connection_id);
        let result = room
            .handle
            .join(
                connection_id.to_string(),
                user_id.to_string(),
                Some(user_id.to_uppercase()),
                conn,
                max,
            )
            .await;
        (result, rx)
    }

    #[tokio::test]
    async fn test_first_join_gets_snapshot() {
        let room = spawn_room("m-1", 10).await;

        let (result, mut rx) = join(&room, "c-a", "alice", 10).await;
        let outcome = result.unwrap();
        assert!(!outcome.reconnected);
        assert_eq!(outcome.roster_size, 1);

        match recv_event(&mut rx).await {
            Event::PresenceSnapshot {
                meeting_id,
                participants,
                count,
            } => {
                assert_eq!(meeting_id, "m-1");
                assert_eq!(count, 1);
                assert_eq!(participants[0].user_id, "alice");
            }
            other => panic!("expected snapshot, got {other:?}"),
        }

        room.cancel_token.cancel();
    }

    #[tokio::test]
    async fn test_second_join_notifies_existing_members() {
        let room = spawn_room("m-1", 10).await;

        let (_, mut rx_a) = join(&room, "c-a", "alice", 10).await;
        recv_event(&mut rx_a).await; // alice's own snapshot

        let (result, mut rx_b) = join(&room, "c-b", "bob", 10).await;
        assert_eq!(result.unwrap().roster_size, 2);

        // Alice sees the refreshed snapshot, then bob's join
        match recv_event(&mut rx_a).await {
            Event::PresenceSnapshot { count, .. } => assert_eq!(count, 2),
            other => panic!("expected snapshot, got {other:?}"),
        }
        match recv_event(&mut rx_a).await {
            Event::ParticipantJoined { user_id, .. } => assert_eq!(user_id, "bob"),
            other => panic!("expected participant-joined, got {other:?}"),
        }

        // Bob sees the snapshot but not his own join announcement
        match recv_event(&mut rx_b).await {
            Event::PresenceSnapshot { count, .. } => assert_eq!(count, 2),
            other => panic!("expected snapshot, got {other:?}"),
        }
        assert!(rx_b.try_recv().is_err());

        room.cancel_token.cancel();
    }

    #[tokio::test]
    async fn test_capacity_rejects_third_user_at_max_two() {
        let room = spawn_room("m-1", 2).await;

        let (a, _rx_a) = join(&room, "c-a", "alice", 2).await;
        let (b, _rx_b) = join(&room, "c-b", "bob", 2).await;
        a.unwrap();
        b.unwrap();

        let (c, mut rx_c) = join(&room, "c-c", "carol", 2).await;
        match c {
            Err(PcError::CapacityExceeded { limit }) => assert_eq!(limit, 2),
            other => panic!("expected capacity error, got {other:?}"),
        }

        // No events reach the rejected connection from this room
        assert!(rx_c.try_recv().is_err());

        let roster = room.handle.roster().await.unwrap();
        assert_eq!(roster.len(), 2);

        room.cancel_token.cancel();
    }

    #[tokio::test]
    async fn test_reconnect_replaces_connection_in_place() {
        let room = spawn_room("m-1", 10).await;

        let (_, mut rx_a) = join(&room, "c-a", "alice", 10).await;
        recv_event(&mut rx_a).await;
        let (_, mut rx_b1) = join(&room, "c-b1", "bob", 10).await;
        recv_event(&mut rx_b1).await;
        recv_event(&mut rx_a).await; // snapshot
        recv_event(&mut rx_a).await; // bob joined

        // Bob reconnects on a new connection
        let (result, mut rx_b2) = join(&room, "c-b2", "bob", 10).await;
        let outcome = result.unwrap();
        assert!(outcome.reconnected);
        assert_eq!(outcome.roster_size, 2);

        // Everyone gets the snapshot refresh but no duplicate join
        match recv_event(&mut rx_a).await {
            Event::PresenceSnapshot { count, .. } => assert_eq!(count, 2),
            other => panic!("expected snapshot, got {other:?}"),
        }
        assert!(rx_a.try_recv().is_err());
        match recv_event(&mut rx_b2).await {
            Event::PresenceSnapshot { count, .. } => assert_eq!(count, 2),
            other => panic!("expected snapshot, got {other:?}"),
        }

        // The old connection is no longer subscribed
        assert!(rx_b1.try_recv().is_err());

        // Roster still has exactly one entry for bob
        let roster = room.handle.roster().await.unwrap();
        assert_eq!(roster.iter().filter(|p| p.user_id == "bob").count(), 1);

        room.cancel_token.cancel();
    }

    #[tokio::test]
    async fn test_leave_notifies_remaining_and_room_exits_when_empty() {
        let room = spawn_room("m-1", 10).await;

        let (_, _rx_a) = join(&room, "c-a", "alice", 10).await;
        let (_, mut rx_b) = join(&room, "c-b", "bob", 10).await;
        recv_event(&mut rx_b).await; // own snapshot

        room.handle.leave("c-a".to_string()).await.unwrap();

        match recv_event(&mut rx_b).await {
            Event::ParticipantLeft { user_id, .. } => assert_eq!(user_id, "alice"),
            other => panic!("expected participant-left, got {other:?}"),
        }
        match recv_event(&mut rx_b).await {
            Event::PresenceSnapshot { count, .. } => assert_eq!(count, 1),
            other => panic!("expected snapshot, got {other:?}"),
        }

        // Last member leaves: the actor exits on its own
        room.handle.leave("c-b".to_string()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), room.task)
            .await
            .expect("room task did not finish")
            .unwrap();

        assert_eq!(room.metrics.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_stale_handle_reports_closed_after_roster_empties() {
        let mut room = spawn_room("m-1", 10).await;

        let (result, _rx_a) = join(&room, "c-a", "alice", 10).await;
        result.unwrap();
        assert!(!room.handle.is_closed());

        room.handle.leave("c-a".to_string()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), &mut room.task)
            .await
            .expect("room task did not finish")
            .unwrap();

        // The exited room refuses further messages and advertises it
        assert!(room.handle.is_closed());
        let (late, _rx_b) = join(&room, "c-b", "bob", 10).await;
        assert!(matches!(late, Err(PcError::Internal(_))));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let room = spawn_room("m-1", 10).await;

        let (_, _rx_a) = join(&room, "c-a", "alice", 10).await;
        let (_, mut rx_b) = join(&room, "c-b", "bob", 10).await;
        recv_event(&mut rx_b).await;

        room.handle.disconnected("c-a".to_string()).await.unwrap();
        // Second remove for the same connection is a no-op
        room.handle.leave("c-a".to_string()).await.unwrap();

        recv_event(&mut rx_b).await; // left
        recv_event(&mut rx_b).await; // snapshot
        assert!(rx_b.try_recv().is_err());

        let roster = room.handle.roster().await.unwrap();
        assert_eq!(roster.len(), 1);

        room.cancel_token.cancel();
    }

    #[tokio::test]
    async fn test_chat_echoes_to_sender() {
        let room = spawn_room("m-1", 10).await;

        let (_, mut rx_a) = join(&room, "c-a", "alice", 10).await;
        recv_event(&mut rx_a).await;

        room.handle
            .chat(
                "c-a".to_string(),
                "alice".to_string(),
                Some("ALICE".to_string()),
                "hi".to_string(),
            )
            .await
            .unwrap();

        match recv_event(&mut rx_a).await {
            Event::ChatMessage {
                message_id,
                meeting_id,
                user_id,
                text,
                ..
            } => {
                assert_eq!(meeting_id, "m-1");
                assert_eq!(user_id, "alice");
                assert_eq!(text, "hi");
                assert!(message_id.ends_with("c-a"));
            }
            other => panic!("expected chat-message, got {other:?}"),
        }

        room.cancel_token.cancel();
    }

    #[tokio::test]
    async fn test_typing_excludes_sender() {
        let room = spawn_room("m-1", 10).await;

        let (_, mut rx_a) = join(&room, "c-a", "alice", 10).await;
        recv_event(&mut rx_a).await;
        let (_, mut rx_b) = join(&room, "c-b", "bob", 10).await;
        recv_event(&mut rx_b).await;
        recv_event(&mut rx_a).await; // snapshot
        recv_event(&mut rx_a).await; // joined

        room.handle
            .typing("c-a".to_string(), "alice".to_string(), None, true)
            .await
            .unwrap();

        match recv_event(&mut rx_b).await {
            Event::TypingStart { user_id, .. } => assert_eq!(user_id, "alice"),
            other => panic!("expected typing-start, got {other:?}"),
        }
        assert!(rx_a.try_recv().is_err());

        room.cancel_token.cancel();
    }

    #[tokio::test]
    async fn test_history_and_active_count_are_synchronized() {
        let room = spawn_room("m-1", 10).await;

        let (_, _rx_a) = join(&room, "c-a", "alice", 10).await;
        let (_, _rx_b) = join(&room, "c-b", "bob", 10).await;
        room.handle.leave("c-a".to_string()).await.unwrap();

        // Allow the fire-and-forget sync tasks to settle
        tokio::time::sleep(Duration::from_millis(50)).await;

        // History never shrinks; the count tracks the live roster
        let historical = room.directory.historical_participants("m-1").await;
        assert!(historical.contains("alice"));
        assert!(historical.contains("bob"));
        assert_eq!(
            room.directory.active_participant_count("m-1").await,
            Some(1)
        );

        room.cancel_token.cancel();
    }

    #[tokio::test]
    async fn test_persistence_failure_does_not_fail_join() {
        let room = spawn_room("m-1", 10).await;
        room.directory.set_fail_writes(true);

        let (result, mut rx_a) = join(&room, "c-a", "alice", 10).await;
        assert!(result.is_ok());

        // Real-time path is unaffected
        match recv_event(&mut rx_a).await {
            Event::PresenceSnapshot { count, .. } => assert_eq!(count, 1),
            other => panic!("expected snapshot, got {other:?}"),
        }

        room.cancel_token.cancel();
    }
}
