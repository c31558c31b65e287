//! `ConnectionActor` - per-transport-connection actor.
//!
//! Each `ConnectionActor`:
//! - Handles exactly one transport connection
//! - Receives outbound events from room actors and the coordinator
//! - Forwards them into the transport's outbound channel without blocking,
//!   so a stalled client never holds up a room broadcast
//!
//! # Lifecycle
//!
//! 1. Created on `OnConnect`, before the connection joins any roster
//! 2. Runs until the connection closes or the coordinator shuts down
//! 3. Cancellation via child token propagates from the coordinator

use crate::errors::PcError;
use crate::events::Event;

use super::messages::ConnectionMessage;
use super::metrics::{ActorType, MailboxMonitor};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the connection mailbox.
const CONNECTION_CHANNEL_BUFFER: usize = 200;

/// Handle to a `ConnectionActor`.
#[derive(Clone, Debug)]
pub struct ConnectionActorHandle {
    sender: mpsc::Sender<ConnectionMessage>,
    cancel_token: CancellationToken,
    connection_id: String,
    mailbox: Arc<MailboxMonitor>,
}

impl ConnectionActorHandle {
    /// Get the connection ID.
    #[must_use]
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Queue an event for delivery to the client.
    ///
    /// Non-blocking: when the mailbox is full the event is dropped and
    /// counted, isolating a slow connection from the rest of its room.
    pub fn deliver(&self, event: Event) {
        if let Err(e) = self.sender.try_send(ConnectionMessage::Deliver { event }) {
            match e {
                mpsc::error::TrySendError::Full(_) => self.mailbox.record_drop(),
                mpsc::error::TrySendError::Closed(_) => {
                    debug!(
                        target: "pc.actor.connection",
                        connection_id = %self.connection_id,
                        "Delivery to closed connection skipped"
                    );
                }
            }
        }
    }

    /// Close the connection actor after draining queued deliveries.
    pub async fn close(&self, reason: String) -> Result<(), PcError> {
        self.sender
            .send(ConnectionMessage::Close { reason })
            .await
            .map_err(|e| PcError::Internal(format!("channel send failed: {e}")))
    }

    /// Cancel the connection actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Deliveries dropped because this connection's mailbox was full.
    #[must_use]
    pub fn dropped_deliveries(&self) -> u64 {
        self.mailbox.messages_dropped()
    }
}

/// The `ConnectionActor` implementation.
pub struct ConnectionActor {
    /// Connection ID.
    connection_id: String,
    /// Message receiver.
    receiver: mpsc::Receiver<ConnectionMessage>,
    /// Outbound channel owned by the transport layer.
    outbound: mpsc::Sender<Event>,
    /// Cancellation token (child of the coordinator's token).
    cancel_token: CancellationToken,
    /// Mailbox monitor, shared with the handle for drop accounting.
    mailbox: Arc<MailboxMonitor>,
    /// Whether the connection is closing.
    is_closing: bool,
}

impl ConnectionActor {
    /// Spawn a new connection actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        connection_id: String,
        outbound: mpsc::Sender<Event>,
        cancel_token: CancellationToken,
    ) -> (ConnectionActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(CONNECTION_CHANNEL_BUFFER);
        let mailbox = Arc::new(MailboxMonitor::new(ActorType::Connection, &connection_id));

        let actor = Self {
            connection_id: connection_id.clone(),
            receiver,
            outbound,
            cancel_token: cancel_token.clone(),
            mailbox: mailbox.clone(),
            is_closing: false,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = ConnectionActorHandle {
            sender,
            cancel_token,
            connection_id,
            mailbox,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(
        skip_all,
        name = "pc.actor.connection",
        fields(connection_id = %self.connection_id)
    )]
    async fn run(mut self) {
        debug!(
            target: "pc.actor.connection",
            connection_id = %self.connection_id,
            "ConnectionActor started"
        );

        loop {
            tokio::select! {
                // Handle cancellation
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "pc.actor.connection",
                        connection_id = %self.connection_id,
                        "ConnectionActor received cancellation signal"
                    );
                    self.graceful_close("cancelled").await;
                    break;
                }

                // Handle messages
                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_processed(self.receiver.len());
                            let should_exit = self.handle_message(message).await;

                            if should_exit {
                                break;
                            }
                        }
                        None => {
                            debug!(
                                target: "pc.actor.connection",
                                connection_id = %self.connection_id,
                                "ConnectionActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "pc.actor.connection",
            connection_id = %self.connection_id,
            messages_processed = self.mailbox.messages_processed(),
            dropped = self.mailbox.messages_dropped(),
            "ConnectionActor stopped"
        );
    }

    /// Handle a single message. Returns true if the actor should exit.
    async fn handle_message(&mut self, message: ConnectionMessage) -> bool {
        match message {
            ConnectionMessage::Deliver { event } => {
                self.handle_deliver(event);
                false
            }

            ConnectionMessage::Close { reason } => {
                self.graceful_close(&reason).await;
                true
            }
        }
    }

    /// Forward an event into the transport's outbound channel.
    fn handle_deliver(&mut self, event: Event) {
        if self.is_closing {
            warn!(
                target: "pc.actor.connection",
                connection_id = %self.connection_id,
                "Attempted to deliver event while closing"
            );
            return;
        }

        // Never await the transport: a full outbound buffer means the
        // client is stalled, and the event is dropped for this connection
        if let Err(e) = self.outbound.try_send(event) {
            match e {
                mpsc::error::TrySendError::Full(_) => self.mailbox.record_drop(),
                mpsc::error::TrySendError::Closed(_) => {
                    debug!(
                        target: "pc.actor.connection",
                        connection_id = %self.connection_id,
                        "Transport outbound channel closed"
                    );
                }
            }
        }
    }

    /// Gracefully close the connection.
    async fn graceful_close(&mut self, reason: &str) {
        if self.is_closing {
            return;
        }

        self.is_closing = true;

        debug!(
            target: "pc.actor.connection",
            connection_id = %self.connection_id,
            reason = %reason,
            "Closing connection"
        );

        // Brief delay to allow final events to flush to the transport
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn test_event() -> Event {
        Event::ParticipantJoined {
            user_id: "u-1".to_string(),
            display_name: Some("Alice".to_string()),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_connection_actor_spawn() {
        let (outbound, _rx) = mpsc::channel(8);
        let cancel_token = CancellationToken::new();

        let (handle, _task) =
            ConnectionActor::spawn("conn-123".to_string(), outbound, cancel_token);

        assert_eq!(handle.connection_id(), "conn-123");
        assert!(!handle.is_cancelled());

        handle.cancel();
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn test_deliver_forwards_to_transport() {
        let (outbound, mut rx) = mpsc::channel(8);
        let cancel_token = CancellationToken::new();

        let (handle, _task) =
            ConnectionActor::spawn("conn-deliver".to_string(), outbound, cancel_token);

        handle.deliver(test_event());

        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(received, Event::ParticipantJoined { .. }));

        handle.cancel();
    }

    #[tokio::test]
    async fn test_full_transport_buffer_drops_instead_of_blocking() {
        // Outbound buffer of one, never consumed
        let (outbound, _rx) = mpsc::channel(1);
        let cancel_token = CancellationToken::new();

        let (handle, _task) =
            ConnectionActor::spawn("conn-stalled".to_string(), outbound, cancel_token);

        for _ in 0..3 {
            handle.deliver(test_event());
        }

        // Let the actor drain its mailbox into the full transport channel
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(handle.dropped_deliveries(), 2);

        handle.cancel();
    }

    #[tokio::test]
    async fn test_connection_actor_close() {
        let (outbound, _rx) = mpsc::channel(8);
        let cancel_token = CancellationToken::new();

        let (handle, task) =
            ConnectionActor::spawn("conn-close".to_string(), outbound, cancel_token);

        handle.close("test close".to_string()).await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), task).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_connection_actor_parent_cancellation() {
        let parent_token = CancellationToken::new();
        let child_token = parent_token.child_token();
        let (outbound, _rx) = mpsc::channel(8);

        let (handle, task) =
            ConnectionActor::spawn("conn-parent-cancel".to_string(), outbound, child_token);

        parent_token.cancel();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(handle.is_cancelled());

        let result = tokio::time::timeout(Duration::from_secs(1), task).await;
        assert!(result.is_ok());
    }
}
