//! Validated command layer between the transport and the actor hierarchy.
//!
//! The gateway translates client frames into calls on [`PresenceService`].
//! This layer owns the admission checks that need the directory (meeting
//! existence, capacity bound lookup) so that no network round trip ever
//! happens inside a room actor's message loop. Everything after validation
//! is delegated to the coordinator and room actors.
//!
//! Errors returned here carry a client-safe description via
//! [`PcError::client_message`]; the gateway turns them into
//! `operation-error` events for the originating connection only.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, instrument};

use crate::actors::{ConnectionActorHandle, JoinOutcome, PresenceCoordinatorActorHandle};
use crate::directory::MeetingDirectory;
use crate::errors::PcError;
use crate::events::Event;

/// Entry point for all inbound presence operations.
#[derive(Clone)]
pub struct PresenceService {
    coordinator: PresenceCoordinatorActorHandle,
    directory: Arc<dyn MeetingDirectory>,
}

impl PresenceService {
    #[must_use]
    pub fn new(
        coordinator: PresenceCoordinatorActorHandle,
        directory: Arc<dyn MeetingDirectory>,
    ) -> Self {
        Self {
            coordinator,
            directory,
        }
    }

    /// Register a new transport connection.
    ///
    /// `outbound` is the channel the transport drains toward the client.
    /// The returned handle is how events reach this client from now on.
    #[instrument(skip(self, outbound), fields(connection_id = %connection_id))]
    pub async fn on_connect(
        &self,
        connection_id: String,
        outbound: mpsc::Sender<Event>,
    ) -> Result<ConnectionActorHandle, PcError> {
        self.coordinator
            .connection_opened(connection_id, outbound)
            .await
    }

    /// Handle a transport-level disconnect.
    ///
    /// The session is removed from whichever roster holds it. Safe to call
    /// for connections that never joined a meeting, and safe to call more
    /// than once.
    #[instrument(skip(self), fields(connection_id = %connection_id))]
    pub async fn on_disconnect(&self, connection_id: &str) -> Result<(), PcError> {
        self.coordinator
            .connection_closed(connection_id.to_string())
            .await
    }

    /// Admit a user into a meeting's roster.
    ///
    /// Checks that the meeting exists and reads its capacity bound before
    /// handing off to the room actor, which applies the capacity guard and
    /// the reconnect rule under roster serialization.
    #[instrument(
        skip(self, display_name),
        fields(connection_id = %connection_id, meeting_id = %meeting_id, user_id = %user_id)
    )]
    pub async fn handle_join(
        &self,
        connection_id: &str,
        meeting_id: &str,
        user_id: &str,
        display_name: Option<String>,
    ) -> Result<JoinOutcome, PcError> {
        validate_identifier(meeting_id, "meetingId")?;
        validate_identifier(user_id, "userId")?;

        if !self.directory.exists(meeting_id).await? {
            return Err(PcError::MeetingNotFound(meeting_id.to_string()));
        }
        let max_participants = self.directory.max_participants(meeting_id).await?;

        let connection = self
            .coordinator
            .get_connection(connection_id.to_string())
            .await?
            .ok_or_else(|| PcError::Validation("Connection is not registered".to_string()))?;

        let room = self.coordinator.ensure_room(meeting_id.to_string()).await?;
        match room
            .join(
                connection_id.to_string(),
                user_id.to_string(),
                display_name.clone(),
                connection.clone(),
                max_participants,
            )
            .await
        {
            // The last member's leave emptied the roster and the room actor
            // exited between the lookup and this send. The coordinator sees
            // the dead handle and replaces it, so one retry suffices.
            Err(PcError::Internal(_)) if room.is_closed() => {
                debug!(
                    target: "pc.service",
                    connection_id = %connection_id,
                    meeting_id = %meeting_id,
                    "Room actor exited before join landed, retrying on a fresh room"
                );
                let room = self.coordinator.ensure_room(meeting_id.to_string()).await?;
                room.join(
                    connection_id.to_string(),
                    user_id.to_string(),
                    display_name,
                    connection,
                    max_participants,
                )
                .await
            }
            result => result,
        }
    }

    /// Remove a session from a meeting's roster on explicit request.
    ///
    /// A leave for a meeting with no live roster is a no-op; the client
    /// already observes the state it asked for.
    #[instrument(skip(self), fields(connection_id = %connection_id, meeting_id = %meeting_id))]
    pub async fn handle_leave(
        &self,
        connection_id: &str,
        meeting_id: &str,
    ) -> Result<(), PcError> {
        validate_identifier(meeting_id, "meetingId")?;

        match self.coordinator.get_room(meeting_id.to_string()).await? {
            Some(room) => room.leave(connection_id.to_string()).await,
            None => {
                debug!(
                    target: "pc.service",
                    connection_id = %connection_id,
                    meeting_id = %meeting_id,
                    "Leave for meeting with no live roster, ignoring"
                );
                Ok(())
            }
        }
    }

    /// Broadcast a chat message to the full roster, sender included.
    #[instrument(
        skip(self, display_name, text),
        fields(connection_id = %connection_id, meeting_id = %meeting_id, user_id = %user_id)
    )]
    pub async fn handle_message(
        &self,
        connection_id: &str,
        meeting_id: &str,
        user_id: &str,
        display_name: Option<String>,
        text: String,
    ) -> Result<(), PcError> {
        validate_identifier(meeting_id, "meetingId")?;
        if text.trim().is_empty() {
            return Err(PcError::Validation(
                "Message text must not be empty".to_string(),
            ));
        }

        let room = self
            .coordinator
            .get_room(meeting_id.to_string())
            .await?
            .ok_or_else(|| PcError::MeetingNotFound(meeting_id.to_string()))?;

        room.chat(
            connection_id.to_string(),
            user_id.to_string(),
            display_name,
            text,
        )
        .await
    }

    /// Notify the rest of the roster that this user started typing.
    pub async fn handle_typing_start(
        &self,
        connection_id: &str,
        meeting_id: &str,
        user_id: &str,
        display_name: Option<String>,
    ) -> Result<(), PcError> {
        self.handle_typing(connection_id, meeting_id, user_id, display_name, true)
            .await
    }

    /// Notify the rest of the roster that this user stopped typing.
    pub async fn handle_typing_stop(
        &self,
        connection_id: &str,
        meeting_id: &str,
        user_id: &str,
        display_name: Option<String>,
    ) -> Result<(), PcError> {
        self.handle_typing(connection_id, meeting_id, user_id, display_name, false)
            .await
    }

    async fn handle_typing(
        &self,
        connection_id: &str,
        meeting_id: &str,
        user_id: &str,
        display_name: Option<String>,
        started: bool,
    ) -> Result<(), PcError> {
        validate_identifier(meeting_id, "meetingId")?;

        // Typing indicators are best effort; a missing roster is not an error
        if let Some(room) = self.coordinator.get_room(meeting_id.to_string()).await? {
            room.typing(
                connection_id.to_string(),
                user_id.to_string(),
                display_name,
                started,
            )
            .await?;
        }
        Ok(())
    }

    /// Number of meetings with at least one live session.
    pub async fn active_meeting_count(&self) -> Result<usize, PcError> {
        Ok(self.coordinator.get_stats().await?.active_meetings)
    }

    /// Number of live sessions across all meetings.
    pub async fn total_active_session_count(&self) -> Result<usize, PcError> {
        Ok(self.coordinator.get_stats().await?.total_sessions)
    }

    /// Initiate coordinated shutdown of the actor hierarchy.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), PcError> {
        self.coordinator.shutdown(deadline).await
    }
}

/// Reject empty or whitespace-only identifiers before they reach an actor.
fn validate_identifier(value: &str, field: &str) -> Result<(), PcError> {
    if value.trim().is_empty() {
        return Err(PcError::Validation(format!("{field} must not be empty")));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::CoordinatorMetrics;
    use crate::directory::InMemoryMeetingDirectory;

    async fn test_service() -> (PresenceService, Arc<InMemoryMeetingDirectory>) {
        let directory = Arc::new(InMemoryMeetingDirectory::new());
        directory.insert_meeting("m-1", 2).await;
        let coordinator = PresenceCoordinatorActorHandle::new(
            "pc-test".to_string(),
            directory.clone(),
            CoordinatorMetrics::new(),
        );
        (
            PresenceService::new(coordinator, directory.clone()),
            directory,
        )
    }

    fn outbound() -> (mpsc::Sender<Event>, mpsc::Receiver<Event>) {
        mpsc::channel(32)
    }

    async fn connect_and_join(
        service: &PresenceService,
        connection_id: &str,
        user_id: &str,
    ) -> mpsc::Receiver<Event> {
        let (tx, rx) = outbound();
        service
            .on_connect(connection_id.to_string(), tx)
            .await
            .unwrap();
        service
            .handle_join(connection_id, "m-1", user_id, None)
            .await
            .unwrap();
        rx
    }

    #[tokio::test]
    async fn test_join_unknown_meeting_is_not_found() {
        let (service, _directory) = test_service().await;

        let (tx, _rx) = outbound();
        service.on_connect("c-1".to_string(), tx).await.unwrap();

        let result = service.handle_join("c-1", "no-such-meeting", "alice", None).await;
        assert!(matches!(result, Err(PcError::MeetingNotFound(_))));
    }

    #[tokio::test]
    async fn test_join_with_blank_user_id_is_rejected() {
        let (service, _directory) = test_service().await;

        let (tx, _rx) = outbound();
        service.on_connect("c-1".to_string(), tx).await.unwrap();

        let result = service.handle_join("c-1", "m-1", "   ", None).await;
        assert!(matches!(result, Err(PcError::Validation(_))));
    }

    #[tokio::test]
    async fn test_join_without_registered_connection_is_rejected() {
        let (service, _directory) = test_service().await;

        let result = service.handle_join("ghost", "m-1", "alice", None).await;
        assert!(matches!(result, Err(PcError::Validation(_))));
    }

    #[tokio::test]
    async fn test_capacity_enforced_through_service() {
        let (service, _directory) = test_service().await;

        let _rx_a = connect_and_join(&service, "c-a", "alice").await;
        let _rx_b = connect_and_join(&service, "c-b", "bob").await;

        let (tx_c, _rx_c) = outbound();
        service.on_connect("c-c".to_string(), tx_c).await.unwrap();

        let result = service.handle_join("c-c", "m-1", "carol", None).await;
        assert!(matches!(
            result,
            Err(PcError::CapacityExceeded { limit: 2 })
        ));
    }

    #[tokio::test]
    async fn test_empty_chat_text_is_rejected() {
        let (service, _directory) = test_service().await;

        let _rx = connect_and_join(&service, "c-a", "alice").await;

        let result = service
            .handle_message("c-a", "m-1", "alice", None, "   ".to_string())
            .await;
        assert!(matches!(result, Err(PcError::Validation(_))));
    }

    #[tokio::test]
    async fn test_leave_without_roster_is_noop() {
        let (service, _directory) = test_service().await;

        let result = service.handle_leave("c-a", "m-1").await;
        assert!(result.is_ok());
    }

    async fn test_parts() -> (
        PresenceService,
        PresenceCoordinatorActorHandle,
        Arc<InMemoryMeetingDirectory>,
    ) {
        let directory = Arc::new(InMemoryMeetingDirectory::new());
        directory.insert_meeting("m-1", 2).await;
        let coordinator = PresenceCoordinatorActorHandle::new(
            "pc-test".to_string(),
            directory.clone(),
            CoordinatorMetrics::new(),
        );
        (
            PresenceService::new(coordinator.clone(), directory.clone()),
            coordinator,
            directory,
        )
    }

    #[tokio::test]
    async fn test_join_after_last_leave_lands_on_fresh_room() {
        let (service, coordinator, _directory) = test_parts().await;

        let _rx_a = connect_and_join(&service, "c-a", "alice").await;

        // Resolve the room the way a join does, then let the last leave
        // empty the roster so the resolved handle goes stale
        let stale = coordinator.ensure_room("m-1".to_string()).await.unwrap();
        service.handle_leave("c-a", "m-1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(stale.is_closed());

        let (tx_b, _rx_b) = outbound();
        service.on_connect("c-b".to_string(), tx_b).await.unwrap();
        let outcome = service
            .handle_join("c-b", "m-1", "bob", None)
            .await
            .expect("join after the roster emptied must succeed");
        assert!(!outcome.reconnected);
        assert_eq!(outcome.roster_size, 1);
    }

    #[tokio::test]
    async fn test_join_interleaved_with_last_leave_never_errors() {
        let (service, coordinator, _directory) = test_parts().await;

        // Queue the last member's removal without waiting for it, so the
        // incoming join can land on a room that is about to exit
        for round in 0..20 {
            let conn_a = format!("c-a{round}");
            let conn_b = format!("c-b{round}");

            let _rx_a = connect_and_join(&service, &conn_a, "alice").await;

            let room = coordinator.ensure_room("m-1".to_string()).await.unwrap();
            room.disconnected(conn_a.clone()).await.unwrap();

            let (tx_b, _rx_b) = outbound();
            service.on_connect(conn_b.clone(), tx_b).await.unwrap();
            service
                .handle_join(&conn_b, "m-1", "bob", None)
                .await
                .expect("join racing the last leave must succeed");

            service.on_disconnect(&conn_a).await.unwrap();
            service.on_disconnect(&conn_b).await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn test_counts_reflect_live_sessions() {
        let (service, directory) = test_service().await;
        directory.insert_meeting("m-2", 2).await;

        let _rx_a = connect_and_join(&service, "c-a", "alice").await;

        let (tx_b, _rx_b) = outbound();
        service.on_connect("c-b".to_string(), tx_b).await.unwrap();
        service
            .handle_join("c-b", "m-2", "bob", None)
            .await
            .unwrap();

        assert_eq!(service.active_meeting_count().await.unwrap(), 2);
        assert_eq!(service.total_active_session_count().await.unwrap(), 2);

        service.on_disconnect("c-a").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(service.total_active_session_count().await.unwrap(), 1);
    }
}
