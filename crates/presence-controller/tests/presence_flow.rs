//! End-to-end presence flow through the service layer.
//!
//! Exercises a two-seat meeting: admission, roster events, capacity
//! rejection, chat fan-out, reconnect, and disconnect cleanup, observed
//! through each client's outbound channel.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use presence_controller::actors::{CoordinatorMetrics, PresenceCoordinatorActorHandle};
use presence_controller::directory::InMemoryMeetingDirectory;
use presence_controller::errors::PcError;
use presence_controller::events::Event;
use presence_controller::service::PresenceService;

const MEETING: &str = "standup";

struct Harness {
    service: PresenceService,
    directory: Arc<InMemoryMeetingDirectory>,
}

impl Harness {
    async fn new(max_participants: u32) -> Self {
        let directory = Arc::new(InMemoryMeetingDirectory::new());
        directory.insert_meeting(MEETING, max_participants).await;
        let coordinator = PresenceCoordinatorActorHandle::new(
            "pc-test".to_string(),
            directory.clone(),
            CoordinatorMetrics::new(),
        );
        let service = PresenceService::new(coordinator, directory.clone());
        Self { service, directory }
    }

    async fn connect(&self, connection_id: &str) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(64);
        self.service
            .on_connect(connection_id.to_string(), tx)
            .await
            .unwrap();
        rx
    }
}

async fn recv_event(rx: &mut mpsc::Receiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

fn assert_no_event(rx: &mut mpsc::Receiver<Event>) {
    assert!(
        rx.try_recv().is_err(),
        "expected no pending events on this connection"
    );
}

#[tokio::test]
async fn two_seat_meeting_full_lifecycle() {
    let harness = Harness::new(2).await;

    // Alice joins an empty meeting and receives a snapshot of herself
    let mut rx_a = harness.connect("c-a").await;
    harness
        .service
        .handle_join("c-a", MEETING, "alice", Some("Alice".to_string()))
        .await
        .unwrap();

    match recv_event(&mut rx_a).await {
        Event::PresenceSnapshot {
            meeting_id,
            participants,
            count,
        } => {
            assert_eq!(meeting_id, MEETING);
            assert_eq!(count, 1);
            assert_eq!(participants[0].user_id, "alice");
        }
        other => panic!("expected presence-snapshot, got {other:?}"),
    }

    // Bob joins; both get the new snapshot, only Alice gets the join event
    let mut rx_b = harness.connect("c-b").await;
    harness
        .service
        .handle_join("c-b", MEETING, "bob", None)
        .await
        .unwrap();

    match recv_event(&mut rx_a).await {
        Event::PresenceSnapshot { count, .. } => assert_eq!(count, 2),
        other => panic!("expected presence-snapshot, got {other:?}"),
    }
    match recv_event(&mut rx_a).await {
        Event::ParticipantJoined { user_id, .. } => assert_eq!(user_id, "bob"),
        other => panic!("expected participant-joined, got {other:?}"),
    }

    match recv_event(&mut rx_b).await {
        Event::PresenceSnapshot { count, .. } => assert_eq!(count, 2),
        other => panic!("expected presence-snapshot, got {other:?}"),
    }
    assert_no_event(&mut rx_b);

    // Carol is rejected: the meeting is at capacity
    let mut rx_c = harness.connect("c-c").await;
    let result = harness
        .service
        .handle_join("c-c", MEETING, "carol", None)
        .await;
    match result {
        Err(PcError::CapacityExceeded { limit }) => assert_eq!(limit, 2),
        other => panic!("expected capacity rejection, got {other:?}"),
    }
    assert_no_event(&mut rx_c);

    // Chat from Alice reaches the whole roster, Alice included
    harness
        .service
        .handle_message(
            "c-a",
            MEETING,
            "alice",
            Some("Alice".to_string()),
            "hello".to_string(),
        )
        .await
        .unwrap();

    for rx in [&mut rx_a, &mut rx_b] {
        match recv_event(rx).await {
            Event::ChatMessage { user_id, text, .. } => {
                assert_eq!(user_id, "alice");
                assert_eq!(text, "hello");
            }
            other => panic!("expected chat-message, got {other:?}"),
        }
    }
    assert_no_event(&mut rx_c);

    // Typing excludes the sender
    harness
        .service
        .handle_typing_start("c-b", MEETING, "bob", None)
        .await
        .unwrap();

    match recv_event(&mut rx_a).await {
        Event::TypingStart { user_id, .. } => assert_eq!(user_id, "bob"),
        other => panic!("expected typing-start, got {other:?}"),
    }
    assert_no_event(&mut rx_b);

    // Bob leaves: Alice sees the departure and a fresh snapshot
    harness
        .service
        .handle_leave("c-b", MEETING)
        .await
        .unwrap();

    match recv_event(&mut rx_a).await {
        Event::ParticipantLeft { user_id, .. } => assert_eq!(user_id, "bob"),
        other => panic!("expected participant-left, got {other:?}"),
    }
    match recv_event(&mut rx_a).await {
        Event::PresenceSnapshot { count, .. } => assert_eq!(count, 1),
        other => panic!("expected presence-snapshot, got {other:?}"),
    }

    // The freed seat admits Carol
    harness
        .service
        .handle_join("c-c", MEETING, "carol", None)
        .await
        .unwrap();
    match recv_event(&mut rx_c).await {
        Event::PresenceSnapshot { count, .. } => assert_eq!(count, 2),
        other => panic!("expected presence-snapshot, got {other:?}"),
    }
}

#[tokio::test]
async fn reconnect_bypasses_capacity_and_stays_silent() {
    let harness = Harness::new(2).await;

    let mut rx_a = harness.connect("c-a").await;
    harness
        .service
        .handle_join("c-a", MEETING, "alice", None)
        .await
        .unwrap();
    let _ = recv_event(&mut rx_a).await;

    let mut rx_b1 = harness.connect("c-b1").await;
    harness
        .service
        .handle_join("c-b1", MEETING, "bob", None)
        .await
        .unwrap();
    let _ = recv_event(&mut rx_a).await; // snapshot
    let _ = recv_event(&mut rx_a).await; // participant-joined
    let _ = recv_event(&mut rx_b1).await;

    // Bob reconnects on a new connection while the meeting is full
    let mut rx_b2 = harness.connect("c-b2").await;
    harness
        .service
        .handle_join("c-b2", MEETING, "bob", None)
        .await
        .unwrap();

    // Everyone gets the fresh snapshot with an unchanged roster
    for rx in [&mut rx_a, &mut rx_b2] {
        match recv_event(rx).await {
            Event::PresenceSnapshot { count, participants, .. } => {
                assert_eq!(count, 2);
                assert!(participants.iter().any(|p| p.user_id == "bob"));
            }
            other => panic!("expected presence-snapshot, got {other:?}"),
        }
    }
    // No participant-joined anywhere: the roster did not grow
    assert_no_event(&mut rx_a);

    // Chat now lands on the replacement connection only
    harness
        .service
        .handle_message("c-a", MEETING, "alice", None, "hi".to_string())
        .await
        .unwrap();

    assert!(matches!(
        recv_event(&mut rx_b2).await,
        Event::ChatMessage { .. }
    ));
    assert_no_event(&mut rx_b1);
}

#[tokio::test]
async fn disconnect_cleans_up_and_persists_history() {
    let harness = Harness::new(2).await;

    let mut rx_a = harness.connect("c-a").await;
    harness
        .service
        .handle_join("c-a", MEETING, "alice", None)
        .await
        .unwrap();
    let _ = recv_event(&mut rx_a).await;

    // Let the fire-and-forget persistence writes settle
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(harness
        .directory
        .historical_participants(MEETING)
        .await
        .contains("alice"));
    assert_eq!(
        harness.directory.active_participant_count(MEETING).await,
        Some(1)
    );

    harness.service.on_disconnect("c-a").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // History is retained while the live count drops to zero
    assert!(harness
        .directory
        .historical_participants(MEETING)
        .await
        .contains("alice"));
    assert_eq!(
        harness.directory.active_participant_count(MEETING).await,
        Some(0)
    );
    assert_eq!(
        harness.service.total_active_session_count().await.unwrap(),
        0
    );

    // A second disconnect for the same connection is harmless
    harness.service.on_disconnect("c-a").await.unwrap();
}
