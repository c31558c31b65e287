//! Persistence synchronizer.
//!
//! Reconciles the in-memory rosters with the durable meeting record:
//! newly-seen users are appended to the historical participant set and the
//! live headcount is republished after every mutation. Both writes are
//! fire-and-forget on a spawned task so the real-time path never awaits the
//! network, and failures are logged and swallowed - the in-memory roster
//! stays authoritative.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::warn;

use crate::directory::MeetingDirectory;

/// Record an admission: append the user to the historical set, then
/// republish the roster size. The returned handle is only awaited by tests.
pub fn sync_join(
    directory: Arc<dyn MeetingDirectory>,
    meeting_id: String,
    user_id: String,
    roster_size: usize,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = directory
            .append_historical_participant(&meeting_id, &user_id)
            .await
        {
            metrics::counter!("pc_persistence_failures_total").increment(1);
            warn!(
                target: "pc.sync",
                error = %e,
                meeting_id = %meeting_id,
                user_id = %user_id,
                "Failed to record historical participant"
            );
        }

        publish_count(directory.as_ref(), &meeting_id, roster_size).await;
    })
}

/// Republish the roster size after a removal. The historical participant
/// set is never mutated on leave.
pub fn sync_roster_size(
    directory: Arc<dyn MeetingDirectory>,
    meeting_id: String,
    roster_size: usize,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        publish_count(directory.as_ref(), &meeting_id, roster_size).await;
    })
}

async fn publish_count(directory: &dyn MeetingDirectory, meeting_id: &str, roster_size: usize) {
    if let Err(e) = directory
        .set_active_participant_count(meeting_id, roster_size)
        .await
    {
        metrics::counter!("pc_persistence_failures_total").increment(1);
        warn!(
            target: "pc.sync",
            error = %e,
            meeting_id = %meeting_id,
            roster_size = roster_size,
            "Failed to publish active participant count"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::directory::InMemoryMeetingDirectory;

    #[tokio::test]
    async fn test_join_sync_records_history_and_count() {
        let directory = Arc::new(InMemoryMeetingDirectory::new());
        directory.insert_meeting("m-1", 10).await;

        sync_join(directory.clone(), "m-1".to_string(), "alice".to_string(), 1)
            .await
            .unwrap();

        assert!(directory
            .historical_participants("m-1")
            .await
            .contains("alice"));
        assert_eq!(directory.active_participant_count("m-1").await, Some(1));
    }

    #[tokio::test]
    async fn test_leave_sync_never_shrinks_history() {
        let directory = Arc::new(InMemoryMeetingDirectory::new());
        directory.insert_meeting("m-1", 10).await;

        sync_join(directory.clone(), "m-1".to_string(), "alice".to_string(), 1)
            .await
            .unwrap();
        sync_roster_size(directory.clone(), "m-1".to_string(), 0)
            .await
            .unwrap();

        assert!(directory
            .historical_participants("m-1")
            .await
            .contains("alice"));
        assert_eq!(directory.active_participant_count("m-1").await, Some(0));
    }

    #[tokio::test]
    async fn test_failures_are_swallowed() {
        let directory = Arc::new(InMemoryMeetingDirectory::new());
        directory.insert_meeting("m-1", 10).await;
        directory.set_fail_writes(true);

        // Task completes without propagating the error
        sync_join(directory.clone(), "m-1".to_string(), "alice".to_string(), 1)
            .await
            .unwrap();

        assert!(directory.historical_participants("m-1").await.is_empty());
    }
}
