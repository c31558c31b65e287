//! In-memory Meeting Directory.
//!
//! Backs tests and local development. Behaves like the Redis implementation
//! observed from the outside: historical participants are a set-union,
//! active count writes are skipped for missing meetings, and operations can
//! be made to fail for exercising the best-effort persistence path.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::directory::MeetingDirectory;
use crate::errors::PcError;

#[derive(Debug, Clone)]
struct MeetingRecord {
    max_participants: u32,
    participants: HashSet<String>,
    active_participants: usize,
}

/// In-memory directory keyed by meeting id.
#[derive(Default)]
pub struct InMemoryMeetingDirectory {
    meetings: Mutex<HashMap<String, MeetingRecord>>,
    fail_writes: AtomicBool,
}

impl InMemoryMeetingDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a meeting record with the given capacity bound.
    pub async fn insert_meeting(&self, meeting_id: &str, max_participants: u32) {
        let mut meetings = self.meetings.lock().await;
        meetings.insert(
            meeting_id.to_string(),
            MeetingRecord {
                max_participants,
                participants: HashSet::new(),
                active_participants: 0,
            },
        );
    }

    /// Drop a meeting record, as the CRUD subsystem would on deletion.
    pub async fn remove_meeting(&self, meeting_id: &str) {
        let mut meetings = self.meetings.lock().await;
        meetings.remove(meeting_id);
    }

    /// When set, subsequent write operations return `PcError::Persistence`.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Historical participant set for assertions.
    pub async fn historical_participants(&self, meeting_id: &str) -> HashSet<String> {
        let meetings = self.meetings.lock().await;
        meetings
            .get(meeting_id)
            .map(|r| r.participants.clone())
            .unwrap_or_default()
    }

    /// Last recorded active count for assertions.
    pub async fn active_participant_count(&self, meeting_id: &str) -> Option<usize> {
        let meetings = self.meetings.lock().await;
        meetings.get(meeting_id).map(|r| r.active_participants)
    }

    fn check_fail(&self) -> Result<(), PcError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PcError::Persistence(
                "injected write failure".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl MeetingDirectory for InMemoryMeetingDirectory {
    async fn exists(&self, meeting_id: &str) -> Result<bool, PcError> {
        let meetings = self.meetings.lock().await;
        Ok(meetings.contains_key(meeting_id))
    }

    async fn max_participants(&self, meeting_id: &str) -> Result<u32, PcError> {
        let meetings = self.meetings.lock().await;
        meetings
            .get(meeting_id)
            .map(|r| r.max_participants)
            .ok_or_else(|| PcError::MeetingNotFound(meeting_id.to_string()))
    }

    async fn append_historical_participant(
        &self,
        meeting_id: &str,
        user_id: &str,
    ) -> Result<(), PcError> {
        self.check_fail()?;
        let mut meetings = self.meetings.lock().await;
        if let Some(record) = meetings.get_mut(meeting_id) {
            record.participants.insert(user_id.to_string());
        }
        Ok(())
    }

    async fn set_active_participant_count(
        &self,
        meeting_id: &str,
        count: usize,
    ) -> Result<(), PcError> {
        self.check_fail()?;
        let mut meetings = self.meetings.lock().await;
        // Skipped when the meeting record no longer exists
        if let Some(record) = meetings.get_mut(meeting_id) {
            record.active_participants = count;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_historical_append_is_idempotent() {
        let directory = InMemoryMeetingDirectory::new();
        directory.insert_meeting("m-1", 10).await;

        directory
            .append_historical_participant("m-1", "alice")
            .await
            .unwrap();
        directory
            .append_historical_participant("m-1", "alice")
            .await
            .unwrap();
        directory
            .append_historical_participant("m-1", "bob")
            .await
            .unwrap();

        let historical = directory.historical_participants("m-1").await;
        assert_eq!(historical.len(), 2);
        assert!(historical.contains("alice"));
        assert!(historical.contains("bob"));
    }

    #[tokio::test]
    async fn test_count_update_skipped_for_missing_meeting() {
        let directory = InMemoryMeetingDirectory::new();

        directory
            .set_active_participant_count("ghost", 3)
            .await
            .unwrap();

        assert_eq!(directory.active_participant_count("ghost").await, None);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let directory = InMemoryMeetingDirectory::new();
        directory.insert_meeting("m-1", 10).await;
        directory.set_fail_writes(true);

        let result = directory.append_historical_participant("m-1", "alice").await;
        assert!(matches!(result, Err(PcError::Persistence(_))));

        // Reads remain unaffected
        assert!(directory.exists("m-1").await.unwrap());
    }
}
