//! Meeting Directory interface.
//!
//! The directory is the durable owner of meeting records. This service only
//! consumes a narrow slice of it: existence and capacity reads before
//! admission, and the two best-effort writes the persistence synchronizer
//! issues after roster mutations. Meeting CRUD lives elsewhere.
//!
//! The trait is injected at construction so tests can substitute the
//! in-memory implementation for the Redis one.

use async_trait::async_trait;

use crate::errors::PcError;

pub mod memory;
pub mod redis;

pub use memory::InMemoryMeetingDirectory;
pub use redis::RedisMeetingDirectory;

/// Narrow interface onto the durable meeting store.
#[async_trait]
pub trait MeetingDirectory: Send + Sync {
    /// Whether a meeting record exists.
    async fn exists(&self, meeting_id: &str) -> Result<bool, PcError>;

    /// The meeting's configured capacity bound.
    async fn max_participants(&self, meeting_id: &str) -> Result<u32, PcError>;

    /// Append `user_id` to the meeting's historical participant set.
    /// Idempotent: appending a user already in the set is a no-op.
    async fn append_historical_participant(
        &self,
        meeting_id: &str,
        user_id: &str,
    ) -> Result<(), PcError>;

    /// Overwrite the meeting's active participant count. A no-op when the
    /// meeting record no longer exists.
    async fn set_active_participant_count(
        &self,
        meeting_id: &str,
        count: usize,
    ) -> Result<(), PcError>;
}
