//! Redis-backed Meeting Directory.
//!
//! # Key Patterns
//!
//! - `meeting:{id}` - Meeting metadata (HASH: `host_id`, `max_participants`,
//!   `active_participants`, `status`)
//! - `meeting:{id}:participants` - Historical participant set (SET)
//!
//! The historical set uses `SADD`, which is set-union by construction:
//! concurrent appends from other processes can interleave without losing
//! entries, and re-appending a known user is a no-op.
//!
//! # Connection Pattern
//!
//! The redis-rs `MultiplexedConnection` is designed to be cloned cheaply and
//! used concurrently. No locking is needed - just clone the connection for
//! each operation.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, Script};
use tracing::{debug, error, instrument, warn};

use crate::directory::MeetingDirectory;
use crate::errors::PcError;

/// Overwrites the active count only while the meeting record still exists,
/// so a count update racing a meeting deletion cannot resurrect the key.
const GUARDED_SET_ACTIVE_COUNT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 1 then
    redis.call('HSET', KEYS[1], 'active_participants', ARGV[1])
    return 1
else
    return 0
end
";

/// Redis-backed directory client.
///
/// Cheaply cloneable - the underlying `MultiplexedConnection` is designed to
/// be shared across tasks. Clone this client rather than sharing via
/// `Arc<Mutex>`.
#[derive(Clone)]
pub struct RedisMeetingDirectory {
    /// Redis client (kept for potential reconnection scenarios).
    #[allow(dead_code)]
    client: Client,
    /// Multiplexed connection (cheaply cloneable, designed for concurrent use).
    connection: MultiplexedConnection,
    /// Capacity used when a meeting record has no `max_participants` field.
    default_max_participants: u32,
    /// Precompiled Lua script for the guarded count write.
    set_count_script: Script,
}

impl RedisMeetingDirectory {
    /// Create a new Redis directory client.
    ///
    /// # Errors
    ///
    /// Returns `PcError::Persistence` if the connection fails.
    pub async fn new(redis_url: &str, default_max_participants: u32) -> Result<Self, PcError> {
        let client = Client::open(redis_url).map_err(|e| {
            // Note: Do NOT log redis_url as it may contain credentials
            // (e.g., redis://:password@host:port)
            error!(
                target: "pc.directory",
                error = %e,
                "Failed to open Redis client"
            );
            PcError::Persistence(format!("Failed to open Redis client: {e}"))
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                error!(
                    target: "pc.directory",
                    error = %e,
                    "Failed to connect to Redis"
                );
                PcError::Persistence(format!("Failed to connect to Redis: {e}"))
            })?;

        Ok(Self {
            client,
            connection,
            default_max_participants,
            set_count_script: Script::new(GUARDED_SET_ACTIVE_COUNT),
        })
    }

    fn meeting_key(meeting_id: &str) -> String {
        format!("meeting:{meeting_id}")
    }

    fn participants_key(meeting_id: &str) -> String {
        format!("meeting:{meeting_id}:participants")
    }
}

#[async_trait]
impl MeetingDirectory for RedisMeetingDirectory {
    #[instrument(skip_all, fields(meeting_id = %meeting_id))]
    async fn exists(&self, meeting_id: &str) -> Result<bool, PcError> {
        // Clone the connection (cheap operation) for this request
        let mut conn = self.connection.clone();

        let found: bool = conn
            .exists(Self::meeting_key(meeting_id))
            .await
            .map_err(|e| {
                warn!(
                    target: "pc.directory",
                    error = %e,
                    meeting_id = %meeting_id,
                    "Failed to check meeting existence"
                );
                PcError::Persistence(format!("Failed to check meeting existence: {e}"))
            })?;

        Ok(found)
    }

    #[instrument(skip_all, fields(meeting_id = %meeting_id))]
    async fn max_participants(&self, meeting_id: &str) -> Result<u32, PcError> {
        // Clone the connection (cheap operation) for this request
        let mut conn = self.connection.clone();

        let raw: Option<String> = conn
            .hget(Self::meeting_key(meeting_id), "max_participants")
            .await
            .map_err(|e| {
                warn!(
                    target: "pc.directory",
                    error = %e,
                    meeting_id = %meeting_id,
                    "Failed to read max_participants"
                );
                PcError::Persistence(format!("Failed to read max_participants: {e}"))
            })?;

        Ok(raw
            .and_then(|s| s.parse().ok())
            .unwrap_or(self.default_max_participants))
    }

    #[instrument(skip_all, fields(meeting_id = %meeting_id, user_id = %user_id))]
    async fn append_historical_participant(
        &self,
        meeting_id: &str,
        user_id: &str,
    ) -> Result<(), PcError> {
        // Clone the connection (cheap operation) for this request
        let mut conn = self.connection.clone();

        let added: i64 = conn
            .sadd(Self::participants_key(meeting_id), user_id)
            .await
            .map_err(|e| {
                warn!(
                    target: "pc.directory",
                    error = %e,
                    meeting_id = %meeting_id,
                    "Failed to append historical participant"
                );
                PcError::Persistence(format!("Failed to append historical participant: {e}"))
            })?;

        debug!(
            target: "pc.directory",
            meeting_id = %meeting_id,
            user_id = %user_id,
            newly_added = added == 1,
            "Appended historical participant"
        );

        Ok(())
    }

    #[instrument(skip_all, fields(meeting_id = %meeting_id, count = count))]
    async fn set_active_participant_count(
        &self,
        meeting_id: &str,
        count: usize,
    ) -> Result<(), PcError> {
        // Clone the connection (cheap operation) for this request
        let mut conn = self.connection.clone();

        let result: i64 = self
            .set_count_script
            .key(Self::meeting_key(meeting_id))
            .arg(count as u64)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                warn!(
                    target: "pc.directory",
                    error = %e,
                    meeting_id = %meeting_id,
                    "Failed to set active participant count"
                );
                PcError::Persistence(format!("Failed to set active participant count: {e}"))
            })?;

        if result == 0 {
            debug!(
                target: "pc.directory",
                meeting_id = %meeting_id,
                "Meeting record gone, skipped active count update"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_key_formats() {
        assert_eq!(
            RedisMeetingDirectory::meeting_key("meeting-123"),
            "meeting:meeting-123"
        );
        assert_eq!(
            RedisMeetingDirectory::participants_key("meeting-123"),
            "meeting:meeting-123:participants"
        );
    }

    #[test]
    fn test_guarded_count_script_shape() {
        // The script must guard on the metadata key and write the
        // active_participants field, nothing else.
        assert!(GUARDED_SET_ACTIVE_COUNT.contains("EXISTS"));
        assert!(GUARDED_SET_ACTIVE_COUNT.contains("HSET"));
        assert!(GUARDED_SET_ACTIVE_COUNT.contains("active_participants"));
        assert!(!GUARDED_SET_ACTIVE_COUNT.contains("DEL"));
    }
}
