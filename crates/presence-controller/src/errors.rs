//! Presence Controller error types.
//!
//! Error types map to `ErrorCode` values for client responses. Internal
//! details are logged server-side but not exposed to clients.

use thiserror::Error;

/// Presence Controller error type.
///
/// Maps to `ErrorCode` values:
/// - `Validation`: `VALIDATION_ERROR` (1)
/// - `MeetingNotFound`: `NOT_FOUND` (4)
/// - `Internal`, `Persistence`, `Config`: `INTERNAL_ERROR` (6)
/// - `CapacityExceeded`, `Draining`: `CAPACITY_EXCEEDED` (7)
#[derive(Debug, Error)]
pub enum PcError {
    /// Required identifier missing or malformed in an inbound event.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Meeting not found in the meeting directory.
    #[error("Meeting not found: {0}")]
    MeetingNotFound(String),

    /// Roster is at the configured maximum.
    #[error("Meeting at capacity: maximum {limit} participants")]
    CapacityExceeded { limit: u32 },

    /// Durable-store operation failed. Logged only, never sent to a client.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Coordinator is draining (graceful shutdown).
    #[error("Coordinator is draining")]
    Draining,

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PcError {
    /// Returns the `ErrorCode` value for this error.
    pub fn error_code(&self) -> i32 {
        match self {
            PcError::Validation(_) => 1, // VALIDATION_ERROR
            PcError::MeetingNotFound(_) => 4, // NOT_FOUND
            PcError::Persistence(_) | PcError::Config(_) | PcError::Internal(_) => 6, // INTERNAL_ERROR
            PcError::CapacityExceeded { .. } | PcError::Draining => 7, // CAPACITY_EXCEEDED
        }
    }

    /// Returns a client-safe error message (no internal details).
    pub fn client_message(&self) -> String {
        match self {
            PcError::Validation(msg) => msg.clone(),
            PcError::MeetingNotFound(_) => "Meeting not found".to_string(),
            PcError::CapacityExceeded { limit } => {
                format!("Meeting is full (maximum {limit} participants)")
            }
            PcError::Persistence(_) | PcError::Config(_) | PcError::Internal(_) => {
                "An internal error occurred".to_string()
            }
            PcError::Draining => "Server is shutting down, please reconnect".to_string(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        // Validation -> 1
        assert_eq!(
            PcError::Validation("meetingId is required".to_string()).error_code(),
            1
        );

        // Not found -> 4
        assert_eq!(
            PcError::MeetingNotFound("meeting-123".to_string()).error_code(),
            4
        );

        // Internal errors -> 6
        assert_eq!(
            PcError::Persistence("SADD failed".to_string()).error_code(),
            6
        );
        assert_eq!(PcError::Config("bad config".to_string()).error_code(), 6);
        assert_eq!(
            PcError::Internal("channel closed".to_string()).error_code(),
            6
        );

        // Capacity exceeded -> 7
        assert_eq!(PcError::CapacityExceeded { limit: 100 }.error_code(), 7);
        assert_eq!(PcError::Draining.error_code(), 7);
    }

    #[test]
    fn test_capacity_message_embeds_limit() {
        let err = PcError::CapacityExceeded { limit: 2 };
        assert_eq!(
            err.client_message(),
            "Meeting is full (maximum 2 participants)"
        );
    }

    #[test]
    fn test_client_messages_hide_internal_details() {
        let persistence_err =
            PcError::Persistence("connection refused at 192.168.1.100:6379".to_string());
        assert!(!persistence_err.client_message().contains("192.168"));
        assert_eq!(
            persistence_err.client_message(),
            "An internal error occurred"
        );

        let config_err = PcError::Config("missing PC_REDIS_URL".to_string());
        assert!(!config_err.client_message().contains("PC_REDIS_URL"));
        assert_eq!(config_err.client_message(), "An internal error occurred");
    }

    #[test]
    fn test_validation_message_passes_through() {
        let err = PcError::Validation("userId is required".to_string());
        assert_eq!(err.client_message(), "userId is required");
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!("{}", PcError::Persistence("timeout".to_string())),
            "Persistence error: timeout"
        );
        assert_eq!(
            format!("{}", PcError::CapacityExceeded { limit: 8 }),
            "Meeting at capacity: maximum 8 participants"
        );
    }
}
