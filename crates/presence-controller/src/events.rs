//! Outbound events delivered to connected clients.
//!
//! Every event the service emits is one of these variants, serialized as
//! JSON with a `type` tag. Payload field names are fixed for clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One roster entry as exposed to clients in a presence snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantInfo {
    pub user_id: String,
    pub display_name: Option<String>,
    pub joined_at: DateTime<Utc>,
}

/// Events fanned out to client connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Event {
    /// Full current roster, sent to the whole room on every join/leave.
    #[serde(rename_all = "camelCase")]
    PresenceSnapshot {
        meeting_id: String,
        participants: Vec<ParticipantInfo>,
        count: usize,
    },

    /// Sent to everyone except the subject when a new session is admitted.
    #[serde(rename_all = "camelCase")]
    ParticipantJoined {
        user_id: String,
        display_name: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Sent to everyone except the subject when a session is removed.
    #[serde(rename_all = "camelCase")]
    ParticipantLeft {
        user_id: String,
        display_name: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Chat text passed through verbatim, sent to the whole room including
    /// the sender. Never persisted.
    #[serde(rename_all = "camelCase")]
    ChatMessage {
        message_id: String,
        meeting_id: String,
        user_id: String,
        display_name: Option<String>,
        text: String,
        timestamp: DateTime<Utc>,
    },

    /// Typing indicator, sent to everyone except the subject.
    #[serde(rename_all = "camelCase")]
    TypingStart {
        user_id: String,
        display_name: Option<String>,
    },

    /// Typing indicator, sent to everyone except the subject.
    #[serde(rename_all = "camelCase")]
    TypingStop {
        user_id: String,
        display_name: Option<String>,
    },

    /// Sent only to the connection that triggered the failing operation.
    #[serde(rename_all = "camelCase")]
    OperationError { message: String },
}

/// Builds a chat message id from the send time and the originating
/// connection. Uniqueness is the requirement, not global ordering.
pub fn chat_message_id(timestamp: DateTime<Utc>, connection_id: &str) -> String {
    format!("{}-{}", timestamp.timestamp_millis(), connection_id)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_serializes_with_wire_field_names() {
        let event = Event::PresenceSnapshot {
            meeting_id: "m-1".to_string(),
            participants: vec![ParticipantInfo {
                user_id: "u-1".to_string(),
                display_name: Some("Alice".to_string()),
                joined_at: Utc::now(),
            }],
            count: 1,
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "presence-snapshot");
        assert_eq!(json["meetingId"], "m-1");
        assert_eq!(json["count"], 1);
        assert_eq!(json["participants"][0]["userId"], "u-1");
        assert_eq!(json["participants"][0]["displayName"], "Alice");
        assert!(json["participants"][0]["joinedAt"].is_string());
    }

    #[test]
    fn test_event_type_tags() {
        let now = Utc::now();
        let cases = vec![
            (
                Event::ParticipantJoined {
                    user_id: "u".to_string(),
                    display_name: None,
                    timestamp: now,
                },
                "participant-joined",
            ),
            (
                Event::ParticipantLeft {
                    user_id: "u".to_string(),
                    display_name: None,
                    timestamp: now,
                },
                "participant-left",
            ),
            (
                Event::ChatMessage {
                    message_id: "1-c".to_string(),
                    meeting_id: "m".to_string(),
                    user_id: "u".to_string(),
                    display_name: None,
                    text: "hi".to_string(),
                    timestamp: now,
                },
                "chat-message",
            ),
            (
                Event::TypingStart {
                    user_id: "u".to_string(),
                    display_name: None,
                },
                "typing-start",
            ),
            (
                Event::TypingStop {
                    user_id: "u".to_string(),
                    display_name: None,
                },
                "typing-stop",
            ),
            (
                Event::OperationError {
                    message: "Meeting not found".to_string(),
                },
                "operation-error",
            ),
        ];

        for (event, tag) in cases {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["type"], tag);
        }
    }

    #[test]
    fn test_chat_message_id_combines_time_and_connection() {
        let now = Utc::now();
        let id_a = chat_message_id(now, "conn-a");
        let id_b = chat_message_id(now, "conn-b");

        assert_ne!(id_a, id_b);
        assert!(id_a.starts_with(&now.timestamp_millis().to_string()));
        assert!(id_a.ends_with("conn-a"));
    }
}
