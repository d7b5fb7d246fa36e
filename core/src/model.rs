/// Rows exchanged with the backend and the client-side message projection
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Sender label for the viewer's own messages
pub const SELF_LABEL: &str = "You";
/// Sender label when no profile name is available
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Identifier issued by the auth service. Must not contain the room key separator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(pub String);

impl PrincipalId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PrincipalId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub Uuid);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub Uuid);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Authenticated identity (read-only to this crate)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: PrincipalId,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: PrincipalId,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    /// Well-known name, or the canonical participants key for direct rooms
    pub display_name: String,
    pub is_direct: bool,
    pub creator_id: PrincipalId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRoom {
    pub display_name: String,
    pub is_direct: bool,
    pub creator_id: PrincipalId,
}

/// Filter for a limit-1 room lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomQuery {
    pub display_name: String,
    /// `None` matches both kinds
    pub is_direct: Option<bool>,
}

impl RoomQuery {
    /// Shared rooms only; a direct room's key never resolves here
    pub fn named(name: &str) -> Self {
        Self {
            display_name: name.to_string(),
            is_direct: Some(false),
        }
    }

    pub fn direct(key: &str) -> Self {
        Self {
            display_name: key.to_string(),
            is_direct: Some(true),
        }
    }

    pub fn matches(&self, room: &Room) -> bool {
        room.display_name == self.display_name
            && self.is_direct.map_or(true, |d| d == room.is_direct)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Owner,
    Member,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub room_id: RoomId,
    pub participant_id: PrincipalId,
    pub role: MemberRole,
}

/// Persisted message row. `sender_profile` is only present on joined reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub room_id: RoomId,
    /// `None` for system messages or removed senders
    pub sender_id: Option<PrincipalId>,
    pub body: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_profile: Option<Profile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub room_id: RoomId,
    pub sender_id: PrincipalId,
    pub body: String,
}

/// Identity of an entry in the rendered list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum MessageKey {
    /// Server-assigned id of a persisted row
    Confirmed(MessageId),
    /// Client-assigned id of a send that has not been confirmed yet
    Pending(Uuid),
}

impl MessageKey {
    pub fn is_pending(&self) -> bool {
        matches!(self, MessageKey::Pending(_))
    }
}

/// What the UI shell renders for one message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalMessageView {
    pub key: MessageKey,
    pub sender_id: Option<PrincipalId>,
    pub display_sender: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_row_decodes_without_join() {
        let row = serde_json::json!({
            "id": "6f1c3c1e-8b1e-4d59-9a53-5b2a1f0d8e11",
            "room_id": "0b6f1e0a-6a4e-4a83-a0d5-2f0c1c7e9d22",
            "sender_id": "u1",
            "body": "hi",
            "created_at": "2024-05-01T10:00:00Z"
        });

        let msg: Message = serde_json::from_value(row).unwrap();
        assert_eq!(msg.sender_id, Some(PrincipalId::from("u1")));
        assert!(msg.sender_profile.is_none());
    }

    #[test]
    fn test_message_row_accepts_null_sender() {
        let row = serde_json::json!({
            "id": "6f1c3c1e-8b1e-4d59-9a53-5b2a1f0d8e11",
            "room_id": "0b6f1e0a-6a4e-4a83-a0d5-2f0c1c7e9d22",
            "sender_id": null,
            "body": "system notice",
            "created_at": "2024-05-01T10:00:00Z"
        });

        let msg: Message = serde_json::from_value(row).unwrap();
        assert!(msg.sender_id.is_none());
    }

    #[test]
    fn test_room_query_separates_kinds() {
        let shared = Room {
            id: RoomId(Uuid::new_v4()),
            display_name: "a:b".to_string(),
            is_direct: false,
            creator_id: PrincipalId::from("a"),
            created_at: Utc::now(),
        };
        let direct = Room {
            id: RoomId(Uuid::new_v4()),
            is_direct: true,
            ..shared.clone()
        };

        assert!(!RoomQuery::direct("a:b").matches(&shared));
        assert!(RoomQuery::named("a:b").matches(&shared));
        assert!(RoomQuery::direct("a:b").matches(&direct));
        assert!(!RoomQuery::named("a:b").matches(&direct));
    }
}
