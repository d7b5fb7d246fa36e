//! Capabilities consumed from the hosted backend.
//!
//! The chat core never talks to a concrete SDK. Everything it needs from the
//! outside world goes through these traits:
//! - [`AuthService`]: sign-in / sign-up / current principal
//! - [`Store`]: relational rows (profiles, rooms, memberships, messages)
//! - [`Realtime`]: row-insert notifications filtered by one column
//! - [`ModerationGate`]: optional checkpoint in front of message persistence
//!
//! [`memory::MemoryBackend`] implements all four in-process.

pub mod memory;

use crate::error::{ChatError, Result};
use crate::model::{
    Membership, Message, NewMessage, NewRoom, Principal, PrincipalId, Profile, Room, RoomId,
    RoomQuery,
};
use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

pub const PROFILES_TABLE: &str = "profiles";
pub const ROOMS_TABLE: &str = "rooms";
pub const MEMBERS_TABLE: &str = "room_members";
pub const MESSAGES_TABLE: &str = "messages";

/// Result of a sign-up request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignUpOutcome {
    /// Account created and signed in
    Session(Principal),
    /// Account created, email confirmation required before a session exists
    ConfirmationPending,
}

#[async_trait]
pub trait AuthService: Send + Sync {
    async fn current_principal(&self) -> Result<Option<Principal>>;

    /// Fails with `AuthError::InvalidCredentials` for unknown email or wrong password
    async fn sign_in(&self, email: &str, password: &str) -> Result<Principal>;

    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome>;

    async fn sign_out(&self) -> Result<()>;
}

/// Relational store. Lookups that may match nothing return `Ok(None)`;
/// unique-key violations on insert are reported as `ChatError::Conflict`.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or replace by `profile.id`
    async fn upsert_profile(&self, profile: Profile) -> Result<Profile>;

    async fn profile(&self, id: &PrincipalId) -> Result<Option<Profile>>;

    /// Every profile whose id is not `id`, ordered by display name
    async fn profiles_except(&self, id: &PrincipalId) -> Result<Vec<Profile>>;

    /// First room matching `query` (limit 1)
    async fn find_room(&self, query: &RoomQuery) -> Result<Option<Room>>;

    async fn insert_room(&self, room: NewRoom) -> Result<Room>;

    async fn membership(
        &self,
        room_id: &RoomId,
        participant_id: &PrincipalId,
    ) -> Result<Option<Membership>>;

    async fn insert_membership(&self, membership: Membership) -> Result<Membership>;

    /// Newest first, at most `limit` rows, with `sender_profile` joined
    async fn recent_messages(&self, room_id: &RoomId, limit: usize) -> Result<Vec<Message>>;

    /// Returns the inserted row (no profile join)
    async fn insert_message(&self, message: NewMessage) -> Result<Message>;
}

/// Connection status transitions reported by a realtime channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelStatus {
    Subscribed,
    TimedOut,
    Closed,
    ChannelError,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Status(ChannelStatus),
    /// The newly inserted row as delivered by the backend
    Insert(serde_json::Value),
}

pub type ChangeStream = Pin<Box<dyn Stream<Item = ChangeEvent> + Send>>;

/// Insert events on `table` where `column = value`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertFilter {
    pub table: String,
    pub column: String,
    pub value: String,
}

impl InsertFilter {
    pub fn messages_in(room_id: &RoomId) -> Self {
        Self {
            table: MESSAGES_TABLE.to_string(),
            column: "room_id".to_string(),
            value: room_id.to_string(),
        }
    }

    pub fn matches(&self, table: &str, row: &serde_json::Value) -> bool {
        table == self.table
            && row
                .get(&self.column)
                .and_then(|v| v.as_str())
                .map_or(false, |v| v == self.value)
    }
}

#[async_trait]
pub trait Realtime: Send + Sync {
    /// Open a named channel. The stream starts with a status event.
    async fn subscribe(&self, channel: &str, filter: InsertFilter) -> Result<ChangeStream>;

    /// Close a channel; its stream ends. Unknown names are ignored.
    fn remove_channel(&self, channel: &str);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationRequest {
    pub room_id: RoomId,
    pub sender_id: PrincipalId,
    pub text: String,
}

/// Wire shape returned by the moderation function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationResponse {
    pub allowed: bool,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModerationVerdict {
    /// Persisted by the gate; the row is echoed back
    Allowed(Message),
    Blocked { reason: Option<String> },
}

impl TryFrom<ModerationResponse> for ModerationVerdict {
    type Error = ChatError;

    fn try_from(resp: ModerationResponse) -> Result<Self> {
        if !resp.allowed {
            return Ok(ModerationVerdict::Blocked {
                reason: resp.reason,
            });
        }
        resp.message.map(ModerationVerdict::Allowed).ok_or_else(|| {
            ChatError::Backend(
                "moderation gate allowed the message but returned no row".to_string(),
            )
        })
    }
}

#[async_trait]
pub trait ModerationGate: Send + Sync {
    async fn review(&self, request: ModerationRequest) -> Result<ModerationVerdict>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_insert_filter_matches_room_column() {
        let room = RoomId(Uuid::new_v4());
        let filter = InsertFilter::messages_in(&room);

        let row = serde_json::json!({ "room_id": room.to_string(), "body": "x" });
        assert!(filter.matches(MESSAGES_TABLE, &row));
        assert!(!filter.matches(ROOMS_TABLE, &row));

        let other = serde_json::json!({ "room_id": Uuid::new_v4().to_string() });
        assert!(!filter.matches(MESSAGES_TABLE, &other));
        assert!(!filter.matches(MESSAGES_TABLE, &serde_json::json!({})));
    }

    #[test]
    fn test_blocked_response_becomes_verdict() {
        let resp: ModerationResponse =
            serde_json::from_str(r#"{"allowed":false,"reason":"spam"}"#).unwrap();
        let verdict = ModerationVerdict::try_from(resp).unwrap();
        assert_eq!(
            verdict,
            ModerationVerdict::Blocked {
                reason: Some("spam".to_string())
            }
        );
    }

    #[test]
    fn test_allowed_response_without_row_is_backend_error() {
        let resp: ModerationResponse = serde_json::from_str(r#"{"allowed":true}"#).unwrap();
        let err = ModerationVerdict::try_from(resp).unwrap_err();
        assert!(matches!(err, ChatError::Backend(_)));
    }

    #[test]
    fn test_channel_status_wire_names() {
        let s: ChannelStatus = serde_json::from_str("\"SUBSCRIBED\"").unwrap();
        assert_eq!(s, ChannelStatus::Subscribed);
        assert_eq!(
            serde_json::to_string(&ChannelStatus::ChannelError).unwrap(),
            "\"CHANNEL_ERROR\""
        );
    }
}
