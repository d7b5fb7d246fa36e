/// Message history, live inserts and sends for one viewer
use crate::backend::{
    ChangeEvent, ChannelStatus, InsertFilter, ModerationGate, ModerationRequest,
    ModerationVerdict, Realtime, Store,
};
use crate::client::ChatClient;
use crate::error::{ChatError, Result};
use crate::model::{
    LocalMessageView, Message, MessageKey, NewMessage, PrincipalId, Profile, RoomId, SELF_LABEL,
    UNKNOWN_LABEL,
};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::{debug, info, warn};
use uuid::Uuid;

const MAX_HISTORY: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SendOutcome {
    Delivered { message: LocalMessageView },
    /// Moderation refused the text; nothing was persisted
    Blocked { reason: Option<String> },
}

/// Project a row for `viewer`. `sender` overrides the joined profile.
pub fn message_view(
    viewer: &PrincipalId,
    message: &Message,
    sender: Option<&Profile>,
) -> LocalMessageView {
    let display_sender = match &message.sender_id {
        Some(id) if id == viewer => SELF_LABEL.to_string(),
        _ => sender
            .or(message.sender_profile.as_ref())
            .and_then(|p| p.display_name.clone())
            .unwrap_or_else(|| UNKNOWN_LABEL.to_string()),
    };

    LocalMessageView {
        key: MessageKey::Confirmed(message.id),
        sender_id: message.sender_id.clone(),
        display_sender,
        text: message.body.clone(),
        created_at: message.created_at,
    }
}

/// Live message views for one room. Dropping or closing it removes the
/// realtime channel.
pub struct Subscription {
    channel: String,
    realtime: Arc<dyn Realtime>,
    events: Pin<Box<dyn Stream<Item = LocalMessageView> + Send>>,
    closed: bool,
}

impl Subscription {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if !self.closed {
            self.closed = true;
            self.realtime.remove_channel(&self.channel);
            debug!("Closed realtime channel {}", self.channel);
        }
    }
}

impl Stream for Subscription {
    type Item = LocalMessageView;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.as_mut().poll_next(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[derive(Clone)]
pub struct MessageSync {
    store: Arc<dyn Store>,
    realtime: Arc<dyn Realtime>,
    moderation: Option<Arc<dyn ModerationGate>>,
    viewer: PrincipalId,
}

impl MessageSync {
    pub fn new(client: &ChatClient, viewer: PrincipalId) -> Self {
        Self {
            store: client.store(),
            realtime: client.realtime(),
            moderation: client.moderation(),
            viewer,
        }
    }

    pub fn viewer(&self) -> &PrincipalId {
        &self.viewer
    }

    /// The newest `limit` messages, oldest first
    pub async fn load_recent(
        &self,
        room_id: &RoomId,
        limit: usize,
    ) -> Result<Vec<LocalMessageView>> {
        let limit = limit.clamp(1, MAX_HISTORY);
        let mut rows = self.store.recent_messages(room_id, limit).await?;
        rows.reverse();
        debug!("Loaded {} messages for room {}", rows.len(), room_id);
        Ok(rows
            .iter()
            .map(|m| message_view(&self.viewer, m, None))
            .collect())
    }

    /// Open one realtime channel for inserts into `room_id`
    pub async fn subscribe(&self, room_id: &RoomId) -> Result<Subscription> {
        let channel = format!("room-{}-{}", room_id, Uuid::new_v4().simple());
        let raw = self
            .realtime
            .subscribe(&channel, InsertFilter::messages_in(room_id))
            .await
            .map_err(|e| ChatError::Subscription(format!("{}: {}", channel, e)))?;

        let store = self.store.clone();
        let viewer = self.viewer.clone();
        let room = *room_id;
        let label = channel.clone();

        let events = raw.filter_map(move |event| {
            let store = store.clone();
            let viewer = viewer.clone();
            let label = label.clone();
            async move {
                let row = match event {
                    ChangeEvent::Status(ChannelStatus::Subscribed) => {
                        info!("Realtime channel {} subscribed", label);
                        return None;
                    }
                    ChangeEvent::Status(status) => {
                        warn!("Realtime channel {} reported {:?}", label, status);
                        return None;
                    }
                    ChangeEvent::Insert(row) => row,
                };

                let message: Message = match serde_json::from_value(row) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!("Skipping undecodable insert on {}: {}", label, e);
                        return None;
                    }
                };
                if message.room_id != room {
                    return None;
                }

                // Change payloads carry no join
                let sender = match &message.sender_id {
                    Some(id) => match store.profile(id).await {
                        Ok(profile) => profile,
                        Err(e) => {
                            warn!("Sender lookup for {} failed: {}", id, e);
                            None
                        }
                    },
                    None => None,
                };
                Some(message_view(&viewer, &message, sender.as_ref()))
            }
        });

        Ok(Subscription {
            channel,
            realtime: self.realtime.clone(),
            events: Box::pin(events),
            closed: false,
        })
    }

    /// Persist `text`, through the moderation gate when one is configured
    pub async fn send(
        &self,
        room_id: &RoomId,
        sender_id: &PrincipalId,
        text: &str,
    ) -> Result<SendOutcome> {
        let body = text.trim();
        if body.is_empty() {
            return Err(ChatError::InvalidInput("message is empty".to_string()));
        }

        let message = match &self.moderation {
            Some(gate) => {
                let verdict = gate
                    .review(ModerationRequest {
                        room_id: *room_id,
                        sender_id: sender_id.clone(),
                        text: body.to_string(),
                    })
                    .await?;
                match verdict {
                    ModerationVerdict::Allowed(message) => message,
                    ModerationVerdict::Blocked { reason } => {
                        info!(
                            "Message from {} to room {} blocked by moderation",
                            sender_id, room_id
                        );
                        return Ok(SendOutcome::Blocked { reason });
                    }
                }
            }
            None => {
                self.store
                    .insert_message(NewMessage {
                        room_id: *room_id,
                        sender_id: sender_id.clone(),
                        body: body.to_string(),
                    })
                    .await?
            }
        };

        Ok(SendOutcome::Delivered {
            message: message_view(&self.viewer, &message, None),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MessageId;
    use chrono::Utc;

    fn row(sender: Option<&str>, profile: Option<&str>) -> Message {
        Message {
            id: MessageId(Uuid::new_v4()),
            room_id: RoomId(Uuid::new_v4()),
            sender_id: sender.map(PrincipalId::from),
            body: "hey".to_string(),
            created_at: Utc::now(),
            sender_profile: profile.map(|name| Profile {
                id: PrincipalId::from(sender.unwrap_or("x")),
                display_name: Some(name.to_string()),
                avatar_url: None,
            }),
        }
    }

    #[test]
    fn test_own_message_shows_you() {
        let viewer = PrincipalId::from("u1");
        let view = message_view(&viewer, &row(Some("u1"), Some("alice")), None);
        assert_eq!(view.display_sender, "You");
    }

    #[test]
    fn test_joined_profile_name() {
        let viewer = PrincipalId::from("u1");
        let view = message_view(&viewer, &row(Some("u2"), Some("bob")), None);
        assert_eq!(view.display_sender, "bob");
    }

    #[test]
    fn test_missing_or_removed_sender_is_unknown() {
        let viewer = PrincipalId::from("u1");
        assert_eq!(message_view(&viewer, &row(Some("u2"), None), None).display_sender, "Unknown");
        assert_eq!(message_view(&viewer, &row(None, None), None).display_sender, "Unknown");
    }

    #[test]
    fn test_lookup_overrides_join() {
        let viewer = PrincipalId::from("u1");
        let looked_up = Profile {
            id: PrincipalId::from("u2"),
            display_name: Some("Bobby".to_string()),
            avatar_url: None,
        };
        let view = message_view(&viewer, &row(Some("u2"), Some("bob")), Some(&looked_up));
        assert_eq!(view.display_sender, "Bobby");
    }

    #[test]
    fn test_send_outcome_wire_shape() {
        let json = serde_json::to_value(SendOutcome::Blocked { reason: None }).unwrap();
        assert_eq!(json["status"], "blocked");
    }
}
