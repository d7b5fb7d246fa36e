/// One chat screen: init flow, live merge and teardown
use super::synchronizer::{MessageSync, SendOutcome, Subscription};
use super::timeline::{MergeOutcome, Timeline};
use crate::client::ChatClient;
use crate::error::{ChatError, Result};
use crate::identity::IdentityResolver;
use crate::model::{LocalMessageView, MessageKey, Principal, RoomId};
use crate::rooms::RoomResolver;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};

const EVENT_CAPACITY: usize = 256;

/// Which room a session opens
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomTarget {
    /// The configured well-known room
    Lobby,
    Named(String),
    /// Direct room with this peer
    Direct(crate::model::PrincipalId),
}

/// Timeline changes pushed to the UI shell
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A row arrived through the subscription
    MessageAdded { message: LocalMessageView },
    /// A pending send was persisted
    MessageConfirmed {
        pending: MessageKey,
        message: LocalMessageView,
    },
    /// A pending send was blocked or failed and removed
    MessageDiscarded {
        pending: MessageKey,
        reason: Option<String>,
    },
}

pub struct ChatSession {
    principal: Principal,
    room_id: RoomId,
    sync: MessageSync,
    timeline: Arc<RwLock<Timeline>>,
    events: broadcast::Sender<SessionEvent>,
    pump: Option<JoinHandle<()>>,
}

impl ChatSession {
    /// Profile → room → membership → subscription → history → live pump.
    /// Room and history failures abort the open; profile and membership
    /// failures are logged and tolerated.
    pub async fn open(
        client: &ChatClient,
        principal: &Principal,
        target: RoomTarget,
    ) -> Result<Self> {
        IdentityResolver::new(client)
            .ensure_profile(&principal.id, principal.email.as_deref(), None)
            .await;

        let rooms = RoomResolver::new(client);
        let room_id = match &target {
            RoomTarget::Lobby => {
                rooms
                    .get_or_create_named_room(&client.config().lobby_room, &principal.id)
                    .await?
            }
            RoomTarget::Named(name) => {
                rooms.get_or_create_named_room(name, &principal.id).await?
            }
            RoomTarget::Direct(peer) => {
                rooms.get_or_create_direct_room(&principal.id, peer).await?
            }
        };

        let sync = MessageSync::new(client, principal.id.clone());

        // Subscribe first so nothing inserted during the history load is missed;
        // the timeline drops the overlap by key.
        let subscription = sync.subscribe(&room_id).await?;
        let history = sync
            .load_recent(&room_id, client.config().history_limit)
            .await?;

        let mut timeline = Timeline::new();
        let loaded = timeline.apply_history(history);
        let timeline = Arc::new(RwLock::new(timeline));

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let pump = tokio::spawn(pump(subscription, timeline.clone(), events.clone()));

        info!(
            "Opened room {} for {} with {} messages of history",
            room_id, principal.id, loaded
        );

        Ok(Self {
            principal: principal.clone(),
            room_id,
            sync,
            timeline,
            events,
            pump: Some(pump),
        })
    }

    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Snapshot of the rendered list
    pub async fn messages(&self) -> Vec<LocalMessageView> {
        self.timeline.read().await.messages().to_vec()
    }

    /// Optimistically show `text`, then reconcile with the send result
    pub async fn send(&self, text: &str) -> Result<SendOutcome> {
        let body = text.trim();
        if body.is_empty() {
            return Err(ChatError::InvalidInput("message is empty".to_string()));
        }

        let pending = self
            .timeline
            .write()
            .await
            .push_pending(&self.principal.id, body);

        match self.sync.send(&self.room_id, &self.principal.id, body).await {
            Ok(SendOutcome::Delivered { message }) => {
                self.timeline.write().await.confirm(pending, message.clone());
                let _ = self.events.send(SessionEvent::MessageConfirmed {
                    pending,
                    message: message.clone(),
                });
                Ok(SendOutcome::Delivered { message })
            }
            Ok(SendOutcome::Blocked { reason }) => {
                self.timeline.write().await.discard(pending);
                let _ = self.events.send(SessionEvent::MessageDiscarded {
                    pending,
                    reason: reason.clone(),
                });
                Ok(SendOutcome::Blocked { reason })
            }
            Err(e) => {
                self.timeline.write().await.discard(pending);
                let _ = self.events.send(SessionEvent::MessageDiscarded {
                    pending,
                    reason: Some(e.to_string()),
                });
                Err(e)
            }
        }
    }

    /// Stop live delivery and release the realtime channel
    pub async fn close(mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
            // Completion guarantees the subscription has been dropped
            let _ = pump.await;
        }
        debug!("Closed session for room {}", self.room_id);
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

async fn pump(
    mut subscription: Subscription,
    timeline: Arc<RwLock<Timeline>>,
    events: broadcast::Sender<SessionEvent>,
) {
    while let Some(view) = subscription.next().await {
        let outcome = timeline.write().await.merge(view.clone());
        match outcome {
            MergeOutcome::Inserted => {
                let _ = events.send(SessionEvent::MessageAdded { message: view });
            }
            // The pending send reports MessageConfirmed once it returns
            MergeOutcome::Reconciled { pending } => {
                debug!("Echo {:?} settled pending {:?}", view.key, pending);
            }
            MergeOutcome::Duplicate => {
                debug!("Dropped duplicate {:?} on {}", view.key, subscription.channel());
            }
        }
    }
    debug!("Subscription {} ended", subscription.channel());
}
