/// In-process backend: tables in shared maps, inserts fanned out on a broadcast bus.
/// Used as the offline backend and as the test double for every capability.
use super::{
    AuthService, ChangeEvent, ChangeStream, ChannelStatus, InsertFilter, ModerationGate,
    ModerationRequest, ModerationResponse, ModerationVerdict, Realtime, SignUpOutcome, Store,
    MEMBERS_TABLE, MESSAGES_TABLE, PROFILES_TABLE, ROOMS_TABLE,
};
use crate::error::{AuthError, ChatError, Result};
use crate::model::{
    Membership, Message, MessageId, NewMessage, NewRoom, Principal, PrincipalId, Profile, Room,
    RoomId, RoomQuery,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{future, stream, StreamExt};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, RwLock};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 100;

/// Operations that can be made to fail with `fail_on`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    UpsertProfile,
    GetProfile,
    ListProfiles,
    FindRoom,
    InsertRoom,
    GetMembership,
    InsertMembership,
    RecentMessages,
    InsertMessage,
    Subscribe,
    Moderate,
}

#[derive(Debug, Clone)]
struct TableInsert {
    table: &'static str,
    row: serde_json::Value,
}

#[derive(Default)]
struct Tables {
    profiles: HashMap<PrincipalId, Profile>,
    rooms: Vec<Room>,
    memberships: Vec<Membership>,
    messages: Vec<Message>,
    last_created_at: Option<DateTime<Utc>>,
}

impl Tables {
    /// Server clock that never repeats a timestamp
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let ts = match self.last_created_at {
            Some(last) if now <= last => last + chrono::Duration::microseconds(1),
            _ => now,
        };
        self.last_created_at = Some(ts);
        ts
    }

    fn room_exists(&self, id: &RoomId) -> bool {
        self.rooms.iter().any(|r| &r.id == id)
    }
}

struct Account {
    password: String,
    principal: Principal,
    confirmed: bool,
}

#[derive(Default)]
struct AuthState {
    accounts: HashMap<String, Account>,
    current: Option<Principal>,
}

#[derive(Clone)]
pub struct MemoryBackend {
    tables: Arc<RwLock<Tables>>,
    auth: Arc<RwLock<AuthState>>,
    changes: broadcast::Sender<TableInsert>,
    channels: Arc<Mutex<HashMap<String, oneshot::Sender<()>>>>,
    faults: Arc<Mutex<HashSet<StoreOp>>>,
    blocked_terms: Arc<Mutex<Vec<String>>>,
    latency: Option<Duration>,
    confirm_sign_ups: bool,
}

fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_capacity(CHANNEL_CAPACITY)
    }

    /// `capacity` bounds how far a realtime subscriber may lag before losing events
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
            auth: Arc::new(RwLock::new(AuthState::default())),
            changes: broadcast::channel(capacity.max(1)).0,
            channels: Arc::new(Mutex::new(HashMap::new())),
            faults: Arc::new(Mutex::new(HashSet::new())),
            blocked_terms: Arc::new(Mutex::new(Vec::new())),
            latency: None,
            confirm_sign_ups: false,
        }
    }

    /// Delay every call by `latency` before it touches state
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Sign-ups stay pending until `confirm_email`
    pub fn require_email_confirmation(mut self) -> Self {
        self.confirm_sign_ups = true;
        self
    }

    pub fn fail_on(&self, op: StoreOp) {
        locked(&self.faults).insert(op);
    }

    pub fn clear_faults(&self) {
        locked(&self.faults).clear();
    }

    /// Moderation rejects any message containing `term` (case-insensitive)
    pub fn block_term(&self, term: &str) {
        locked(&self.blocked_terms).push(term.to_lowercase());
    }

    pub async fn confirm_email(&self, email: &str) -> bool {
        let mut auth = self.auth.write().await;
        match auth.accounts.get_mut(&normalize_email(email)) {
            Some(account) => {
                account.confirmed = true;
                true
            }
            None => false,
        }
    }

    pub async fn profile_count(&self) -> usize {
        self.tables.read().await.profiles.len()
    }

    pub async fn rooms(&self) -> Vec<Room> {
        self.tables.read().await.rooms.clone()
    }

    pub async fn membership_count(&self, room_id: &RoomId) -> usize {
        let tables = self.tables.read().await;
        tables.memberships.iter().filter(|m| &m.room_id == room_id).count()
    }

    pub async fn message_count(&self, room_id: &RoomId) -> usize {
        let tables = self.tables.read().await;
        tables.messages.iter().filter(|m| &m.room_id == room_id).count()
    }

    /// Channels subscribed and not yet removed
    pub fn open_channels(&self) -> usize {
        locked(&self.channels).len()
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn check(&self, op: StoreOp) -> Result<()> {
        if locked(&self.faults).contains(&op) {
            return Err(ChatError::Backend(format!("{:?} failed: backend unavailable", op)));
        }
        Ok(())
    }

    fn publish<T: Serialize>(&self, table: &'static str, row: &T) {
        match serde_json::to_value(row) {
            Ok(row) => {
                // No receivers is fine
                let _ = self.changes.send(TableInsert { table, row });
            }
            Err(e) => warn!("Failed to encode {} row for realtime: {}", table, e),
        }
    }

    async fn insert_message_row(&self, new: NewMessage) -> Result<Message> {
        let message = {
            let mut tables = self.tables.write().await;
            if !tables.room_exists(&new.room_id) {
                return Err(ChatError::Backend(format!(
                    "insert or update on table \"{}\" violates foreign key constraint (room {})",
                    MESSAGES_TABLE, new.room_id
                )));
            }
            let message = Message {
                id: MessageId(Uuid::new_v4()),
                room_id: new.room_id,
                sender_id: Some(new.sender_id),
                body: new.body,
                created_at: tables.next_timestamp(),
                sender_profile: None,
            };
            tables.messages.push(message.clone());
            message
        };

        self.publish(MESSAGES_TABLE, &message);
        Ok(message)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthService for MemoryBackend {
    async fn current_principal(&self) -> Result<Option<Principal>> {
        Ok(self.auth.read().await.current.clone())
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Principal> {
        self.pause().await;
        let mut auth = self.auth.write().await;
        let principal = match auth.accounts.get(&normalize_email(email)) {
            Some(account) if account.password == password => {
                if !account.confirmed {
                    return Err(AuthError::Provider("Email not confirmed".to_string()).into());
                }
                account.principal.clone()
            }
            _ => return Err(AuthError::InvalidCredentials.into()),
        };
        auth.current = Some(principal.clone());
        Ok(principal)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome> {
        self.pause().await;
        let email = normalize_email(email);
        let mut auth = self.auth.write().await;
        if auth.accounts.contains_key(&email) {
            return Err(AuthError::AlreadyRegistered.into());
        }

        let principal = Principal {
            id: PrincipalId(Uuid::new_v4().to_string()),
            email: Some(email.clone()),
        };
        auth.accounts.insert(
            email,
            Account {
                password: password.to_string(),
                principal: principal.clone(),
                confirmed: !self.confirm_sign_ups,
            },
        );

        if self.confirm_sign_ups {
            return Ok(SignUpOutcome::ConfirmationPending);
        }
        auth.current = Some(principal.clone());
        Ok(SignUpOutcome::Session(principal))
    }

    async fn sign_out(&self) -> Result<()> {
        self.auth.write().await.current = None;
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryBackend {
    async fn upsert_profile(&self, profile: Profile) -> Result<Profile> {
        self.pause().await;
        self.check(StoreOp::UpsertProfile)?;
        let inserted = {
            let mut tables = self.tables.write().await;
            tables
                .profiles
                .insert(profile.id.clone(), profile.clone())
                .is_none()
        };
        if inserted {
            self.publish(PROFILES_TABLE, &profile);
        }
        Ok(profile)
    }

    async fn profile(&self, id: &PrincipalId) -> Result<Option<Profile>> {
        self.pause().await;
        self.check(StoreOp::GetProfile)?;
        Ok(self.tables.read().await.profiles.get(id).cloned())
    }

    async fn profiles_except(&self, id: &PrincipalId) -> Result<Vec<Profile>> {
        self.pause().await;
        self.check(StoreOp::ListProfiles)?;
        let tables = self.tables.read().await;
        let mut profiles: Vec<Profile> = tables
            .profiles
            .values()
            .filter(|p| &p.id != id)
            .cloned()
            .collect();
        // NULL names sort last, like the SQL default
        profiles.sort_by(|a, b| match (&a.display_name, &b.display_name) {
            (Some(x), Some(y)) => x.cmp(y).then_with(|| a.id.cmp(&b.id)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.id.cmp(&b.id),
        });
        Ok(profiles)
    }

    async fn find_room(&self, query: &RoomQuery) -> Result<Option<Room>> {
        self.pause().await;
        self.check(StoreOp::FindRoom)?;
        let tables = self.tables.read().await;
        Ok(tables.rooms.iter().find(|r| query.matches(r)).cloned())
    }

    async fn insert_room(&self, room: NewRoom) -> Result<Room> {
        self.pause().await;
        self.check(StoreOp::InsertRoom)?;
        let room = {
            let mut tables = self.tables.write().await;
            if tables
                .rooms
                .iter()
                .any(|r| r.display_name == room.display_name && r.is_direct == room.is_direct)
            {
                return Err(ChatError::Conflict(format!(
                    "duplicate key value violates unique constraint \"{}_display_name_key\"",
                    ROOMS_TABLE
                )));
            }
            let room = Room {
                id: RoomId(Uuid::new_v4()),
                display_name: room.display_name,
                is_direct: room.is_direct,
                creator_id: room.creator_id,
                created_at: tables.next_timestamp(),
            };
            tables.rooms.push(room.clone());
            room
        };
        debug!("Created room {} ({})", room.id, room.display_name);
        self.publish(ROOMS_TABLE, &room);
        Ok(room)
    }

    async fn membership(
        &self,
        room_id: &RoomId,
        participant_id: &PrincipalId,
    ) -> Result<Option<Membership>> {
        self.pause().await;
        self.check(StoreOp::GetMembership)?;
        let tables = self.tables.read().await;
        Ok(tables
            .memberships
            .iter()
            .find(|m| &m.room_id == room_id && &m.participant_id == participant_id)
            .cloned())
    }

    async fn insert_membership(&self, membership: Membership) -> Result<Membership> {
        self.pause().await;
        self.check(StoreOp::InsertMembership)?;
        {
            let mut tables = self.tables.write().await;
            if !tables.room_exists(&membership.room_id) {
                return Err(ChatError::Backend(format!(
                    "insert or update on table \"{}\" violates foreign key constraint (room {})",
                    MEMBERS_TABLE, membership.room_id
                )));
            }
            if tables.memberships.iter().any(|m| {
                m.room_id == membership.room_id && m.participant_id == membership.participant_id
            }) {
                return Err(ChatError::Conflict(format!(
                    "duplicate key value violates unique constraint \"{}_pkey\"",
                    MEMBERS_TABLE
                )));
            }
            tables.memberships.push(membership.clone());
        }
        self.publish(MEMBERS_TABLE, &membership);
        Ok(membership)
    }

    async fn recent_messages(&self, room_id: &RoomId, limit: usize) -> Result<Vec<Message>> {
        self.pause().await;
        self.check(StoreOp::RecentMessages)?;
        let tables = self.tables.read().await;
        let mut rows: Vec<Message> = tables
            .messages
            .iter()
            .filter(|m| &m.room_id == room_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit);
        for row in rows.iter_mut() {
            row.sender_profile = row
                .sender_id
                .as_ref()
                .and_then(|id| tables.profiles.get(id))
                .cloned();
        }
        Ok(rows)
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Message> {
        self.pause().await;
        self.check(StoreOp::InsertMessage)?;
        self.insert_message_row(message).await
    }
}

#[async_trait]
impl Realtime for MemoryBackend {
    async fn subscribe(&self, channel: &str, filter: InsertFilter) -> Result<ChangeStream> {
        self.pause().await;
        self.check(StoreOp::Subscribe)?;

        let (close_tx, close_rx) = oneshot::channel();
        if let Some(previous) = locked(&self.channels).insert(channel.to_string(), close_tx) {
            let _ = previous.send(());
        }
        debug!("Realtime channel {} opened on {}", channel, filter.table);

        let inserts = BroadcastStream::new(self.changes.subscribe()).filter_map(move |item| {
            let event = match item {
                Ok(insert) if filter.matches(insert.table, &insert.row) => {
                    Some(ChangeEvent::Insert(insert.row))
                }
                Ok(_) => None,
                Err(e) => {
                    warn!("Realtime subscriber fell behind: {}", e);
                    None
                }
            };
            future::ready(event)
        });

        let stream = stream::once(future::ready(ChangeEvent::Status(ChannelStatus::Subscribed)))
            .chain(inserts)
            .take_until(close_rx);

        Ok(Box::pin(stream))
    }

    fn remove_channel(&self, channel: &str) {
        if let Some(close) = locked(&self.channels).remove(channel) {
            let _ = close.send(());
            debug!("Realtime channel {} removed", channel);
        }
    }
}

#[async_trait]
impl ModerationGate for MemoryBackend {
    async fn review(&self, request: ModerationRequest) -> Result<ModerationVerdict> {
        self.pause().await;
        self.check(StoreOp::Moderate)?;

        let lowered = request.text.to_lowercase();
        let hit = locked(&self.blocked_terms)
            .iter()
            .find(|term| lowered.contains(term.as_str()))
            .cloned();

        let response = match hit {
            Some(term) => ModerationResponse {
                allowed: false,
                reason: Some(format!("message contains blocked term '{}'", term)),
                message: None,
            },
            None => {
                let row = self
                    .insert_message_row(NewMessage {
                        room_id: request.room_id,
                        sender_id: request.sender_id,
                        body: request.text,
                    })
                    .await?;
                ModerationResponse {
                    allowed: true,
                    reason: None,
                    message: Some(row),
                }
            }
        };

        ModerationVerdict::try_from(response)
    }
}
