/// Room resolution: well-known rooms by name, direct rooms by participant pair
use crate::backend::Store;
use crate::client::ChatClient;
use crate::error::{ChatError, Result};
use crate::membership::MembershipGuarantor;
use crate::model::{MemberRole, NewRoom, PrincipalId, Room, RoomId, RoomQuery};
use std::sync::Arc;
use tracing::{debug, info};

/// Joins the two ids of a direct-room key; never valid inside an id
pub const KEY_SEPARATOR: char = ':';

/// Order-independent key for a participant pair: `min:max`
pub fn canonical_key(a: &PrincipalId, b: &PrincipalId) -> Result<String> {
    validate_principal(a)?;
    validate_principal(b)?;
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    Ok(format!("{}{}{}", lo, KEY_SEPARATOR, hi))
}

fn validate_principal(id: &PrincipalId) -> Result<()> {
    if id.as_str().is_empty() {
        return Err(ChatError::InvalidPrincipal("empty id".to_string()));
    }
    if id.as_str().contains(KEY_SEPARATOR) {
        return Err(ChatError::InvalidPrincipal(format!(
            "'{}' contains '{}'",
            id, KEY_SEPARATOR
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct RoomResolver {
    store: Arc<dyn Store>,
    members: MembershipGuarantor,
}

impl RoomResolver {
    pub fn new(client: &ChatClient) -> Self {
        Self {
            store: client.store(),
            members: MembershipGuarantor::new(client),
        }
    }

    /// Find or create the shared room called `name` and make `creator_id` a member.
    pub async fn get_or_create_named_room(
        &self,
        name: &str,
        creator_id: &PrincipalId,
    ) -> Result<RoomId> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ChatError::InvalidInput("room name is empty".to_string()));
        }
        if name.contains(KEY_SEPARATOR) {
            return Err(ChatError::InvalidInput(format!(
                "room name '{}' contains '{}'",
                name, KEY_SEPARATOR
            )));
        }

        let query = RoomQuery::named(name);
        let (room, created) = self
            .find_or_insert(
                &query,
                NewRoom {
                    display_name: name.to_string(),
                    is_direct: false,
                    creator_id: creator_id.clone(),
                },
            )
            .await?;

        let role = if created { MemberRole::Owner } else { MemberRole::Member };
        self.members.ensure_member(&room.id, creator_id, role).await;
        Ok(room.id)
    }

    /// Find or create the direct room for `{a, b}`; argument order does not matter.
    pub async fn get_or_create_direct_room(
        &self,
        a_id: &PrincipalId,
        b_id: &PrincipalId,
    ) -> Result<RoomId> {
        if a_id == b_id {
            return Err(ChatError::InvalidInput(format!(
                "direct room needs two distinct participants, got {} twice",
                a_id
            )));
        }
        let key = canonical_key(a_id, b_id)?;

        let (room, created) = self
            .find_or_insert(
                &RoomQuery::direct(&key),
                NewRoom {
                    display_name: key.clone(),
                    is_direct: true,
                    creator_id: a_id.clone(),
                },
            )
            .await?;

        for participant in [a_id, b_id] {
            let role = if created && participant == &room.creator_id {
                MemberRole::Owner
            } else {
                MemberRole::Member
            };
            self.members.ensure_member(&room.id, participant, role).await;
        }
        Ok(room.id)
    }

    /// Lookup, then insert on miss. A unique-key conflict on insert means
    /// another client created the room in between; its row is re-read.
    async fn find_or_insert(&self, query: &RoomQuery, new: NewRoom) -> Result<(Room, bool)> {
        if let Some(room) = self.store.find_room(query).await? {
            debug!("Resolved room {} for '{}'", room.id, query.display_name);
            return Ok((room, false));
        }

        match self.store.insert_room(new).await {
            Ok(room) => {
                info!("Created room {} for '{}'", room.id, room.display_name);
                Ok((room, true))
            }
            Err(e) if e.is_conflict() => {
                debug!("Room '{}' created concurrently, re-reading", query.display_name);
                let room = self.store.find_room(query).await?.ok_or_else(|| {
                    ChatError::Backend(format!(
                        "room '{}' conflicted on insert but cannot be read back",
                        query.display_name
                    ))
                })?;
                Ok((room, false))
            }
            Err(e) => Err(e),
        }
    }
}
