/// Idempotent room membership
use crate::backend::Store;
use crate::client::ChatClient;
use crate::model::{MemberRole, Membership, PrincipalId, RoomId};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipStatus {
    Created,
    /// Row already present, or a concurrent caller inserted it first
    AlreadyMember,
    /// Lookup or insert failed; chat proceeds without confirmation
    Unconfirmed,
}

#[derive(Clone)]
pub struct MembershipGuarantor {
    store: Arc<dyn Store>,
}

impl MembershipGuarantor {
    pub fn new(client: &ChatClient) -> Self {
        Self {
            store: client.store(),
        }
    }

    /// Best effort: never returns an error
    pub async fn ensure_member(
        &self,
        room_id: &RoomId,
        participant_id: &PrincipalId,
        role: MemberRole,
    ) -> MembershipStatus {
        match self.store.membership(room_id, participant_id).await {
            Ok(Some(_)) => return MembershipStatus::AlreadyMember,
            Ok(None) => {}
            Err(e) => {
                warn!(
                    "Membership lookup for {} in room {} failed: {}",
                    participant_id, room_id, e
                );
                return MembershipStatus::Unconfirmed;
            }
        }

        let membership = Membership {
            room_id: *room_id,
            participant_id: participant_id.clone(),
            role,
        };
        match self.store.insert_membership(membership).await {
            Ok(_) => {
                debug!("Added {} to room {} as {:?}", participant_id, room_id, role);
                MembershipStatus::Created
            }
            Err(e) if e.is_conflict() => {
                debug!("{} joined room {} concurrently", participant_id, room_id);
                MembershipStatus::AlreadyMember
            }
            Err(e) => {
                warn!("Failed to add {} to room {}: {}", participant_id, room_id, e);
                MembershipStatus::Unconfirmed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{MemoryBackend, StoreOp};
    use crate::config::Config;
    use crate::model::{NewRoom, Room};
    use std::time::Duration;

    async fn room_in(backend: &MemoryBackend) -> Room {
        backend
            .insert_room(NewRoom {
                display_name: "general".to_string(),
                is_direct: false,
                creator_id: PrincipalId::from("u1"),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_second_call_is_noop() {
        let (client, backend) = ChatClient::in_memory(Config::default());
        let guarantor = MembershipGuarantor::new(&client);
        let room = room_in(&backend).await;
        let u1 = PrincipalId::from("u1");

        let first = guarantor.ensure_member(&room.id, &u1, MemberRole::Member).await;
        let second = guarantor.ensure_member(&room.id, &u1, MemberRole::Member).await;

        assert_eq!(first, MembershipStatus::Created);
        assert_eq!(second, MembershipStatus::AlreadyMember);
        assert_eq!(backend.membership_count(&room.id).await, 1);
    }

    #[tokio::test]
    async fn test_racing_inserts_swallow_conflict() {
        let backend = MemoryBackend::new().with_latency(Duration::from_millis(5));
        let shared = Arc::new(backend.clone());
        let client = ChatClient::new(Config::default(), shared.clone(), shared.clone(), shared);
        let room = room_in(&backend).await;
        let u2 = PrincipalId::from("u2");

        let a = MembershipGuarantor::new(&client);
        let b = MembershipGuarantor::new(&client);
        let (ra, rb) = tokio::join!(
            a.ensure_member(&room.id, &u2, MemberRole::Member),
            b.ensure_member(&room.id, &u2, MemberRole::Member),
        );

        let mut outcomes = vec![ra, rb];
        outcomes.sort_by_key(|s| *s != MembershipStatus::Created);
        assert_eq!(
            outcomes,
            vec![MembershipStatus::Created, MembershipStatus::AlreadyMember]
        );
        assert_eq!(backend.membership_count(&room.id).await, 1);
    }

    #[tokio::test]
    async fn test_backend_failure_is_unconfirmed() {
        let (client, backend) = ChatClient::in_memory(Config::default());
        let room = room_in(&backend).await;
        backend.fail_on(StoreOp::InsertMembership);

        let status = MembershipGuarantor::new(&client)
            .ensure_member(&room.id, &PrincipalId::from("u1"), MemberRole::Owner)
            .await;
        assert_eq!(status, MembershipStatus::Unconfirmed);
        assert_eq!(backend.membership_count(&room.id).await, 0);
    }
}
