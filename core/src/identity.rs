/// Profile bootstrap for a signed-in principal
use crate::backend::Store;
use crate::client::ChatClient;
use crate::model::{PrincipalId, Profile};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Characters of the principal id kept in a derived display name
pub const ID_SLICE_LEN: usize = 8;

/// Local part of an email-like contact, else `prefix` + first 8 chars of the id
pub fn derive_display_name(
    prefix: &str,
    principal_id: &PrincipalId,
    contact: Option<&str>,
) -> String {
    if let Some(local) = contact.and_then(contact_local_part) {
        return local;
    }
    let slice: String = principal_id.as_str().chars().take(ID_SLICE_LEN).collect();
    format!("{}{}", prefix, slice)
}

fn contact_local_part(contact: &str) -> Option<String> {
    let local = contact.trim().split('@').next().unwrap_or("").trim();
    if local.is_empty() {
        None
    } else {
        Some(local.to_string())
    }
}

fn non_blank(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

#[derive(Clone)]
pub struct IdentityResolver {
    store: Arc<dyn Store>,
    name_prefix: String,
}

impl IdentityResolver {
    pub fn new(client: &ChatClient) -> Self {
        Self {
            store: client.store(),
            name_prefix: client.config().fallback_name_prefix.clone(),
        }
    }

    /// Make sure a profile row exists for `principal_id`.
    ///
    /// Name precedence: `display_name`, then the contact's local part, then the
    /// name already stored, then the derived `prefix + id[..8]`. Failures are
    /// logged and yield `None`; callers render "Unknown" in that case.
    pub async fn ensure_profile(
        &self,
        principal_id: &PrincipalId,
        fallback_contact: Option<&str>,
        display_name: Option<&str>,
    ) -> Option<Profile> {
        let existing = match self.store.profile(principal_id).await {
            Ok(existing) => existing,
            Err(e) => {
                warn!("Profile lookup for {} failed, upserting blind: {}", principal_id, e);
                None
            }
        };

        let name = non_blank(display_name)
            .or_else(|| fallback_contact.and_then(contact_local_part))
            .or_else(|| existing.as_ref().and_then(|p| p.display_name.clone()))
            .unwrap_or_else(|| derive_display_name(&self.name_prefix, principal_id, None));

        let profile = Profile {
            id: principal_id.clone(),
            display_name: Some(name),
            avatar_url: existing.as_ref().and_then(|p| p.avatar_url.clone()),
        };

        if existing.as_ref() == Some(&profile) {
            debug!("Profile for {} already up to date", principal_id);
            return existing;
        }

        match self.store.upsert_profile(profile).await {
            Ok(saved) => {
                debug!("Upserted profile for {}", principal_id);
                Some(saved)
            }
            Err(e) => {
                error!("Failed to upsert profile for {}: {}", principal_id, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{MemoryBackend, StoreOp};
    use crate::config::Config;

    fn resolver() -> (IdentityResolver, MemoryBackend) {
        let (client, backend) = ChatClient::in_memory(Config::default());
        (IdentityResolver::new(&client), backend)
    }

    #[test]
    fn test_derive_from_contact() {
        let id = PrincipalId::from("9c0a7f4e-1111-2222");
        assert_eq!(derive_display_name("user-", &id, Some("alice@example.com")), "alice");
        assert_eq!(derive_display_name("user-", &id, Some("@example.com")), "user-9c0a7f4e");
        assert_eq!(derive_display_name("user-", &id, None), "user-9c0a7f4e");
    }

    #[test]
    fn test_derive_short_id() {
        assert_eq!(derive_display_name("user-", &PrincipalId::from("u1"), None), "user-u1");
    }

    #[tokio::test]
    async fn test_new_principal_gets_derived_name() {
        let (resolver, backend) = resolver();
        let profile = resolver
            .ensure_profile(&PrincipalId::from("u1"), None, None)
            .await
            .unwrap();

        assert_eq!(profile.display_name.as_deref(), Some("user-u1"));
        assert_eq!(backend.profile_count().await, 1);
    }

    #[tokio::test]
    async fn test_second_call_keeps_name_and_row() {
        let (resolver, backend) = resolver();
        let id = PrincipalId::from("8d3e59aa-0000-4000-8000-000000000001");

        let first = resolver
            .ensure_profile(&id, Some("bob@example.com"), None)
            .await
            .unwrap();
        let second = resolver.ensure_profile(&id, None, None).await.unwrap();

        assert_eq!(first.display_name.as_deref(), Some("bob"));
        assert_eq!(second.display_name, first.display_name);
        assert_eq!(backend.profile_count().await, 1);
    }

    #[tokio::test]
    async fn test_explicit_name_wins() {
        let (resolver, _backend) = resolver();
        let profile = resolver
            .ensure_profile(&PrincipalId::from("u2"), Some("carol@example.com"), Some("  Carol  "))
            .await
            .unwrap();
        assert_eq!(profile.display_name.as_deref(), Some("Carol"));
    }

    #[tokio::test]
    async fn test_upsert_failure_is_contained() {
        let (resolver, backend) = resolver();
        backend.fail_on(StoreOp::UpsertProfile);

        let profile = resolver.ensure_profile(&PrincipalId::from("u3"), None, None).await;
        assert!(profile.is_none());
        assert_eq!(backend.profile_count().await, 0);
    }
}
