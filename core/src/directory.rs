/// User directory: everyone the viewer can start a direct chat with
use crate::client::ChatClient;
use crate::error::Result;
use crate::model::{PrincipalId, Profile, UNKNOWN_LABEL};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub id: PrincipalId,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

impl From<Profile> for DirectoryEntry {
    fn from(p: Profile) -> Self {
        Self {
            id: p.id,
            display_name: p.display_name.unwrap_or_else(|| UNKNOWN_LABEL.to_string()),
            avatar_url: p.avatar_url,
        }
    }
}

/// Every profile except `viewer`, sorted by name (case-insensitive)
pub async fn list_directory(
    client: &ChatClient,
    viewer: &PrincipalId,
) -> Result<Vec<DirectoryEntry>> {
    let profiles = client.store().profiles_except(viewer).await?;
    let mut entries: Vec<DirectoryEntry> = profiles.into_iter().map(DirectoryEntry::from).collect();
    entries.sort_by(|a, b| {
        a.display_name
            .to_lowercase()
            .cmp(&b.display_name.to_lowercase())
            .then_with(|| a.id.cmp(&b.id))
    });
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::StoreOp;
    use crate::backend::Store;
    use crate::config::Config;

    #[tokio::test]
    async fn test_excludes_viewer_and_sorts() {
        let (client, backend) = ChatClient::in_memory(Config::default());
        let seeded = [
            ("u1", Some("zed")),
            ("u2", Some("Amy")),
            ("u3", None),
            ("me", Some("me")),
        ];
        for (id, name) in seeded {
            backend
                .upsert_profile(Profile {
                    id: PrincipalId::from(id),
                    display_name: name.map(str::to_string),
                    avatar_url: None,
                })
                .await
                .unwrap();
        }

        let entries = list_directory(&client, &PrincipalId::from("me")).await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.display_name.as_str()).collect();
        assert_eq!(names, vec!["Amy", "Unknown", "zed"]);
    }

    #[tokio::test]
    async fn test_failure_propagates() {
        let (client, backend) = ChatClient::in_memory(Config::default());
        backend.fail_on(StoreOp::ListProfiles);
        assert!(list_directory(&client, &PrincipalId::from("me")).await.is_err());
    }
}
