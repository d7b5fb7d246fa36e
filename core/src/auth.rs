/// Sign-in with sign-up fallback
use crate::backend::SignUpOutcome;
use crate::client::ChatClient;
use crate::error::{AuthError, ChatError, Result};
use crate::identity::IdentityResolver;
use crate::model::Principal;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthFlow {
    SignedIn(Principal),
    /// New account; its profile has been ensured
    SignedUp(Principal),
    /// New account waiting for email confirmation, no session yet
    ConfirmationPending,
}

impl AuthFlow {
    pub fn principal(&self) -> Option<&Principal> {
        match self {
            AuthFlow::SignedIn(p) | AuthFlow::SignedUp(p) => Some(p),
            AuthFlow::ConfirmationPending => None,
        }
    }
}

fn validate_credentials(email: &str, password: &str) -> Result<()> {
    if email.is_empty() || !email.contains('@') {
        return Err(ChatError::InvalidInput("a valid email is required".to_string()));
    }
    if password.is_empty() {
        return Err(ChatError::InvalidInput("password is required".to_string()));
    }
    Ok(())
}

/// Try to sign in; on invalid credentials, register instead.
/// Any other auth failure is returned to the caller.
pub async fn authenticate(client: &ChatClient, email: &str, password: &str) -> Result<AuthFlow> {
    let email = email.trim();
    validate_credentials(email, password)?;
    let auth = client.auth();

    match auth.sign_in(email, password).await {
        Ok(principal) => {
            info!("Signed in as {}", principal.id);
            return Ok(AuthFlow::SignedIn(principal));
        }
        Err(ChatError::Auth(AuthError::InvalidCredentials)) => {}
        Err(e) => return Err(e),
    }

    match auth.sign_up(email, password).await? {
        SignUpOutcome::Session(principal) => {
            info!("Registered {}", principal.id);
            IdentityResolver::new(client)
                .ensure_profile(&principal.id, principal.email.as_deref().or(Some(email)), None)
                .await;
            Ok(AuthFlow::SignedUp(principal))
        }
        SignUpOutcome::ConfirmationPending => {
            info!("Registration for {} awaits email confirmation", email);
            Ok(AuthFlow::ConfirmationPending)
        }
    }
}

pub async fn current_principal(client: &ChatClient) -> Result<Option<Principal>> {
    client.auth().current_principal().await
}

pub async fn sign_out(client: &ChatClient) -> Result<()> {
    client.auth().sign_out().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::backend::Store;
    use crate::config::Config;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_unknown_user_is_signed_up_with_profile() {
        let (client, backend) = ChatClient::in_memory(Config::default());

        let flow = authenticate(&client, " dana@example.com ", "secret").await.unwrap();
        let AuthFlow::SignedUp(principal) = flow else {
            panic!("expected sign-up, got {:?}", flow);
        };

        let profile = backend.profile(&principal.id).await.unwrap().unwrap();
        assert_eq!(profile.display_name.as_deref(), Some("dana"));
        assert_eq!(
            current_principal(&client).await.unwrap().map(|p| p.id),
            Some(principal.id)
        );
    }

    #[tokio::test]
    async fn test_returning_user_signs_in() {
        let (client, _backend) = ChatClient::in_memory(Config::default());
        authenticate(&client, "erin@example.com", "pw").await.unwrap();
        sign_out(&client).await.unwrap();

        let flow = authenticate(&client, "erin@example.com", "pw").await.unwrap();
        assert!(matches!(flow, AuthFlow::SignedIn(_)));
    }

    #[tokio::test]
    async fn test_wrong_password_for_existing_user_is_fatal() {
        let (client, _backend) = ChatClient::in_memory(Config::default());
        authenticate(&client, "finn@example.com", "right").await.unwrap();

        let err = authenticate(&client, "finn@example.com", "wrong").await.unwrap_err();
        assert!(matches!(err, ChatError::Auth(AuthError::AlreadyRegistered)));
    }

    #[tokio::test]
    async fn test_confirmation_pending() {
        let backend = Arc::new(MemoryBackend::new().require_email_confirmation());
        let client = ChatClient::new(
            Config::default(),
            backend.clone(),
            backend.clone(),
            backend.clone(),
        );

        let flow = authenticate(&client, "gus@example.com", "pw").await.unwrap();
        assert_eq!(flow, AuthFlow::ConfirmationPending);
        assert!(flow.principal().is_none());

        let err = authenticate(&client, "gus@example.com", "pw").await.unwrap_err();
        assert!(matches!(err, ChatError::Auth(AuthError::Provider(_))));

        assert!(backend.confirm_email("gus@example.com").await);
        let flow = authenticate(&client, "gus@example.com", "pw").await.unwrap();
        assert!(matches!(flow, AuthFlow::SignedIn(_)));
    }

    #[tokio::test]
    async fn test_rejects_malformed_email() {
        let (client, _backend) = ChatClient::in_memory(Config::default());
        assert!(matches!(
            authenticate(&client, "not-an-email", "pw").await,
            Err(ChatError::InvalidInput(_))
        ));
    }
}
