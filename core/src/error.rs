/// Error types for the chat core
use thiserror::Error;

/// Failures reported by the auth capability
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid login credentials")]
    InvalidCredentials,

    #[error("User already registered")]
    AlreadyRegistered,

    #[error("Auth provider error: {0}")]
    Provider(String),
}

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Backend error: {0}")]
    Backend(String),

    /// Unique-constraint violation reported by the store
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("Invalid principal id: {0}")]
    InvalidPrincipal(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Subscription error: {0}")]
    Subscription(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ChatError {
    /// True for duplicate-key failures, which callers treat as "someone else got there first"
    pub fn is_conflict(&self) -> bool {
        matches!(self, ChatError::Conflict(_))
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
