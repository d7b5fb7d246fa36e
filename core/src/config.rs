/// Configuration management
use crate::error::{ChatError, Result};
use crate::rooms::KEY_SEPARATOR;
use serde::{Deserialize, Serialize};

const DEFAULT_HISTORY_LIMIT: usize = 50;
const MAX_HISTORY_LIMIT: usize = 500;

/// Client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of most recent messages loaded when a room opens
    pub history_limit: usize,

    /// Name of the shared multi-party room
    pub lobby_room: String,

    /// Prefix for display names derived from a principal id
    pub fallback_name_prefix: String,

    /// Route outgoing messages through the moderation gate
    pub moderation_enabled: bool,

    /// Buffer size of in-process realtime channels
    pub realtime_capacity: usize,

    /// Default tracing filter (RUST_LOG takes precedence)
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
            lobby_room: "general".to_string(),
            fallback_name_prefix: "user-".to_string(),
            moderation_enabled: false,
            realtime_capacity: 100,
            log_filter: "info".to_string(),
        }
    }
}

impl Config {
    /// Defaults with `PARLEY_*` environment overrides applied
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("PARLEY_HISTORY_LIMIT") {
            config.history_limit = raw.parse::<usize>().map_err(|_| {
                ChatError::Config("PARLEY_HISTORY_LIMIT must be a positive number".to_string())
            })?;
        }
        if let Ok(name) = std::env::var("PARLEY_LOBBY_ROOM") {
            config.lobby_room = name;
        }
        if let Ok(prefix) = std::env::var("PARLEY_NAME_PREFIX") {
            config.fallback_name_prefix = prefix;
        }
        if let Ok(raw) = std::env::var("PARLEY_MODERATION") {
            config.moderation_enabled = parse_flag(&raw).ok_or_else(|| {
                ChatError::Config(format!("PARLEY_MODERATION: expected a boolean, got '{}'", raw))
            })?;
        }
        if let Ok(filter) = std::env::var("PARLEY_LOG") {
            config.log_filter = filter;
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a (possibly partial) JSON document on top of the defaults
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(raw)
            .map_err(|e| ChatError::Config(format!("Invalid config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.history_limit == 0 || self.history_limit > MAX_HISTORY_LIMIT {
            return Err(ChatError::Config(format!(
                "history_limit must be between 1 and {}",
                MAX_HISTORY_LIMIT
            )));
        }
        if self.lobby_room.trim().is_empty() {
            return Err(ChatError::Config("lobby_room must not be empty".to_string()));
        }
        if self.lobby_room.contains(KEY_SEPARATOR) {
            return Err(ChatError::Config(format!(
                "lobby_room must not contain '{}'",
                KEY_SEPARATOR
            )));
        }
        if self.fallback_name_prefix.contains(KEY_SEPARATOR) {
            return Err(ChatError::Config(format!(
                "fallback_name_prefix must not contain '{}'",
                KEY_SEPARATOR
            )));
        }
        if self.realtime_capacity == 0 {
            return Err(ChatError::Config("realtime_capacity must be at least 1".to_string()));
        }
        Ok(())
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
