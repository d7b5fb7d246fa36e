/// Parley - chat client core
///
/// Room resolution and real-time message synchronization on top of a hosted
/// backend reached through capability traits (auth, relational store,
/// realtime inserts, moderation).

pub mod auth;
pub mod backend;
pub mod client;
pub mod config;
pub mod directory;
pub mod error;
pub mod identity;
pub mod logging;
pub mod membership;
pub mod model;
pub mod rooms;
pub mod sync;

pub use client::ChatClient;
pub use config::Config;
pub use error::{AuthError, ChatError, Result};
pub use sync::{ChatSession, RoomTarget, SendOutcome};
