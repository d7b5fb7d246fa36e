/// Message synchronization: history, live inserts, optimistic sends
pub mod session;
pub mod synchronizer;
pub mod timeline;

pub use session::{ChatSession, RoomTarget, SessionEvent};
pub use synchronizer::{message_view, MessageSync, SendOutcome, Subscription};
pub use timeline::{MergeOutcome, Timeline};
