/// The rendered message list: one entry per key, sorted by `created_at`
use crate::model::{LocalMessageView, MessageKey, PrincipalId, SELF_LABEL};
use chrono::Utc;
use std::collections::HashSet;
use uuid::Uuid;

/// What `Timeline::merge` did with a row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    /// The row replaced this optimistic entry
    Reconciled { pending: MessageKey },
    /// Key already present; nothing changed
    Duplicate,
}

#[derive(Debug, Clone, Default)]
pub struct Timeline {
    entries: Vec<LocalMessageView>,
    keys: HashSet<MessageKey>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a loaded history window; returns how many entries were new
    pub fn apply_history<I>(&mut self, views: I) -> usize
    where
        I: IntoIterator<Item = LocalMessageView>,
    {
        views
            .into_iter()
            .map(|v| self.merge(v))
            .filter(|outcome| *outcome != MergeOutcome::Duplicate)
            .count()
    }

    /// Insert unless an entry with the same key is already present.
    /// A confirmed row takes the place of the oldest pending entry with the
    /// same sender and text, so an echo of our own send never shows twice.
    pub fn merge(&mut self, view: LocalMessageView) -> MergeOutcome {
        if self.keys.contains(&view.key) {
            return MergeOutcome::Duplicate;
        }
        let replaced = if view.key.is_pending() {
            None
        } else {
            self.take_matching_pending(&view)
        };
        self.insert(view);
        match replaced {
            Some(pending) => MergeOutcome::Reconciled { pending },
            None => MergeOutcome::Inserted,
        }
    }

    /// Late arrivals are placed by `created_at`; equal timestamps keep arrival order.
    fn insert(&mut self, view: LocalMessageView) -> bool {
        if !self.keys.insert(view.key) {
            return false;
        }
        let at = self
            .entries
            .partition_point(|e| e.created_at <= view.created_at);
        self.entries.insert(at, view);
        true
    }

    fn take_matching_pending(&mut self, view: &LocalMessageView) -> Option<MessageKey> {
        let key = self
            .entries
            .iter()
            .filter(|e| e.key.is_pending())
            .find(|e| {
                e.sender_id.is_some() && e.sender_id == view.sender_id && e.text == view.text
            })
            .map(|e| e.key)?;
        self.remove(&key);
        Some(key)
    }

    /// Show a message before the server has confirmed it
    pub fn push_pending(&mut self, sender_id: &PrincipalId, text: &str) -> MessageKey {
        let key = MessageKey::Pending(Uuid::new_v4());
        self.insert(LocalMessageView {
            key,
            sender_id: Some(sender_id.clone()),
            display_sender: SELF_LABEL.to_string(),
            text: text.to_string(),
            created_at: Utc::now(),
        });
        key
    }

    /// Replace a pending entry with its persisted row. If the subscription
    /// already reconciled `pending` (possibly against another row with the
    /// same text) the row goes through `merge` so it can settle the next
    /// outstanding entry instead. Returns whether the row was newly inserted.
    pub fn confirm(&mut self, pending: MessageKey, confirmed: LocalMessageView) -> bool {
        if self.remove(&pending) {
            self.insert(confirmed)
        } else {
            self.merge(confirmed) != MergeOutcome::Duplicate
        }
    }

    /// Drop a pending entry whose send failed or was blocked
    pub fn discard(&mut self, pending: MessageKey) -> bool {
        self.remove(&pending)
    }

    fn remove(&mut self, key: &MessageKey) -> bool {
        if !self.keys.remove(key) {
            return false;
        }
        self.entries.retain(|e| &e.key != key);
        true
    }

    pub fn contains(&self, key: &MessageKey) -> bool {
        self.keys.contains(key)
    }

    pub fn messages(&self) -> &[LocalMessageView] {
        &self.entries
    }

    pub fn pending_count(&self) -> usize {
        self.keys.iter().filter(|k| k.is_pending()).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
