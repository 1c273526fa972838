//! Ordered, de-duplicated message list of one conversation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;

use crate::models::{ClientToken, Message, MessageId, ParticipantPair, UserId};

/// Delivery state of a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Sent locally, not yet acknowledged by the store.
    Pending,
    /// Acknowledged by the store, not yet seen on the feed.
    Sent,
    /// Loaded from history or received from the feed.
    Delivered,
}

/// One row of the transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    pub message: Message,
    pub status: DeliveryStatus,
    #[serde(skip)]
    token: Option<ClientToken>,
}

impl Entry {
    fn delivered(message: Message) -> Self {
        Self {
            message,
            status: DeliveryStatus::Delivered,
            token: None,
        }
    }

    /// Check if the entry is still waiting for the store.
    pub fn is_pending(&self) -> bool {
        self.status == DeliveryStatus::Pending
    }
}

/// Outcome of offering a live event to the transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Appended at the end.
    Appended,
    /// Replaced a pending local entry in place.
    Confirmed,
    /// Id already present.
    Duplicate,
    /// Belongs to another conversation.
    Foreign,
}

/// Transcript state. Pure data; callers serialize access.
#[derive(Debug, Clone)]
pub struct Transcript {
    pair: ParticipantPair,
    entries: Vec<Entry>,
    ids: HashSet<MessageId>,
}

impl Transcript {
    /// Create an empty transcript for a conversation.
    pub fn new(pair: ParticipantPair) -> Self {
        Self {
            pair,
            entries: Vec::new(),
            ids: HashSet::new(),
        }
    }

    /// The conversation this transcript belongs to.
    pub fn pair(&self) -> &ParticipantPair {
        &self.pair
    }

    /// All entries, including pending sends.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Stored messages in display order.
    pub fn messages(&self) -> Vec<Message> {
        self.entries
            .iter()
            .filter(|e| !e.is_pending())
            .map(|e| e.message.clone())
            .collect()
    }

    /// Number of entries, including pending sends.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merge a historical batch. Returns the number of entries added.
    ///
    /// Each new message lands right after the last entry with the same or an
    /// earlier `created_at`, so a batch sorted ascending keeps its order and
    /// ties keep arrival order. Live appends may leave the entries unsorted;
    /// the scan does not assume otherwise.
    pub fn merge_history(&mut self, batch: impl IntoIterator<Item = Message>) -> usize {
        let mut added = 0;
        for message in batch {
            if !self.pair.admits(&message) || self.ids.contains(&message.id) {
                continue;
            }
            if self.confirm_pending(&message) {
                continue;
            }

            let at = self
                .entries
                .iter()
                .rposition(|e| e.message.created_at <= message.created_at)
                .map_or(0, |i| i + 1);
            self.ids.insert(message.id.clone());
            self.entries.insert(at, Entry::delivered(message));
            added += 1;
        }
        added
    }

    /// Offer a live event.
    pub fn admit(&mut self, message: Message) -> Admission {
        if !self.pair.admits(&message) {
            return Admission::Foreign;
        }
        if self.ids.contains(&message.id) {
            self.promote(&message.id);
            return Admission::Duplicate;
        }
        if self.confirm_pending(&message) {
            return Admission::Confirmed;
        }

        self.ids.insert(message.id.clone());
        self.entries.push(Entry::delivered(message));
        Admission::Appended
    }

    /// Append a local placeholder for a send in flight.
    pub fn push_pending(
        &mut self,
        token: ClientToken,
        sender_id: UserId,
        receiver_id: UserId,
        content: String,
        now: DateTime<Utc>,
    ) -> Message {
        let message = Message {
            id: MessageId::provisional(&token),
            sender_id,
            receiver_id,
            content,
            created_at: now,
            is_read: false,
            client_token: Some(token.clone()),
        };
        self.entries.push(Entry {
            message: message.clone(),
            status: DeliveryStatus::Pending,
            token: Some(token),
        });
        message
    }

    /// Apply the store's answer to a send.
    ///
    /// Returns `true` if the placeholder was replaced, `false` if the feed had
    /// already delivered the stored row (the placeholder is then dropped).
    pub fn acknowledge(&mut self, token: &ClientToken, stored: Message) -> bool {
        let Some(index) = self.pending_index(token) else {
            return false;
        };

        if self.ids.contains(&stored.id) {
            self.entries.remove(index);
            return false;
        }

        self.ids.insert(stored.id.clone());
        let entry = &mut self.entries[index];
        entry.message = stored;
        entry.status = DeliveryStatus::Sent;
        entry.token = None;
        true
    }

    /// Drop the placeholder of a failed send.
    pub fn reject(&mut self, token: &ClientToken) -> bool {
        match self.pending_index(token) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    fn pending_index(&self, token: &ClientToken) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.is_pending() && e.token.as_ref() == Some(token))
    }

    fn confirm_pending(&mut self, message: &Message) -> bool {
        let Some(token) = message.client_token.as_ref() else {
            return false;
        };
        let Some(index) = self.pending_index(token) else {
            return false;
        };

        self.ids.insert(message.id.clone());
        let entry = &mut self.entries[index];
        entry.message = message.clone();
        entry.status = DeliveryStatus::Delivered;
        entry.token = None;
        true
    }

    /// A row acknowledged by the store and now seen on the feed.
    fn promote(&mut self, id: &MessageId) {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.status == DeliveryStatus::Sent && &e.message.id == id)
        {
            entry.status = DeliveryStatus::Delivered;
        }
    }
}
