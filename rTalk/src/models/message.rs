//! Message models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ClientToken, MessageId, UserId};

/// A stored message between two participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Message ID, assigned by the store.
    pub id: MessageId,
    /// Sender user ID.
    pub sender_id: UserId,
    /// Receiver user ID.
    pub receiver_id: UserId,
    /// Message text.
    pub content: String,
    /// Creation time, assigned by the store.
    pub created_at: DateTime<Utc>,
    /// Whether the receiver has read the message.
    #[serde(default)]
    pub is_read: bool,
    /// Correlation token echoed from the sending client, if the store keeps it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_token: Option<ClientToken>,
}

impl Message {
    /// The unordered participant pair of this message.
    pub fn pair(&self) -> ParticipantPair {
        ParticipantPair::new(self.sender_id.clone(), self.receiver_id.clone())
    }

    /// Check if the message was sent by `user`.
    pub fn is_from(&self, user: &UserId) -> bool {
        &self.sender_id == user
    }

    /// The participant on the other side from `me`, if `me` takes part.
    pub fn counterpart(&self, me: &UserId) -> Option<&UserId> {
        if &self.sender_id == me {
            Some(&self.receiver_id)
        } else if &self.receiver_id == me {
            Some(&self.sender_id)
        } else {
            None
        }
    }
}

/// Payload for inserting a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_token: Option<ClientToken>,
}

impl NewMessage {
    /// Create an insert payload; content is trimmed.
    pub fn new(
        sender_id: impl Into<UserId>,
        receiver_id: impl Into<UserId>,
        content: impl AsRef<str>,
    ) -> Self {
        Self {
            sender_id: sender_id.into(),
            receiver_id: receiver_id.into(),
            content: content.as_ref().trim().to_owned(),
            client_token: None,
        }
    }

    /// Attach a correlation token.
    pub fn with_token(mut self, token: ClientToken) -> Self {
        self.client_token = Some(token);
        self
    }

    /// Check that content and both participants are present.
    pub fn is_valid(&self) -> bool {
        !self.content.trim().is_empty() && !self.sender_id.is_empty() && !self.receiver_id.is_empty()
    }
}

/// An unordered pair of participants identifying a conversation.
///
/// `{a, b}` and `{b, a}` compare equal; the pair is stored sorted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParticipantPair {
    low: UserId,
    high: UserId,
}

impl ParticipantPair {
    /// Create a pair from two participants in any order.
    pub fn new(a: UserId, b: UserId) -> Self {
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    /// Check if a message belongs to this conversation.
    pub fn admits(&self, message: &Message) -> bool {
        let (a, b) = (&message.sender_id, &message.receiver_id);
        (a == &self.low && b == &self.high) || (a == &self.high && b == &self.low)
    }
}
