//! Conversation list models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::UserId;

/// One row of the current user's conversation list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    /// The other participant's user ID.
    pub other_user_id: UserId,
    /// The other participant's display name, when resolved.
    pub other_user_name: Option<String>,
    /// Content of the newest message.
    pub last_message: String,
    /// Time of the newest message.
    pub last_message_at: DateTime<Utc>,
    /// Unread messages addressed to the current user.
    pub unread_count: usize,
}

impl ConversationSummary {
    /// Whether any message is unread.
    pub fn has_unread(&self) -> bool {
        self.unread_count > 0
    }
}
