//! Inbox API.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::{
    client::ChatClientInner,
    error::Result,
    models::{ConversationSummary, Message, UserId},
};

/// API for the current user's conversation list.
pub struct InboxApi {
    client: Arc<ChatClientInner>,
}

impl InboxApi {
    pub(crate) fn new(client: Arc<ChatClientInner>) -> Self {
        Self { client }
    }

    /// List conversations, newest first.
    pub fn list(&self) -> InboxBuilder {
        InboxBuilder {
            client: self.client.clone(),
            resolve_names: true,
        }
    }
}

/// Builder for inbox requests.
pub struct InboxBuilder {
    client: Arc<ChatClientInner>,
    resolve_names: bool,
}

impl InboxBuilder {
    /// Look up each counterpart's display name. Enabled by default.
    pub fn resolve_names(mut self, resolve: bool) -> Self {
        self.resolve_names = resolve;
        self
    }

    /// Execute the request.
    pub async fn send(self) -> Result<InboxResult> {
        let me = self.client.require_user().await?;
        let rows = self.client.store.query_user_messages(&me).await?;
        let mut conversations = summarize(&me, &rows);

        if self.resolve_names {
            for summary in &mut conversations {
                match self.client.store.fetch_profile(&summary.other_user_id).await {
                    Ok(profile) => {
                        summary.other_user_name = profile.map(|p| p.display_name().to_owned());
                    }
                    Err(e) => {
                        log::debug!("profile lookup for {} failed: {}", summary.other_user_id, e);
                    }
                }
            }
        }

        let unread_total = conversations.iter().map(|c| c.unread_count).sum();
        Ok(InboxResult {
            user_id: me,
            conversations,
            unread_total,
        })
    }
}

/// Result of an inbox request.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InboxResult {
    /// The user the inbox belongs to.
    pub user_id: UserId,
    /// One row per counterpart, newest first.
    pub conversations: Vec<ConversationSummary>,
    /// Sum of unread counts.
    pub unread_total: usize,
}

/// Group a user's messages by counterpart.
///
/// Keeps the newest message of each conversation and counts unread messages
/// addressed to `me`. Rows may come in any order; the result is newest first.
pub fn summarize(me: &UserId, rows: &[Message]) -> Vec<ConversationSummary> {
    let mut by_peer: HashMap<&UserId, ConversationSummary> = HashMap::new();

    for message in rows {
        let Some(peer) = message.counterpart(me) else {
            continue;
        };
        let unread = usize::from(&message.receiver_id == me && !message.is_read);

        by_peer
            .entry(peer)
            .and_modify(|summary| {
                summary.unread_count += unread;
                if message.created_at > summary.last_message_at {
                    summary.last_message = message.content.clone();
                    summary.last_message_at = message.created_at;
                }
            })
            .or_insert_with(|| ConversationSummary {
                other_user_id: peer.clone(),
                other_user_name: None,
                last_message: message.content.clone(),
                last_message_at: message.created_at,
                unread_count: unread,
            });
    }

    let mut summaries: Vec<ConversationSummary> = by_peer.into_values().collect();
    summaries.sort_by(|a, b| {
        b.last_message_at
            .cmp(&a.last_message_at)
            .then_with(|| a.other_user_id.cmp(&b.other_user_id))
    });
    summaries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::Error,
        models::{MessageId, Profile},
        store::{testing::ScriptedStore, MemoryStore},
        ChatClient,
    };
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn row(id: i64, sender: &str, receiver: &str, minute: u32, is_read: bool) -> Message {
        Message {
            id: MessageId::from(id),
            sender_id: sender.into(),
            receiver_id: receiver.into(),
            content: format!("m{}", id),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 10, minute, 0).unwrap(),
            is_read,
            client_token: None,
        }
    }

    fn history() -> Vec<Message> {
        vec![
            row(1, "u2", "u1", 1, true),
            row(2, "u2", "u1", 2, false),
            row(3, "u1", "u2", 3, false),
            row(4, "u3", "u1", 4, false),
            row(5, "u3", "u1", 5, false),
            row(6, "u2", "u3", 6, false),
        ]
    }

    #[test]
    fn test_summarize_groups_by_counterpart() {
        let me = UserId::from("u1");
        let summaries = summarize(&me, &history());

        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].other_user_id, UserId::from("u3"));
        assert_eq!(summaries[0].last_message, "m5");
        assert_eq!(summaries[0].unread_count, 2);

        assert_eq!(summaries[1].other_user_id, UserId::from("u2"));
        assert_eq!(summaries[1].last_message, "m3");
        // Own messages never count as unread.
        assert_eq!(summaries[1].unread_count, 1);
    }

    #[test]
    fn test_summarize_empty() {
        assert!(summarize(&UserId::from("u1"), &[]).is_empty());
    }

    #[tokio::test]
    async fn test_inbox_resolves_names() {
        let store = MemoryStore::with_messages(history());
        store.upsert_profile(Profile::new("u2", "Alice"));
        let client = ChatClient::builder()
            .store(Arc::new(store))
            .user("u1")
            .build()
            .unwrap();

        let inbox = client.inbox().list().send().await.unwrap();
        assert_eq!(inbox.user_id, UserId::from("u1"));
        assert_eq!(inbox.unread_total, 3);
        assert_eq!(inbox.conversations[0].other_user_name, None);
        assert_eq!(inbox.conversations[1].other_user_name.as_deref(), Some("Alice"));

        let plain = client.inbox().list().resolve_names(false).send().await.unwrap();
        assert!(plain.conversations.iter().all(|c| c.other_user_name.is_none()));
    }

    #[tokio::test]
    async fn test_inbox_requires_identity() {
        let client = ChatClient::builder()
            .store(Arc::new(MemoryStore::new()))
            .build()
            .unwrap();

        let err = client.inbox().list().send().await.unwrap_err();
        assert!(matches!(err, Error::IdentityRequired));
    }

    #[tokio::test]
    async fn test_inbox_propagates_store_errors() {
        let scripted = ScriptedStore::new(MemoryStore::with_messages(history()));
        ScriptedStore::set(&scripted.fail_queries, true);
        let client = ChatClient::builder()
            .store(Arc::new(scripted))
            .user("u1")
            .build()
            .unwrap();

        let err = client.inbox().list().send().await.unwrap_err();
        assert!(matches!(err, Error::Store(_)));
    }
}
