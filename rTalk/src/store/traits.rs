//! Message store trait definitions.

use async_trait::async_trait;

use crate::error::Result;
use crate::feed::{Subscription, SubscriptionId};
use crate::models::{Message, NewMessage, Profile, UserId};

/// Persistence backend holding the message table.
///
/// The insertion feed is global: subscribers receive every inserted row and
/// filter for themselves.
#[async_trait]
pub trait MessageStore: Send + Sync + std::fmt::Debug {
    /// All messages exchanged between `a` and `b`, in either direction,
    /// ascending by creation time.
    async fn query_messages(&self, a: &UserId, b: &UserId) -> Result<Vec<Message>>;

    /// All messages sent or received by `user`, newest first.
    async fn query_user_messages(&self, user: &UserId) -> Result<Vec<Message>>;

    /// Insert a message. The store assigns id and creation time.
    async fn insert_message(&self, message: NewMessage) -> Result<Message>;

    /// Register for insertion events.
    async fn subscribe_insertions(&self) -> Result<Subscription>;

    /// Cancel a registration. Returns `false` if it was already gone.
    async fn unsubscribe(&self, id: SubscriptionId) -> bool;

    /// Look up a participant's public profile.
    async fn fetch_profile(&self, _user: &UserId) -> Result<Option<Profile>> {
        Ok(None)
    }
}
