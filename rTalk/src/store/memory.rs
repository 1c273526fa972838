//! In-memory message store.

use async_trait::async_trait;
use chrono::Utc;
use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use super::traits::MessageStore;
use crate::{
    error::{Error, Result},
    feed::{Broker, Subscription, SubscriptionId},
    models::{Message, MessageId, NewMessage, Profile, UserId},
};

/// In-memory store with an in-process insertion feed.
#[derive(Debug, Default)]
pub struct MemoryStore {
    messages: RwLock<Vec<Message>>,
    profiles: RwLock<HashMap<UserId, Profile>>,
    broker: Broker,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with existing rows.
    pub fn with_messages(messages: impl IntoIterator<Item = Message>) -> Self {
        let store = Self::new();
        store.seed(messages);
        store
    }

    /// Use a broker with a specific per-subscriber capacity.
    pub fn with_feed_capacity(mut self, capacity: usize) -> Self {
        self.broker = Broker::new(capacity);
        self
    }

    /// Add rows without publishing them on the feed.
    pub fn seed(&self, messages: impl IntoIterator<Item = Message>) {
        let mut data = self.messages.write().unwrap_or_else(PoisonError::into_inner);
        data.extend(messages);
    }

    /// Add or replace a profile.
    pub fn upsert_profile(&self, profile: Profile) {
        let mut profiles = self.profiles.write().unwrap_or_else(PoisonError::into_inner);
        profiles.insert(profile.id.clone(), profile);
    }

    /// The feed broker of this store.
    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    /// Snapshot of every row, in insertion order.
    pub fn export(&self) -> Vec<Message> {
        self.messages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Snapshot of every profile.
    pub fn export_profiles(&self) -> Vec<Profile> {
        self.profiles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Number of stored rows.
    pub fn len(&self) -> usize {
        self.messages.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Check if the store holds no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn query_messages(&self, a: &UserId, b: &UserId) -> Result<Vec<Message>> {
        let data = self.messages.read().unwrap_or_else(PoisonError::into_inner);
        let mut rows: Vec<Message> = data
            .iter()
            .filter(|m| {
                (&m.sender_id == a && &m.receiver_id == b)
                    || (&m.sender_id == b && &m.receiver_id == a)
            })
            .cloned()
            .collect();
        // Stable: equal timestamps keep insertion order.
        rows.sort_by_key(|m| m.created_at);
        Ok(rows)
    }

    async fn query_user_messages(&self, user: &UserId) -> Result<Vec<Message>> {
        let data = self.messages.read().unwrap_or_else(PoisonError::into_inner);
        let mut rows: Vec<Message> = data
            .iter()
            .filter(|m| &m.sender_id == user || &m.receiver_id == user)
            .cloned()
            .collect();
        rows.reverse();
        rows.sort_by(|x, y| y.created_at.cmp(&x.created_at));
        Ok(rows)
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Message> {
        if message.content.trim().is_empty() {
            return Err(Error::InvalidArgument(
                "Message content cannot be empty".into(),
            ));
        }
        if message.sender_id.is_empty() || message.receiver_id.is_empty() {
            return Err(Error::InvalidArgument(
                "Sender and receiver are required".into(),
            ));
        }

        let stored = {
            let mut data = self.messages.write().unwrap_or_else(PoisonError::into_inner);
            let now = Utc::now();
            let created_at = data
                .iter()
                .map(|m| m.created_at)
                .max()
                .map_or(now, |latest| latest.max(now));

            let stored = Message {
                id: MessageId::new(uuid::Uuid::new_v4().to_string()),
                sender_id: message.sender_id,
                receiver_id: message.receiver_id,
                content: message.content.trim().to_owned(),
                created_at,
                is_read: false,
                client_token: message.client_token,
            };
            data.push(stored.clone());
            stored
        };

        let delivered = self.broker.publish(&stored);
        log::debug!("stored message {} and notified {} subscribers", stored.id, delivered);

        Ok(stored)
    }

    async fn subscribe_insertions(&self) -> Result<Subscription> {
        Ok(self.broker.subscribe())
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.broker.unsubscribe(id)
    }

    async fn fetch_profile(&self, user: &UserId) -> Result<Option<Profile>> {
        let profiles = self.profiles.read().unwrap_or_else(PoisonError::into_inner);
        Ok(profiles.get(user).cloned())
    }
}
