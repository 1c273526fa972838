//! Instrumented store wrapper for unit tests.

use async_trait::async_trait;
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Mutex, PoisonError,
};
use tokio::sync::Notify;

use super::{MemoryStore, MessageStore};
use crate::{
    error::{Error, Result},
    feed::{Subscription, SubscriptionId},
    models::{Message, NewMessage, Profile, UserId},
};

/// Wraps a [`MemoryStore`], counting calls and failing on demand.
#[derive(Debug, Default)]
pub(crate) struct ScriptedStore {
    pub inner: MemoryStore,
    pub fail_queries: AtomicBool,
    pub fail_inserts: AtomicBool,
    /// Number of upcoming subscribe calls that fail.
    pub failing_subscribes: AtomicUsize,
    /// Park history queries until `release` is notified.
    pub hold_queries: AtomicBool,
    /// Park inserts until `release` is notified.
    pub hold_inserts: AtomicBool,
    pub release: Notify,
    /// Published on the feed by the next history query, before it answers.
    pub publish_on_query: Mutex<Vec<Message>>,
    pub queries: AtomicUsize,
    pub inserts: AtomicUsize,
    pub subscribes: AtomicUsize,
}

impl ScriptedStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            ..Default::default()
        }
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    pub fn set(flag: &AtomicBool, value: bool) {
        flag.store(value, Ordering::SeqCst);
    }

    pub fn publish_during_query(&self, messages: Vec<Message>) {
        *self.publish_on_query.lock().unwrap_or_else(PoisonError::into_inner) = messages;
    }

    async fn wait_if(&self, hold: &AtomicBool) {
        if hold.load(Ordering::SeqCst) {
            self.release.notified().await;
        }
    }
}

#[async_trait]
impl MessageStore for ScriptedStore {
    async fn query_messages(&self, a: &UserId, b: &UserId) -> Result<Vec<Message>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let during = std::mem::take(
            &mut *self.publish_on_query.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for message in &during {
            self.inner.broker().publish(message);
        }
        self.wait_if(&self.hold_queries).await;
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(Error::store("query rejected"));
        }
        self.inner.query_messages(a, b).await
    }

    async fn query_user_messages(&self, user: &UserId) -> Result<Vec<Message>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(Error::store("query rejected"));
        }
        self.inner.query_user_messages(user).await
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Message> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        self.wait_if(&self.hold_inserts).await;
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(Error::store("insert rejected"));
        }
        self.inner.insert_message(message).await
    }

    async fn subscribe_insertions(&self) -> Result<Subscription> {
        self.subscribes.fetch_add(1, Ordering::SeqCst);
        let pending = self.failing_subscribes.load(Ordering::SeqCst);
        if pending > 0 {
            self.failing_subscribes.store(pending - 1, Ordering::SeqCst);
            return Err(Error::SubscriptionClosed);
        }
        self.inner.subscribe_insertions().await
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.unsubscribe(id).await
    }

    async fn fetch_profile(&self, user: &UserId) -> Result<Option<Profile>> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(Error::store("profile lookup rejected"));
        }
        self.inner.fetch_profile(user).await
    }
}
