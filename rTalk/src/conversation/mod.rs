//! Live one-to-one conversations.
//!
//! A [`Conversation`] owns the transcript of one participant pair. Opening it
//! registers on the store's insertion feed first, then applies the historical
//! snapshot, then starts pumping live events; anything inserted in between
//! sits in the subscription buffer and is de-duplicated on arrival.

mod stream;
mod transcript;

pub use transcript::{Admission, DeliveryStatus, Entry, Transcript};

use chrono::Utc;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::{sync::broadcast, task::JoinHandle, time::timeout};

use crate::{
    client::{ChatConfig, IdentityProvider},
    error::{Error, Result},
    feed::SubscriptionId,
    models::{ClientToken, Message, MessageId, NewMessage, ParticipantPair, UserId},
    store::MessageStore,
};

/// Lifecycle of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    Loading,
    Ready,
    TornDown,
}

/// Something the user should be told about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// History or reconciliation fetch failed.
    FetchFailure(String),
    /// A send was not stored.
    SendFailure(String),
    /// The live feed is gone.
    SubscriptionFailure(String),
    /// The live feed is back.
    SubscriptionRestored,
}

impl Notice {
    pub fn is_failure(&self) -> bool {
        !matches!(self, Notice::SubscriptionRestored)
    }
}

/// Change notifications for a rendering view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewEvent {
    /// History applied.
    Loaded { count: usize },
    /// A local send placeholder was appended.
    Pending(Message),
    /// A message was appended at the end.
    Admitted(Message),
    /// A placeholder now holds its stored row.
    Confirmed(Message),
    /// A placeholder was removed after a failed send.
    Withdrawn(MessageId),
    /// Missed messages were merged in.
    Reconciled { added: usize },
    Notice(Notice),
}

#[derive(Debug)]
struct Shared {
    state: ConversationState,
    transcript: Transcript,
    last_notice: Option<Notice>,
    live: bool,
    subscription: Option<SubscriptionId>,
}

/// State shared between the handle and its pump task.
#[derive(Debug)]
pub(crate) struct ConversationInner {
    store: Arc<dyn MessageStore>,
    me: UserId,
    other: UserId,
    config: ChatConfig,
    shared: Mutex<Shared>,
    events: broadcast::Sender<ViewEvent>,
}

impl ConversationInner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: ViewEvent) {
        // No listener is fine.
        let _ = self.events.send(event);
    }

    fn notice(&self, notice: Notice) {
        let mut shared = self.lock();
        if shared.state == ConversationState::TornDown {
            return;
        }
        shared.last_notice = Some(notice.clone());
        self.emit(ViewEvent::Notice(notice));
    }

    fn is_torn_down(&self) -> bool {
        self.lock().state == ConversationState::TornDown
    }

    fn admit(&self, message: Message) {
        let mut shared = self.lock();
        if shared.state == ConversationState::TornDown {
            return;
        }
        match shared.transcript.admit(message.clone()) {
            Admission::Appended => self.emit(ViewEvent::Admitted(message)),
            Admission::Confirmed => self.emit(ViewEvent::Confirmed(message)),
            Admission::Duplicate => log::trace!("ignoring duplicate event {}", message.id),
            Admission::Foreign => {}
        }
    }

    async fn fetch_history(&self) -> Result<Vec<Message>> {
        timeout(
            self.config.fetch_timeout,
            self.store.query_messages(&self.me, &self.other),
        )
        .await
        .map_err(|_| Error::Timeout("history fetch"))?
    }

    /// Re-read history and merge whatever is missing.
    async fn reconcile(&self) -> Result<usize> {
        let rows = self.fetch_history().await?;

        let mut shared = self.lock();
        if shared.state == ConversationState::TornDown {
            return Ok(0);
        }
        let added = shared.transcript.merge_history(rows);
        if added > 0 {
            self.emit(ViewEvent::Reconciled { added });
        }
        Ok(added)
    }

    /// Backs [`Conversation::send`]. Nothing is changed once the
    /// conversation is torn down, even if the insert is still in flight.
    async fn send(&self, content: &str) -> Result<Option<Message>> {
        let content = content.trim();
        if content.is_empty() {
            return Ok(None);
        }

        let token = ClientToken::generate();
        {
            let mut shared = self.lock();
            if shared.state != ConversationState::Ready {
                return Err(Error::TornDown);
            }
            let local = shared.transcript.push_pending(
                token.clone(),
                self.me.clone(),
                self.other.clone(),
                content.to_owned(),
                Utc::now(),
            );
            self.emit(ViewEvent::Pending(local));
        }

        let request = NewMessage::new(self.me.clone(), self.other.clone(), content)
            .with_token(token.clone());
        let result = timeout(self.config.send_timeout, self.store.insert_message(request))
            .await
            .map_err(|_| Error::Timeout("send"))
            .and_then(|r| r);

        match result {
            Ok(stored) => {
                let mut shared = self.lock();
                if shared.state != ConversationState::TornDown
                    && shared.transcript.acknowledge(&token, stored.clone())
                {
                    self.emit(ViewEvent::Confirmed(stored.clone()));
                }
                Ok(Some(stored))
            }
            Err(e) => {
                log::warn!("send to {} failed: {}", self.other, e);
                {
                    let mut shared = self.lock();
                    if shared.state != ConversationState::TornDown
                        && shared.transcript.reject(&token)
                    {
                        self.emit(ViewEvent::Withdrawn(MessageId::provisional(&token)));
                    }
                }
                self.notice(Notice::SendFailure(e.to_string()));
                Err(e)
            }
        }
    }

    fn feed_lost(&self, reason: String) {
        {
            let mut shared = self.lock();
            shared.live = false;
            shared.subscription = None;
        }
        self.notice(Notice::SubscriptionFailure(reason));
    }

    fn feed_restored(&self, id: SubscriptionId) {
        {
            let mut shared = self.lock();
            shared.live = true;
            shared.subscription = Some(id);
        }
        self.notice(Notice::SubscriptionRestored);
    }
}

/// Builder for opening a [`Conversation`].
pub struct ConversationBuilder {
    store: Arc<dyn MessageStore>,
    identity: Option<Arc<dyn IdentityProvider>>,
    current_user: Option<UserId>,
    other_user: UserId,
    config: ChatConfig,
}

impl std::fmt::Debug for ConversationBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationBuilder")
            .field("current_user", &self.current_user)
            .field("other_user", &self.other_user)
            .finish()
    }
}

impl ConversationBuilder {
    pub fn new(store: Arc<dyn MessageStore>, other_user: impl Into<UserId>) -> Self {
        Self {
            store,
            identity: None,
            current_user: None,
            other_user: other_user.into(),
            config: ChatConfig::default(),
        }
    }

    /// Resolve the current user through a provider.
    pub fn identity(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Use an explicit current user. Takes precedence over the provider.
    pub fn current_user(mut self, user: impl Into<UserId>) -> Self {
        self.current_user = Some(user.into());
        self
    }

    pub fn config(mut self, config: ChatConfig) -> Self {
        self.config = config;
        self
    }

    async fn resolve_user(&self) -> Result<UserId> {
        if let Some(user) = self.current_user.as_ref().filter(|u| !u.is_empty()) {
            return Ok(user.clone());
        }
        match &self.identity {
            Some(identity) => identity
                .current_user()
                .await
                .filter(|u| !u.is_empty())
                .ok_or(Error::IdentityRequired),
            None => Err(Error::IdentityRequired),
        }
    }

    /// Subscribe, load history and start the live pump.
    ///
    /// A failed history fetch still opens the conversation with an empty
    /// transcript and a [`Notice::FetchFailure`]. A failed initial subscribe
    /// is retried in the background per the reconnect policy.
    pub async fn open(self) -> Result<Conversation> {
        let me = self.resolve_user().await?;
        if self.other_user.is_empty() {
            return Err(Error::InvalidArgument("Conversation peer is required".into()));
        }

        let pair = ParticipantPair::new(me.clone(), self.other_user.clone());
        let (events, _) = broadcast::channel(self.config.view_capacity.max(1));
        let inner = Arc::new(ConversationInner {
            store: self.store,
            me,
            other: self.other_user,
            config: self.config,
            shared: Mutex::new(Shared {
                state: ConversationState::Loading,
                transcript: Transcript::new(pair),
                last_notice: None,
                live: false,
                subscription: None,
            }),
            events,
        });
        log::debug!("opening conversation {} <-> {}", inner.me, inner.other);

        let subscription = match inner.store.subscribe_insertions().await {
            Ok(subscription) => {
                {
                    let mut shared = inner.lock();
                    shared.live = true;
                    shared.subscription = Some(subscription.id());
                }
                Some(subscription)
            }
            Err(e) => {
                log::warn!("live feed unavailable: {}", e);
                inner.notice(Notice::SubscriptionFailure(e.to_string()));
                None
            }
        };

        let history = inner.fetch_history().await;
        let failure = {
            let mut shared = inner.lock();
            let (count, failure) = match history {
                Ok(rows) => (shared.transcript.merge_history(rows), None),
                Err(e) => (0, Some(e)),
            };
            shared.state = ConversationState::Ready;
            inner.emit(ViewEvent::Loaded { count });
            failure
        };
        if let Some(e) = failure {
            log::warn!("history fetch failed: {}", e);
            inner.notice(Notice::FetchFailure(e.to_string()));
        }

        let pump = tokio::spawn(stream::run(Arc::clone(&inner), subscription));

        Ok(Conversation {
            inner,
            pump: Some(pump),
        })
    }
}

/// An open conversation between the current user and one peer.
///
/// Dropping it stops the live pump, which releases the feed registration.
#[derive(Debug)]
pub struct Conversation {
    inner: Arc<ConversationInner>,
    pump: Option<JoinHandle<()>>,
}

impl Conversation {
    /// Create a builder for a conversation with `other_user`.
    pub fn builder(
        store: Arc<dyn MessageStore>,
        other_user: impl Into<UserId>,
    ) -> ConversationBuilder {
        ConversationBuilder::new(store, other_user)
    }

    pub fn current_user(&self) -> &UserId {
        &self.inner.me
    }

    pub fn other_user(&self) -> &UserId {
        &self.inner.other
    }

    pub fn pair(&self) -> ParticipantPair {
        self.inner.lock().transcript.pair().clone()
    }

    pub fn state(&self) -> ConversationState {
        self.inner.lock().state
    }

    /// Whether the live feed is currently attached.
    pub fn is_live(&self) -> bool {
        self.inner.lock().live
    }

    /// The current feed registration.
    pub fn subscription_id(&self) -> Option<SubscriptionId> {
        self.inner.lock().subscription
    }

    /// Stored messages in display order.
    pub fn messages(&self) -> Vec<Message> {
        self.inner.lock().transcript.messages()
    }

    /// All entries, including sends in flight.
    pub fn entries(&self) -> Vec<Entry> {
        self.inner.lock().transcript.entries().to_vec()
    }

    pub fn last_notice(&self) -> Option<Notice> {
        self.inner.lock().last_notice.clone()
    }

    /// Listen for transcript changes.
    pub fn subscribe_view(&self) -> broadcast::Receiver<ViewEvent> {
        self.inner.events.subscribe()
    }

    /// Send a message to the peer.
    ///
    /// Blank content is ignored and returns `Ok(None)` without touching the
    /// store. Otherwise a pending entry is shown right away and replaced by
    /// the stored row once the insert succeeds; on failure the pending entry
    /// is withdrawn, a [`Notice::SendFailure`] is recorded and the error is
    /// returned so the caller can keep the input.
    pub async fn send(&self, content: &str) -> Result<Option<Message>> {
        self.inner.send(content).await
    }

    /// Re-read history and merge anything missing. Returns the number added.
    pub async fn refresh(&self) -> Result<usize> {
        if self.inner.is_torn_down() {
            return Err(Error::TornDown);
        }
        self.inner.reconcile().await.inspect_err(|e| {
            self.inner.notice(Notice::FetchFailure(e.to_string()));
        })
    }

    /// Stop receiving events. Safe to call more than once.
    ///
    /// Nothing that arrives afterwards, including fetches still in flight,
    /// changes the transcript.
    pub async fn teardown(&mut self) {
        let subscription = {
            let mut shared = self.inner.lock();
            if shared.state == ConversationState::TornDown {
                return;
            }
            shared.state = ConversationState::TornDown;
            shared.live = false;
            shared.subscription.take()
        };

        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if let Some(id) = subscription {
            let released = self.inner.store.unsubscribe(id).await;
            log::debug!("released feed {} (registered: {})", id, released);
        }
        log::debug!("conversation {} <-> {} torn down", self.inner.me, self.inner.other);
    }
}

impl Drop for Conversation {
    fn drop(&mut self) {
        self.inner.lock().state = ConversationState::TornDown;
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ReconnectPolicy, StaticIdentity};
    use crate::store::{testing::ScriptedStore, MemoryStore};
    use chrono::{DateTime, TimeZone};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tokio::sync::broadcast::error::TryRecvError;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 10, minute, 0).unwrap()
    }

    fn row(id: i64, sender: &str, receiver: &str, minute: u32) -> Message {
        Message {
            id: MessageId::from(id),
            sender_id: sender.into(),
            receiver_id: receiver.into(),
            content: format!("m{}", id),
            created_at: at(minute),
            is_read: false,
            client_token: None,
        }
    }

    fn ids(conversation: &Conversation) -> Vec<String> {
        conversation
            .messages()
            .iter()
            .map(|m| m.id.to_string())
            .collect()
    }

    fn fast_config() -> ChatConfig {
        ChatConfig {
            reconnect: ReconnectPolicy {
                min_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    async fn open(store: Arc<dyn MessageStore>, me: &str, other: &str) -> Conversation {
        ConversationBuilder::new(store, other)
            .current_user(me)
            .config(fast_config())
            .open()
            .await
            .unwrap()
    }

    async fn settle(mut done: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !done() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    /// Publish a marker from the peer and wait until it is shown, so every
    /// event published before it has been processed.
    async fn drain_feed(store: &MemoryStore, conversation: &Conversation, id: i64) {
        store.broker().publish(&row(id, "u2", "u1", 59));
        let marker = MessageId::from(id);
        settle(|| conversation.messages().iter().any(|m| m.id == marker)).await;
    }

    #[tokio::test]
    async fn test_open_loads_history_in_order() {
        let store = Arc::new(MemoryStore::with_messages(vec![
            row(1, "u1", "u2", 1),
            row(2, "u2", "u1", 2),
            row(3, "u1", "u3", 3),
        ]));
        let conversation = open(store.clone(), "u1", "u2").await;

        assert_eq!(conversation.state(), ConversationState::Ready);
        assert_eq!(ids(&conversation), vec!["1", "2"]);
        assert!(conversation.is_live());
        assert_eq!(conversation.last_notice(), None);
        assert_eq!(store.broker().subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_history() {
        let store = Arc::new(MemoryStore::new());
        let conversation = open(store, "u1", "u2").await;
        assert_eq!(conversation.state(), ConversationState::Ready);
        assert!(conversation.messages().is_empty());
    }

    #[tokio::test]
    async fn test_live_event_appended() {
        let store = Arc::new(MemoryStore::with_messages(vec![row(1, "u1", "u2", 1)]));
        let conversation = open(store.clone(), "u1", "u2").await;

        store.broker().publish(&row(2, "u2", "u1", 2));
        settle(|| conversation.messages().len() == 2).await;
        assert_eq!(ids(&conversation), vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_foreign_events_ignored() {
        let store = Arc::new(MemoryStore::new());
        let conversation = open(store.clone(), "u1", "u2").await;

        store.broker().publish(&row(5, "u3", "u1", 1));
        store.broker().publish(&row(6, "u1", "u3", 2));
        store.broker().publish(&row(7, "u3", "u4", 3));
        drain_feed(&store, &conversation, 99).await;

        assert_eq!(ids(&conversation), vec!["99"]);
    }

    #[tokio::test]
    async fn test_duplicate_events_shown_once() {
        let store = Arc::new(MemoryStore::with_messages(vec![row(1, "u1", "u2", 1)]));
        let conversation = open(store.clone(), "u1", "u2").await;

        store.broker().publish(&row(1, "u1", "u2", 1));
        store.broker().publish(&row(2, "u2", "u1", 2));
        store.broker().publish(&row(2, "u2", "u1", 2));
        drain_feed(&store, &conversation, 99).await;

        assert_eq!(ids(&conversation), vec!["1", "2", "99"]);
    }

    #[tokio::test]
    async fn test_send_shows_message_once() {
        let store = Arc::new(MemoryStore::new());
        let conversation = open(store.clone(), "u1", "u2").await;

        let sent = conversation.send("  hello  ").await.unwrap().unwrap();
        assert_eq!(sent.content, "hello");
        assert_eq!(sent.sender_id, UserId::from("u1"));
        assert_eq!(sent.receiver_id, UserId::from("u2"));

        drain_feed(&store, &conversation, 99).await;
        let contents: Vec<String> = conversation
            .messages()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["hello", "m99"]);
        assert!(conversation.entries().iter().all(|e| !e.is_pending()));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_blank_send_skips_store() {
        let scripted = Arc::new(ScriptedStore::new(MemoryStore::new()));
        let conversation = open(scripted.clone(), "u1", "u2").await;

        assert_eq!(conversation.send("   ").await.unwrap(), None);
        assert_eq!(conversation.send("").await.unwrap(), None);
        assert_eq!(ScriptedStore::count(&scripted.inserts), 0);
        assert!(conversation.entries().is_empty());
    }

    #[tokio::test]
    async fn test_send_failure_withdraws_pending() {
        let scripted = Arc::new(ScriptedStore::new(MemoryStore::new()));
        ScriptedStore::set(&scripted.fail_inserts, true);
        let conversation = open(scripted.clone(), "u1", "u2").await;
        let mut view = conversation.subscribe_view();

        let err = conversation.send("hello").await.unwrap_err();
        assert!(matches!(err, Error::Store(_)));
        assert!(conversation.entries().is_empty());
        assert!(matches!(
            conversation.last_notice(),
            Some(Notice::SendFailure(_))
        ));

        assert!(matches!(view.recv().await.unwrap(), ViewEvent::Pending(_)));
        assert!(matches!(view.recv().await.unwrap(), ViewEvent::Withdrawn(id) if id.is_provisional()));
    }

    #[tokio::test]
    async fn test_fetch_failure_still_opens() {
        let scripted = Arc::new(ScriptedStore::new(MemoryStore::with_messages(vec![row(
            1, "u1", "u2", 1,
        )])));
        ScriptedStore::set(&scripted.fail_queries, true);
        let conversation = open(scripted.clone(), "u1", "u2").await;

        assert_eq!(conversation.state(), ConversationState::Ready);
        assert!(conversation.messages().is_empty());
        assert!(matches!(
            conversation.last_notice(),
            Some(Notice::FetchFailure(_))
        ));

        // The feed still works.
        scripted.inner.broker().publish(&row(2, "u2", "u1", 2));
        settle(|| conversation.messages().len() == 1).await;
    }

    #[tokio::test]
    async fn test_refresh_merges_missed_rows() {
        let store = Arc::new(MemoryStore::with_messages(vec![row(1, "u1", "u2", 1)]));
        let conversation = open(store.clone(), "u1", "u2").await;

        store.seed(vec![row(2, "u2", "u1", 2)]);
        assert_eq!(conversation.refresh().await.unwrap(), 1);
        assert_eq!(conversation.refresh().await.unwrap(), 0);
        assert_eq!(ids(&conversation), vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_identity_required() {
        let store: Arc<dyn MessageStore> = Arc::new(MemoryStore::new());

        let err = ConversationBuilder::new(store.clone(), "u2")
            .open()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::IdentityRequired));

        let err = ConversationBuilder::new(store.clone(), "u2")
            .identity(Arc::new(StaticIdentity::anonymous()))
            .open()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::IdentityRequired));

        let conversation = ConversationBuilder::new(store, "u2")
            .identity(Arc::new(StaticIdentity::new("u1")))
            .open()
            .await
            .unwrap();
        assert_eq!(conversation.current_user(), &UserId::from("u1"));
    }

    #[tokio::test]
    async fn test_missing_peer_rejected() {
        let store: Arc<dyn MessageStore> = Arc::new(MemoryStore::new());
        let err = ConversationBuilder::new(store, "")
            .current_user("u1")
            .open()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_teardown_stops_updates() {
        let store = Arc::new(MemoryStore::with_messages(vec![row(1, "u1", "u2", 1)]));
        let mut conversation = open(store.clone(), "u1", "u2").await;

        conversation.teardown().await;
        assert_eq!(conversation.state(), ConversationState::TornDown);
        assert!(!conversation.is_live());
        assert_eq!(store.broker().subscriber_count(), 0);

        assert_eq!(store.broker().publish(&row(2, "u2", "u1", 2)), 0);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(ids(&conversation), vec!["1"]);

        assert!(matches!(
            conversation.send("late").await,
            Err(Error::TornDown)
        ));
        assert!(matches!(conversation.refresh().await, Err(Error::TornDown)));

        // Idempotent.
        conversation.teardown().await;
        assert_eq!(conversation.state(), ConversationState::TornDown);
    }

    #[tokio::test]
    async fn test_drop_releases_subscription() {
        let store = Arc::new(MemoryStore::new());
        let conversation = open(store.clone(), "u1", "u2").await;
        assert_eq!(store.broker().subscriber_count(), 1);

        drop(conversation);
        settle(|| store.broker().subscriber_count() == 0).await;
    }

    #[tokio::test]
    async fn test_reconnect_reconciles() {
        let store = Arc::new(MemoryStore::with_messages(vec![row(1, "u1", "u2", 1)]));
        let conversation = open(store.clone(), "u1", "u2").await;
        let first = conversation.subscription_id();

        // Rows written while the feed is down.
        store.seed(vec![row(2, "u2", "u1", 2), row(3, "u2", "u1", 3)]);
        assert_eq!(store.broker().disconnect_all(), 1);

        settle(|| conversation.messages().len() == 3).await;
        settle(|| conversation.is_live()).await;
        assert_eq!(ids(&conversation), vec!["1", "2", "3"]);
        assert_eq!(conversation.last_notice(), Some(Notice::SubscriptionRestored));
        assert_ne!(conversation.subscription_id(), first);

        drain_feed(&store, &conversation, 99).await;
        assert_eq!(ids(&conversation), vec!["1", "2", "3", "99"]);
    }

    #[tokio::test]
    async fn test_reconnect_gives_up() {
        let scripted = Arc::new(ScriptedStore::new(MemoryStore::new()));
        let config = ChatConfig {
            reconnect: ReconnectPolicy {
                min_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                max_attempts: 2,
                ..Default::default()
            },
            ..Default::default()
        };
        let conversation = ConversationBuilder::new(scripted.clone(), "u2")
            .current_user("u1")
            .config(config)
            .open()
            .await
            .unwrap();

        scripted.failing_subscribes.store(usize::MAX, Ordering::SeqCst);
        scripted.inner.broker().disconnect_all();

        settle(|| ScriptedStore::count(&scripted.subscribes) >= 3).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!conversation.is_live());
        assert!(matches!(
            conversation.last_notice(),
            Some(Notice::SubscriptionFailure(_))
        ));
        assert_eq!(conversation.state(), ConversationState::Ready);
    }

    #[tokio::test]
    async fn test_reconnect_disabled() {
        let store = Arc::new(MemoryStore::new());
        let conversation = ConversationBuilder::new(store.clone(), "u2")
            .current_user("u1")
            .config(ChatConfig {
                reconnect: ReconnectPolicy::disabled(),
                ..Default::default()
            })
            .open()
            .await
            .unwrap();

        store.broker().disconnect_all();
        settle(|| !conversation.is_live()).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.broker().subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_lagged_feed_reconciles() {
        let store = Arc::new(MemoryStore::new().with_feed_capacity(1));
        let conversation = open(store.clone(), "u1", "u2").await;

        for i in 0..5 {
            store
                .insert_message(NewMessage::new("u2", "u1", format!("n{}", i)))
                .await
                .unwrap();
        }

        settle(|| conversation.messages().len() == 5).await;
        let contents: Vec<String> = conversation
            .messages()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["n0", "n1", "n2", "n3", "n4"]);
    }

    #[tokio::test]
    async fn test_view_events() {
        let store = Arc::new(MemoryStore::new());
        let conversation = open(store.clone(), "u1", "u2").await;
        let mut view = conversation.subscribe_view();

        store.broker().publish(&row(2, "u2", "u1", 2));
        match view.recv().await.unwrap() {
            ViewEvent::Admitted(m) => assert_eq!(m.id, MessageId::from(2)),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_events_during_history_fetch_wait_for_snapshot() {
        let scripted = Arc::new(ScriptedStore::new(MemoryStore::with_messages(vec![
            row(1, "u1", "u2", 1),
            row(2, "u2", "u1", 2),
        ])));
        // One copy of a history row and one newer row arrive mid-fetch.
        scripted.publish_during_query(vec![row(1, "u1", "u2", 1), row(3, "u2", "u1", 3)]);
        let conversation = open(scripted.clone(), "u1", "u2").await;

        assert_eq!(ids(&conversation), vec!["1", "2"]);

        drain_feed(&scripted.inner, &conversation, 99).await;
        assert_eq!(ids(&conversation), vec!["1", "2", "3", "99"]);
    }

    #[tokio::test]
    async fn test_reconnect_fetch_after_teardown_is_ignored() {
        let scripted = Arc::new(ScriptedStore::new(MemoryStore::with_messages(vec![row(
            1, "u1", "u2", 1,
        )])));
        let mut conversation = open(scripted.clone(), "u1", "u2").await;

        ScriptedStore::set(&scripted.hold_queries, true);
        scripted.inner.broker().disconnect_all();
        settle(|| ScriptedStore::count(&scripted.queries) == 2).await;

        let before = conversation.entries();
        let notice = conversation.last_notice();
        let mut view = conversation.subscribe_view();
        scripted.inner.seed(vec![row(2, "u2", "u1", 2)]);

        conversation.teardown().await;
        scripted.release.notify_one();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(conversation.entries(), before);
        assert_eq!(conversation.last_notice(), notice);
        assert!(matches!(view.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(scripted.inner.broker().subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_reconcile_in_flight_at_teardown_is_noop() {
        let scripted = Arc::new(ScriptedStore::new(MemoryStore::with_messages(vec![row(
            1, "u1", "u2", 1,
        )])));
        let mut conversation = open(scripted.clone(), "u1", "u2").await;

        ScriptedStore::set(&scripted.hold_queries, true);
        scripted.inner.seed(vec![row(2, "u2", "u1", 2)]);
        let inner = Arc::clone(&conversation.inner);
        let fetch = tokio::spawn(async move { inner.reconcile().await });
        settle(|| ScriptedStore::count(&scripted.queries) == 2).await;

        let mut view = conversation.subscribe_view();
        conversation.teardown().await;
        scripted.release.notify_one();

        assert_eq!(fetch.await.unwrap().unwrap(), 0);
        assert_eq!(ids(&conversation), vec!["1"]);
        assert_eq!(conversation.last_notice(), None);
        assert!(matches!(view.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_send_failure_after_teardown_changes_nothing() {
        let scripted = Arc::new(ScriptedStore::new(MemoryStore::new()));
        let mut conversation = open(scripted.clone(), "u1", "u2").await;

        ScriptedStore::set(&scripted.fail_inserts, true);
        ScriptedStore::set(&scripted.hold_inserts, true);
        let inner = Arc::clone(&conversation.inner);
        let send = tokio::spawn(async move { inner.send("late").await });
        settle(|| ScriptedStore::count(&scripted.inserts) == 1).await;

        let before = conversation.entries();
        assert_eq!(before.len(), 1);
        let mut view = conversation.subscribe_view();
        conversation.teardown().await;
        scripted.release.notify_one();

        assert!(matches!(send.await.unwrap(), Err(Error::Store(_))));
        assert_eq!(conversation.entries(), before);
        assert_eq!(conversation.last_notice(), None);
        assert!(matches!(view.try_recv(), Err(TryRecvError::Empty)));
    }
}
