//! PostgREST-compatible remote store.
//!
//! Historical queries and inserts go straight to the REST endpoints. The
//! insertion feed is emulated by polling the message table for rows newer
//! than a cursor and publishing them on a local [`Broker`].

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::{
    collections::HashSet,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use tokio::task::JoinHandle;
use url::Url;

use super::traits::MessageStore;
use crate::{
    error::{Error, Result},
    feed::{Broker, Subscription, SubscriptionId, DEFAULT_FEED_CAPACITY},
    models::{Message, MessageId, NewMessage, Profile, UserId},
};

/// Default message table name.
pub const DEFAULT_MESSAGE_TABLE: &str = "messages";

/// Default profile table name.
pub const DEFAULT_PROFILE_TABLE: &str = "profiles";

/// REST store configuration.
#[derive(Debug, Clone)]
pub struct RestConfig {
    /// Project URL, e.g. `https://xyz.supabase.co/`.
    pub base_url: String,
    /// Public API key, sent as `apikey`.
    pub api_key: String,
    /// User access token; the API key is used as bearer when absent.
    pub access_token: Option<String>,
    /// Message table.
    pub table: String,
    /// Profile table.
    pub profile_table: String,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Read timeout.
    pub read_timeout: Duration,
    /// Delay between feed polls.
    pub poll_interval: Duration,
    /// Maximum rows fetched per poll.
    pub poll_batch: usize,
    /// Consecutive poll failures before subscribers are disconnected.
    pub max_poll_failures: u32,
    /// Per-subscriber feed buffer.
    pub feed_capacity: usize,
    /// Send `client_token` on insert (the table must have that column).
    pub echo_client_token: bool,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            access_token: None,
            table: DEFAULT_MESSAGE_TABLE.to_owned(),
            profile_table: DEFAULT_PROFILE_TABLE.to_owned(),
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(20),
            poll_interval: Duration::from_secs(2),
            poll_batch: 100,
            max_poll_failures: 5,
            feed_capacity: DEFAULT_FEED_CAPACITY,
            echo_client_token: false,
        }
    }
}

impl RestConfig {
    /// Create a configuration for a project URL and API key.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            ..Default::default()
        }
    }

    /// Resolve the REST endpoint of a table.
    pub fn resolve_url(&self, table: &str) -> Result<Url> {
        let base = if self.base_url.ends_with('/') {
            self.base_url.clone()
        } else {
            format!("{}/", self.base_url)
        };

        Url::parse(&base)
            .and_then(|b| b.join("rest/v1/"))
            .and_then(|b| b.join(table))
            .map_err(Error::Url)
    }

    fn bearer(&self) -> &str {
        self.access_token.as_deref().unwrap_or(&self.api_key)
    }
}

/// Row filter for the two directions of a conversation.
fn conversation_filter(a: &UserId, b: &UserId) -> String {
    format!(
        "(and(sender_id.eq.{a},receiver_id.eq.{b}),and(sender_id.eq.{b},receiver_id.eq.{a}))"
    )
}

/// Row filter for everything a user sent or received.
fn user_filter(user: &UserId) -> String {
    format!("(sender_id.eq.{user},receiver_id.eq.{user})")
}

fn format_cursor(cursor: DateTime<Utc>) -> String {
    format!("gte.{}", cursor.to_rfc3339_opts(SecondsFormat::Micros, true))
}

/// Feed position of the poller, in server time.
///
/// Seeded from the newest stored row so that client clock skew cannot hide
/// rows. `None` after seeding means the table was empty.
#[derive(Debug, Default)]
struct PollCursor {
    seeded: bool,
    at: Option<DateTime<Utc>>,
    seen: HashSet<MessageId>,
    offset: usize,
}

impl PollCursor {
    fn seed(&mut self, newest: Option<&Message>) {
        self.seeded = true;
        self.at = newest.map(|m| m.created_at);
        self.seen = newest.map(|m| m.id.clone()).into_iter().collect();
        self.offset = 0;
    }

    /// Take a polled page and return the rows not published yet.
    fn advance(&mut self, rows: Vec<Message>, batch: usize) -> Vec<Message> {
        let full = rows.len() >= batch;
        let mut fresh = Vec::new();
        for message in &rows {
            if let Some(at) = self.at {
                if message.created_at < at
                    || (message.created_at == at && self.seen.contains(&message.id))
                {
                    continue;
                }
            }
            if self.at.map_or(true, |at| message.created_at > at) {
                self.at = Some(message.created_at);
                self.seen.clear();
            }
            self.seen.insert(message.id.clone());
            fresh.push(message.clone());
        }

        // A full page stuck on one timestamp: skip what was already seen.
        let stuck = full && rows.iter().all(|m| Some(m.created_at) == self.at);
        self.offset = if stuck { self.seen.len() } else { 0 };
        fresh
    }

    fn query(&self, batch: usize) -> Vec<(&'static str, String)> {
        let mut query = vec![("select", "*".to_owned())];
        if let Some(at) = self.at {
            query.push(("created_at", format_cursor(at)));
        }
        query.push(("order", "created_at.asc,id.asc".to_owned()));
        query.push(("limit", batch.to_string()));
        if self.offset > 0 {
            query.push(("offset", self.offset.to_string()));
        }
        query
    }
}

/// Store backed by a PostgREST endpoint.
#[derive(Debug, Clone)]
pub struct RestStore {
    inner: Arc<RestInner>,
}

#[derive(Debug)]
struct RestInner {
    http: Client,
    config: RestConfig,
    broker: Broker,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl RestStore {
    /// Build a store from configuration.
    pub fn new(config: RestConfig) -> Result<Self> {
        if config.base_url.trim().is_empty() {
            return Err(Error::InvalidArgument("REST base URL is required".into()));
        }
        // Fail early on a malformed URL.
        config.resolve_url(&config.table)?;

        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .gzip(true)
            .build()
            .map_err(Error::Network)?;

        Ok(Self {
            inner: Arc::new(RestInner {
                http,
                broker: Broker::new(config.feed_capacity),
                config,
                poller: Mutex::new(None),
            }),
        })
    }

    /// Store configuration.
    pub fn config(&self) -> &RestConfig {
        &self.inner.config
    }

    /// The local broker fed by the poller.
    pub fn broker(&self) -> &Broker {
        &self.inner.broker
    }

    fn ensure_poller(&self) {
        let mut poller = self.inner.poller.lock().unwrap_or_else(PoisonError::into_inner);
        let running = poller.as_ref().is_some_and(|task| !task.is_finished());
        if !running {
            log::debug!("starting feed poller for table {}", self.inner.config.table);
            *poller = Some(tokio::spawn(run_poller(Arc::clone(&self.inner))));
        }
    }
}

impl RestInner {
    fn request(&self, method: Method, table: &str) -> Result<RequestBuilder> {
        let url = self.config.resolve_url(table)?;
        Ok(self
            .http
            .request(method, url)
            .header("apikey", &self.config.api_key)
            .header("Authorization", format!("Bearer {}", self.config.bearer())))
    }

    async fn get_rows<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>> {
        let response = self
            .request(Method::GET, table)?
            .query(query)
            .send()
            .await
            .map_err(Error::Network)?;
        handle_response(response).await
    }

    async fn fetch_since(&self, cursor: &PollCursor) -> Result<Vec<Message>> {
        self.get_rows(&self.config.table, &cursor.query(self.config.poll_batch))
            .await
    }

    async fn fetch_newest(&self) -> Result<Option<Message>> {
        let rows: Vec<Message> = self
            .get_rows(
                &self.config.table,
                &[
                    ("select", "*".to_owned()),
                    ("order", "created_at.desc".to_owned()),
                    ("limit", "1".to_owned()),
                ],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    /// One poller step: seed the cursor, or publish what is new.
    async fn poll(&self, cursor: &mut PollCursor) -> Result<()> {
        if !cursor.seeded {
            let newest = self.fetch_newest().await?;
            cursor.seed(newest.as_ref());
            log::debug!("feed cursor seeded at {:?}", cursor.at);
            return Ok(());
        }

        let rows = self.fetch_since(cursor).await?;
        for message in cursor.advance(rows, self.config.poll_batch) {
            self.broker.publish(&message);
        }
        Ok(())
    }

    /// Stop the poller if nobody listens. Returns `true` when it should exit.
    fn retire_if_idle(&self) -> bool {
        let mut poller = self.poller.lock().unwrap_or_else(PoisonError::into_inner);
        if self.broker.subscriber_count() == 0 {
            *poller = None;
            true
        } else {
            false
        }
    }
}

async fn handle_response<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    let text = response.text().await.map_err(Error::Network)?;

    if !status.is_success() {
        let message = serde_json::from_str::<serde_json::Value>(&text)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_owned))
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("Unknown error")
                    .to_owned()
            });
        return Err(Error::api(status.as_u16().to_string(), message));
    }

    serde_json::from_str(&text).map_err(Error::Json)
}

async fn run_poller(inner: Arc<RestInner>) {
    let mut cursor = PollCursor::default();
    let mut failures = 0u32;

    let mut interval = tokio::time::interval(inner.config.poll_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        if inner.retire_if_idle() {
            log::debug!("feed poller stopped: no subscribers");
            break;
        }

        match inner.poll(&mut cursor).await {
            Ok(()) => failures = 0,
            Err(e) => {
                failures += 1;
                log::warn!("feed poll failed ({}/{}): {}", failures, inner.config.max_poll_failures, e);
                if failures >= inner.config.max_poll_failures {
                    log::warn!("feed poller giving up, disconnecting subscribers");
                    inner.broker.disconnect_all();
                    let mut poller = inner.poller.lock().unwrap_or_else(PoisonError::into_inner);
                    *poller = None;
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl MessageStore for RestStore {
    async fn query_messages(&self, a: &UserId, b: &UserId) -> Result<Vec<Message>> {
        self.inner
            .get_rows(
                &self.inner.config.table,
                &[
                    ("select", "*".to_owned()),
                    ("or", conversation_filter(a, b)),
                    ("order", "created_at.asc".to_owned()),
                ],
            )
            .await
    }

    async fn query_user_messages(&self, user: &UserId) -> Result<Vec<Message>> {
        self.inner
            .get_rows(
                &self.inner.config.table,
                &[
                    ("select", "*".to_owned()),
                    ("or", user_filter(user)),
                    ("order", "created_at.desc".to_owned()),
                ],
            )
            .await
    }

    async fn insert_message(&self, mut message: NewMessage) -> Result<Message> {
        if !message.is_valid() {
            return Err(Error::InvalidArgument(
                "Message content and participants are required".into(),
            ));
        }
        if !self.inner.config.echo_client_token {
            message.client_token = None;
        }

        let response = self
            .inner
            .request(Method::POST, &self.inner.config.table)?
            .header("Prefer", "return=representation")
            .json(&message)
            .send()
            .await
            .map_err(Error::Network)?;

        let rows: Vec<Message> = handle_response(response).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| Error::store("insert returned no row"))
    }

    async fn subscribe_insertions(&self) -> Result<Subscription> {
        let subscription = self.inner.broker.subscribe();
        self.ensure_poller();
        Ok(subscription)
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.broker.unsubscribe(id)
    }

    async fn fetch_profile(&self, user: &UserId) -> Result<Option<Profile>> {
        let rows: Vec<Profile> = self
            .inner
            .get_rows(
                &self.inner.config.profile_table,
                &[
                    ("select", "id,full_name,avatar_url".to_owned()),
                    ("id", format!("eq.{}", user)),
                ],
            )
            .await?;
        Ok(rows.into_iter().next())
    }
}
