//! Client facade and configuration.

mod config;
mod identity;

pub use config::{ChatConfig, ReconnectPolicy};
pub use identity::{IdentityProvider, StaticIdentity};

use crate::api::InboxApi;
use crate::conversation::ConversationBuilder;
use crate::error::{Error, Result};
use crate::models::UserId;
use crate::store::MessageStore;
use std::sync::Arc;

/// Builder for creating ChatClient.
pub struct ChatClientBuilder {
    store: Option<Arc<dyn MessageStore>>,
    identity: Option<Arc<dyn IdentityProvider>>,
    config: ChatConfig,
}

impl std::fmt::Debug for ChatClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClientBuilder")
            .field("store", &self.store)
            .field("identity", &self.identity)
            .field("config", &self.config)
            .finish()
    }
}

impl Default for ChatClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatClientBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            store: None,
            identity: None,
            config: ChatConfig::default(),
        }
    }

    /// Set the message store.
    pub fn store(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the identity provider.
    pub fn identity(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Use a fixed current user.
    pub fn user(mut self, user: impl Into<UserId>) -> Self {
        self.identity = Some(Arc::new(StaticIdentity::new(user)));
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ChatConfig) -> Self {
        self.config = config;
        self
    }

    /// Build ChatClient.
    pub fn build(self) -> Result<ChatClient> {
        let store = self
            .store
            .ok_or_else(|| Error::InvalidArgument("A message store is required".into()))?;

        Ok(ChatClient {
            inner: Arc::new(ChatClientInner {
                store,
                identity: self
                    .identity
                    .unwrap_or_else(|| Arc::new(StaticIdentity::anonymous())),
                config: self.config,
            }),
        })
    }
}

/// Internal client state.
#[derive(Debug)]
pub(crate) struct ChatClientInner {
    pub store: Arc<dyn MessageStore>,
    pub identity: Arc<dyn IdentityProvider>,
    pub config: ChatConfig,
}

impl ChatClientInner {
    /// Get the current user or error.
    pub async fn require_user(&self) -> Result<UserId> {
        self.identity
            .current_user()
            .await
            .ok_or(Error::IdentityRequired)
    }
}

/// Entry point for conversations and the inbox.
#[derive(Clone)]
pub struct ChatClient {
    pub(crate) inner: Arc<ChatClientInner>,
}

impl ChatClient {
    /// Create a new client builder.
    pub fn builder() -> ChatClientBuilder {
        ChatClientBuilder::new()
    }

    /// Prepare a conversation with `other_user`.
    pub fn conversation(&self, other_user: impl Into<UserId>) -> ConversationBuilder {
        ConversationBuilder::new(Arc::clone(&self.inner.store), other_user)
            .identity(Arc::clone(&self.inner.identity))
            .config(self.inner.config.clone())
    }

    /// Get the inbox API.
    pub fn inbox(&self) -> InboxApi {
        InboxApi::new(self.inner.clone())
    }

    /// The signed-in user, if any.
    pub async fn current_user(&self) -> Option<UserId> {
        self.inner.identity.current_user().await
    }

    /// The message store.
    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.inner.store
    }

    /// The conversation configuration.
    pub fn config(&self) -> &ChatConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("store", &self.inner.store)
            .field("identity", &self.inner.identity)
            .finish()
    }
}
