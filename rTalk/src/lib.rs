//! Live two-party conversation transcripts over a pluggable message store.

pub mod api;
pub mod client;
pub mod conversation;
pub mod error;
pub mod feed;
pub mod models;
pub mod store;

// Re-export main types
pub use client::{
    ChatClient, ChatClientBuilder, ChatConfig, IdentityProvider, ReconnectPolicy, StaticIdentity,
};
pub use error::{Error, Result};

// Re-export commonly used models
pub use models::{
    ClientToken, ConversationSummary, Message, MessageId, NewMessage, ParticipantPair, Profile,
    UserId,
};

pub use conversation::{
    Conversation, ConversationBuilder, ConversationState, DeliveryStatus, Entry, Notice, ViewEvent,
};
pub use feed::{Broker, RecvError, Subscription, SubscriptionId};
pub use store::{MemoryStore, MessageStore, RestConfig, RestStore};

// Re-export API types
pub use api::{InboxApi, InboxResult};
