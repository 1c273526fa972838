//! Data models for conversation entities.

mod conversation;
mod ids;
mod message;
mod profile;

pub use conversation::ConversationSummary;
pub use ids::{ClientToken, MessageId, UserId};
pub use message::{Message, NewMessage, ParticipantPair};
pub use profile::Profile;
