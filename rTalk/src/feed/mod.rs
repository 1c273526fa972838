//! Live insertion feed.

mod broker;

pub use broker::{Broker, RecvError, Subscription, SubscriptionId, DEFAULT_FEED_CAPACITY};
