//! Error types.

use thiserror::Error;

/// The main error type for rTalk operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Network-related error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Remote store returned an error response.
    #[error("Store API error [{code}]: {message}")]
    Api { code: String, message: String },

    /// Message store rejected the operation.
    #[error("Store error: {0}")]
    Store(String),

    /// Operation did not complete in time.
    #[error("Timed out: {0}")]
    Timeout(&'static str),

    /// Operation requires a current user but none was resolved.
    #[error("Current user required")]
    IdentityRequired,

    /// Invalid argument passed to an API method.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The conversation was already torn down.
    #[error("Conversation torn down")]
    TornDown,

    /// The live feed closed the subscription.
    #[error("Subscription closed")]
    SubscriptionClosed,

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

impl Error {
    /// Create a remote API error.
    pub fn api(code: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Api {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Create a store error.
    pub fn store(msg: impl Into<String>) -> Self {
        Error::Store(msg.into())
    }

    /// Check if this error is potentially retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Network(_) | Error::Timeout(_) | Error::SubscriptionClosed => true,
            Error::Api { code, .. } => code == "429" || code.starts_with('5'),
            _ => false,
        }
    }
}

/// Result type alias for rTalk operations.
pub type Result<T> = std::result::Result<T, Error>;
