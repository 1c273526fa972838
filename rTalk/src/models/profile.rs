//! Participant profiles.

use serde::{Deserialize, Deserializer, Serialize};

use super::UserId;

/// Public profile of a participant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// User ID.
    pub id: UserId,
    /// Display name.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub full_name: String,
    /// Avatar URL.
    #[serde(default)]
    pub avatar_url: Option<String>,
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl Profile {
    /// Create a profile with a display name.
    pub fn new(id: impl Into<UserId>, full_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            full_name: full_name.into(),
            avatar_url: None,
        }
    }

    /// Display name, or the user ID when no name is set.
    pub fn display_name(&self) -> &str {
        if self.full_name.trim().is_empty() {
            self.id.as_str()
        } else {
            &self.full_name
        }
    }
}
