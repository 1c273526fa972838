//! Current user resolution.

use async_trait::async_trait;

use crate::models::UserId;

/// Resolves the user of the local session.
#[async_trait]
pub trait IdentityProvider: Send + Sync + std::fmt::Debug {
    /// The signed-in user, if any.
    async fn current_user(&self) -> Option<UserId>;
}

/// Identity fixed at construction time.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    user: Option<UserId>,
}

impl StaticIdentity {
    /// Identity of a known user. A blank id counts as signed out.
    pub fn new(user: impl Into<UserId>) -> Self {
        let user = user.into();
        Self {
            user: (!user.is_empty()).then_some(user),
        }
    }

    /// No signed-in user.
    pub fn anonymous() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn current_user(&self) -> Option<UserId> {
        self.user.clone()
    }
}
