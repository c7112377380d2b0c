use std::sync::RwLock;

use async_trait::async_trait;

use crate::domain::user::CurrentUser;
use crate::infra::IdentityProvider;

/// The account signed in on this device, if any.
#[derive(Debug, Default)]
pub struct SessionIdentity {
    user: RwLock<Option<CurrentUser>>,
}

impl SessionIdentity {
    pub fn new(user: Option<CurrentUser>) -> Self {
        Self {
            user: RwLock::new(user),
        }
    }

    pub fn sign_in(&self, user: CurrentUser) {
        tracing::info!(user_id = %user.id, "signed in");
        *self.user.write().unwrap_or_else(|err| err.into_inner()) = Some(user);
    }

    pub fn sign_out(&self) {
        *self.user.write().unwrap_or_else(|err| err.into_inner()) = None;
    }
}

#[async_trait]
impl IdentityProvider for SessionIdentity {
    async fn current_user(&self) -> Option<CurrentUser> {
        self.user
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .clone()
    }
}
