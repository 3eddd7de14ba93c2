use std::sync::RwLock;

use crate::backend::MaybeSendSync;

/// Source of the acting identity.
///
/// Only the user id is required; the email is carried for display and audit.
pub trait IdentityProvider: MaybeSendSync {
    fn current_user_id(&self) -> Option<String>;

    fn current_user_email(&self) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone)]
struct SignedInUser {
    id: String,
    email: Option<String>,
}

/// Identity held in memory, switchable at runtime (sign in / sign out).
#[derive(Debug, Default)]
pub struct SessionIdentity {
    user: RwLock<Option<SignedInUser>>,
}

impl SessionIdentity {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn signed_in(user_id: impl Into<String>) -> Self {
        let identity = Self::default();
        identity.sign_in(user_id, None);
        identity
    }

    pub fn sign_in(&self, user_id: impl Into<String>, email: Option<String>) {
        let mut user = self.user.write().unwrap_or_else(|e| e.into_inner());
        *user = Some(SignedInUser {
            id: user_id.into(),
            email,
        });
    }

    pub fn sign_out(&self) {
        let mut user = self.user.write().unwrap_or_else(|e| e.into_inner());
        *user = None;
    }
}

impl IdentityProvider for SessionIdentity {
    fn current_user_id(&self) -> Option<String> {
        let user = self.user.read().unwrap_or_else(|e| e.into_inner());
        user.as_ref().map(|u| u.id.clone())
    }

    fn current_user_email(&self) -> Option<String> {
        let user = self.user.read().unwrap_or_else(|e| e.into_inner());
        user.as_ref().and_then(|u| u.email.clone())
    }
}
