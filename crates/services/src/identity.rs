use quiz_core::model::UserId;

/// Source of the authenticated user, if any.
pub trait IdentityProvider: Send + Sync {
    fn current_user_id(&self) -> Option<UserId>;
}

/// Identity fixed at construction; `None` means nobody is signed in.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    user: Option<UserId>,
}

impl StaticIdentity {
    #[must_use]
    pub fn new(user: Option<UserId>) -> Self {
        Self { user }
    }

    #[must_use]
    pub fn signed_in(user: UserId) -> Self {
        Self { user: Some(user) }
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_user_id(&self) -> Option<UserId> {
        self.user.clone()
    }
}

/// Current user, or the shared anonymous pseudo-user.
#[must_use]
pub fn resolve_user(identity: &dyn IdentityProvider) -> UserId {
    identity.current_user_id().unwrap_or_else(UserId::anonymous)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_identity_is_anonymous() {
        let user = resolve_user(&StaticIdentity::default());
        assert!(user.is_anonymous());
    }

    #[test]
    fn signed_in_identity_is_used() {
        let user = resolve_user(&StaticIdentity::signed_in(UserId::new("ana")));
        assert_eq!(user, UserId::new("ana"));
    }
}
