//! Identity signal consumed by the persistence cells.
//!
//! The [`IdentityProvider`] stands in for the authentication wrapper: it only
//! exposes "current user id or none" plus login/logout, published over a
//! `tokio::sync::watch` channel so any number of cells can follow it.
use std::fmt::Display;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Identifier of an authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who is using the application right now.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Identity {
    #[default]
    Anonymous,
    User(UserId),
}

impl Identity {
    pub fn user_id(&self) -> Option<&UserId> {
        match self {
            Identity::Anonymous => None,
            Identity::User(u) => Some(u),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Identity::Anonymous)
    }
}

impl From<Option<UserId>> for Identity {
    fn from(user: Option<UserId>) -> Self {
        user.map_or(Identity::Anonymous, Identity::User)
    }
}

impl Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Identity::Anonymous => write!(f, "anonymous"),
            Identity::User(u) => write!(f, "user:{}", u),
        }
    }
}

/// Value published on the identity channel.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Session {
    pub identity: Identity,
    /// Incremented on every anonymous -> authenticated transition, never otherwise.
    pub login_seq: u64,
}

/// Publishes identity changes to every subscribed cell.
#[derive(Debug)]
pub struct IdentityProvider {
    tx: watch::Sender<Session>,
}

impl Default for IdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityProvider {
    /// Creates a provider with an anonymous session.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Session::default());
        Self { tx }
    }

    /// Creates a provider that starts out authenticated as `user`.
    pub fn signed_in(user: UserId) -> Self {
        let (tx, _rx) = watch::channel(Session {
            identity: Identity::User(user),
            login_seq: 0,
        });
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> Session {
        self.tx.borrow().clone()
    }

    /// Signs `user` in. Re-signing the current user (token refresh) publishes nothing.
    pub fn login(&self, user: impl Into<UserId>) {
        let user = user.into();
        self.tx.send_if_modified(|session| match &session.identity {
            Identity::User(current) if *current == user => false,
            Identity::User(_) => {
                session.identity = Identity::User(user);
                true
            }
            Identity::Anonymous => {
                session.identity = Identity::User(user);
                session.login_seq += 1;
                true
            }
        });
    }

    pub fn logout(&self) {
        self.tx.send_if_modified(|session| {
            if session.identity.is_anonymous() {
                return false;
            }
            session.identity = Identity::Anonymous;
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_bumps_sequence_only_from_anonymous() {
        let provider = IdentityProvider::new();
        assert_eq!(provider.current(), Session::default());

        provider.login("u1");
        assert_eq!(provider.current().login_seq, 1);

        provider.login("u2");
        let s = provider.current();
        assert_eq!(s.identity, Identity::User("u2".into()));
        assert_eq!(s.login_seq, 1);

        provider.logout();
        provider.login("u2");
        assert_eq!(provider.current().login_seq, 2);
    }

    #[tokio::test]
    async fn token_refresh_does_not_notify() {
        let provider = IdentityProvider::new();
        let mut rx = provider.subscribe();

        provider.login("u1");
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        provider.login("u1");
        assert!(!rx.has_changed().unwrap());

        provider.logout();
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().identity.is_anonymous());

        provider.logout();
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn identity_display_and_conversion() {
        assert_eq!(Identity::from(None).to_string(), "anonymous");
        let id = Identity::from(Some(UserId::new("user-42")));
        assert_eq!(id.to_string(), "user:user-42");
        assert_eq!(id.user_id().map(UserId::as_str), Some("user-42"));
    }
}
