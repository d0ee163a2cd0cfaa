use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use shared::domain::User;
use tokio::sync::watch;
use tracing::info;

/// A header carrying session credentials. Never placed in a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub header: String,
    pub value: String,
}

impl Credentials {
    pub fn cookie(cookie: impl Into<String>) -> Self {
        Self {
            header: "cookie".to_string(),
            value: cookie.into(),
        }
    }

    pub fn bearer(token: impl AsRef<str>) -> Self {
        Self {
            header: "authorization".to_string(),
            value: format!("Bearer {}", token.as_ref()),
        }
    }
}

/// Session collaborator consulted by both transports.
#[async_trait]
pub trait SessionHandler: Send + Sync {
    fn credentials(&self) -> Option<Credentials>;
    fn current_user(&self) -> Option<User>;
    /// Called once for every 401/403 response.
    async fn on_unauthorized(&self);
}

pub struct NoSession;

#[async_trait]
impl SessionHandler for NoSession {
    fn credentials(&self) -> Option<Credentials> {
        None
    }

    fn current_user(&self) -> Option<User> {
        None
    }

    async fn on_unauthorized(&self) {}
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthState {
    pub user: Option<User>,
    pub is_authenticated: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

/// In-memory auth state with `watch` observers.
///
/// The configured credentials are static: they keep being attached after
/// `on_unauthorized` clears the state, so a later `refresh_session` can
/// re-validate the same cookie once the backend accepts it again.
pub struct SessionStore {
    state: watch::Sender<AuthState>,
    credentials: Option<Credentials>,
}

impl SessionStore {
    pub fn new(credentials: Option<Credentials>) -> Self {
        let (state, _) = watch::channel(AuthState::default());
        Self { state, credentials }
    }

    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    pub fn set_authenticated(&self, user: User, expires_in_secs: Option<i64>) {
        let expires_at = expires_in_secs.map(|secs| Utc::now() + ChronoDuration::seconds(secs));
        info!(user_id = %user.id, "session: authenticated");
        self.state.send_replace(AuthState {
            user: Some(user),
            is_authenticated: true,
            expires_at,
        });
    }

    pub fn clear(&self) {
        self.state.send_replace(AuthState::default());
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.state
            .borrow()
            .expires_at
            .is_some_and(|expires_at| expires_at <= now)
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl SessionHandler for SessionStore {
    fn credentials(&self) -> Option<Credentials> {
        self.credentials.clone()
    }

    fn current_user(&self) -> Option<User> {
        let state = self.state.borrow();
        if state.is_authenticated {
            state.user.clone()
        } else {
            None
        }
    }

    async fn on_unauthorized(&self) {
        let was_authenticated = self.state.borrow().is_authenticated;
        self.clear();
        info!(was_authenticated, "session: cleared after unauthorized response");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::domain::UserId;

    fn user() -> User {
        User {
            id: UserId("u-1".into()),
            email: Some("dev@example.com".into()),
            name: None,
            hh_connected: false,
        }
    }

    #[tokio::test]
    async fn unauthorized_clears_state_and_notifies() {
        let store = SessionStore::default();
        let mut rx = store.subscribe();
        store.set_authenticated(user(), Some(3600));
        assert_eq!(store.current_user(), Some(user()));
        assert!(!store.is_expired(Utc::now()));

        store.on_unauthorized().await;
        rx.changed().await.expect("changed");
        assert!(!rx.borrow().is_authenticated);
        assert_eq!(store.current_user(), None);
    }

    #[tokio::test]
    async fn configured_credentials_survive_unauthorized() {
        let store = SessionStore::new(Some(Credentials::cookie("sid=abc")));
        store.set_authenticated(user(), None);

        store.on_unauthorized().await;
        assert!(!store.state().is_authenticated);
        assert_eq!(store.credentials(), Some(Credentials::cookie("sid=abc")));
    }

    #[test]
    fn expiry_is_relative_to_now() {
        let store = SessionStore::default();
        store.set_authenticated(user(), Some(60));
        assert!(store.is_expired(Utc::now() + ChronoDuration::seconds(61)));
        assert!(!store.is_expired(Utc::now()));
    }

    #[test]
    fn credentials_are_headers() {
        assert_eq!(Credentials::cookie("sid=abc").header, "cookie");
        assert_eq!(Credentials::bearer("t").value, "Bearer t");
        assert_eq!(NoSession.credentials(), None);
    }
}
