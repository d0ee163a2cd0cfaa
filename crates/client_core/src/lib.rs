use std::sync::Arc;

use matching::{MatchScore, SkillMatcher};
use shared::domain::JobItem;
use tracing::info;

pub mod api;
pub mod config;
pub mod error;
pub mod feed;
pub mod http;
pub mod notifications;
pub mod optimistic;
pub mod session;
pub mod transport;
pub mod ws;

pub use config::{load_settings, Settings};
pub use error::{ApiError, ConfigError, ErrorKind, WsError};
pub use feed::{JobFeed, ScoredJob, FEED_CAPACITY};
pub use http::{HttpClient, MultipartForm, RequestDescriptor, ResponseBody};
pub use notifications::{Notification, NotificationCenter, NotificationPreferences};
pub use optimistic::OptimisticStore;
pub use session::{AuthState, Credentials, SessionHandler, SessionStore};
pub use transport::{HttpTransport, ReqwestTransport};
pub use ws::{WsClient, WsEvent, WsFault, WsOptions, WsStatus};

/// Everything a front end needs, built once from [`Settings`].
pub struct AppContext {
    settings: Settings,
    session: Arc<SessionStore>,
    http: HttpClient,
    ws: WsClient,
    feed: JobFeed,
    notifications: NotificationCenter,
    matcher: SkillMatcher,
}

impl AppContext {
    pub fn new(settings: Settings) -> Result<Self, ConfigError> {
        Self::new_with_transport(settings, Arc::new(ReqwestTransport::new()))
    }

    pub fn new_with_transport(
        settings: Settings,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, ConfigError> {
        settings.api_base()?;
        let ws_options = WsOptions::from_settings(&settings)?;
        let session = Arc::new(SessionStore::new(
            settings.session_cookie.clone().map(Credentials::cookie),
        ));
        let http = HttpClient::with_transport(&settings, transport, session.clone());
        let ws = WsClient::new(ws_options, session.clone());
        Ok(Self {
            settings,
            session,
            http,
            ws,
            feed: JobFeed::new(),
            notifications: NotificationCenter::default(),
            matcher: SkillMatcher::default(),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    pub fn ws(&self) -> &WsClient {
        &self.ws
    }

    pub fn feed(&self) -> &JobFeed {
        &self.feed
    }

    pub fn notifications(&self) -> &NotificationCenter {
        &self.notifications
    }

    /// Wires the feed and notifications to the socket, then connects it.
    pub fn start_realtime(&self) -> Result<(), WsError> {
        self.feed.attach(&self.ws);
        self.notifications.attach(&self.ws);
        self.ws.connect()?;
        info!(client_id = %self.ws.client_id(), "app: realtime started");
        Ok(())
    }

    pub fn stop_realtime(&self) {
        self.feed.detach();
        self.notifications.detach();
        self.ws.disconnect();
    }

    pub fn match_score(&self, cv_skills: &[String], job: &JobItem) -> MatchScore {
        self.matcher.score(cv_skills, &job.skills)
    }

    pub fn scored_feed(&self, cv_skills: &[String]) -> Vec<ScoredJob> {
        self.feed.scored(&self.matcher, cv_skills)
    }
}

impl Drop for AppContext {
    fn drop(&mut self) {
        self.ws.destroy();
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
