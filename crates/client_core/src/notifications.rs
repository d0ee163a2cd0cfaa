//! User-facing notifications derived from server events.

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::protocol::{ServerEvent, WILDCARD_TAG};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::ws::{HandlerRegistration, WsClient};

/// Tokens left at or below which a rate limit warning is raised.
pub const RATE_LIMIT_WARNING_THRESHOLD: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Urgent,
    High,
    Normal,
    Low,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub label: String,
    pub route: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub priority: Priority,
    pub title: String,
    pub message: String,
    pub action: Option<NotificationAction>,
    pub auto_close: bool,
}

impl Notification {
    fn new(level: NotificationLevel, title: impl Into<String>, message: impl Into<String>) -> Self {
        let (priority, auto_close) = match level {
            NotificationLevel::Info => (Priority::Low, true),
            NotificationLevel::Success | NotificationLevel::Warning => (Priority::Normal, true),
            NotificationLevel::Error => (Priority::High, false),
        };
        Self {
            level,
            priority,
            title: title.into(),
            message: message.into(),
            action: None,
            auto_close,
        }
    }

    fn with_action(mut self, label: &str, route: &str) -> Self {
        self.action = Some(NotificationAction {
            label: label.to_string(),
            route: route.to_string(),
        });
        self
    }

    fn sticky(mut self) -> Self {
        self.auto_close = false;
        self
    }

    fn urgent(mut self) -> Self {
        self.priority = Priority::Urgent;
        self.sticky()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NotificationPreferences {
    pub enabled: bool,
    pub notify_on_success: bool,
    pub notify_on_error: bool,
    pub notify_on_warning: bool,
    pub notify_on_interview_request: bool,
    pub notify_on_application_submitted: bool,
    pub notify_on_customization_complete: bool,
    pub notify_on_rate_limit: bool,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            enabled: true,
            notify_on_success: true,
            notify_on_error: true,
            notify_on_warning: true,
            notify_on_interview_request: true,
            notify_on_application_submitted: true,
            notify_on_customization_complete: true,
            notify_on_rate_limit: true,
        }
    }
}

impl NotificationPreferences {
    fn allows(&self, notification: &Notification) -> bool {
        if !self.enabled {
            return false;
        }
        if notification.priority == Priority::Urgent {
            return true;
        }
        match notification.level {
            NotificationLevel::Info => true,
            NotificationLevel::Success => self.notify_on_success,
            NotificationLevel::Warning => self.notify_on_warning,
            NotificationLevel::Error => self.notify_on_error,
        }
    }
}

fn plural(count: u64) -> &'static str {
    if count == 1 {
        ""
    } else {
        "s"
    }
}

fn display_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

fn display_id(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Maps one server event to the notifications it raises under `prefs`.
pub fn notifications_for(
    event: &ServerEvent,
    prefs: &NotificationPreferences,
) -> Vec<Notification> {
    use NotificationLevel::{Error, Info, Success, Warning};

    let mut out = Vec::new();
    match event {
        ServerEvent::CvComplete { data } => {
            if data.success != Some(false) {
                let name = data.filename.as_deref().unwrap_or("Your CV");
                out.push(
                    Notification::new(
                        Success,
                        "CV Uploaded",
                        format!("{name} was uploaded and parsed successfully"),
                    )
                    .with_action("Search Jobs", "/search"),
                );
            } else {
                out.push(Notification::new(
                    Error,
                    "Upload Failed",
                    "Failed to upload CV. Please try again.",
                ));
            }
        }
        ServerEvent::CvError { data } => out.push(Notification::new(
            Error,
            "CV Upload Failed",
            data.error
                .as_deref()
                .unwrap_or("An error occurred while processing your CV"),
        )),
        ServerEvent::CustomizationProgress { data } => {
            if data.status.as_deref() == Some("completed") && prefs.notify_on_customization_complete
            {
                let count = [data.completed, data.total]
                    .into_iter()
                    .flatten()
                    .find(|count| *count > 0)
                    .unwrap_or(1);
                let message = if count == 1 {
                    "Your CV has been customized and is ready to apply".to_string()
                } else {
                    format!("{count} CVs have been customized and are ready to apply")
                };
                out.push(
                    Notification::new(Success, "Customization Complete", message)
                        .with_action("Start Auto-Apply", "/queue"),
                );
            }
        }
        ServerEvent::CustomizationError { data } => out.push(Notification::new(
            Error,
            "Customization Failed",
            data.error.as_deref().unwrap_or("Failed to customize CV"),
        )),
        ServerEvent::ApplicationSubmitted { data } => {
            let title = data.job_title.clone().unwrap_or_else(|| match &data.job_id {
                Some(id) => format!("Job {}", display_id(id)),
                None => "Job".to_string(),
            });
            if prefs.notify_on_application_submitted {
                if data.success != Some(false) {
                    out.push(
                        Notification::new(
                            Success,
                            "Application Submitted",
                            format!("Your application to {title} was submitted successfully"),
                        )
                        .with_action("View Applications", "/applications"),
                    );
                } else {
                    out.push(
                        Notification::new(
                            Error,
                            "Application Failed",
                            format!("Failed to submit application to {title}. Please try again."),
                        )
                        .with_action("View Queue", "/queue"),
                    );
                }
            }
            if data.success != Some(true) {
                if let Some(error) = &data.error {
                    out.push(Notification::new(Error, "Application Error", error.clone()));
                }
            }
        }
        ServerEvent::ApplicationProgress { data } => {
            if data.status.as_deref() == Some("completed") {
                let failed = data.failed.unwrap_or(0);
                let succeeded = data.completed.unwrap_or(0).saturating_sub(failed);
                if succeeded > 0 {
                    out.push(
                        Notification::new(
                            Success,
                            "Auto-Apply Complete",
                            format!(
                                "Successfully submitted {succeeded} application{}",
                                plural(succeeded)
                            ),
                        )
                        .with_action("View Applications", "/applications"),
                    );
                }
                if failed > 0 {
                    out.push(
                        Notification::new(
                            Warning,
                            "Some Applications Failed",
                            format!(
                                "{failed} application{} could not be submitted",
                                plural(failed)
                            ),
                        )
                        .with_action("View Queue", "/queue"),
                    );
                }
            }
        }
        ServerEvent::ApplicationResponse { data } => match data.response_type.as_deref() {
            Some("interview" | "positive") => {
                if prefs.notify_on_interview_request {
                    let job = data.job_title.as_deref().unwrap_or("Position");
                    let company = data.company.as_deref().unwrap_or("Company");
                    out.push(
                        Notification::new(
                            Success,
                            "Interview Request!",
                            format!("{company} wants to interview you for {job}"),
                        )
                        .urgent()
                        .with_action("View Details", "/applications"),
                    );
                }
            }
            Some("rejection" | "negative") => {
                let job = data.job_title.as_deref().unwrap_or("your application");
                out.push(
                    Notification::new(Info, "Application Update", format!("Response received for {job}"))
                        .with_action("View Details", "/applications"),
                );
            }
            _ => {}
        },
        ServerEvent::RateLimitUpdate { data } => {
            if let (Some(tokens), Some(capacity)) = (data.tokens, data.capacity) {
                if prefs.notify_on_rate_limit {
                    if tokens <= RATE_LIMIT_WARNING_THRESHOLD {
                        out.push(
                            Notification::new(
                                Warning,
                                "Rate Limit Warning",
                                format!(
                                    "Only {} of {} applications remaining today",
                                    display_number(tokens),
                                    display_number(capacity)
                                ),
                            )
                            .sticky()
                            .with_action("View Status", "/queue"),
                        );
                    }
                    if tokens == 0.0 {
                        out.push(rate_limit_reached());
                    }
                }
            }
        }
        ServerEvent::RateLimitReached => out.push(rate_limit_reached()),
        ServerEvent::Error { data } => out.push(Notification::new(
            Error,
            data.title.as_deref().unwrap_or("Error"),
            data.error.as_deref().unwrap_or("An error occurred"),
        )),
        ServerEvent::JobQueued { data } => match (data.count, &data.job_title) {
            (Some(count), _) if count > 1 => out.push(
                Notification::new(
                    Success,
                    "Jobs Added to Queue",
                    format!("{count} jobs added to your queue"),
                )
                .with_action("View Queue", "/queue"),
            ),
            (_, Some(title)) => out.push(Notification::new(
                Success,
                "Job Added",
                format!("{title} added to your queue"),
            )),
            _ => {}
        },
        ServerEvent::Connected { .. }
        | ServerEvent::Subscribed { .. }
        | ServerEvent::NewJobs { .. }
        | ServerEvent::Echo { .. }
        | ServerEvent::Unrecognized => {}
    }

    out.retain(|notification| prefs.allows(notification));
    out
}

fn rate_limit_reached() -> Notification {
    Notification::new(
        NotificationLevel::Error,
        "Rate Limit Reached",
        "Daily application limit reached. Applications will resume tomorrow.",
    )
}

/// Turns socket traffic into a stream of notifications.
pub struct NotificationCenter {
    preferences: Arc<Mutex<NotificationPreferences>>,
    sender: broadcast::Sender<Notification>,
    registration: Mutex<Option<HandlerRegistration>>,
}

impl NotificationCenter {
    pub fn new(preferences: NotificationPreferences) -> Self {
        let (sender, _) = broadcast::channel(256);
        Self {
            preferences: Arc::new(Mutex::new(preferences)),
            sender,
            registration: Mutex::new(None),
        }
    }

    pub fn preferences(&self) -> NotificationPreferences {
        self.preferences
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_preferences(&self, preferences: NotificationPreferences) {
        *self
            .preferences
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = preferences;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    /// Listens to every frame on `ws`. Re-attaching replaces the old handler.
    pub fn attach(&self, ws: &WsClient) {
        let preferences = Arc::clone(&self.preferences);
        let sender = self.sender.clone();
        let registration = ws.on(WILDCARD_TAG, move |message| {
            let event = match message.to_event() {
                Ok(event) => event,
                Err(err) => {
                    warn!(kind = %message.kind, error = %err, "notifications: undecodable event");
                    return;
                }
            };
            let prefs = preferences
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            for notification in notifications_for(&event, &prefs) {
                debug!(title = %notification.title, "notifications: raised");
                let _ = sender.send(notification);
            }
        });

        let previous = self
            .registration
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(registration);
        if let Some(previous) = previous {
            previous.unregister();
        }
    }

    pub fn detach(&self) {
        let registration = self
            .registration
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(registration) = registration {
            registration.unregister();
        }
    }
}

impl Default for NotificationCenter {
    fn default() -> Self {
        Self::new(NotificationPreferences::default())
    }
}

#[cfg(test)]
#[path = "tests/notifications_tests.rs"]
mod tests;
