use std::{fs, path::Path, time::Duration};

use anyhow::Context;
use serde::Deserialize;
use url::Url;

use crate::error::ConfigError;

pub const DEFAULT_CONFIG_PATH: &str = "client.toml";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub api_url: String,
    pub ws_url: String,
    pub client_id: Option<String>,
    pub session_cookie: Option<String>,
    pub request_timeout: Duration,
    pub retries: u32,
    pub retry_delay: Duration,
    pub retry_on_timeout: bool,
    pub auto_reconnect: bool,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:3000".into(),
            ws_url: "ws://localhost:3000".into(),
            client_id: None,
            session_cookie: None,
            request_timeout: Duration::from_secs(30),
            retries: 3,
            retry_delay: Duration::from_secs(1),
            retry_on_timeout: false,
            auto_reconnect: true,
            max_reconnect_attempts: 5,
            reconnect_delay: Duration::from_millis(3000),
            max_reconnect_delay: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSettings {
    api_url: Option<String>,
    ws_url: Option<String>,
    client_id: Option<String>,
    session_cookie: Option<String>,
    request_timeout_ms: Option<u64>,
    retries: Option<u32>,
    retry_delay_ms: Option<u64>,
    retry_on_timeout: Option<bool>,
    auto_reconnect: Option<bool>,
    max_reconnect_attempts: Option<u32>,
    reconnect_delay_ms: Option<u64>,
    max_reconnect_delay_ms: Option<u64>,
}

impl Settings {
    /// Layers a `client.toml` document over the defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let file: FileSettings = toml::from_str(raw)?;
        let mut settings = Self::default();
        if let Some(v) = file.api_url {
            settings.api_url = v;
        }
        if let Some(v) = file.ws_url {
            settings.ws_url = v;
        }
        settings.client_id = file.client_id.or(settings.client_id);
        settings.session_cookie = file.session_cookie.or(settings.session_cookie);
        if let Some(v) = file.request_timeout_ms {
            settings.request_timeout = Duration::from_millis(v);
        }
        if let Some(v) = file.retries {
            settings.retries = v;
        }
        if let Some(v) = file.retry_delay_ms {
            settings.retry_delay = Duration::from_millis(v);
        }
        if let Some(v) = file.retry_on_timeout {
            settings.retry_on_timeout = v;
        }
        if let Some(v) = file.auto_reconnect {
            settings.auto_reconnect = v;
        }
        if let Some(v) = file.max_reconnect_attempts {
            settings.max_reconnect_attempts = v;
        }
        if let Some(v) = file.reconnect_delay_ms {
            settings.reconnect_delay = Duration::from_millis(v);
        }
        if let Some(v) = file.max_reconnect_delay_ms {
            settings.max_reconnect_delay = Duration::from_millis(v);
        }
        Ok(settings)
    }

    /// Applies environment overrides. `lookup` is `std::env::var` in production.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |keys: &[&str]| keys.iter().find_map(|key| lookup(*key));

        if let Some(v) = first(&["APP__API_URL", "API_URL"]) {
            self.api_url = v;
        }
        if let Some(v) = first(&["APP__WS_URL", "WS_URL"]) {
            self.ws_url = v;
        }
        if let Some(v) = first(&["APP__CLIENT_ID"]) {
            self.client_id = Some(v);
        }
        if let Some(v) = first(&["APP__SESSION_COOKIE"]) {
            self.session_cookie = Some(v);
        }
        if let Some(v) = first(&["APP__REQUEST_TIMEOUT_MS"]) {
            self.request_timeout = Duration::from_millis(parse_env("APP__REQUEST_TIMEOUT_MS", &v)?);
        }
        if let Some(v) = first(&["APP__RETRIES"]) {
            self.retries = parse_env("APP__RETRIES", &v)?;
        }
        if let Some(v) = first(&["APP__RETRY_DELAY_MS"]) {
            self.retry_delay = Duration::from_millis(parse_env("APP__RETRY_DELAY_MS", &v)?);
        }
        if let Some(v) = first(&["APP__AUTO_RECONNECT"]) {
            self.auto_reconnect = parse_env("APP__AUTO_RECONNECT", &v)?;
        }
        if let Some(v) = first(&["APP__MAX_RECONNECT_ATTEMPTS"]) {
            self.max_reconnect_attempts = parse_env("APP__MAX_RECONNECT_ATTEMPTS", &v)?;
        }
        if let Some(v) = first(&["APP__RECONNECT_DELAY_MS"]) {
            self.reconnect_delay =
                Duration::from_millis(parse_env("APP__RECONNECT_DELAY_MS", &v)?);
        }
        Ok(())
    }

    /// Socket endpoint: `http(s)` becomes `ws(s)` and the path gains `/ws`.
    pub fn ws_endpoint(&self) -> Result<Url, ConfigError> {
        let raw = self.ws_url.trim();
        let raw = if let Some(rest) = raw.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = raw.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            raw.to_string()
        };

        let mut url = Url::parse(&raw).map_err(|source| ConfigError::InvalidUrl {
            url: raw.clone(),
            source,
        })?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ConfigError::UnsupportedScheme(url.scheme().to_string()));
        }
        if !url.path().trim_end_matches('/').ends_with("/ws") {
            let path = format!("{}/ws", url.path().trim_end_matches('/'));
            url.set_path(&path);
        }
        Ok(url)
    }

    pub fn api_base(&self) -> Result<Url, ConfigError> {
        Url::parse(self.api_url.trim()).map_err(|source| ConfigError::InvalidUrl {
            url: self.api_url.clone(),
            source,
        })
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Defaults, then the config file (if present), then the environment.
pub fn load_settings() -> anyhow::Result<Settings> {
    let path = std::env::var("APP__CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let mut settings = load_settings_file(Path::new(&path))?;
    settings
        .apply_env(|key| std::env::var(key).ok())
        .context("invalid environment override")?;
    Ok(settings)
}

fn load_settings_file(path: &Path) -> anyhow::Result<Settings> {
    if !path.exists() {
        return Ok(Settings::default());
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file '{}'", path.display()))?;
    Settings::from_toml_str(&raw)
        .with_context(|| format!("failed to parse config file '{}'", path.display()))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
