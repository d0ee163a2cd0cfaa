use thiserror::Error;

pub use shared::error::{ApiError, ErrorKind};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid url '{url}': {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },
    #[error("unsupported websocket scheme '{0}'")]
    UnsupportedScheme(String),
    #[error("invalid value '{value}' for {key}")]
    InvalidEnv { key: String, value: String },
    #[error("invalid config file: {0}")]
    Toml(#[from] toml::de::Error),
}

#[derive(Debug, Error)]
pub enum WsError {
    #[error("websocket client was destroyed")]
    Destroyed,
}
