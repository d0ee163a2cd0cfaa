use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const CODE_NETWORK_ERROR: &str = "NETWORK_ERROR";
pub const CODE_TIMEOUT: &str = "TIMEOUT";
pub const CODE_REQUEST_CANCELLED: &str = "REQUEST_CANCELLED";
pub const CODE_UNKNOWN_ERROR: &str = "UNKNOWN_ERROR";
pub const CODE_PARSE_ERROR: &str = "PARSE_ERROR";
pub const CODE_INTERCEPTOR_ERROR: &str = "INTERCEPTOR_ERROR";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Timeout,
    Auth,
    Validation,
    Server,
    Unknown,
}

impl ErrorKind {
    /// Classifies an HTTP status. `0` means the request never reached a server.
    pub fn from_status(status: u16) -> Self {
        match status {
            0 => Self::Network,
            401 | 403 => Self::Auth,
            400 | 422 => Self::Validation,
            s if s >= 500 => Self::Server,
            _ => Self::Unknown,
        }
    }

    pub fn is_transient(self) -> bool {
        matches!(self, Self::Network | Self::Server)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Network => "network error",
            Self::Timeout => "timeout",
            Self::Auth => "auth error",
            Self::Validation => "validation error",
            Self::Server => "server error",
            Self::Unknown => "unknown error",
        };
        f.write_str(label)
    }
}

/// Error body shape accepted from the backend: `{code?, message?|error?, details?}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub details: Option<Value>,
}

/// Classified API failure.
///
/// Values only come out of the classification constructors below, so `kind`
/// always agrees with `status`. Interceptors may rewrite the message or the
/// details but have no way to change either of those two.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("{kind}: {message}")]
pub struct ApiError {
    kind: ErrorKind,
    status: Option<u16>,
    code: String,
    message: String,
    details: Option<Value>,
}

impl ApiError {
    /// Body-sniffing classifier for a non-2xx response.
    pub fn from_response(status: u16, body: &[u8]) -> Self {
        let parsed = if body.iter().all(u8::is_ascii_whitespace) {
            None
        } else {
            serde_json::from_slice::<ErrorBody>(body).ok()
        };
        let ErrorBody {
            code,
            message,
            error,
            details,
        } = parsed.unwrap_or_else(|| ErrorBody {
            code: Some(CODE_UNKNOWN_ERROR.to_string()),
            message: Some(format!("Request failed with status {status}")),
            ..ErrorBody::default()
        });

        Self {
            kind: ErrorKind::from_status(status),
            status: Some(status),
            code: code
                .filter(|code| !code.is_empty())
                .unwrap_or_else(|| CODE_UNKNOWN_ERROR.to_string()),
            message: message
                .or(error)
                .filter(|message| !message.is_empty())
                .unwrap_or_else(|| format!("HTTP {status}")),
            details,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: ErrorKind::Network,
            status: Some(0),
            code: CODE_NETWORK_ERROR.to_string(),
            message: if message.is_empty() {
                "Network request failed".to_string()
            } else {
                message
            },
            details: None,
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self {
            kind: ErrorKind::Timeout,
            status: None,
            code: CODE_TIMEOUT.to_string(),
            message: format!("Request timed out after {}ms", after.as_millis()),
            details: None,
        }
    }

    /// Caller-initiated abort. Aborts share the timeout classification.
    pub fn cancelled() -> Self {
        Self {
            kind: ErrorKind::Timeout,
            status: None,
            code: CODE_REQUEST_CANCELLED.to_string(),
            message: "Request was cancelled".to_string(),
            details: None,
        }
    }

    pub fn unknown(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Unknown,
            status: None,
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn parse(err: &serde_json::Error) -> Self {
        Self::unknown(CODE_PARSE_ERROR, format!("invalid response body: {err}"))
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> Option<&Value> {
        self.details.as_ref()
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn is_network_error(&self) -> bool {
        self.kind == ErrorKind::Network
    }

    pub fn is_auth_error(&self) -> bool {
        self.kind == ErrorKind::Auth
    }

    pub fn is_validation_error(&self) -> bool {
        self.kind == ErrorKind::Validation
    }

    pub fn is_server_error(&self) -> bool {
        self.kind == ErrorKind::Server
    }

    /// Text suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self.kind {
            ErrorKind::Network => "Network error. Please check your connection.".to_string(),
            ErrorKind::Auth => "Authentication required. Please log in.".to_string(),
            ErrorKind::Server => "Server error. Please try again later.".to_string(),
            _ => self.message.clone(),
        }
    }
}
