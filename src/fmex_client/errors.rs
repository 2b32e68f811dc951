use serde::Deserialize;
use serde_json::Value;

/// Result type used by the REST layer.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned while signing, sending or decoding REST calls.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration validation failure raised while building the client.
    #[error("invalid config: {field}: {why}")]
    InvalidConfig {
        field: &'static str,
        why: &'static str,
    },
    /// The HMAC key could not be constructed from the secret.
    #[error("signing error: {0}")]
    Signing(String),
    /// Requests were rate limited, either locally or by the server.
    #[error("rate limited: retry after {retry_after:?}s")]
    RateLimited { retry_after: Option<u64> },
    /// Structured error envelope returned by the venue.
    #[error("server error {status}: {message}")]
    Server {
        status: u16,
        message: String,
        code: Option<i64>,
        body: Value,
    },
    /// Raw HTTP error when no structured error could be parsed.
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Plain connectivity trouble (refused connection, timeout). These are
    /// expected during network blips and are not worth an error log.
    pub fn is_connectivity(&self) -> bool {
        match self {
            Error::Transport(err) => err.is_connect() || err.is_timeout(),
            _ => false,
        }
    }

    /// HTTP status and error body when the venue answered with a rejection.
    pub fn rejection(&self) -> Option<(u16, Value)> {
        match self {
            Error::Server { status, body, .. } => Some((*status, body.clone())),
            Error::Http { status, body } => Some((*status, Value::String(body.clone()))),
            Error::RateLimited { .. } => Some((429, Value::Null)),
            _ => None,
        }
    }
}

/// Error envelope: `{"status": <non-zero>, "msg": "..."}`.
#[derive(Debug, Deserialize)]
pub(crate) struct ServerErr {
    #[serde(default)]
    pub(crate) status: Option<i64>,
    #[serde(default, alias = "message")]
    pub(crate) msg: Option<String>,
    #[serde(default)]
    pub(crate) retry_after: Option<u64>,
}
