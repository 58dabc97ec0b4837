use thiserror::Error;

use crate::models::order::OrderId;

#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("invalid tracking state: {0}")]
    InvalidCandidate(String),

    #[error("invalid chat message: {0}")]
    InvalidMessage(String),

    #[error("order {0} is not being tracked")]
    NotTracked(OrderId),

    #[error("connection to {endpoint} failed: {message}")]
    Connect { endpoint: String, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("tracking api returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid url: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("notification scheduling failed: {0}")]
    Notification(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl TrackingError {
    /// Whether the same operation may succeed if attempted again later.
    pub fn is_retryable(&self) -> bool {
        match self {
            TrackingError::Http(_)
            | TrackingError::Connect { .. }
            | TrackingError::Transport(_) => true,
            TrackingError::Api { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}
