use thiserror::Error;

/// Every failure a datachat operation can report, from bad input to a broken
/// response stream. Foreign errors without a variant of their own land in `Other`.
#[derive(Debug, Error)]
pub enum DataChatError {
    #[error("validation failed: {0}")]
    Validation(String),

    /// No dataset key is available; a file must be uploaded first.
    #[error("dataset key not found, upload a file first")]
    MissingKey,

    /// `message` is the backend's own error text, when it sent one.
    #[error("rate limited by backend{}", detail(.message))]
    RateLimited {
        retry_after: Option<u64>,
        message: Option<String>,
    },

    #[error("backend unavailable: {endpoint}{}", detail(.message))]
    Unavailable {
        endpoint: String,
        message: Option<String>,
    },

    #[error("backend returned HTTP {code}: {message}")]
    Http { code: String, message: String },

    /// The response body failed mid-stream.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid UTF-8 in response stream: {0}")]
    Decode(String),

    #[error("payload after completion marker never parsed: {0}")]
    MarkerJson(String),

    #[error("stream closed without a completion marker")]
    MissingMarker,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DataChatError {
    /// True for the request/status/body failures of the HTTP exchange.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Unavailable { .. } | Self::Http { .. } | Self::Transport(_)
        )
    }
}

fn detail(message: &Option<String>) -> String {
    message.as_deref().map(|m| format!(": {m}")).unwrap_or_default()
}

pub type CoreResult<T> = std::result::Result<T, DataChatError>;
