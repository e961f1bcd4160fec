use thiserror::Error;

#[derive(Debug, Error)]
pub(super) enum BotError {
    #[error("file host responded with {status}: {body}")]
    Remote { status: u16, body: String },
    #[error("source download failed: {0}")]
    Transfer(String),
    #[error("{0}")]
    Validation(String),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unexpected response from file host: {0}")]
    Decode(String),
}

impl BotError {
    pub(super) fn validation(message: impl Into<String>) -> Self {
        BotError::Validation(message.into())
    }

    pub(super) fn user_message(&self) -> Option<&str> {
        match self {
            BotError::Validation(message) => Some(message),
            _ => None,
        }
    }
}
