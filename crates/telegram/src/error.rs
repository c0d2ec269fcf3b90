use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Telegram(#[from] teloxide::RequestError),

    #[error("building the HTTP client failed: {message}")]
    Client { message: String },

    #[error("invalid Bot API url {url:?}: {message}")]
    InvalidApiUrl { url: String, message: String },

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
