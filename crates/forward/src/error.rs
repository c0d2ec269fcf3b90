use crate::platform::{PlatformError, ProtocolFault};

/// Errors that end a run cycle. Item-level failures never surface here.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Platform(#[from] PlatformError),

    /// The cursor store is unavailable; nothing can be delivered safely.
    #[error("cursor store failed: {0}")]
    Store(#[from] chanrelay_cursor::Error),

    #[error("invalid configuration: {message}")]
    Config { message: String },

    /// The platform's push stream ended.
    #[error("live event stream closed")]
    StreamClosed,

    #[error("forwarding queue closed")]
    QueueClosed,

    #[error("task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn config(message: impl std::fmt::Display) -> Self {
        Self::Config {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn platform_error(&self) -> Option<&PlatformError> {
        match self {
            Self::Platform(e) => Some(e),
            _ => None,
        }
    }

    /// Credentials were rejected. Retrying cannot help.
    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Platform(PlatformError::Auth { .. }))
    }

    /// The protocol fault class that counts toward a session reset.
    #[must_use]
    pub fn is_stale_session(&self) -> bool {
        matches!(
            self,
            Self::Platform(PlatformError::Protocol {
                fault: ProtocolFault::StaleSession,
                ..
            })
        )
    }
}

impl chanrelay_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

chanrelay_common::impl_context!();

pub type Result<T> = std::result::Result<T, Error>;
