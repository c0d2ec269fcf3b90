use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// A stored value does not fit the cursor domain.
    #[error("corrupt cursor for {source_key}: {value}")]
    Corrupt { source_key: String, value: i64 },

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

    #[must_use]
    pub fn corrupt(source_key: impl Into<String>, value: i64) -> Self {
        Self::Corrupt {
            source_key: source_key.into(),
            value,
        }
    }
}

impl chanrelay_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

chanrelay_common::impl_context!();

pub type Result<T> = std::result::Result<T, Error>;
