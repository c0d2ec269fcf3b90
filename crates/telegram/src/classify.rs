//! Mapping of Bot API failures onto the pipeline's error classes.

use {
    chanrelay_forward::{PlatformError, ProtocolFault},
    teloxide::{ApiError, RequestError},
};

/// Classify a failed Bot API request.
#[must_use]
pub fn classify(error: &RequestError) -> PlatformError {
    match error {
        RequestError::RetryAfter(wait) => PlatformError::rate_limited(wait.duration()),
        RequestError::Api(api) => classify_api(api),
        RequestError::Network(e) => PlatformError::transport(e),
        RequestError::Io(e) => PlatformError::transport(e),
        // A keep-alive connection that went stale hands back garbage.
        RequestError::InvalidJson { .. } => {
            PlatformError::protocol(ProtocolFault::StaleSession, error)
        },
        RequestError::MigrateToChatId(chat) => {
            PlatformError::other(format!("chat migrated to {}", chat.0))
        },
        other => PlatformError::other(other),
    }
}

fn classify_api(error: &ApiError) -> PlatformError {
    match error {
        ApiError::InvalidToken => PlatformError::auth(error),
        ApiError::TerminatedByOtherGetUpdates => {
            PlatformError::protocol(ProtocolFault::Other, error)
        },
        ApiError::BotBlocked
        | ApiError::BotKicked
        | ApiError::BotKickedFromSupergroup
        | ApiError::ChatNotFound
        | ApiError::NotEnoughRightsToPostMessages => PlatformError::permission_denied(error),
        ApiError::Unknown(description) if is_forbidden(description) => {
            PlatformError::permission_denied(description)
        },
        other => PlatformError::other(other),
    }
}

fn is_forbidden(description: &str) -> bool {
    let lower = description.to_ascii_lowercase();
    lower.starts_with("forbidden")
        || lower.contains("not enough rights")
        || lower.contains("administrator rights")
}
