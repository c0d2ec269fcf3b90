/// Config schema types (channels, store, telegram, forwarding, supervisor, metrics).
use std::time::Duration;

use {
    chanrelay_common::{SourceChannel, TargetChannel},
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Channel every event is copied to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetChannel>,
    /// Channels events are copied from, in configured order.
    pub sources: Vec<SourceChannel>,
    pub store: StoreConfig,
    pub telegram: TelegramConfig,
    pub forwarding: ForwardingConfig,
    pub supervisor: SupervisorConfig,
    pub metrics: MetricsConfig,
}

impl RelayConfig {
    /// Sources with duplicates removed, keeping first occurrence order.
    #[must_use]
    pub fn unique_sources(&self) -> Vec<SourceChannel> {
        let mut seen = std::collections::HashSet::new();
        self.sources
            .iter()
            .filter(|s| seen.insert((*s).clone()))
            .cloned()
            .collect()
    }
}

/// Cursor persistence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// sqlx SQLite URL. Defaults to `<data dir>/chanrelay.db`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Telegram Bot API credentials and polling settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Bot token from @BotFather.
    #[serde(serialize_with = "serialize_secret")]
    pub token: Secret<String>,
    /// Bot API base URL override (self-hosted Bot API servers, tests).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    /// Long-polling timeout passed to `getUpdates`.
    pub poll_timeout_secs: u32,
}

impl TelegramConfig {
    #[must_use]
    pub fn has_token(&self) -> bool {
        !self.token.expose_secret().trim().is_empty()
    }
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("token", &"[REDACTED]")
            .field("api_url", &self.api_url)
            .field("poll_timeout_secs", &self.poll_timeout_secs)
            .finish()
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token: Secret::new(String::new()),
            api_url: None,
            poll_timeout_secs: 30,
        }
    }
}

fn serialize_secret<S: serde::Serializer>(
    secret: &Secret<String>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

/// What catch-up does for a source that has no cursor yet.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NewSourcePolicy {
    /// Record the newest event as the cursor and deliver nothing.
    #[default]
    SkipBacklog,
    /// Deliver up to `backfill_window` of the most recent events.
    Backfill,
}

/// Queue, worker and catch-up tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwardingConfig {
    /// Number of delivery workers. Sources are sharded across workers.
    pub workers: usize,
    pub new_source: NewSourcePolicy,
    /// Events replayed for a new source under `backfill`.
    pub backfill_window: u32,
    /// Events requested per history page during catch-up.
    pub history_page_size: u32,
    /// Retries after the first transport failure before the item is skipped,
    /// so an item gets at most `transport_retry_limit + 1` attempts.
    pub transport_retry_limit: u32,
    /// Wait between transport retries.
    pub transport_retry_delay_secs: u64,
}

impl ForwardingConfig {
    #[must_use]
    pub fn transport_retry_delay(&self) -> Duration {
        Duration::from_secs(self.transport_retry_delay_secs)
    }
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            new_source: NewSourcePolicy::default(),
            backfill_window: 100,
            history_page_size: 100,
            transport_retry_limit: 5,
            transport_retry_delay_secs: 30,
        }
    }
}

/// Reconnect policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Wait before reconnecting after a fatal error.
    pub backoff_secs: u64,
    /// Consecutive stale-session faults before the session is reset.
    pub session_reset_threshold: u32,
}

impl SupervisorConfig {
    #[must_use]
    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            backoff_secs: 5,
            session_reset_threshold: 5,
        }
    }
}

/// Metrics export.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// Address for the `/metrics` and `/status` endpoints, e.g. `127.0.0.1:9464`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen: Option<String>,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, chanrelay_common::ChannelRef};

    #[test]
    fn defaults() {
        let cfg = RelayConfig::default();
        assert!(cfg.target.is_none());
        assert!(cfg.sources.is_empty());
        assert_eq!(cfg.forwarding.workers, 1);
        assert_eq!(cfg.forwarding.new_source, NewSourcePolicy::SkipBacklog);
        assert_eq!(cfg.forwarding.transport_retry_delay(), Duration::from_secs(30));
        assert_eq!(cfg.supervisor.backoff(), Duration::from_secs(5));
        assert_eq!(cfg.supervisor.session_reset_threshold, 5);
        assert!(!cfg.telegram.has_token());
    }

    #[test]
    fn deserialize_from_toml() {
        let raw = r#"
target = -1001
sources = ["-1002", "@News"]

[forwarding]
new_source = "backfill"
backfill_window = 20

[telegram]
token = "123:ABC"
"#;
        let cfg: RelayConfig = toml::from_str(raw).unwrap();
        assert_eq!(cfg.target, Some(ChannelRef::Id(-1001)));
        assert_eq!(cfg.sources, vec![
            ChannelRef::Id(-1002),
            ChannelRef::Handle("news".into())
        ]);
        assert_eq!(cfg.forwarding.new_source, NewSourcePolicy::Backfill);
        assert_eq!(cfg.forwarding.backfill_window, 20);
        // untouched fields keep defaults
        assert_eq!(cfg.forwarding.history_page_size, 100);
        assert_eq!(cfg.telegram.token.expose_secret(), "123:ABC");
    }

    #[test]
    fn debug_redacts_token() {
        let cfg = TelegramConfig {
            token: Secret::new("super-secret".into()),
            ..Default::default()
        };
        let dbg = format!("{cfg:?}");
        assert!(!dbg.contains("super-secret"));
        assert!(dbg.contains("REDACTED"));
    }

    #[test]
    fn unique_sources_keeps_first_occurrence() {
        let cfg = RelayConfig {
            sources: vec![
                ChannelRef::Id(1),
                ChannelRef::Handle("a".into()),
                ChannelRef::Id(1),
            ],
            ..Default::default()
        };
        assert_eq!(cfg.unique_sources(), vec![
            ChannelRef::Id(1),
            ChannelRef::Handle("a".into())
        ]);
    }
}
