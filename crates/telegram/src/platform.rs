//! [`Platform`] implementation on the Telegram Bot API.

use std::{
    sync::{Mutex, RwLock},
    time::Duration,
};

use {
    async_trait::async_trait,
    chanrelay_common::{ChannelRef, EventId, SourceChannel, TargetChannel},
    chanrelay_config::TelegramConfig,
    chanrelay_forward::{
        ChatMetadata, Event, EventHandle, EventStream, Identity, Platform, PlatformError,
        PlatformResult,
    },
    secrecy::ExposeSecret,
    teloxide::{
        prelude::*,
        types::{MessageId, Recipient},
    },
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    classify::classify,
    error::{Error, Result},
    ledger::SharedLedger,
    polling,
};

/// Slack on top of the long-poll timeout before the HTTP client gives up.
const CLIENT_TIMEOUT_SLACK: Duration = Duration::from_secs(15);
const EVENT_BUFFER: usize = 256;

pub struct TelegramPlatform {
    config: TelegramConfig,
    bot: RwLock<Bot>,
    /// Cancels the polling task of the current subscription.
    polling: Mutex<Option<CancellationToken>>,
    ledger: SharedLedger,
}

impl TelegramPlatform {
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        if !config.has_token() {
            return Err(Error::message("telegram bot token is not configured"));
        }
        Ok(Self {
            bot: RwLock::new(build_bot(config)?),
            config: config.clone(),
            polling: Mutex::new(None),
            ledger: SharedLedger::default(),
        })
    }

    fn bot(&self) -> Bot {
        self.bot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn stop_polling(&self) {
        let previous = self
            .polling
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(cancel) = previous {
            cancel.cancel();
        }
    }
}

fn build_bot(config: &TelegramConfig) -> Result<Bot> {
    let timeout = Duration::from_secs(u64::from(config.poll_timeout_secs)) + CLIENT_TIMEOUT_SLACK;
    let client = teloxide::net::default_reqwest_settings()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Client {
            message: e.to_string(),
        })?;
    let mut bot = Bot::with_client(config.token.expose_secret(), client);
    if let Some(raw) = &config.api_url {
        let url = url::Url::parse(raw).map_err(|e| Error::InvalidApiUrl {
            url: raw.clone(),
            message: e.to_string(),
        })?;
        bot = bot.set_api_url(url);
    }
    Ok(bot)
}

fn recipient(channel: &ChannelRef) -> Recipient {
    match channel {
        ChannelRef::Id(id) => Recipient::Id(ChatId(*id)),
        ChannelRef::Handle(handle) => Recipient::ChannelUsername(format!("@{handle}")),
    }
}

fn history_unsupported() -> PlatformError {
    PlatformError::Unsupported {
        operation: "history",
    }
}

#[async_trait]
impl Platform for TelegramPlatform {
    async fn connect(&self) -> PlatformResult<Identity> {
        let bot = self.bot();
        let me = bot.get_me().await.map_err(|e| classify(&e))?;
        // Polling and a webhook are mutually exclusive.
        bot.delete_webhook().send().await.map_err(|e| classify(&e))?;
        info!(username = ?me.user.username, "telegram bot connected (webhook cleared)");
        Ok(Identity {
            id: i64::try_from(me.user.id.0).unwrap_or_default(),
            name: me.user.first_name.clone(),
            username: me.user.username.clone(),
        })
    }

    async fn subscribe(&self, sources: &[SourceChannel]) -> PlatformResult<EventStream> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();
        let previous = self
            .polling
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(cancel.clone());
        if let Some(previous) = previous {
            debug!("replacing previous telegram subscription");
            previous.cancel();
        }
        tokio::spawn(polling::poll(
            self.bot(),
            sources.to_vec(),
            self.config.poll_timeout_secs,
            self.ledger.clone(),
            tx,
            cancel,
        ));
        Ok(rx)
    }

    async fn fetch_history(
        &self,
        _source: &SourceChannel,
        _after: EventId,
        _limit: u32,
    ) -> PlatformResult<Vec<Event>> {
        Err(history_unsupported())
    }

    async fn latest_event(&self, _source: &SourceChannel) -> PlatformResult<Option<Event>> {
        Err(history_unsupported())
    }

    async fn deliver(&self, handle: &EventHandle, target: &TargetChannel) -> PlatformResult<()> {
        let message_id = i32::try_from(handle.event_id)
            .map(MessageId)
            .map_err(|_| {
                PlatformError::other(format!("message id {} out of range", handle.event_id))
            })?;
        self.bot()
            .copy_message(recipient(target), ChatId(handle.chat_id), message_id)
            .await
            .map_err(|e| classify(&e))?;
        Ok(())
    }

    async fn chat_metadata(&self, chat: &ChannelRef) -> PlatformResult<ChatMetadata> {
        match self.bot().get_chat(recipient(chat)).await {
            Ok(info) => Ok(ChatMetadata {
                title: info.title().map(str::to_owned),
                accessible: true,
            }),
            Err(e) => match classify(&e) {
                PlatformError::PermissionDenied { message } => {
                    warn!(chat = %chat, error = %message, "chat not accessible to the bot");
                    Ok(ChatMetadata {
                        title: None,
                        accessible: false,
                    })
                },
                other => Err(other),
            },
        }
    }

    async fn reset_session(&self) -> PlatformResult<()> {
        self.stop_polling();
        let fresh = build_bot(&self.config).map_err(PlatformError::other)?;
        *self.bot.write().unwrap_or_else(|e| e.into_inner()) = fresh;
        info!("telegram client rebuilt");
        Ok(())
    }

    fn ack(&self, handle: &EventHandle) {
        self.ledger.lock().settle(handle);
    }

    async fn disconnect(&self) -> PlatformResult<()> {
        self.stop_polling();
        Ok(())
    }
}
