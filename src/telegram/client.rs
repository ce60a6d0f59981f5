//! Telegram transport - long-polling version.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{AllowedUpdate, BotCommand, UpdateKind};
use teloxide::{ApiError, RequestError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::handler::convert_message;
use crate::core::conversation::{Message, Reply};
use crate::error::{Error, Result};
use crate::transport::Transport;

/// Long-polling timeout passed to getUpdates, in seconds.
const POLL_TIMEOUT_SECS: u32 = 30;

/// Pause after a failed getUpdates call.
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Messages buffered between the poller and the router.
const UPDATE_BUFFER: usize = 100;

/// Telegram Bot API transport.
pub struct TelegramTransport {
    bot: Bot,
    polling: CancellationToken,
    started: AtomicBool,
}

impl TelegramTransport {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_bot(Bot::new(token))
    }

    pub fn with_bot(bot: Bot) -> Self {
        Self {
            bot,
            polling: CancellationToken::new(),
            started: AtomicBool::new(false),
        }
    }

    pub fn bot(&self) -> &Bot {
        &self.bot
    }

    /// Publish command descriptions for client autocomplete.
    pub async fn register_commands(&self, commands: &[(&str, &str)]) -> Result<()> {
        let commands = commands
            .iter()
            .map(|(name, description)| BotCommand::new(*name, *description))
            .collect::<Vec<_>>();
        self.bot.set_my_commands(commands).await?;
        tracing::info!("Telegram bot commands set");
        Ok(())
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn updates(&self) -> Result<mpsc::Receiver<Message>> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::Transport("telegram polling already started".to_string()));
        }

        let me = self.bot.get_me().await?;
        // Long polling doesn't work while a webhook is set.
        self.bot.delete_webhook().send().await?;
        tracing::info!(username = ?me.username, "telegram bot connected");

        let (tx, rx) = mpsc::channel(UPDATE_BUFFER);
        tokio::spawn(poll_updates(self.bot.clone(), tx, self.polling.clone()));
        Ok(rx)
    }

    async fn send(&self, reply: &Reply) -> Result<()> {
        self.bot
            .send_message(ChatId(reply.chat_id), reply.text.clone())
            .await?;
        Ok(())
    }

    fn stop_receiving(&self) {
        self.polling.cancel();
    }
}

async fn poll_updates(bot: Bot, tx: mpsc::Sender<Message>, cancel: CancellationToken) {
    tracing::info!("starting telegram polling loop");
    let mut offset: i32 = 0;

    loop {
        let request = bot
            .get_updates()
            .offset(offset)
            .timeout(POLL_TIMEOUT_SECS)
            .allowed_updates(vec![AllowedUpdate::Message]);

        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = request.send() => result,
        };

        match result {
            Ok(updates) => {
                tracing::debug!(count = updates.len(), "got telegram updates");
                for update in updates {
                    offset = update.id.as_offset();
                    match update.kind {
                        UpdateKind::Message(msg) => {
                            if tx.send(convert_message(&msg)).await.is_err() {
                                tracing::info!("router gone, telegram polling stopped");
                                return;
                            }
                        }
                        other => {
                            tracing::debug!("ignoring non-message update: {other:?}");
                        }
                    }
                }
            }
            Err(RequestError::Api(ApiError::TerminatedByOtherGetUpdates)) => {
                tracing::warn!(
                    "telegram polling disabled: another instance is already running with this token"
                );
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "telegram getUpdates failed");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(RETRY_DELAY) => {}
                }
            }
        }
    }

    tracing::info!("telegram polling stopped");
}
