use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::error::NotifyError;
use crate::notifier::{Notifier, Target, split_message};

const TELEGRAM_API_BASE_URL: &str = "https://api.telegram.org";
const MAX_MESSAGE_CHARS: usize = 4096;

/// Telegram Bot API delivery.
pub struct TelegramNotifier {
    client: Client,
    base_url: String,
    bot_token: String,
    group_id: i64,
    second_group_id: i64,
    admin_ids: Vec<i64>,
    attempts: usize,
    backoff: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct TelegramChats {
    pub group_id: i64,
    pub second_group_id: i64,
    pub admin_ids: Vec<i64>,
}

impl TelegramNotifier {
    pub fn new(bot_token: String, chats: TelegramChats) -> Result<Self, NotifyError> {
        if bot_token.is_empty() {
            return Err(NotifyError::Config("Telegram bot token is empty".into()));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: TELEGRAM_API_BASE_URL.to_string(),
            bot_token,
            group_id: chats.group_id,
            second_group_id: chats.second_group_id,
            admin_ids: chats.admin_ids,
            attempts: 3,
            backoff: Duration::from_secs(10),
        })
    }

    /// Create from `TELEGRAM_BOT_TOKEN`.
    pub fn from_env(chats: TelegramChats) -> Result<Self, NotifyError> {
        let token = std::env::var("TELEGRAM_BOT_TOKEN")
            .map_err(|_| NotifyError::Config("TELEGRAM_BOT_TOKEN not set".into()))?;
        Self::new(token, chats)
    }

    async fn send_chunk(&self, chat_id: i64, text: &str, html: bool) -> Result<(), NotifyError> {
        let request = SendMessage {
            chat_id,
            text,
            parse_mode: html.then_some("HTML"),
            disable_web_page_preview: true,
        };
        let response = self
            .client
            .post(format!("{}/bot{}/sendMessage", self.base_url, self.bot_token))
            .json(&request)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body: ApiResponse = response.json().await.unwrap_or_default();
        if body.ok {
            return Ok(());
        }
        Err(NotifyError::Api {
            status,
            message: body.description.unwrap_or_default(),
        })
    }

    /// Bounded retries on transient failures only.
    async fn send_with_retries(&self, chat_id: i64, text: &str, html: bool) -> Result<(), NotifyError> {
        let mut attempt = 1;
        loop {
            match self.send_chunk(chat_id, text, html).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < self.attempts => {
                    warn!(chat_id, attempt, error = %e, "Telegram send failed, retrying");
                    tokio::time::sleep(self.backoff).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(chat_id, attempt, error = %e, "Telegram send failed");
                    return Err(e);
                }
            }
        }
    }

    async fn send_to(&self, chat_id: i64, text: &str, html: bool) -> Result<(), NotifyError> {
        for chunk in split_message(text, MAX_MESSAGE_CHARS) {
            self.send_with_retries(chat_id, &chunk, html).await?;
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'a str>,
    disable_web_page_preview: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ApiResponse {
    ok: bool,
    description: Option<String>,
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, target: Target, html: &str) -> Result<(), NotifyError> {
        match target {
            Target::Chat(id) => self.send_to(id, html, true).await,
            Target::Group => self.send_to(self.group_id, html, true).await,
            Target::SecondGroup => self.send_to(self.second_group_id, html, true).await,
            Target::Admins => {
                // Admin notes carry raw error text, so they go out as plain text.
                let mut failed = 0;
                let mut last = String::new();
                for &id in &self.admin_ids {
                    if let Err(e) = self.send_to(id, html, false).await {
                        failed += 1;
                        last = e.to_string();
                    }
                }
                if failed == 0 {
                    Ok(())
                } else {
                    Err(NotifyError::Partial {
                        failed,
                        total: self.admin_ids.len(),
                        last,
                    })
                }
            }
        }
    }
}
