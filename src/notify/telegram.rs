//! Telegram bot notifier

use crate::credentials::NotificationCredentials;
use crate::notify::{current_host, current_user, NotificationEvent, NotificationSink, NotifyError};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

const API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

/// Posts notifications through the Telegram Bot API
pub struct TelegramNotifier {
    credentials: NotificationCredentials,
    http_client: reqwest::Client,
    api_base: String,
    user: String,
    server: String,
}

impl TelegramNotifier {
    pub fn new(credentials: NotificationCredentials) -> Result<Self, NotifyError> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("promote/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            credentials,
            http_client,
            api_base: API_BASE.to_string(),
            user: current_user(),
            server: current_host(),
        })
    }

    /// Point at a different API host
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn send_message_url(&self) -> String {
        format!(
            "{}/bot{}/sendMessage",
            self.api_base.trim_end_matches('/'),
            self.credentials.token
        )
    }
}

#[async_trait]
impl NotificationSink for TelegramNotifier {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        let text = event.render(&self.user, &self.server);
        debug!("Sending Telegram notification ({} bytes)", text.len());

        let response = self
            .http_client
            .post(self.send_message_url())
            .json(&SendMessage {
                chat_id: &self.credentials.chat_id,
                text: &text,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}
