//! End-of-run notifications
//!
//! Delivery is best-effort: callers log a [`NotifyError`] and move on.

pub mod telegram;

pub use telegram::TelegramNotifier;

use crate::credentials::CredentialProvider;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Errors raised while delivering a notification
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("chat API rejected the message ({status}): {body}")]
    Rejected { status: u16, body: String },
}

/// Final outcome of an invocation, as reported to humans
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationEvent {
    Success {
        target: String,
        revision: String,
    },
    Failure {
        target: String,
        revision: String,
        reason: String,
    },
}

impl NotificationEvent {
    pub fn target(&self) -> &str {
        match self {
            NotificationEvent::Success { target, .. } | NotificationEvent::Failure { target, .. } => target,
        }
    }

    pub fn revision(&self) -> &str {
        match self {
            NotificationEvent::Success { revision, .. }
            | NotificationEvent::Failure { revision, .. } => revision,
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            NotificationEvent::Success { .. } => "success",
            NotificationEvent::Failure { .. } => "failure",
        }
    }

    /// Message body: one `key=value` line per field
    pub fn render(&self, user: &str, server: &str) -> String {
        let mut lines = vec![
            format!("user={}", user),
            format!("server={}", server),
            format!("target={}", self.target()),
            format!("revision={}", self.revision()),
            format!("status={}", self.status()),
        ];
        if let NotificationEvent::Failure { reason, .. } = self {
            lines.push(format!("reason={}", reason));
        }
        lines.join("\n")
    }
}

/// Where end-of-run notifications go
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), NotifyError>;
}

/// Writes the notification to the log only
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        info!(
            "Notification: {} {} at {}",
            event.target(),
            event.status(),
            event.revision()
        );
        Ok(())
    }
}

/// Telegram when its credentials are available, the log otherwise
pub fn notifier_from(credentials: &dyn CredentialProvider) -> Arc<dyn NotificationSink> {
    match credentials.notification() {
        Ok(creds) => match TelegramNotifier::new(creds) {
            Ok(notifier) => Arc::new(notifier),
            Err(e) => {
                debug!("Telegram client unavailable ({}), notifications go to the log", e);
                Arc::new(LogNotifier)
            }
        },
        Err(e) => {
            debug!("{}, notifications go to the log", e);
            Arc::new(LogNotifier)
        }
    }
}

/// Login name of the invoking user
pub fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Host name of this machine
pub fn current_host() -> String {
    if let Ok(host) = std::env::var("HOSTNAME") {
        if !host.trim().is_empty() {
            return host.trim().to_string();
        }
    }
    std::fs::read_to_string("/etc/hostname")
        .map(|h| h.trim().to_string())
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
