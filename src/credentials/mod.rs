//! Credential resolution for registry and notification access
//!
//! Secrets are resolved once per invocation, before any stage runs, and are
//! never printed: the `Debug` impls below redact them.

use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Errors raised while resolving credentials
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    #[error("environment variable {0} is not set")]
    Missing(String),

    #[error("invalid credential {variable}: {message}")]
    Invalid { variable: String, message: String },
}

/// Cloud credentials used to authenticate against the image registry
#[derive(Clone, PartialEq, Eq)]
pub struct RegistryCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
}

impl RegistryCredentials {
    /// Environment passed to subprocesses that talk to the registry
    pub fn env(&self) -> Vec<(String, String)> {
        vec![
            ("AWS_ACCESS_KEY_ID".to_string(), self.access_key_id.clone()),
            ("AWS_SECRET_ACCESS_KEY".to_string(), self.secret_access_key.clone()),
            ("AWS_DEFAULT_REGION".to_string(), self.region.clone()),
        ]
    }
}

impl fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("access_key_id", &redact(&self.access_key_id))
            .field("secret_access_key", &"***")
            .field("region", &self.region)
            .finish()
    }
}

/// Chat bot credentials
#[derive(Clone, PartialEq, Eq)]
pub struct NotificationCredentials {
    pub token: String,
    pub chat_id: String,
}

impl fmt::Debug for NotificationCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationCredentials")
            .field("token", &"***")
            .field("chat_id", &self.chat_id)
            .finish()
    }
}

fn redact(value: &str) -> String {
    match value.char_indices().nth(4) {
        Some((idx, _)) => format!("{}***", &value[..idx]),
        None => "***".to_string(),
    }
}

/// Source of secrets for registry and notification operations
pub trait CredentialProvider: Send + Sync {
    fn registry(&self) -> Result<RegistryCredentials, CredentialError>;

    fn notification(&self) -> Result<NotificationCredentials, CredentialError>;
}

/// Reads credentials from environment variables
#[derive(Clone, Default)]
pub struct EnvCredentialProvider {
    vars: HashMap<String, String>,
}

impl EnvCredentialProvider {
    /// Snapshot the process environment
    pub fn from_env() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    /// Use an explicit variable map
    pub fn from_map(vars: HashMap<String, String>) -> Self {
        Self { vars }
    }

    fn require(&self, name: &str) -> Result<String, CredentialError> {
        match self.vars.get(name).map(|v| v.trim()) {
            Some(value) if !value.is_empty() => Ok(value.to_string()),
            _ => Err(CredentialError::Missing(name.to_string())),
        }
    }
}

impl CredentialProvider for EnvCredentialProvider {
    fn registry(&self) -> Result<RegistryCredentials, CredentialError> {
        let access_key_id = self.require("AWS_ACCESS_KEY_ID")?;
        let secret_access_key = self.require("AWS_SECRET_ACCESS_KEY")?;
        let region = self.require("AWS_DEFAULT_REGION")?;

        if region.contains(char::is_whitespace) {
            return Err(CredentialError::Invalid {
                variable: "AWS_DEFAULT_REGION".to_string(),
                message: format!("'{}' is not a region name", region),
            });
        }

        Ok(RegistryCredentials {
            access_key_id,
            secret_access_key,
            region,
        })
    }

    fn notification(&self) -> Result<NotificationCredentials, CredentialError> {
        Ok(NotificationCredentials {
            token: self.require("TELEGRAM_TOKEN")?,
            chat_id: self.require("TELEGRAM_CHAT_ID")?,
        })
    }
}
