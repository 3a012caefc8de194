//! Out-of-band delivery of password reset codes.

use std::{sync::Arc, time::Duration};

use anyhow::bail;
use async_trait::async_trait;
use serde_json::json;
use tracing::{info, instrument};

use crate::config::{Environment, MailConfig};

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("mail transport failed: {0}")]
    Transport(String),
    #[error("mail relay rejected the message with status {0}")]
    Rejected(u16),
    #[error("mail delivery timed out after {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_reset_code(&self, to: &str, code: &str) -> Result<(), DeliveryError>;
}

/// Sender with no transport, for development only. The code stays in the
/// credential store.
#[derive(Debug, Clone, Default)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send_reset_code(&self, to: &str, _code: &str) -> Result<(), DeliveryError> {
        info!(to = %to, "no mail relay configured; reset code issued without delivery");
        Ok(())
    }
}

/// Posts the `password_reset` template and its variables to an HTTP mail relay.
/// The relay owns the message body.
#[derive(Debug, Clone)]
pub struct HttpRelaySender {
    client: reqwest::Client,
    url: String,
    from: String,
    token: Option<String>,
    timeout: Duration,
}

impl HttpRelaySender {
    pub fn new(url: &str, from: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url: url.to_string(),
            from: from.to_string(),
            token: None,
            timeout,
        })
    }

    /// Authenticate to the relay with `Authorization: Bearer <token>`.
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }
}

#[async_trait]
impl EmailSender for HttpRelaySender {
    #[instrument(skip(self, code), fields(relay = %self.url))]
    async fn send_reset_code(&self, to: &str, code: &str) -> Result<(), DeliveryError> {
        let payload = json!({
            "from": self.from,
            "to": to,
            "template": "password_reset",
            "variables": { "code": code, "valid_minutes": 15 },
        });
        let mut req = self.client.post(&self.url).json(&payload);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let res = req
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DeliveryError::Timeout(self.timeout)
                } else {
                    DeliveryError::Transport(e.to_string())
                }
            })?;

        let status = res.status();
        if !status.is_success() {
            return Err(DeliveryError::Rejected(status.as_u16()));
        }
        Ok(())
    }
}

/// Relay sender when a relay URL is configured. Without one, development
/// falls back to the log-only sender and production refuses to start.
pub fn sender_from_config(
    cfg: &MailConfig,
    environment: Environment,
) -> anyhow::Result<Arc<dyn EmailSender>> {
    let sender: Arc<dyn EmailSender> = match cfg.relay_url.as_deref() {
        Some(url) => Arc::new(
            HttpRelaySender::new(url, &cfg.from, cfg.timeout())?
                .with_token(cfg.relay_token.clone()),
        ),
        None if environment.is_development() => Arc::new(LogEmailSender),
        None => bail!("no mail transport configured for {environment}"),
    };
    Ok(sender)
}
