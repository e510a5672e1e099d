//! HTTP mail relay client

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Serialize;

use crate::config::EmailConfig;
use crate::error::{Error, Result};

use super::{blocking_runtime, check_status, http_client, EmailSender};

/// JSON body accepted by the relay
#[derive(Debug, Serialize)]
struct RelayMessage<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html: &'a str,
    text: &'a str,
}

/// Sends email by POSTing JSON to a relay that speaks SMTP on our behalf
pub struct MailRelayClient {
    http: reqwest::Client,
    relay_url: String,
    from_address: String,
    runtime: tokio::runtime::Runtime,
}

impl MailRelayClient {
    pub fn new(config: &EmailConfig) -> Result<Self> {
        config.validate()?;

        let relay_url = config
            .relay_url
            .clone()
            .ok_or_else(|| Error::Config("email.relay_url is required".to_string()))?;
        let from_address = config
            .from_address
            .clone()
            .ok_or_else(|| Error::Config("email.from_address is required".to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(api_key) = config.api_key.as_deref().map(str::trim) {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", api_key))
                    .map_err(|e| Error::Config(format!("invalid email.api_key: {}", e)))?,
            );
        }

        Ok(Self {
            http: http_client(headers, config.timeout_secs)?,
            relay_url,
            from_address,
            runtime: blocking_runtime()?,
        })
    }

    async fn send(&self, message: &RelayMessage<'_>) -> Result<()> {
        let response = self
            .http
            .post(&self.relay_url)
            .json(message)
            .send()
            .await
            .map_err(|e| Error::Notification(format!("mail relay request failed: {}", e)))?;
        check_status("mail relay", response).await?;

        tracing::debug!(to = message.to, "Email accepted by relay");
        Ok(())
    }
}

impl EmailSender for MailRelayClient {
    fn send_email(&self, to: &str, subject: &str, html: &str, text: &str) -> Result<()> {
        let message = RelayMessage {
            from: &self.from_address,
            to,
            subject,
            html,
            text,
        };
        self.runtime.block_on(self.send(&message))
    }
}
