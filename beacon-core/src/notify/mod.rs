//! Notification capabilities and their concrete clients
//!
//! The escalation executor and brief generator depend only on the capability
//! traits defined here. Each wire client wraps an async `reqwest` client in a
//! private current-thread runtime and exposes blocking calls, so the batch
//! passes stay synchronous.

mod github;
mod mail;
mod memory;
mod slack;

pub use github::{parse_github_item_url, GitHubCommenter, GitHubItemRef};
pub use mail::MailRelayClient;
pub use memory::{Capability, RecordingNotifier, SentNotification};
pub use slack::SlackNotifier;

use crate::config::Config;
use crate::error::{Error, Result};
use reqwest::header::HeaderMap;
use std::sync::Arc;
use std::time::Duration;

/// Sends a private message to a user handle
pub trait DirectMessenger: Send + Sync {
    fn send_direct_message(&self, handle: &str, text: &str) -> Result<()>;
}

/// Posts a message to a team channel
pub trait ChannelPoster: Send + Sync {
    fn post_to_channel(&self, channel: &str, text: &str) -> Result<()>;
}

/// Comments on an item in an external system, e.g. a pull request
pub trait ExternalCommenter: Send + Sync {
    fn comment_on_external_item(&self, url: &str, text: &str) -> Result<()>;
}

/// Sends an email with HTML and plain-text bodies
pub trait EmailSender: Send + Sync {
    fn send_email(&self, to: &str, subject: &str, html: &str, text: &str) -> Result<()>;
}

/// Stand-in for a capability whose client section is missing from config.
///
/// Every call fails, so the attempt is audited as a failure.
#[derive(Debug, Clone, Copy)]
pub struct Unconfigured {
    capability: &'static str,
}

impl Unconfigured {
    pub fn new(capability: &'static str) -> Self {
        Self { capability }
    }

    fn fail(&self) -> Result<()> {
        Err(Error::Notification(format!(
            "{} is not configured",
            self.capability
        )))
    }
}

impl DirectMessenger for Unconfigured {
    fn send_direct_message(&self, _handle: &str, _text: &str) -> Result<()> {
        self.fail()
    }
}

impl ChannelPoster for Unconfigured {
    fn post_to_channel(&self, _channel: &str, _text: &str) -> Result<()> {
        self.fail()
    }
}

impl ExternalCommenter for Unconfigured {
    fn comment_on_external_item(&self, _url: &str, _text: &str) -> Result<()> {
        self.fail()
    }
}

impl EmailSender for Unconfigured {
    fn send_email(&self, _to: &str, _subject: &str, _html: &str, _text: &str) -> Result<()> {
        self.fail()
    }
}

/// The full set of capabilities handed to the escalation and brief passes
#[derive(Clone)]
pub struct Notifiers {
    pub direct: Arc<dyn DirectMessenger>,
    pub channel: Arc<dyn ChannelPoster>,
    pub external: Arc<dyn ExternalCommenter>,
    pub email: Arc<dyn EmailSender>,
}

impl Notifiers {
    /// Build clients for every configured section.
    ///
    /// Missing sections become [`Unconfigured`]; a present but invalid
    /// section is an error.
    pub fn from_config(config: &Config) -> Result<Self> {
        let direct: Arc<dyn DirectMessenger>;
        let channel: Arc<dyn ChannelPoster>;
        if config.slack.is_ready() {
            let slack = Arc::new(SlackNotifier::new(&config.slack)?);
            direct = slack.clone();
            channel = slack;
        } else {
            tracing::info!("Slack not configured, DMs and channel posts will fail");
            direct = Arc::new(Unconfigured::new("slack"));
            channel = Arc::new(Unconfigured::new("slack"));
        }

        let external: Arc<dyn ExternalCommenter> = if config.github.is_ready() {
            Arc::new(GitHubCommenter::new(&config.github)?)
        } else {
            tracing::info!("GitHub not configured, external comments will fail");
            Arc::new(Unconfigured::new("github"))
        };

        let email: Arc<dyn EmailSender> = if config.email.is_ready() {
            Arc::new(MailRelayClient::new(&config.email)?)
        } else {
            tracing::info!("Mail relay not configured, email briefs will fail");
            Arc::new(Unconfigured::new("email"))
        };

        Ok(Self {
            direct,
            channel,
            external,
            email,
        })
    }

    /// Use one implementation for every capability
    pub fn uniform<T>(notifier: Arc<T>) -> Self
    where
        T: DirectMessenger + ChannelPoster + ExternalCommenter + EmailSender + 'static,
    {
        Self {
            direct: notifier.clone(),
            channel: notifier.clone(),
            external: notifier.clone(),
            email: notifier,
        }
    }
}

/// Build a reqwest client with default headers and a per-call timeout
pub(crate) fn http_client(headers: HeaderMap, timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .default_headers(headers)
        .build()
        .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))
}

/// Private runtime used to drive one client's async calls
pub(crate) fn blocking_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(Error::Io)
}

/// Turn a non-success response into an error carrying status and body
pub(crate) async fn check_status(
    service: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::Notification(format!(
        "{} returned {}: {}",
        service,
        status,
        body.trim()
    )))
}
