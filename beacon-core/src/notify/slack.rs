//! Slack Web API client

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::json;

use crate::config::SlackConfig;
use crate::error::{Error, Result};

use super::{blocking_runtime, check_status, http_client, ChannelPoster, DirectMessenger};

/// Envelope returned by every Slack Web API method
#[derive(Debug, Deserialize)]
struct SlackResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Posts messages through `chat.postMessage` with a bot token.
///
/// DMs are posted to the member ID directly; Slack opens the IM implicitly.
pub struct SlackNotifier {
    http: reqwest::Client,
    api_base: String,
    runtime: tokio::runtime::Runtime,
}

impl SlackNotifier {
    /// Create a client from configuration
    ///
    /// Returns an error if the bot token is missing or malformed.
    pub fn new(config: &SlackConfig) -> Result<Self> {
        config.validate()?;

        let token = config
            .bot_token
            .as_deref()
            .map(str::trim)
            .ok_or_else(|| Error::Config("slack.bot_token is required".to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| Error::Config(format!("invalid slack.bot_token: {}", e)))?,
        );

        Ok(Self {
            http: http_client(headers, config.timeout_secs)?,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            runtime: blocking_runtime()?,
        })
    }

    async fn post_message(&self, channel: &str, text: &str) -> Result<()> {
        let payload = json!({
            "channel": channel,
            "text": text,
            "mrkdwn": true,
        });

        let response = self
            .http
            .post(format!("{}/chat.postMessage", self.api_base))
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::Notification(format!("slack request failed: {}", e)))?;

        let body: SlackResponse = check_status("slack", response)
            .await?
            .json()
            .await
            .map_err(|e| Error::Notification(format!("invalid slack response: {}", e)))?;

        if !body.ok {
            return Err(Error::Notification(format!(
                "slack chat.postMessage failed: {}",
                body.error.unwrap_or_else(|| "unknown error".to_string())
            )));
        }

        tracing::debug!(channel, "Posted Slack message");
        Ok(())
    }
}

impl DirectMessenger for SlackNotifier {
    fn send_direct_message(&self, handle: &str, text: &str) -> Result<()> {
        self.runtime.block_on(self.post_message(handle, text))
    }
}

impl ChannelPoster for SlackNotifier {
    fn post_to_channel(&self, channel: &str, text: &str) -> Result<()> {
        self.runtime.block_on(self.post_message(channel, text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn client_for(server: &MockServer) -> SlackNotifier {
        SlackNotifier::new(&SlackConfig {
            bot_token: Some("xoxb-test".to_string()),
            api_base: server.base_url(),
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[test]
    fn test_direct_message_posts_with_bearer_token() {
        let server = MockServer::start();
        let post = server.mock(|when, then| {
            when.method(POST)
                .path("/chat.postMessage")
                .header("authorization", "Bearer xoxb-test")
                .body_includes("\"channel\":\"U123\"")
                .body_includes("URGENT");
            then.status(200)
                .json_body(serde_json::json!({"ok": true, "channel": "D1", "ts": "1.0"}));
        });

        let client = client_for(&server);
        client.send_direct_message("U123", "URGENT: review").unwrap();
        assert_eq!(post.calls(), 1);
    }

    #[test]
    fn test_ok_false_is_a_failure() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/chat.postMessage");
            then.status(200)
                .json_body(serde_json::json!({"ok": false, "error": "channel_not_found"}));
        });

        let client = client_for(&server);
        let err = client.post_to_channel("C404", "hello").unwrap_err();
        assert!(err.to_string().contains("channel_not_found"));
    }

    #[test]
    fn test_http_error_is_a_failure() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/chat.postMessage");
            then.status(500).body("upstream down");
        });

        let client = client_for(&server);
        let err = client.post_to_channel("C1", "hello").unwrap_err();
        assert!(matches!(err, Error::Notification(_)));
        assert!(err.to_string().contains("500"));
    }

    #[test]
    fn test_missing_token_is_rejected() {
        let result = SlackNotifier::new(&SlackConfig::default());
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
