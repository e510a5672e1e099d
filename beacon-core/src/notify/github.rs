//! GitHub REST client for commenting on pull requests and issues

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use serde_json::json;

use crate::config::GitHubConfig;
use crate::error::{Error, Result};

use super::{blocking_runtime, check_status, http_client, ExternalCommenter};

/// A pull request or issue addressed by owner, repo and number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitHubItemRef {
    pub owner: String,
    pub repo: String,
    pub number: u64,
}

/// Parse `https://github.com/{owner}/{repo}/(pull|issues)/{n}`.
///
/// Trailing path segments, query and fragment are ignored.
pub fn parse_github_item_url(url: &str) -> Option<GitHubItemRef> {
    let rest = url
        .trim()
        .strip_prefix("https://")
        .or_else(|| url.trim().strip_prefix("http://"))?;
    let rest = rest.split(|c: char| c == '?' || c == '#').next()?;

    let mut segments = rest.split('/').filter(|s| !s.is_empty());
    let host = segments.next()?;
    if !host.eq_ignore_ascii_case("github.com") && !host.eq_ignore_ascii_case("www.github.com") {
        return None;
    }

    let owner = segments.next()?;
    let repo = segments.next()?;
    let kind = segments.next()?;
    if kind != "pull" && kind != "issues" {
        return None;
    }
    let number = segments.next()?.parse::<u64>().ok()?;

    Some(GitHubItemRef {
        owner: owner.to_string(),
        repo: repo.to_string(),
        number,
    })
}

/// Comments on pull requests and issues through the issues comments endpoint
pub struct GitHubCommenter {
    http: reqwest::Client,
    api_base: String,
    runtime: tokio::runtime::Runtime,
}

impl GitHubCommenter {
    pub fn new(config: &GitHubConfig) -> Result<Self> {
        config.validate()?;

        let token = config
            .token
            .as_deref()
            .map(str::trim)
            .ok_or_else(|| Error::Config("github.token is required".to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("beacon-escalation"));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "x-github-api-version",
            HeaderValue::from_static("2022-11-28"),
        );
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| Error::Config(format!("invalid github.token: {}", e)))?,
        );

        Ok(Self {
            http: http_client(headers, config.timeout_secs)?,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            runtime: blocking_runtime()?,
        })
    }

    async fn create_comment(&self, item: &GitHubItemRef, body: &str) -> Result<()> {
        let url = format!(
            "{}/repos/{}/{}/issues/{}/comments",
            self.api_base, item.owner, item.repo, item.number
        );

        let response = self
            .http
            .post(&url)
            .json(&json!({ "body": body }))
            .send()
            .await
            .map_err(|e| Error::Notification(format!("github request failed: {}", e)))?;
        check_status("github", response).await?;

        tracing::debug!(
            owner = %item.owner,
            repo = %item.repo,
            number = item.number,
            "Created GitHub comment"
        );
        Ok(())
    }
}

impl ExternalCommenter for GitHubCommenter {
    fn comment_on_external_item(&self, url: &str, text: &str) -> Result<()> {
        let item = parse_github_item_url(url).ok_or_else(|| {
            Error::Notification(format!("not a GitHub pull request or issue URL: {}", url))
        })?;
        self.runtime.block_on(self.create_comment(&item, text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[test]
    fn test_parse_github_item_url() {
        assert_eq!(
            parse_github_item_url("https://github.com/acme/app/pull/42"),
            Some(GitHubItemRef {
                owner: "acme".to_string(),
                repo: "app".to_string(),
                number: 42,
            })
        );
        assert_eq!(
            parse_github_item_url("https://github.com/acme/app/issues/7/#issuecomment-1")
                .map(|i| i.number),
            Some(7)
        );
        assert_eq!(
            parse_github_item_url("https://github.com/acme/app/pull/42/files?diff=split")
                .map(|i| i.number),
            Some(42)
        );
        assert_eq!(parse_github_item_url("https://gitlab.com/acme/app/pull/1"), None);
        assert_eq!(parse_github_item_url("https://github.com/acme/app/commit/abc"), None);
        assert_eq!(parse_github_item_url("https://github.com/acme/app/pull/x"), None);
        assert_eq!(parse_github_item_url("not a url"), None);
    }

    #[test]
    fn test_comment_posts_to_issue_comments_endpoint() {
        let server = MockServer::start();
        let comment = server.mock(|when, then| {
            when.method(POST)
                .path("/repos/acme/app/issues/42/comments")
                .header("authorization", "Bearer ghp-test")
                .body_includes("Level 3/3");
            then.status(201).json_body(serde_json::json!({"id": 1}));
        });

        let client = GitHubCommenter::new(&GitHubConfig {
            token: Some("ghp-test".to_string()),
            api_base: server.base_url(),
            timeout_secs: 5,
        })
        .unwrap();

        client
            .comment_on_external_item("https://github.com/acme/app/pull/42", "Level 3/3")
            .unwrap();
        assert_eq!(comment.calls(), 1);
    }

    #[test]
    fn test_non_github_url_fails_without_request() {
        let server = MockServer::start();
        let any = server.mock(|when, then| {
            when.any_request();
            then.status(201);
        });

        let client = GitHubCommenter::new(&GitHubConfig {
            token: Some("ghp-test".to_string()),
            api_base: server.base_url(),
            timeout_secs: 5,
        })
        .unwrap();

        let err = client
            .comment_on_external_item("https://jira.example.com/browse/X-1", "hi")
            .unwrap_err();
        assert!(err.to_string().contains("not a GitHub"));
        assert_eq!(any.calls(), 0);
    }
}
