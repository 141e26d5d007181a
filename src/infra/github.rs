//! GitHub HTTP Client
//!
//! 目前只用于在 PR 下发表评论

use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::env::constants::VERSION;

#[derive(Debug, Error)]
pub enum GithubError {
    #[error("no GitHub token is configured")]
    MissingToken,

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("GitHub returned status {status}: {body}")]
    NonSuccessStatus { status: u16, body: String },
}

#[derive(Debug, Serialize)]
struct CommentBody<'a> {
    body: &'a str,
}

/// GitHub 客户端
#[derive(Clone)]
pub struct GithubClient {
    client: Client,
    token: Option<String>,
}

impl GithubClient {
    pub fn new(token: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default HTTP client");
                Client::new()
            });
        Self { client, token }
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    /// 在 `comments_url` 指向的 issue / PR 下发表评论
    pub async fn post_comment(&self, comments_url: &str, body: &str) -> Result<(), GithubError> {
        let token = self.token.as_deref().ok_or(GithubError::MissingToken)?;

        let resp = self
            .client
            .post(comments_url)
            .header(ACCEPT, "application/vnd.github.v3+json")
            .header(AUTHORIZATION, format!("token {}", token))
            .header(USER_AGENT, format!("molt-agent/{}", VERSION))
            .json(&CommentBody { body })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GithubError::NonSuccessStatus {
                status: status.as_u16(),
                body,
            });
        }

        info!(url = %comments_url, "Posted preview comment");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_post_comment_requires_token() {
        let client = GithubClient::new(None);
        assert!(!client.has_token());
        let err = client
            .post_comment("https://api.github.com/repos/carol/demo/issues/1/comments", "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, GithubError::MissingToken));
    }
}
