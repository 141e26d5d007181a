//! GitHub webhook 转发
//!
//! PR 打开或更新时，在 PR 下评论对应修订的预览地址

use serde::Deserialize;

use crate::domain::vhost::VirtualHostKey;
use crate::infra::github::{GithubClient, GithubError};

/// 预览地址中使用的短 SHA 长度
const SHORT_SHA_LEN: usize = 7;

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestEvent {
    pub action: String,
    pub pull_request: PullRequest,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequest {
    pub comments_url: String,
    pub head: Head,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Head {
    pub sha: String,
    pub repo: Repository,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Repository {
    pub name: String,
    pub owner: Owner,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Owner {
    pub login: String,
}

impl PullRequestEvent {
    /// 只处理新开和有新提交的 PR
    pub fn wants_preview(&self) -> bool {
        matches!(self.action.as_str(), "opened" | "synchronize")
    }

    /// PR head 对应的预览键
    pub fn preview_key(&self) -> VirtualHostKey {
        let head = &self.pull_request.head;
        let short_sha: String = head.sha.chars().take(SHORT_SHA_LEN).collect();
        VirtualHostKey::new(short_sha, head.repo.name.clone(), head.repo.owner.login.clone())
    }
}

/// 事件头是否为 pull_request
pub fn is_pull_request(event_name: Option<&str>) -> bool {
    event_name == Some("pull_request")
}

pub fn preview_url(key: &VirtualHostKey, base_domain: &str) -> String {
    format!("http://{}", key.hostname(base_domain))
}

pub fn comment_body(url: &str) -> String {
    format!("Launched the preview environment!\n{}", url)
}

/// 发表预览评论，返回预览地址
pub async fn announce(
    github: &GithubClient,
    base_domain: &str,
    event: &PullRequestEvent,
) -> Result<String, GithubError> {
    let url = preview_url(&event.preview_key(), base_domain);
    github
        .post_comment(&event.pull_request.comments_url, &comment_body(&url))
        .await?;
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(action: &str) -> PullRequestEvent {
        serde_json::from_value(serde_json::json!({
            "action": action,
            "number": 12,
            "pull_request": {
                "comments_url": "https://api.github.com/repos/carol/demo/issues/12/comments",
                "head": {
                    "sha": "a1b2c3d4e5f60718293a4b5c6d7e8f9012345678",
                    "repo": { "name": "demo", "owner": { "login": "carol" } }
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_wants_preview() {
        assert!(event("opened").wants_preview());
        assert!(event("synchronize").wants_preview());
        assert!(!event("closed").wants_preview());
        assert!(is_pull_request(Some("pull_request")));
        assert!(!is_pull_request(Some("push")));
        assert!(!is_pull_request(None));
    }

    #[test]
    fn test_preview_url_uses_short_sha() {
        let key = event("opened").preview_key();
        assert_eq!(key.to_string(), "a1b2c3d.demo.carol");
        assert_eq!(
            preview_url(&key, "preview.example.com"),
            "http://a1b2c3d.demo.carol.preview.example.com"
        );
        assert_eq!(
            comment_body("http://x"),
            "Launched the preview environment!\nhttp://x"
        );
    }

    #[tokio::test]
    async fn test_announce_without_token() {
        let github = GithubClient::new(None);
        let err = announce(&github, "localhost", &event("opened"))
            .await
            .unwrap_err();
        assert!(matches!(err, GithubError::MissingToken));
    }
}
