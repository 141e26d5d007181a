//! 环境变量配置加载

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::infra::deploy_key::default_key_path;

use constants::{
    DEFAULT_BASE_DOMAIN, DEFAULT_GIT_URL_TEMPLATE, DEFAULT_NETWORK, DEFAULT_NETWORK_SUBNET,
    DEFAULT_PORT, STAGE_TIMEOUT_SECS,
};

/// 环境配置
#[derive(Clone, Debug)]
pub struct EnvConfig {
    /// 监听地址
    pub host: String,
    /// 服务监听端口
    pub port: u16,
    /// 预览域名后缀
    pub base_domain: String,
    /// 工作树根目录
    pub repos_dir: PathBuf,
    /// git 地址模板，支持 `{owner}` 与 `{repository}`
    pub git_url_template: String,
    /// 隔离网络名称
    pub network: String,
    /// 隔离网络子网，为空时由 docker 自行分配
    pub network_subnet: Option<String>,
    /// 显式指定的 compose 命令
    pub compose_command: Option<String>,
    /// 单个阶段超时
    pub stage_timeout: Duration,
    /// 地址存储回调 URL
    pub store_callback_url: Option<String>,
    /// 用于 PR 评论的 GitHub token
    pub github_token: Option<String>,
    /// SSH 部署密钥路径，为空时不生成
    pub deploy_key_path: Option<PathBuf>,
}

impl EnvConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Self {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port = env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let base_domain =
            env::var("MOLT_BASE_DOMAIN").unwrap_or_else(|_| DEFAULT_BASE_DOMAIN.to_string());

        let repos_dir = env::var("MOLT_REPOS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./repos"));

        let git_url_template = env::var("MOLT_GIT_URL_TEMPLATE")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_GIT_URL_TEMPLATE.to_string());

        let network = env::var("MOLT_NETWORK")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_NETWORK.to_string());

        // 显式设置为空字符串表示不指定子网
        let network_subnet = match env::var("MOLT_NETWORK_SUBNET") {
            Ok(v) if v.trim().is_empty() => None,
            Ok(v) => Some(v),
            Err(_) => Some(DEFAULT_NETWORK_SUBNET.to_string()),
        };

        let compose_command = env::var("MOLT_COMPOSE_COMMAND")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let stage_timeout_secs = match env::var("MOLT_STAGE_TIMEOUT_SECS") {
            Ok(v) => v.parse().unwrap_or_else(|_| {
                warn!(value = %v, "Invalid MOLT_STAGE_TIMEOUT_SECS, using default");
                STAGE_TIMEOUT_SECS
            }),
            Err(_) => STAGE_TIMEOUT_SECS,
        };

        let store_callback_url = env::var("MOLT_STORE_CALLBACK_URL")
            .ok()
            .filter(|s| !s.is_empty());

        // GitHub token - 兼容通用变量名
        let github_token =
            load_with_fallback("MOLT_GITHUB_TOKEN", "GITHUB_TOKEN").filter(|s| !s.is_empty());

        // 显式设置为空字符串表示不生成部署密钥
        let deploy_key_path = match env::var("MOLT_DEPLOY_KEY") {
            Ok(v) if v.trim().is_empty() => None,
            Ok(v) => Some(PathBuf::from(v)),
            Err(_) => default_key_path(env::var_os("HOME").as_deref().map(Path::new)),
        };

        Self {
            host,
            port,
            base_domain,
            repos_dir,
            git_url_template,
            network,
            network_subnet,
            compose_command,
            stage_timeout: Duration::from_secs(stage_timeout_secs),
            store_callback_url,
            github_token,
            deploy_key_path,
        }
    }

    /// 按模板生成仓库地址
    pub fn git_url(&self, owner: &str, repository: &str) -> String {
        render_git_url(&self.git_url_template, owner, repository)
    }
}

pub(crate) fn render_git_url(template: &str, owner: &str, repository: &str) -> String {
    template
        .replace("{owner}", owner)
        .replace("{repository}", repository)
}

/// 加载环境变量，支持 fallback
fn load_with_fallback(primary: &str, fallback: &str) -> Option<String> {
    env::var(primary).ok().or_else(|| env::var(fallback).ok())
}

/// 常量
pub mod constants {
    /// 默认监听端口
    pub const DEFAULT_PORT: u16 = 5000;

    pub const DEFAULT_BASE_DOMAIN: &str = "localhost";

    pub const DEFAULT_GIT_URL_TEMPLATE: &str = "git@github.com:{owner}/{repository}.git";

    /// 默认隔离网络
    pub const DEFAULT_NETWORK: &str = "molt-network";
    pub const DEFAULT_NETWORK_SUBNET: &str = "172.28.0.0/16";

    /// 单个阶段超时（秒）
    pub const STAGE_TIMEOUT_SECS: u64 = 1800; // 30 分钟

    /// 每个任务保留的日志行数，供中途接入的订阅方回放
    pub const LOG_HISTORY_LIMIT: usize = 10_000;

    /// SSE 保活间隔（秒）
    pub const SSE_KEEPALIVE_SECS: u64 = 15;

    /// 版本号
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_with_fallback() {
        // 设置测试环境变量
        env::set_var("MOLT_TEST_PRIMARY", "primary_value");
        env::set_var("MOLT_TEST_FALLBACK", "fallback_value");

        assert_eq!(
            load_with_fallback("MOLT_TEST_PRIMARY", "MOLT_TEST_FALLBACK"),
            Some("primary_value".to_string())
        );

        env::remove_var("MOLT_TEST_PRIMARY");
        assert_eq!(
            load_with_fallback("MOLT_TEST_PRIMARY", "MOLT_TEST_FALLBACK"),
            Some("fallback_value".to_string())
        );

        env::remove_var("MOLT_TEST_FALLBACK");
        assert_eq!(load_with_fallback("MOLT_TEST_PRIMARY", "MOLT_TEST_FALLBACK"), None);
    }

    #[test]
    fn test_render_git_url() {
        assert_eq!(
            render_git_url(DEFAULT_GIT_URL_TEMPLATE, "carol", "demo.site"),
            "git@github.com:carol/demo.site.git"
        );
        assert_eq!(
            render_git_url("/srv/git/{owner}/{repository}", "carol", "demo"),
            "/srv/git/carol/demo"
        );
    }
}
