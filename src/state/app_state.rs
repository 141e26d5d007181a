//! 应用状态

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::config::env::EnvConfig;
use crate::infra::github::GithubClient;
use crate::services::stream::MoltService;

use super::address_book::AddressBook;
use super::registry::JobRegistry;

/// 应用状态
pub struct AppState {
    /// 环境配置
    pub config: EnvConfig,
    /// 服务启动时间
    pub started_at: DateTime<Utc>,
    /// 预览部署服务（持有任务注册表和地址簿）
    pub molt: Arc<MoltService>,
    /// PR 评论
    pub github: GithubClient,
}

impl AppState {
    pub fn new(config: EnvConfig, molt: Arc<MoltService>) -> Self {
        let github = GithubClient::new(config.github_token.clone());
        Self {
            config,
            started_at: Utc::now(),
            molt,
            github,
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        self.molt.registry()
    }

    pub fn addresses(&self) -> &Arc<AddressBook> {
        self.molt.addresses()
    }

    /// 运行时长（秒）
    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}
