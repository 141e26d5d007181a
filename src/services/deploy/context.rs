//! 部署上下文
//!
//! 一次预览部署的执行上下文：任务、运行参数以及阶段记录的辅助方法

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::env::EnvConfig;
use crate::domain::job::{JobState, StageRecord};
use crate::domain::vhost::VirtualHostKey;
use crate::infra::command::{LogSink, StageCommand};
use crate::infra::docker::ComposeCommand;
use crate::state::job::Job;

use super::DeployError;

/// 流水线运行参数，进程内所有任务共享
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// 工作树根目录
    pub repos_dir: PathBuf,
    pub git_program: String,
    pub git_url_template: String,
    /// 隔离网络
    pub network: String,
    /// 预览域名后缀
    pub base_domain: String,
    pub compose: ComposeCommand,
    /// 单个阶段超时
    pub stage_timeout: Duration,
}

impl PipelineSettings {
    pub fn from_env(config: &EnvConfig, compose: ComposeCommand) -> Self {
        Self {
            repos_dir: config.repos_dir.clone(),
            git_program: "git".to_string(),
            git_url_template: config.git_url_template.clone(),
            network: config.network.clone(),
            base_domain: config.base_domain.clone(),
            compose,
            stage_timeout: config.stage_timeout,
        }
    }

    pub fn git_url(&self, key: &VirtualHostKey) -> String {
        crate::config::env::render_git_url(&self.git_url_template, &key.owner, &key.repository)
    }
}

/// 部署执行上下文
#[derive(Clone)]
pub struct DeployContext {
    pub job: Arc<Job>,
    pub settings: Arc<PipelineSettings>,
    working_tree: PathBuf,
}

impl DeployContext {
    pub fn new(job: Arc<Job>, settings: Arc<PipelineSettings>) -> Self {
        let working_tree = job.key().working_tree(&settings.repos_dir);
        Self {
            job,
            settings,
            working_tree,
        }
    }

    pub fn key(&self) -> &VirtualHostKey {
        self.job.key()
    }

    pub fn working_tree(&self) -> &Path {
        &self.working_tree
    }

    /// 完整的预览主机名
    pub fn hostname(&self) -> String {
        self.key().hostname(&self.settings.base_domain)
    }

    /// 发送日志
    pub fn log(&self, content: impl Into<String>) {
        self.job.log(content);
    }

    /// 进程输出写入任务日志
    pub fn sink(&self) -> Arc<dyn LogSink> {
        self.job.clone()
    }

    /// 执行一个阶段
    ///
    /// 负责状态转移、阶段记录与进度日志
    pub async fn stage<T, F>(&self, state: JobState, work: F) -> Result<T, DeployError>
    where
        F: Future<Output = Result<T, DeployError>>,
    {
        let from = self.job.state();
        if !self.job.transition(state) {
            return Err(DeployError::Transition {
                from: from.as_str(),
                to: state.as_str(),
            });
        }

        let position = JobState::STAGES
            .iter()
            .position(|s| *s == state)
            .map(|i| i + 1)
            .unwrap_or(0);
        self.job.update_stage(state, StageRecord::start);
        self.log(format!(
            "[{}/{}] {}...",
            position,
            JobState::STAGES.len(),
            state.display_name()
        ));
        tracing::info!(virtual_host = %self.key(), stage = state.as_str(), "Stage started");

        let result = work.await;
        match &result {
            Ok(_) => self.job.update_stage(state, |s| s.finish(true, None)),
            Err(e) => {
                let message = e.to_string();
                tracing::warn!(
                    virtual_host = %self.key(),
                    stage = state.as_str(),
                    error = %message,
                    "Stage failed"
                );
                self.job.update_stage(state, |s| s.finish(false, Some(message)));
            }
        }
        result
    }

    /// 标记阶段被跳过
    pub fn skip(&self, state: JobState, reason: &str) {
        self.job
            .update_stage(state, |s| s.skip(Some(reason.to_string())));
        self.log(format!("{} skipped: {}", state.display_name(), reason));
    }

    /// 在工作树中执行的 git 命令
    pub fn git(&self, name: &str) -> StageCommand {
        StageCommand::new(name, &self.settings.git_program).current_dir(&self.working_tree)
    }

    /// 带项目隔离参数的 compose 命令
    pub fn compose(&self, name: &str, compose_file: &Path) -> StageCommand {
        let compose = &self.settings.compose;
        StageCommand::new(name, &compose.program)
            .args(compose.base_args.iter().cloned())
            .arg("-p")
            .arg(self.key().project_name())
            .arg("--project-directory")
            .arg(self.working_tree.to_string_lossy())
            .arg("-f")
            .arg(compose_file.to_string_lossy())
            .current_dir(&self.working_tree)
    }
}
