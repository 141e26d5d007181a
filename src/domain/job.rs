//! 部署任务相关领域模型

use chrono::{DateTime, Utc};
use serde::Serialize;

/// 日志流中的终止标记，紧接在任务进入终态之前发出
pub const END_SENTINEL: &str = "<<<molt-end>>>";

/// 任务状态
///
/// 严格按顺序推进，`Initializing` 可跳过，任何非终态都可以直接进入 `Failed`
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Fetching,
    CheckingOut,
    LoadingConfig,
    Initializing,
    Merging,
    Building,
    Starting,
    Succeeded,
    Failed,
}

impl JobState {
    /// 会执行的阶段（按顺序）
    pub const STAGES: [JobState; 7] = [
        JobState::Fetching,
        JobState::CheckingOut,
        JobState::LoadingConfig,
        JobState::Initializing,
        JobState::Merging,
        JobState::Building,
        JobState::Starting,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Fetching => "fetching",
            JobState::CheckingOut => "checking_out",
            JobState::LoadingConfig => "loading_config",
            JobState::Initializing => "initializing",
            JobState::Merging => "merging",
            JobState::Building => "building",
            JobState::Starting => "starting",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        }
    }

    /// 阶段显示名称
    pub fn display_name(&self) -> &'static str {
        match self {
            JobState::Pending => "Pending",
            JobState::Fetching => "Fetch",
            JobState::CheckingOut => "Checkout",
            JobState::LoadingConfig => "Load Config",
            JobState::Initializing => "Init Script",
            JobState::Merging => "Merge Compose",
            JobState::Building => "Compose Build",
            JobState::Starting => "Compose Up",
            JobState::Succeeded => "Succeeded",
            JobState::Failed => "Failed",
        }
    }

    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }

    fn ordinal(&self) -> u8 {
        match self {
            JobState::Pending => 0,
            JobState::Fetching => 1,
            JobState::CheckingOut => 2,
            JobState::LoadingConfig => 3,
            JobState::Initializing => 4,
            JobState::Merging => 5,
            JobState::Building => 6,
            JobState::Starting => 7,
            JobState::Succeeded => 8,
            JobState::Failed => 9,
        }
    }

    /// 是否允许从当前状态转移到 `next`
    pub fn can_advance_to(&self, next: JobState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            JobState::Failed => true,
            JobState::Succeeded => *self == JobState::Starting,
            JobState::Merging if *self == JobState::LoadingConfig => true,
            _ => next.ordinal() == self.ordinal() + 1,
        }
    }
}

/// 阶段状态
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

impl StageStatus {
    pub fn icon(&self) -> &'static str {
        match self {
            StageStatus::Success => "✓",
            StageStatus::Failed => "✗",
            StageStatus::Skipped => "⊘",
            StageStatus::Running => "⟳",
            StageStatus::Pending => "○",
        }
    }
}

/// 阶段执行记录
#[derive(Clone, Debug, Serialize)]
pub struct StageRecord {
    pub state: JobState,
    pub display_name: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub status: StageStatus,
    pub message: Option<String>,
}

impl StageRecord {
    pub fn new(state: JobState) -> Self {
        Self {
            state,
            display_name: state.display_name().to_string(),
            started_at: None,
            finished_at: None,
            duration_ms: None,
            status: StageStatus::Pending,
            message: None,
        }
    }

    pub fn start(&mut self) {
        self.started_at = Some(Utc::now());
        self.status = StageStatus::Running;
    }

    pub fn finish(&mut self, success: bool, message: Option<String>) {
        let now = Utc::now();
        self.finished_at = Some(now);
        self.status = if success {
            StageStatus::Success
        } else {
            StageStatus::Failed
        };
        self.message = message;
        if let Some(started) = self.started_at {
            self.duration_ms = Some((now - started).num_milliseconds());
        }
    }

    pub fn skip(&mut self, reason: Option<String>) {
        self.status = StageStatus::Skipped;
        self.message = reason;
    }

    /// 一行摘要，例如 `✓ Compose Build (1520ms)`
    pub fn summary(&self) -> String {
        let duration = self
            .duration_ms
            .map(|d| format!("{}ms", d))
            .unwrap_or_else(|| "-".to_string());
        format!("{} {} ({})", self.status.icon(), self.display_name, duration)
    }
}

/// 失败分类
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// 仓库提供的配置有问题
    Config,
    /// 某个阶段的进程以非零状态退出
    Stage,
    /// 基础设施或意料之外的错误
    Internal,
}

/// 对外暴露的通用内部错误文案
pub const INTERNAL_ERROR_MESSAGE: &str = "internal error while deploying the preview";

/// 任务失败信息
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl JobFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Internal, message)
    }

    /// 可以发给调用方的文案，内部错误不泄露细节
    pub fn public_message(&self) -> &str {
        match self.kind {
            FailureKind::Config | FailureKind::Stage => &self.message,
            FailureKind::Internal => INTERNAL_ERROR_MESSAGE,
        }
    }
}

/// 任务成功信息
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct JobSuccess {
    /// 需要上报地址的入口服务
    pub entry: String,
}

/// 任务终态结果
#[derive(Clone, Debug, PartialEq)]
pub enum JobOutcome {
    Succeeded(JobSuccess),
    Failed(JobFailure),
}

impl JobOutcome {
    pub fn state(&self) -> JobState {
        match self {
            JobOutcome::Succeeded(_) => JobState::Succeeded,
            JobOutcome::Failed(_) => JobState::Failed,
        }
    }
}

/// 日志行
#[derive(Clone, Debug, Serialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub stream: String, // output | molt
    pub content: String,
}

impl LogLine {
    pub fn new(stream: &str, content: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            stream: stream.to_string(),
            content: content.into(),
        }
    }

    /// 外部进程的输出（stdout 与 stderr 合并）
    pub fn output(content: impl Into<String>) -> Self {
        Self::new("output", content)
    }

    /// 由 agent 自己产生的日志行
    pub fn system(content: impl Into<String>) -> Self {
        Self::new("molt", content)
    }

    pub fn sentinel() -> Self {
        Self::system(END_SENTINEL)
    }

    pub fn is_sentinel(&self) -> bool {
        self.content == END_SENTINEL
    }
}

/// 任务快照（用于 /jobs）
#[derive(Clone, Debug, Serialize)]
pub struct JobSnapshot {
    pub virtual_host: String,
    pub revision: String,
    pub repository: String,
    pub owner: String,
    pub state: JobState,
    pub started_at: DateTime<Utc>,
    pub stages: Vec<StageRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<JobFailure>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_is_terminal() {
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Starting.is_terminal());
        assert!(JobState::Succeeded.is_terminal());
        assert!(JobState::Failed.is_terminal());
    }

    #[test]
    fn test_sequential_transitions() {
        let mut state = JobState::Pending;
        for next in JobState::STAGES {
            assert!(state.can_advance_to(next), "{:?} -> {:?}", state, next);
            state = next;
        }
        assert!(state.can_advance_to(JobState::Succeeded));
    }

    #[test]
    fn test_init_can_be_skipped() {
        assert!(JobState::LoadingConfig.can_advance_to(JobState::Merging));
        assert!(!JobState::CheckingOut.can_advance_to(JobState::Merging));
        assert!(!JobState::Fetching.can_advance_to(JobState::Building));
    }

    #[test]
    fn test_terminal_transitions() {
        assert!(JobState::Pending.can_advance_to(JobState::Failed));
        assert!(JobState::Building.can_advance_to(JobState::Failed));
        assert!(!JobState::Building.can_advance_to(JobState::Succeeded));
        assert!(!JobState::Failed.can_advance_to(JobState::Fetching));
        assert!(!JobState::Succeeded.can_advance_to(JobState::Failed));
    }

    #[test]
    fn test_stage_record_lifecycle() {
        let mut stage = StageRecord::new(JobState::Building);
        assert_eq!(stage.status, StageStatus::Pending);
        assert_eq!(stage.summary(), "○ Compose Build (-)");

        stage.start();
        assert_eq!(stage.status, StageStatus::Running);

        stage.finish(false, Some("exit 2".to_string()));
        assert_eq!(stage.status, StageStatus::Failed);
        assert!(stage.duration_ms.is_some());
        assert!(stage.summary().starts_with("✗ Compose Build"));
    }

    #[test]
    fn test_failure_public_message() {
        let config = JobFailure::new(FailureKind::Config, "molt-config.yml is missing");
        assert_eq!(config.public_message(), "molt-config.yml is missing");

        let internal = JobFailure::internal("docker socket refused connection");
        assert_eq!(internal.public_message(), INTERNAL_ERROR_MESSAGE);
    }

    #[test]
    fn test_sentinel_line() {
        assert!(LogLine::sentinel().is_sentinel());
        assert!(!LogLine::output("building web").is_sentinel());
        assert_eq!(LogLine::system("x").stream, "molt");
    }
}
