//! 部署服务模块
//!
//! 预览部署流水线：拉取代码 → 切换修订 → 读取描述 → 初始化脚本 → 合并 compose → 构建 → 启动

pub mod compose;
pub mod context;

use std::io::Write;
use std::sync::Arc;
use tempfile::TempPath;
use thiserror::Error;

use crate::config::molt::{ConfigError, DeploymentConfig, InitScript};
use crate::domain::job::{FailureKind, JobFailure, JobOutcome, JobState, JobSuccess};
use crate::infra::command::{CommandError, StageCommand};
use crate::infra::pipeline::{run_stage, StageError};
use crate::state::job::Job;

pub use compose::{ComposeError, MergedCompose};
pub use context::{DeployContext, PipelineSettings};

/// 流水线错误
#[derive(Debug, Error)]
pub enum DeployError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Compose(#[from] ComposeError),

    #[error(transparent)]
    Stage(#[from] StageError),

    /// 仓库指定的初始化脚本无法启动（不存在或没有执行权限）
    #[error("init script '{path}' could not be started: {source}")]
    InitScript {
        path: String,
        #[source]
        source: CommandError,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("job cannot move from {from} to {to}")]
    Transition {
        from: &'static str,
        to: &'static str,
    },
}

impl DeployError {
    pub fn kind(&self) -> FailureKind {
        match self {
            DeployError::Config(_) | DeployError::InitScript { .. } => FailureKind::Config,
            DeployError::Compose(e) if e.is_config_fault() => FailureKind::Config,
            DeployError::Stage(StageError::Command { .. }) => FailureKind::Internal,
            DeployError::Stage(_) => FailureKind::Stage,
            DeployError::Compose(_) | DeployError::Io(_) | DeployError::Transition { .. } => {
                FailureKind::Internal
            }
        }
    }

    pub fn into_failure(self) -> JobFailure {
        JobFailure::new(self.kind(), self.to_string())
    }
}

/// 执行部署任务
///
/// 这是流水线的入口，返回前一定会结束任务
pub async fn execute(job: Arc<Job>, settings: Arc<PipelineSettings>) {
    let ctx = DeployContext::new(job, settings);

    ctx.log(format!("=== Molt preview for {} ===", ctx.key()));
    ctx.log(format!("Working tree: {}", ctx.working_tree().display()));
    ctx.log(format!("Timestamp: {}", chrono::Utc::now().to_rfc3339()));

    let outcome = match run(&ctx).await {
        Ok(entry) => {
            ctx.log("=== Preview deployed ===");
            JobOutcome::Succeeded(JobSuccess { entry })
        }
        Err(e) => {
            let failure = e.into_failure();
            tracing::error!(
                virtual_host = %ctx.key(),
                kind = ?failure.kind,
                error = %failure.message,
                "Preview deployment failed"
            );
            ctx.log(format!("=== Preview failed: {} ===", failure.public_message()));
            JobOutcome::Failed(failure)
        }
    };

    write_summary(&ctx);
    ctx.job.finish(outcome);
}

/// 依次执行各阶段，成功时返回入口服务名
async fn run(ctx: &DeployContext) -> Result<String, DeployError> {
    let timeout = ctx.settings.stage_timeout;

    ctx.stage(JobState::Fetching, fetch(ctx)).await?;

    ctx.stage(JobState::CheckingOut, async {
        let command = ctx
            .git("checkout")
            .args(["-c", "advice.detachedHead=false", "checkout"])
            .arg(&ctx.key().revision);
        run_stage(&command, ctx.sink(), timeout).await?;
        Ok::<_, DeployError>(())
    })
    .await?;

    let config = ctx
        .stage(JobState::LoadingConfig, async {
            let config = DeploymentConfig::load(ctx.working_tree()).await?;
            ctx.log(format!("Compose files: {:?}", config.compose_files));
            ctx.log(format!("Entry service: {}", config.entry));
            Ok::<_, DeployError>(config)
        })
        .await?;

    match &config.init {
        Some(init) => {
            ctx.stage(JobState::Initializing, run_init(ctx, init))
                .await?
        }
        None => ctx.skip(JobState::Initializing, "no init script configured"),
    }

    let merged = ctx
        .stage(JobState::Merging, async {
            let merged = compose::merge(
                ctx.working_tree(),
                &config.compose_files,
                ctx.key(),
                &ctx.settings.network,
            )
            .await?;
            if !merged.has_service(&config.entry) {
                return Err(ComposeError::UnknownEntry(config.entry.clone()).into());
            }
            ctx.log(format!("Services: {}", merged.service_names().join(", ")));
            Ok::<_, DeployError>(merged)
        })
        .await?;

    ctx.stage(JobState::Building, async {
        let command = ctx.compose("build", merged.path()).args(["build", "--no-cache"]);
        run_stage(&command, ctx.sink(), timeout).await?;
        Ok::<_, DeployError>(())
    })
    .await?;

    ctx.stage(JobState::Starting, async {
        let command = ctx.compose("up", merged.path()).args(["up", "-d"]);
        run_stage(&command, ctx.sink(), timeout).await?;
        Ok::<_, DeployError>(())
    })
    .await?;

    drop(merged);
    Ok(config.entry)
}

/// 首次部署时克隆，否则获取全部引用
///
/// 工作树可能处于分离 HEAD 状态，所以用 fetch 而不是 pull
async fn fetch(ctx: &DeployContext) -> Result<(), DeployError> {
    let tree = ctx.working_tree();
    let timeout = ctx.settings.stage_timeout;

    let command = if tokio::fs::metadata(tree.join(".git")).await.is_ok() {
        ctx.git("fetch").args(["fetch", "--progress", "--all", "--tags"])
    } else {
        let parent = tree.parent().unwrap_or(tree);
        tokio::fs::create_dir_all(parent).await?;
        StageCommand::new("clone", &ctx.settings.git_program)
            .args(["clone", "--progress"])
            .arg(ctx.settings.git_url(ctx.key()))
            .arg(tree.to_string_lossy())
            .current_dir(parent)
    };

    run_stage(&command, ctx.sink(), timeout).await?;
    Ok(())
}

/// 执行初始化脚本
async fn run_init(ctx: &DeployContext, init: &InitScript) -> Result<(), DeployError> {
    // 内联脚本的临时文件在本函数返回时删除
    let (program, _guard) = match init {
        InitScript::Path(path) => (ctx.working_tree().join(path), None),
        InitScript::Inline(script) => {
            let temp = write_inline_script(script)?;
            (temp.to_path_buf(), Some(temp))
        }
    };

    let key = ctx.key();
    let command = StageCommand::new("init", program.to_string_lossy())
        .current_dir(ctx.working_tree())
        .env("MOLT_VIRTUAL_HOST", ctx.hostname())
        .env("MOLT_REVISION", &key.revision)
        .env("MOLT_REPOSITORY", &key.repository)
        .env("MOLT_OWNER", &key.owner);

    let result = run_stage(&command, ctx.sink(), ctx.settings.stage_timeout).await;
    match (result, init) {
        // 仓库里的脚本启动失败属于配置问题
        (Err(StageError::Command { source, .. }), InitScript::Path(path)) => {
            Err(DeployError::InitScript {
                path: path.display().to_string(),
                source,
            })
        }
        (result, _) => Ok(result?),
    }
}

/// 把内联脚本写成可执行临时文件
///
/// 没有 shebang 时按 `/bin/sh` 执行
fn write_inline_script(script: &str) -> Result<TempPath, std::io::Error> {
    let mut file = tempfile::Builder::new()
        .prefix("molt-init-")
        .suffix(".sh")
        .tempfile()?;
    if !script.starts_with("#!") {
        writeln!(file, "#!/bin/sh")?;
    }
    file.write_all(script.as_bytes())?;
    if !script.ends_with('\n') {
        writeln!(file)?;
    }
    file.flush()?;

    // 关闭写句柄后再执行，避免 ETXTBSY
    let path = file.into_temp_path();

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
    }

    Ok(path)
}

/// 写入阶段摘要
fn write_summary(ctx: &DeployContext) {
    ctx.log("--- Stage summary ---");
    for stage in ctx.job.stages() {
        ctx.log(stage.summary());
    }
}
