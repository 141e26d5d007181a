//! 阶段流水线
//!
//! 按顺序执行一组外部命令，任一阶段失败即终止，后续阶段不再执行

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::command::{CommandError, CommandRunner, LogSink, StageCommand};
use crate::domain::job::LogLine;

/// 阶段执行错误
#[derive(Debug, Error)]
pub enum StageError {
    #[error("stage `{stage}` exited with status {code}")]
    ExitStatus { stage: String, code: i32 },

    #[error("stage `{stage}` was terminated by a signal")]
    Signaled { stage: String },

    #[error("stage `{stage}` timed out after {}s", .timeout.as_secs())]
    TimedOut { stage: String, timeout: Duration },

    #[error("stage `{stage}` could not be run: {source}")]
    Command {
        stage: String,
        #[source]
        source: CommandError,
    },
}

impl StageError {
    pub fn stage(&self) -> &str {
        match self {
            StageError::ExitStatus { stage, .. }
            | StageError::Signaled { stage }
            | StageError::TimedOut { stage, .. }
            | StageError::Command { stage, .. } => stage,
        }
    }
}

/// 执行单个阶段：先回显命令行，再流式输出进程日志
pub async fn run_stage(
    command: &StageCommand,
    sink: Arc<dyn LogSink>,
    timeout: Duration,
) -> Result<(), StageError> {
    sink.emit(LogLine::system(command.display()));

    let status = CommandRunner::run_streaming(command, sink, timeout)
        .await
        .map_err(|e| match e {
            CommandError::Timeout(timeout) => StageError::TimedOut {
                stage: command.name.clone(),
                timeout,
            },
            other => StageError::Command {
                stage: command.name.clone(),
                source: other,
            },
        })?;

    if status.success() {
        return Ok(());
    }
    match status.code() {
        Some(code) => Err(StageError::ExitStatus {
            stage: command.name.clone(),
            code,
        }),
        None => Err(StageError::Signaled {
            stage: command.name.clone(),
        }),
    }
}

/// 有序的阶段列表
pub struct Pipeline {
    stages: Vec<StageCommand>,
    timeout: Duration,
}

impl Pipeline {
    pub fn new(timeout: Duration) -> Self {
        Self {
            stages: Vec::new(),
            timeout,
        }
    }

    pub fn stage(mut self, command: StageCommand) -> Self {
        self.stages.push(command);
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// 依次执行所有阶段，遇到第一个失败立即返回
    pub async fn run(&self, sink: Arc<dyn LogSink>) -> Result<(), StageError> {
        for command in &self.stages {
            run_stage(command, sink.clone(), self.timeout).await?;
        }
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::infra::command::tests::VecSink;

    fn shell(name: &str, script: &str) -> StageCommand {
        StageCommand::new(name, "sh").args(["-c", script])
    }

    #[tokio::test]
    async fn test_pipeline_runs_in_order() {
        let sink = Arc::new(VecSink::default());
        let pipeline = Pipeline::new(Duration::from_secs(5))
            .stage(shell("one", "echo first"))
            .stage(shell("two", "echo second"));

        pipeline.run(sink.clone()).await.unwrap();

        let lines = sink.contents();
        let first = lines.iter().position(|l| l == "first").unwrap();
        let second = lines.iter().position(|l| l == "second").unwrap();
        assert!(first < second);
        assert_eq!(lines[0], ">>> sh -c echo first");
    }

    #[tokio::test]
    async fn test_pipeline_stops_at_failing_stage() {
        let sink = Arc::new(VecSink::default());
        let pipeline = Pipeline::new(Duration::from_secs(5))
            .stage(shell("one", "echo first"))
            .stage(shell("two", "echo second; exit 4"))
            .stage(shell("three", "echo third"));

        let err = pipeline.run(sink.clone()).await.unwrap_err();

        assert!(matches!(
            err,
            StageError::ExitStatus { ref stage, code: 4 } if stage == "two"
        ));
        assert_eq!(err.stage(), "two");
        let lines = sink.contents();
        assert!(lines.contains(&"second".to_string()));
        assert!(!lines.iter().any(|l| l.contains("third")));
    }

    #[tokio::test]
    async fn test_stage_spawn_failure() {
        let sink = Arc::new(VecSink::default());
        let command = StageCommand::new("build", "nonexistent_compose_12345");

        let err = run_stage(&command, sink, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Command { .. }));
        assert!(err.to_string().starts_with("stage `build` could not be run"));
    }
}
