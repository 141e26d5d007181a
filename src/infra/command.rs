//! 命令执行器
//!
//! 提供统一的命令执行接口，支持：
//! - 实时日志流式输出（stdout/stderr 合并到同一个日志通道）
//! - 工作目录与环境变量覆盖
//! - 超时控制

use std::io::{BufRead, BufReader, PipeReader, Read};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::error;

use crate::domain::job::LogLine;

/// 日志接收端
///
/// 必须是非阻塞的：慢的或不存在的消费者不能拖住外部进程
pub trait LogSink: Send + Sync {
    fn emit(&self, line: LogLine);
}

/// 一个待执行的外部命令
#[derive(Debug, Clone)]
pub struct StageCommand {
    /// 阶段名，用于日志和错误
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
    pub work_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl StageCommand {
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            work_dir: None,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// 用于日志的命令行，例如 `>>> git checkout a1b2c3`
    pub fn display(&self) -> String {
        let mut line = format!(">>> {}", self.program);
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// 命令执行错误
#[derive(Debug)]
pub enum CommandError {
    /// 命令启动失败（包括创建输出管道失败）
    SpawnFailed(std::io::Error),
    /// 命令超时（进程已被杀掉）
    Timeout(Duration),
    /// 等待命令完成失败
    WaitFailed(std::io::Error),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::SpawnFailed(e) => write!(f, "Failed to spawn command: {}", e),
            CommandError::Timeout(d) => write!(f, "Command timed out after {}s", d.as_secs()),
            CommandError::WaitFailed(e) => write!(f, "Failed to wait for command: {}", e),
        }
    }
}

impl std::error::Error for CommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CommandError::SpawnFailed(e) | CommandError::WaitFailed(e) => Some(e),
            CommandError::Timeout(_) => None,
        }
    }
}

/// 命令执行器
pub struct CommandRunner;

impl CommandRunner {
    /// 执行命令并把输出逐行写入 `sink`
    ///
    /// stdout 和 stderr 共用同一个管道，日志顺序与进程写出的顺序一致。
    /// 返回进程退出状态；非零退出由调用方决定如何处理
    pub async fn run_streaming(
        command: &StageCommand,
        sink: Arc<dyn LogSink>,
        timeout: Duration,
    ) -> Result<ExitStatus, CommandError> {
        let (reader, writer) = std::io::pipe().map_err(CommandError::SpawnFailed)?;
        let writer_err = writer.try_clone().map_err(CommandError::SpawnFailed)?;

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(writer)
            .stderr(writer_err)
            .kill_on_drop(true);
        if let Some(ref dir) = command.work_dir {
            cmd.current_dir(dir);
        }

        let spawned = cmd.spawn();
        // Command 仍持有写端，不释放的话读端永远等不到 EOF
        drop(cmd);
        let mut child = spawned.map_err(CommandError::SpawnFailed)?;

        let pump = tokio::task::spawn_blocking(move || pump_lines(reader, sink));

        let result = tokio::select! {
            status = child.wait() => status.map_err(CommandError::WaitFailed),
            _ = tokio::time::sleep(timeout) => {
                error!(stage = %command.name, "Command timed out after {:?}", timeout);
                let _ = child.kill().await;
                Err(CommandError::Timeout(timeout))
            }
        };

        // 等待日志读取完成，保证该阶段的输出全部先于下一阶段。
        // 超时的情况下子进程可能留下仍持有管道的后代进程，不再等待读取
        if !matches!(result, Err(CommandError::Timeout(_))) {
            let _ = pump.await;
        }

        result
    }

    /// 执行简单命令（不流式输出）
    ///
    /// 用于 docker inspect 这类只关心结果的查询
    pub async fn run_simple(
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<std::process::Output, CommandError> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        tokio::select! {
            result = child => result.map_err(CommandError::SpawnFailed),
            _ = tokio::time::sleep(timeout) => Err(CommandError::Timeout(timeout)),
        }
    }
}

/// 逐行读取合并后的输出并写入日志
///
/// 在阻塞线程上运行。非 UTF-8 字节按 lossy 方式替换；`\r` 刷新的进度行只保留最后一段
fn pump_lines(reader: PipeReader, sink: Arc<dyn LogSink>) {
    read_lines(reader, sink.as_ref());
}

fn read_lines<R: Read>(reader: R, sink: &dyn LogSink) {
    for segment in BufReader::new(reader).split(b'\n') {
        match segment {
            Ok(bytes) => {
                let raw = String::from_utf8_lossy(&bytes);
                sink.emit(LogLine::output(last_progress_segment(&raw)));
            }
            Err(e) => {
                error!(error = %e, "Failed to read command output");
                break;
            }
        }
    }
}

/// 取 `\r` 分隔后的最后一个非空片段
fn last_progress_segment(line: &str) -> &str {
    line.rsplit('\r').find(|s| !s.is_empty()).unwrap_or("")
}
