//! SSH 部署密钥
//!
//! 仓库地址走 SSH 时，启动阶段确保本机有一把部署密钥，公钥需要由运维登记到代码托管平台

use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use super::command::{CommandError, CommandRunner};

/// ssh-keygen 超时
const KEYGEN_TIMEOUT: Duration = Duration::from_secs(60);

/// 默认密钥文件名，位于 `~/.ssh/` 下
pub const DEFAULT_KEY_NAME: &str = "molt_deploy_key";

#[derive(Debug, Error)]
pub enum DeployKeyError {
    #[error("failed to prepare key directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("ssh-keygen could not be run: {0}")]
    Command(#[from] CommandError),

    #[error("ssh-keygen failed: {0}")]
    Keygen(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployKeyStatus {
    Existing,
    Generated,
}

/// 模板是否使用 SSH 地址（`git@host:...` 或 `ssh://...`）
pub fn uses_ssh(git_url_template: &str) -> bool {
    let template = git_url_template.trim();
    template.starts_with("ssh://") || (template.contains('@') && !template.contains("://"))
}

/// 默认密钥路径 `$HOME/.ssh/molt_deploy_key`
pub fn default_key_path(home: Option<&Path>) -> Option<PathBuf> {
    home.map(|h| h.join(".ssh").join(DEFAULT_KEY_NAME))
}

/// 密钥不存在时用 ssh-keygen 生成（无口令）
pub async fn ensure_deploy_key(path: &Path) -> Result<DeployKeyStatus, DeployKeyError> {
    if tokio::fs::metadata(path).await.is_ok() {
        info!(path = %path.display(), "Deploy key already exists");
        return Ok(DeployKeyStatus::Existing);
    }

    // 只收紧自己新建的目录的权限
    let new_dir = path
        .parent()
        .filter(|d| !d.as_os_str().is_empty() && !d.exists());
    if let Some(dir) = new_dir {
        tokio::fs::create_dir_all(dir).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)).await?;
        }
    }

    let key_file = path.to_string_lossy();
    let output = CommandRunner::run_simple(
        "ssh-keygen",
        &["-q", "-t", "rsa", "-b", "4096", "-N", "", "-C", "molt-agent", "-f", &*key_file],
        KEYGEN_TIMEOUT,
    )
    .await?;
    if !output.status.success() {
        return Err(DeployKeyError::Keygen(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    let public_path = PathBuf::from(format!("{}.pub", key_file));
    match tokio::fs::read_to_string(&public_path).await {
        Ok(public) => info!(
            path = %path.display(),
            public_key = %public.trim(),
            "Generated deploy key, register the public key with the git host"
        ),
        Err(_) => info!(path = %path.display(), "Generated deploy key"),
    }
    Ok(DeployKeyStatus::Generated)
}
