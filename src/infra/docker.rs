//! 容器运行时相关操作
//!
//! 通过 docker CLI 查询容器地址、准备隔离网络、选择 compose 命令

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{info, warn};

use super::command::{CommandError, CommandRunner};
use crate::domain::vhost::VirtualHostKey;

/// docker 查询超时
const DOCKER_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// 容器地址查询错误
#[derive(Debug, Error)]
pub enum InspectionError {
    #[error("container '{0}' does not exist")]
    NotFound(String),

    #[error("container '{0}' has no network address yet")]
    NoAddress(String),

    #[error("docker inspect failed: {0}")]
    Command(String),
}

impl From<CommandError> for InspectionError {
    fn from(e: CommandError) -> Self {
        InspectionError::Command(e.to_string())
    }
}

/// 查询入口服务容器的网络地址
#[async_trait]
pub trait ContainerInspector: Send + Sync {
    async fn address_of(
        &self,
        key: &VirtualHostKey,
        entry_service: &str,
    ) -> Result<String, InspectionError>;
}

/// `docker inspect` 输出中的单个网络
#[derive(Debug, Deserialize)]
struct NetworkEndpoint {
    #[serde(rename = "IPAddress", default)]
    ip_address: String,
}

/// 基于 docker CLI 的实现
#[derive(Debug, Clone)]
pub struct DockerInspector {
    docker: String,
    network: String,
}

impl DockerInspector {
    pub fn new(network: impl Into<String>) -> Self {
        Self {
            docker: "docker".to_string(),
            network: network.into(),
        }
    }
}

#[async_trait]
impl ContainerInspector for DockerInspector {
    async fn address_of(
        &self,
        key: &VirtualHostKey,
        entry_service: &str,
    ) -> Result<String, InspectionError> {
        let name = key.container_name(entry_service);
        let output = CommandRunner::run_simple(
            &self.docker,
            &[
                "inspect",
                "--type",
                "container",
                "--format",
                "{{json .NetworkSettings.Networks}}",
                &name,
            ],
            DOCKER_QUERY_TIMEOUT,
        )
        .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("No such") {
                return Err(InspectionError::NotFound(name));
            }
            return Err(InspectionError::Command(stderr.trim().to_string()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        network_address(&stdout, &self.network)?
            .ok_or(InspectionError::NoAddress(name))
    }
}

/// 从 `{{json .NetworkSettings.Networks}}` 中取地址
///
/// 优先隔离网络，其次任意一个已分配地址的网络
fn network_address(json: &str, preferred: &str) -> Result<Option<String>, InspectionError> {
    let networks: Option<BTreeMap<String, NetworkEndpoint>> = serde_json::from_str(json.trim())
        .map_err(|e| InspectionError::Command(format!("unexpected inspect output: {}", e)))?;
    let Some(networks) = networks else {
        return Ok(None);
    };

    if let Some(endpoint) = networks.get(preferred) {
        if !endpoint.ip_address.is_empty() {
            return Ok(Some(endpoint.ip_address.clone()));
        }
    }

    Ok(networks
        .into_values()
        .map(|endpoint| endpoint.ip_address)
        .find(|ip| !ip.is_empty()))
}

/// 确保隔离网络存在
///
/// 不存在时按给定子网创建
pub async fn ensure_network(name: &str, subnet: Option<&str>) -> Result<(), CommandError> {
    let inspect = CommandRunner::run_simple(
        "docker",
        &["network", "inspect", name],
        DOCKER_QUERY_TIMEOUT,
    )
    .await?;
    if inspect.status.success() {
        info!(network = %name, "Isolation network already exists");
        return Ok(());
    }

    let subnet_arg = subnet.map(|s| format!("--subnet={}", s));
    let mut args = vec!["network", "create"];
    if let Some(ref arg) = subnet_arg {
        args.push(arg.as_str());
    }
    args.push(name);

    let create = CommandRunner::run_simple("docker", &args, DOCKER_QUERY_TIMEOUT).await?;
    if create.status.success() {
        info!(network = %name, subnet = ?subnet, "Created isolation network");
    } else {
        warn!(
            network = %name,
            stderr = %String::from_utf8_lossy(&create.stderr).trim(),
            "Failed to create isolation network"
        );
    }
    Ok(())
}

/// compose 命令（`docker-compose` 或 `docker compose`）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeCommand {
    pub program: String,
    pub base_args: Vec<String>,
}

impl ComposeCommand {
    /// 解析类似 `docker compose` 的命令行
    pub fn parse(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            base_args: parts.collect(),
        })
    }

    /// 检测可用的 compose 命令（优先 docker-compose，回退到 docker compose）
    pub async fn detect() -> Self {
        let check = Command::new("which")
            .arg("docker-compose")
            .output()
            .await;

        if check.map(|o| o.status.success()).unwrap_or(false) {
            Self {
                program: "docker-compose".to_string(),
                base_args: vec![],
            }
        } else {
            Self {
                program: "docker".to_string(),
                base_args: vec!["compose".to_string()],
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_address_prefers_isolation_network() {
        let json = r#"{"bridge":{"IPAddress":"172.17.0.3"},"molt-network":{"IPAddress":"172.28.0.7"}}"#;
        assert_eq!(
            network_address(json, "molt-network").unwrap(),
            Some("172.28.0.7".to_string())
        );
    }

    #[test]
    fn test_network_address_falls_back() {
        let json = r#"{"other":{"IPAddress":"10.0.0.2"},"molt-network":{"IPAddress":""}}"#;
        assert_eq!(
            network_address(json, "molt-network").unwrap(),
            Some("10.0.0.2".to_string())
        );
    }

    #[test]
    fn test_network_address_missing() {
        assert_eq!(network_address("{}", "molt-network").unwrap(), None);
        assert_eq!(network_address("null\n", "molt-network").unwrap(), None);
        let json = r#"{"molt-network":{"IPAddress":""}}"#;
        assert_eq!(network_address(json, "molt-network").unwrap(), None);
        assert!(network_address("not json", "molt-network").is_err());
    }

    #[test]
    fn test_compose_command_parse() {
        assert_eq!(
            ComposeCommand::parse("docker compose"),
            Some(ComposeCommand {
                program: "docker".to_string(),
                base_args: vec!["compose".to_string()],
            })
        );
        assert_eq!(
            ComposeCommand::parse("docker-compose").map(|c| c.base_args.len()),
            Some(0)
        );
        assert_eq!(ComposeCommand::parse("   "), None);
    }
}
