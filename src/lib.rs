//! Molt Agent - 按修订号部署预览环境
//!
//! 收到 `<revision>.<repository>.<owner>` 请求后拉取代码、合并 compose 片段、构建并启动容器，
//! 同时把过程日志推送给调用方

pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod infra;
pub mod services;
pub mod state;

use anyhow::Context;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::env::{constants::VERSION, EnvConfig};
use crate::infra::callback::AddressStoreClient;
use crate::infra::deploy_key;
use crate::infra::docker::{self, ComposeCommand, DockerInspector};
use crate::services::deploy::PipelineSettings;
use crate::services::stream::MoltService;
use crate::state::{AddressBook, AppState, JobRegistry};

/// 命令行覆盖项
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    /// 覆盖 PORT 环境变量
    pub port_override: Option<u16>,
}

/// 初始化日志并运行服务，直到收到退出信号
pub async fn init_and_run_with_config(runtime: RuntimeConfig) {
    init_tracing();

    let mut config = EnvConfig::from_env();
    if let Some(port) = runtime.port_override {
        config.port = port;
    }

    if let Err(e) = run(config).await {
        error!("molt-agent stopped with an error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("molt_agent=info,tower_http=info"));
    // 测试或嵌入场景下可能已经初始化过
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

async fn run(config: EnvConfig) -> anyhow::Result<()> {
    info!(
        version = VERSION,
        base_domain = %config.base_domain,
        repos_dir = %config.repos_dir.display(),
        "Starting molt-agent"
    );

    // 网络创建失败不阻止启动，compose up 时会再报错
    if let Err(e) = docker::ensure_network(&config.network, config.network_subnet.as_deref()).await {
        warn!(network = %config.network, error = %e, "Could not ensure isolation network");
    }

    // 默认模板走 SSH，克隆前需要一把部署密钥
    if deploy_key::uses_ssh(&config.git_url_template) {
        if let Some(path) = config.deploy_key_path.as_deref() {
            if let Err(e) = deploy_key::ensure_deploy_key(path).await {
                warn!(path = %path.display(), error = %e, "Could not ensure deploy key");
            }
        }
    }

    let compose = match config.compose_command.as_deref().and_then(ComposeCommand::parse) {
        Some(compose) => compose,
        None => ComposeCommand::detect().await,
    };
    info!(program = %compose.program, args = ?compose.base_args, "Using compose command");

    let settings = Arc::new(PipelineSettings::from_env(&config, compose));
    let addresses = Arc::new(AddressBook::new(AddressStoreClient::new(
        config.store_callback_url.clone(),
    )));
    let molt = Arc::new(MoltService::new(
        Arc::new(JobRegistry::new()),
        settings,
        Arc::new(DockerInspector::new(config.network.clone())),
        addresses,
    ));

    let addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(AppState::new(config, molt));
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(address = %addr, "Listening");

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("HTTP server failed")?;

    info!("molt-agent stopped");
    Ok(())
}

/// 等待 Ctrl+C 或 SIGTERM
async fn wait_for_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
    shutdown.cancel();
}
