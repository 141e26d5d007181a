//! 配置模块
//!
//! 环境变量解析与仓库内的部署描述文件

pub mod env;
pub mod molt;

pub use env::EnvConfig;
pub use molt::{ConfigError, DeploymentConfig, InitScript};
