//! 基础设施模块
//!
//! 封装外部依赖（HTTP client、命令执行、docker CLI 等）

pub mod callback;
pub mod command;
pub mod deploy_key;
pub mod docker;
pub mod github;
pub mod pipeline;

pub use callback::AddressStoreClient;
pub use command::CommandRunner;
pub use github::GithubClient;
