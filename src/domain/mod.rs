//! 领域模型模块
//!
//! 纯数据结构，不依赖 axum/tokio

pub mod job;
pub mod vhost;

// Re-exports for convenience
pub use job::{FailureKind, JobFailure, JobOutcome, JobState, LogLine, StageRecord, StageStatus};
pub use vhost::{FormatError, VirtualHostKey};
