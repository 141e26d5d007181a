//! 部署事件流
//!
//! 调用方与流水线之间的边界：启动或复用任务，转发日志，最后给出一个 success / failure 事件

use futures::Stream;
use std::sync::Arc;
use tracing::{error, info};

use crate::domain::job::{JobOutcome, INTERNAL_ERROR_MESSAGE};
use crate::domain::vhost::VirtualHostKey;
use crate::infra::docker::ContainerInspector;
use crate::services::deploy::{self, PipelineSettings};
use crate::state::address_book::AddressBook;
use crate::state::job::{Job, LogSubscription};
use crate::state::registry::JobRegistry;

/// 事件类型，进度事件没有标签
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Success,
    Failure,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Success => "success",
            EventKind::Failure => "failure",
        }
    }
}

/// 推送给调用方的一条事件
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MoltEvent {
    pub kind: Option<EventKind>,
    pub data: String,
}

impl MoltEvent {
    /// 保活注释
    pub const KEEP_ALIVE: &'static str = ":\n\n";

    pub fn progress(data: impl Into<String>) -> Self {
        Self {
            kind: None,
            data: data.into(),
        }
    }

    pub fn success(address: impl Into<String>) -> Self {
        Self {
            kind: Some(EventKind::Success),
            data: address.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            kind: Some(EventKind::Failure),
            data: message.into(),
        }
    }

    pub fn label(&self) -> Option<&'static str> {
        self.kind.map(|k| k.as_str())
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_some()
    }

    /// 渲染为文本记录：可选的 `event:` 行，每行数据一个 `data:` 行，空行结束
    pub fn to_wire(&self) -> String {
        let mut out = String::new();
        if let Some(label) = self.label() {
            out.push_str("event: ");
            out.push_str(label);
            out.push('\n');
        }
        for line in self.data.split('\n') {
            out.push_str("data: ");
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        out
    }
}

/// 预览部署服务
pub struct MoltService {
    registry: Arc<JobRegistry>,
    settings: Arc<PipelineSettings>,
    inspector: Arc<dyn ContainerInspector>,
    addresses: Arc<AddressBook>,
}

impl MoltService {
    pub fn new(
        registry: Arc<JobRegistry>,
        settings: Arc<PipelineSettings>,
        inspector: Arc<dyn ContainerInspector>,
        addresses: Arc<AddressBook>,
    ) -> Self {
        Self {
            registry,
            settings,
            inspector,
            addresses,
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn addresses(&self) -> &Arc<AddressBook> {
        &self.addresses
    }

    pub fn settings(&self) -> &Arc<PipelineSettings> {
        &self.settings
    }

    /// 启动或复用任务
    pub async fn launch(&self, key: &VirtualHostKey) -> (Arc<Job>, bool) {
        let settings = self.settings.clone();
        self.registry
            .get_or_create(key, move |job| deploy::execute(job, settings))
            .await
    }

    /// 某个虚拟主机的事件流
    ///
    /// 先回放已有日志，再转发实时日志直到终止标记，最后是唯一的终态事件。
    /// 调用方中途断开不会影响流水线。
    pub fn events(self: Arc<Self>, key: VirtualHostKey) -> impl Stream<Item = MoltEvent> + Send {
        async_stream::stream! {
            let (job, created) = self.launch(&key).await;
            info!(virtual_host = %key, created = created, "Consumer attached");

            let LogSubscription { backlog, mut receiver } = job.subscribe();
            let mut ended = false;

            for line in backlog {
                ended = line.is_sentinel();
                yield MoltEvent::progress(line.content);
                if ended {
                    break;
                }
            }

            while !ended {
                match receiver.recv().await {
                    Some(line) => {
                        ended = line.is_sentinel();
                        yield MoltEvent::progress(line.content);
                    }
                    None => break,
                }
            }

            let event = self.conclude(&key, &job).await;
            yield event;
        }
    }

    /// 把任务结果变成终态事件，并把任务移出注册表
    async fn conclude(&self, key: &VirtualHostKey, job: &Arc<Job>) -> MoltEvent {
        let event = match job.wait_outcome().await {
            JobOutcome::Succeeded(success) => {
                match self.inspector.address_of(key, &success.entry).await {
                    Ok(address) => {
                        self.addresses.publish(key, &address).await;
                        MoltEvent::success(address)
                    }
                    Err(e) => {
                        error!(
                            virtual_host = %key,
                            entry = %success.entry,
                            error = %e,
                            "Failed to inspect entry container"
                        );
                        MoltEvent::failure(INTERNAL_ERROR_MESSAGE)
                    }
                }
            }
            JobOutcome::Failed(failure) => MoltEvent::failure(failure.public_message()),
        };

        // 成功和失败都移出，下一次请求会重新部署
        self.registry.acknowledge(key, job).await;
        event
    }
}
