//! 任务注册表
//!
//! 每个虚拟主机键至多一个任务；并发请求同一个键时共享同一个任务

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

use super::job::Job;
use crate::domain::job::{JobFailure, JobOutcome, JobSnapshot};
use crate::domain::vhost::VirtualHostKey;

/// 任务注册表
#[derive(Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<VirtualHostKey, Arc<Job>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取已有任务，或创建新任务并在后台启动 `run`
    ///
    /// 返回任务以及是否由本次调用创建
    pub async fn get_or_create<F, Fut>(&self, key: &VirtualHostKey, run: F) -> (Arc<Job>, bool)
    where
        F: FnOnce(Arc<Job>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut jobs = self.jobs.lock().await;
        if let Some(job) = jobs.get(key) {
            info!(virtual_host = %key, state = job.state().as_str(), "Attaching to existing job");
            return (job.clone(), false);
        }

        let job = Arc::new(Job::new(key.clone()));
        jobs.insert(key.clone(), job.clone());
        drop(jobs);

        info!(virtual_host = %key, "Starting job");
        spawn_supervised(job.clone(), run(job.clone()));
        (job, true)
    }

    pub async fn get(&self, key: &VirtualHostKey) -> Option<Arc<Job>> {
        self.jobs.lock().await.get(key).cloned()
    }

    /// 确认任务结果并移出注册表
    ///
    /// 只有当前登记的仍是同一个任务实例时才会移除
    pub async fn acknowledge(&self, key: &VirtualHostKey, job: &Arc<Job>) -> bool {
        let mut jobs = self.jobs.lock().await;
        match jobs.get(key) {
            Some(current) if Arc::ptr_eq(current, job) => {
                jobs.remove(key);
                info!(virtual_host = %key, state = job.state().as_str(), "Job acknowledged");
                true
            }
            _ => false,
        }
    }

    pub async fn snapshots(&self) -> Vec<JobSnapshot> {
        let jobs = self.jobs.lock().await;
        let mut snapshots: Vec<_> = jobs.values().map(|job| job.snapshot()).collect();
        snapshots.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        snapshots
    }

    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// 在后台执行流水线
///
/// 流水线 panic 或未结束任务就返回时，任务以内部错误结束，订阅方不会一直等待
fn spawn_supervised<Fut>(job: Arc<Job>, pipeline: Fut)
where
    Fut: Future<Output = ()> + Send + 'static,
{
    let handle = tokio::spawn(pipeline);
    tokio::spawn(async move {
        let reason = match handle.await {
            Ok(()) if job.outcome().is_some() => return,
            Ok(()) => "pipeline returned without finishing the job".to_string(),
            Err(e) => format!("pipeline task aborted: {}", e),
        };
        error!(virtual_host = %job.key(), reason = %reason, "Job pipeline ended abnormally");
        job.finish(JobOutcome::Failed(JobFailure::internal(reason)));
    });
}
