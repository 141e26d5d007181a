//! 单个预览部署任务
//!
//! 持有日志回放缓冲、订阅者通道、状态机和终态结果

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, OnceLock};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::config::env::constants::LOG_HISTORY_LIMIT;
use crate::domain::job::{
    JobFailure, JobOutcome, JobSnapshot, JobState, LogLine, StageRecord,
};
use crate::domain::vhost::VirtualHostKey;
use crate::infra::command::LogSink;

/// 订阅结果：已产生的日志 + 之后的实时日志
///
/// 两者之间没有缺口也没有重复。每个订阅者有自己的无界通道，消费慢不会丢行
pub struct LogSubscription {
    pub backlog: Vec<LogLine>,
    pub receiver: mpsc::UnboundedReceiver<LogLine>,
}

#[derive(Default)]
struct LogBook {
    lines: VecDeque<LogLine>,
    subscribers: Vec<mpsc::UnboundedSender<LogLine>>,
}

/// 部署任务
pub struct Job {
    key: VirtualHostKey,
    started_at: DateTime<Utc>,
    /// 回放缓冲和订阅者，发送与订阅都在这把锁下进行
    log: Mutex<LogBook>,
    state: watch::Sender<JobState>,
    outcome: OnceLock<JobOutcome>,
    stages: Mutex<Vec<StageRecord>>,
}

impl Job {
    pub fn new(key: VirtualHostKey) -> Self {
        let (state, _) = watch::channel(JobState::Pending);
        Self {
            key,
            started_at: Utc::now(),
            log: Mutex::new(LogBook::default()),
            state,
            outcome: OnceLock::new(),
            stages: Mutex::new(JobState::STAGES.iter().map(|s| StageRecord::new(*s)).collect()),
        }
    }

    pub fn key(&self) -> &VirtualHostKey {
        &self.key
    }

    pub fn state(&self) -> JobState {
        *self.state.borrow()
    }

    pub fn outcome(&self) -> Option<JobOutcome> {
        self.outcome.get().cloned()
    }

    /// 写入一行 agent 自己的日志
    pub fn log(&self, content: impl Into<String>) {
        self.emit(LogLine::system(content));
    }

    /// 订阅日志
    pub fn subscribe(&self) -> LogSubscription {
        let mut log = lock(&self.log);
        let (sender, receiver) = mpsc::unbounded_channel();
        log.subscribers.push(sender);
        LogSubscription {
            backlog: log.lines.iter().cloned().collect(),
            receiver,
        }
    }

    /// 推进到下一个状态，非法转移会被拒绝
    pub fn transition(&self, next: JobState) -> bool {
        let mut accepted = false;
        self.state.send_if_modified(|current| {
            if current.can_advance_to(next) && !next.is_terminal() {
                *current = next;
                accepted = true;
            }
            accepted
        });
        if !accepted {
            warn!(
                virtual_host = %self.key,
                from = self.state().as_str(),
                to = next.as_str(),
                "Rejected job state transition"
            );
        }
        accepted
    }

    /// 结束任务
    ///
    /// 先发出终止标记再进入终态；重复调用会被忽略
    pub fn finish(&self, outcome: JobOutcome) {
        let terminal = outcome.state();
        let current = self.state();
        if !current.can_advance_to(terminal) {
            if current.is_terminal() || self.outcome.get().is_some() {
                warn!(virtual_host = %self.key, "Job already finished");
                return;
            }
            warn!(
                virtual_host = %self.key,
                from = current.as_str(),
                to = terminal.as_str(),
                "Finishing job from an unexpected state"
            );
        }
        if self.outcome.set(outcome).is_err() {
            warn!(virtual_host = %self.key, "Job already finished");
            return;
        }

        self.emit(LogLine::sentinel());
        self.state.send_replace(terminal);
        info!(virtual_host = %self.key, state = terminal.as_str(), "Job finished");
    }

    /// 等待任务进入终态
    pub async fn wait_outcome(&self) -> JobOutcome {
        let mut rx = self.state.subscribe();
        // sender 由 self 持有，等待期间不会关闭
        let _ = rx.wait_for(|state| state.is_terminal()).await;
        self.outcome().unwrap_or_else(|| {
            JobOutcome::Failed(JobFailure::internal("job reached a terminal state without outcome"))
        })
    }

    /// 修改某个阶段的记录
    pub fn update_stage(&self, state: JobState, update: impl FnOnce(&mut StageRecord)) {
        let mut stages = lock(&self.stages);
        if let Some(stage) = stages.iter_mut().find(|s| s.state == state) {
            update(stage);
        }
    }

    pub fn stages(&self) -> Vec<StageRecord> {
        lock(&self.stages).clone()
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let failure = match self.outcome() {
            Some(JobOutcome::Failed(failure)) => Some(failure),
            _ => None,
        };
        JobSnapshot {
            virtual_host: self.key.to_string(),
            revision: self.key.revision.clone(),
            repository: self.key.repository.clone(),
            owner: self.key.owner.clone(),
            state: self.state(),
            started_at: self.started_at,
            stages: self.stages(),
            failure,
        }
    }
}

impl LogSink for Job {
    fn emit(&self, line: LogLine) {
        let mut log = lock(&self.log);
        // 接收端已断开的订阅者直接移除
        log.subscribers.retain(|tx| tx.send(line.clone()).is_ok());
        if log.lines.len() >= LOG_HISTORY_LIMIT {
            log.lines.pop_front();
        }
        log.lines.push_back(line);
    }
}

/// 锁中毒时继续使用内部数据：日志与阶段记录没有需要恢复的不变量
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::{FailureKind, JobSuccess, StageStatus, END_SENTINEL};
    use std::sync::Arc;

    fn job() -> Job {
        Job::new(VirtualHostKey::new("a1b2c3", "demo", "carol"))
    }

    #[test]
    fn test_transitions_follow_state_machine() {
        let job = job();
        assert_eq!(job.state(), JobState::Pending);
        assert!(job.transition(JobState::Fetching));
        assert!(!job.transition(JobState::Building));
        assert_eq!(job.state(), JobState::Fetching);
        assert!(!job.transition(JobState::Succeeded));
    }

    #[tokio::test]
    async fn test_sentinel_precedes_terminal_state() {
        let job = job();
        let LogSubscription { mut receiver, .. } = job.subscribe();

        job.log("hello");
        job.finish(JobOutcome::Failed(JobFailure::new(FailureKind::Stage, "boom")));

        assert_eq!(receiver.recv().await.unwrap().content, "hello");
        assert_eq!(receiver.recv().await.unwrap().content, END_SENTINEL);
        assert_eq!(job.state(), JobState::Failed);
        assert!(matches!(job.wait_outcome().await, JobOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn test_finish_is_idempotent() {
        let job = job();
        job.finish(JobOutcome::Failed(JobFailure::internal("first")));
        job.finish(JobOutcome::Failed(JobFailure::internal("second")));

        let sentinels = job
            .subscribe()
            .backlog
            .iter()
            .filter(|l| l.is_sentinel())
            .count();
        assert_eq!(sentinels, 1);
        assert_eq!(
            job.outcome(),
            Some(JobOutcome::Failed(JobFailure::internal("first")))
        );
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_backlog_without_gap() {
        let job = Arc::new(job());
        job.log("one");
        job.log("two");

        let LogSubscription {
            backlog,
            mut receiver,
        } = job.subscribe();
        job.log("three");

        let backlog: Vec<_> = backlog.into_iter().map(|l| l.content).collect();
        assert_eq!(backlog, vec!["one", "two"]);
        assert_eq!(receiver.recv().await.unwrap().content, "three");
    }

    #[tokio::test]
    async fn test_slow_subscriber_receives_every_line() {
        let job = job();
        let LogSubscription { mut receiver, .. } = job.subscribe();

        for i in 0..5000 {
            job.log(format!("line {}", i));
        }
        job.finish(JobOutcome::Failed(JobFailure::internal("done")));

        for i in 0..5000 {
            assert_eq!(receiver.recv().await.unwrap().content, format!("line {}", i));
        }
        assert!(receiver.recv().await.unwrap().is_sentinel());
    }

    #[test]
    fn test_dropped_subscriber_is_released() {
        let job = job();
        drop(job.subscribe());
        job.log("after");
        assert!(lock(&job.log).subscribers.is_empty());
    }

    #[tokio::test]
    async fn test_wait_outcome_from_other_task() {
        let job = Arc::new(job());
        let waiter = {
            let job = job.clone();
            tokio::spawn(async move { job.wait_outcome().await })
        };

        for state in JobState::STAGES {
            assert!(job.transition(state));
        }
        job.finish(JobOutcome::Succeeded(JobSuccess {
            entry: "web".to_string(),
        }));

        let outcome = waiter.await.unwrap();
        assert_eq!(
            outcome,
            JobOutcome::Succeeded(JobSuccess {
                entry: "web".to_string()
            })
        );
    }

    #[test]
    fn test_stage_records_and_snapshot() {
        let job = job();
        job.update_stage(JobState::Initializing, |s| s.skip(Some("not configured".into())));
        job.finish(JobOutcome::Failed(JobFailure::new(FailureKind::Config, "missing")));

        let snapshot = job.snapshot();
        assert_eq!(snapshot.virtual_host, "a1b2c3.demo.carol");
        assert_eq!(snapshot.state, JobState::Failed);
        assert_eq!(snapshot.stages.len(), 7);
        let init = snapshot
            .stages
            .iter()
            .find(|s| s.state == JobState::Initializing)
            .unwrap();
        assert_eq!(init.status, StageStatus::Skipped);
        assert_eq!(snapshot.failure.unwrap().message, "missing");
    }
}
