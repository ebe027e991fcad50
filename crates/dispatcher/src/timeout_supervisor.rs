use std::sync::Arc;
use std::time::Duration;

use broker_core::{
    models::{DeferredJob, Task, TaskState},
    traits::{BrokerMetric, DeferredQueue, MetricsSink, TaskRepository},
    BrokerError, BrokerResult,
};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

/// 一次截止检查的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineOutcome {
    /// 任务已离开这次尝试（完成、重新领取或被删除），检查无效
    Stale,
    /// 仍有剩余尝试，放回 SCHEDULED
    Requeued,
    /// 尝试耗尽，终结为 COMPLETE/TIMED_OUT
    TimedOut,
}

/// 超时监督器
///
/// 每次领取成功都会安排一次携带 `(task_id, attempt)` 的截止检查。
/// 检查触发时只比较尝试编号，不主动取消过期的检查。
pub struct TimeoutSupervisor {
    tasks: Arc<dyn TaskRepository>,
    queue: Arc<dyn DeferredQueue>,
    metrics: Arc<dyn MetricsSink>,
    default_timeout: Duration,
    grace_period: Duration,
}

impl TimeoutSupervisor {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        queue: Arc<dyn DeferredQueue>,
        metrics: Arc<dyn MetricsSink>,
        default_timeout: Duration,
        grace_period: Duration,
    ) -> Self {
        Self {
            tasks,
            queue,
            metrics,
            default_timeout,
            grace_period,
        }
    }

    /// 截止时间 = 领取时间 + 任务超时 + 宽限期
    pub fn deadline_for(&self, task: &Task, claimed_at: DateTime<Utc>) -> DateTime<Utc> {
        task.config
            .timeout_or(self.default_timeout)
            .checked_add(self.grace_period)
            .and_then(|window| chrono::Duration::from_std(window).ok())
            .and_then(|window| claimed_at.checked_add_signed(window))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// 为即将生效的尝试安排截止检查，返回队列中的作业ID
    #[instrument(skip(self, task, claimed_at), fields(task_id = task.id, attempt = attempt))]
    pub async fn schedule_deadline(
        &self,
        task: &Task,
        attempt: i32,
        claimed_at: DateTime<Utc>,
    ) -> BrokerResult<i64> {
        let due_at = self.deadline_for(task, claimed_at);
        let job = DeferredJob::DeadlineCheck {
            task_id: task.id,
            attempt,
        };
        let id = self.queue.enqueue(&job, due_at).await?;
        debug!("已安排截止检查: 任务 {} 尝试 {} 于 {}", task.id, attempt, due_at);
        Ok(id)
    }

    /// 撤销一次未生效的截止检查，失败只记录日志
    pub async fn discard_deadline(&self, job_id: i64) {
        if let Err(e) = self.queue.ack(job_id).await {
            warn!("撤销截止检查 {} 失败，将在触发时按过期处理: {}", job_id, e);
        }
    }

    /// 执行截止检查，重复执行同一检查只有第一次生效
    #[instrument(skip(self), fields(task_id = task_id, attempt = attempt))]
    pub async fn check_deadline(&self, task_id: i64, attempt: i32) -> BrokerResult<DeadlineOutcome> {
        let Some(task) = self.tasks.get_by_id(task_id).await? else {
            debug!("任务 {} 已删除，截止检查无效", task_id);
            return Ok(DeadlineOutcome::Stale);
        };

        if task.state != TaskState::Assigned || task.attempts != attempt {
            debug!(
                "截止检查已过期: {} 当前尝试 {}，检查尝试 {}",
                task.entity_description(),
                task.attempts,
                attempt
            );
            return Ok(DeadlineOutcome::Stale);
        }

        if task.has_attempts_remaining() {
            if self.tasks.requeue(task_id, attempt).await? {
                warn!(
                    worker = task.assigned_worker.as_deref().unwrap_or_default(),
                    "任务 {} 第 {} 次尝试超时，重新排队",
                    task_id,
                    attempt
                );
                self.metrics.record(BrokerMetric::TaskRequeued);
                return Ok(DeadlineOutcome::Requeued);
            }
        } else if self.tasks.mark_timed_out(task_id, attempt, Utc::now()).await? {
            warn!(
                worker = task.assigned_worker.as_deref().unwrap_or_default(),
                "任务 {} 尝试次数已耗尽 ({}/{})，标记为超时",
                task_id,
                task.attempts,
                task.max_attempts
            );
            self.metrics.record(BrokerMetric::TaskTimedOut);
            return Ok(DeadlineOutcome::TimedOut);
        }

        info!("任务 {} 在截止检查期间发生并发变化，检查无效", task_id);
        Ok(DeadlineOutcome::Stale)
    }

    /// 处理延迟队列中的作业，只接受截止检查
    pub async fn handle_job(&self, job: &DeferredJob) -> BrokerResult<DeadlineOutcome> {
        match job {
            DeferredJob::DeadlineCheck { task_id, attempt } => {
                self.check_deadline(*task_id, *attempt).await
            }
            other => Err(BrokerError::Internal(format!(
                "超时监督器无法处理作业类型: {}",
                other.kind()
            ))),
        }
    }
}
