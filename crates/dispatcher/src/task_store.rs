use std::sync::Arc;

use broker_core::{
    models::{Assignment, NewTask, Task, TaskConfig, TaskResult, TaskState},
    traits::{BlobStore, BrokerMetric, MetricsSink, TaskRepository},
    BrokerError, BrokerResult,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::pause_controller::ExecutorPauseController;
use crate::timeout_supervisor::TimeoutSupervisor;

pub const DEFAULT_LIST_LIMIT: i64 = 100;
const MAX_LIST_LIMIT: i64 = 1000;

/// 调度请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub name: String,
    pub config: TaskConfig,
    #[serde(default)]
    pub max_attempts: Option<i32>,
}

/// 任务及其执行结果（仅在完成且有结果时存在）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskDetails {
    #[serde(flatten)]
    pub task: Task,
    pub result: Option<TaskResult>,
}

#[derive(Debug, Clone)]
pub struct TaskStoreConfig {
    pub default_max_attempts: i32,
    pub claim_retry_limit: u32,
    pub bulk_delete_batch_size: i64,
}

impl Default for TaskStoreConfig {
    fn default() -> Self {
        Self {
            default_max_attempts: broker_core::models::DEFAULT_MAX_ATTEMPTS,
            claim_retry_limit: 5,
            bulk_delete_batch_size: 100,
        }
    }
}

/// 任务存储服务
///
/// 负责任务的调度、查询、删除，以及按能力匹配的原子领取。
pub struct TaskStore {
    tasks: Arc<dyn TaskRepository>,
    pauses: Arc<ExecutorPauseController>,
    supervisor: Arc<TimeoutSupervisor>,
    blobs: Arc<dyn BlobStore>,
    metrics: Arc<dyn MetricsSink>,
    config: TaskStoreConfig,
}

impl TaskStore {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        pauses: Arc<ExecutorPauseController>,
        supervisor: Arc<TimeoutSupervisor>,
        blobs: Arc<dyn BlobStore>,
        metrics: Arc<dyn MetricsSink>,
        config: TaskStoreConfig,
    ) -> Self {
        Self {
            tasks,
            pauses,
            supervisor,
            blobs,
            metrics,
            config,
        }
    }

    #[instrument(skip(self, request), fields(task_name = %request.name))]
    pub async fn schedule(&self, request: ScheduleRequest) -> BrokerResult<Task> {
        let new_task = NewTask::new(request.name, request.config).with_max_attempts(
            request
                .max_attempts
                .unwrap_or(self.config.default_max_attempts),
        );
        new_task.validate()?;

        let task = self.tasks.create(&new_task).await?;
        self.metrics.record(BrokerMetric::TaskScheduled);
        info!(
            requirements = ?task.config.executor_requirements,
            "已调度 {}",
            task.entity_description()
        );
        Ok(task)
    }

    pub async fn get(&self, id: i64) -> BrokerResult<Task> {
        self.tasks
            .get_by_id(id)
            .await?
            .ok_or_else(|| BrokerError::task_not_found(id))
    }

    pub async fn get_details(&self, id: i64) -> BrokerResult<TaskDetails> {
        let task = self.get(id).await?;
        let result = if task.result_id.is_some() {
            self.tasks.get_result(id).await?
        } else {
            None
        };
        Ok(TaskDetails { task, result })
    }

    /// 删除任务，任意状态都允许；结果的Blob尽力清理
    #[instrument(skip(self), fields(task_id = id))]
    pub async fn delete(&self, id: i64) -> BrokerResult<()> {
        let result = self.tasks.get_result(id).await?;
        if !self.tasks.delete(id).await? {
            return Err(BrokerError::task_not_found(id));
        }
        info!("任务 {} 已删除", id);

        if let Some(result) = result {
            for key in [result.stdout_ref, result.stderr_ref].into_iter().flatten() {
                if let Err(e) = self.blobs.delete(&key).await {
                    warn!("清理任务 {} 的输出Blob {} 失败: {}", id, key, e);
                }
            }
        }
        Ok(())
    }

    pub async fn list_by_executor(
        &self,
        capability: &str,
        state: Option<TaskState>,
        limit: Option<i64>,
    ) -> BrokerResult<Vec<Task>> {
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
        self.tasks
            .list_by_executor(capability, state.unwrap_or(TaskState::Scheduled), limit)
            .await
    }

    /// 存储可用性检查
    pub async fn ping(&self) -> BrokerResult<()> {
        self.tasks.ping().await
    }

    /// 只读地查看队首任务
    pub async fn peek(&self, capability: &str) -> BrokerResult<Option<Task>> {
        self.tasks.peek_oldest(capability).await
    }

    /// 分批删除需要该能力的全部任务，不跨批次保证原子性
    #[instrument(skip(self), fields(capability = %capability))]
    pub async fn delete_by_executor(&self, capability: &str) -> BrokerResult<u64> {
        let batch = self.config.bulk_delete_batch_size;
        let mut total = 0;
        loop {
            let deleted = self.tasks.delete_batch_by_executor(capability, batch).await?;
            total += deleted;
            if deleted < batch as u64 {
                break;
            }
        }
        info!("已删除执行器 {} 的 {} 个任务", capability, total);
        Ok(total)
    }

    /// 领取任务
    ///
    /// 按调用方给出的顺序逐个尝试能力，跳过已暂停的能力，返回第一个领取成功的任务。
    /// 没有可领取的任务时返回 `None`，调用方应稍后再次轮询。
    #[instrument(skip(self, capabilities), fields(worker = %worker))]
    pub async fn assign(
        &self,
        worker: &str,
        capabilities: &[String],
    ) -> BrokerResult<Option<Assignment>> {
        if worker.trim().is_empty() {
            return Err(BrokerError::validation_error("Worker名称不能为空"));
        }

        for capability in capabilities.iter().filter(|cap| !cap.trim().is_empty()) {
            if self.pauses.is_paused(capability).await? {
                debug!("执行器 {} 已暂停，跳过", capability);
                continue;
            }

            if let Some(task) = self.claim_for_capability(worker, capability).await? {
                return Ok(Some(Assignment {
                    capability: capability.clone(),
                    task,
                }));
            }
        }

        Ok(None)
    }

    /// 在单个能力上执行比较交换领取，竞争失败时重新查找候选任务
    ///
    /// 截止检查在领取之前写入队列，领取成功的任务总是带有截止检查；
    /// 竞争失败时撤销这次检查。
    async fn claim_for_capability(
        &self,
        worker: &str,
        capability: &str,
    ) -> BrokerResult<Option<Task>> {
        for _ in 0..self.config.claim_retry_limit {
            let Some(candidate) = self.tasks.peek_oldest(capability).await? else {
                return Ok(None);
            };

            let now = Utc::now();
            let attempt = candidate.attempts + 1;
            let deadline_job = self
                .supervisor
                .schedule_deadline(&candidate, attempt, now)
                .await?;

            match self
                .tasks
                .try_claim(candidate.id, candidate.attempts, worker, now)
                .await?
            {
                Some(task) => {
                    self.metrics.record(BrokerMetric::TaskClaimed {
                        capability: capability.to_string(),
                    });
                    info!(
                        capability = %capability,
                        "Worker {} 领取了 {}",
                        worker,
                        task.entity_description()
                    );
                    return Ok(Some(task));
                }
                None => {
                    self.supervisor.discard_deadline(deadline_job).await;
                    self.metrics.record(BrokerMetric::ClaimConflict);
                    debug!("任务 {} 被并发领取，重新查找候选任务", candidate.id);
                }
            }
        }

        warn!(
            "执行器 {} 上连续 {} 次领取冲突，本次轮询放弃",
            capability, self.config.claim_retry_limit
        );
        Ok(None)
    }
}
