use std::sync::Arc;

use broker_core::{
    models::{DeferredJob, NewTaskResult, ResultReport, Task, TaskState},
    traits::{BlobStore, BrokerMetric, DeferredQueue, MetricsSink, TaskRepository},
    BrokerError, BrokerResult,
};
use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};

/// Worker上报的完整内容：结构化结果加可选的输出附件
#[derive(Debug, Clone, Default)]
pub struct ResultSubmission {
    pub report: ResultReport,
    pub stdout: Option<Vec<u8>>,
    pub stderr: Option<Vec<u8>>,
}

/// 结果接收服务
///
/// 以尝试编号保证每个尝试至多一次生效；完成持久化之后才安排Webhook。
pub struct ResultIngestion {
    tasks: Arc<dyn TaskRepository>,
    blobs: Arc<dyn BlobStore>,
    queue: Arc<dyn DeferredQueue>,
    metrics: Arc<dyn MetricsSink>,
}

impl ResultIngestion {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        blobs: Arc<dyn BlobStore>,
        queue: Arc<dyn DeferredQueue>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            tasks,
            blobs,
            queue,
            metrics,
        }
    }

    fn stale(&self, task: &Task, reported: i32) -> BrokerError {
        self.metrics.record(BrokerMetric::StaleReport);
        info!(
            "拒绝过期的结果: {} 上报尝试 {}",
            task.entity_description(),
            reported
        );
        BrokerError::StaleAttempt {
            task_id: task.id,
            reported,
            current: task.attempts,
        }
    }

    async fn store_blob(&self, content: Option<Vec<u8>>) -> BrokerResult<Option<String>> {
        match content {
            Some(content) => self.blobs.put(content).await.map(Some),
            None => Ok(None),
        }
    }

    async fn discard_blobs(&self, keys: &[Option<String>]) {
        for key in keys.iter().flatten() {
            if let Err(e) = self.blobs.delete(key).await {
                warn!("清理未使用的输出Blob {} 失败: {}", key, e);
            }
        }
    }

    #[instrument(skip(self, submission), fields(task_id = task_id, attempt = submission.report.attempt))]
    pub async fn report_result(
        &self,
        task_id: i64,
        submission: ResultSubmission,
    ) -> BrokerResult<Task> {
        let ResultSubmission {
            report,
            stdout,
            stderr,
        } = submission;
        let attempt = report.attempt;

        // 预检避免为过期上报写入Blob，最终以事务内的比较交换为准
        let task = self
            .tasks
            .get_by_id(task_id)
            .await?
            .ok_or_else(|| BrokerError::task_not_found(task_id))?;
        if task.attempts != attempt || task.state == TaskState::Complete {
            return Err(self.stale(&task, attempt));
        }

        let stdout_ref = self.store_blob(stdout).await?;
        let stderr_ref = match self.store_blob(stderr).await {
            Ok(key) => key,
            Err(e) => {
                self.discard_blobs(&[stdout_ref]).await;
                return Err(e);
            }
        };

        let result = NewTaskResult::from_report(report, stdout_ref.clone(), stderr_ref.clone());
        let completed = match self
            .tasks
            .complete_with_result(task_id, attempt, &result, Utc::now())
            .await
        {
            Ok(task) => task,
            Err(e) => {
                self.discard_blobs(&[stdout_ref, stderr_ref]).await;
                if matches!(e, BrokerError::StaleAttempt { .. }) {
                    self.metrics.record(BrokerMetric::StaleReport);
                }
                return Err(e);
            }
        };

        if let Some(outcome) = completed.outcome {
            self.metrics.record(BrokerMetric::TaskCompleted { outcome });
        }
        info!(
            exit_code = result.exit_code,
            "{} 已完成",
            completed.entity_description()
        );

        if let Some(url) = completed.config.webhook.clone() {
            let job = DeferredJob::Webhook {
                task_id: completed.id,
                url,
            };
            // 完成已经提交，Webhook入队失败不回滚
            match self.queue.enqueue(&job, Utc::now()).await {
                Ok(job_id) => debug!("已安排Webhook作业 {}", job_id),
                Err(e) => error!("安排任务 {} 的Webhook失败: {}", completed.id, e),
            }
        }

        Ok(completed)
    }
}
