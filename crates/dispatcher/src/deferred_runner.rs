use std::sync::Arc;
use std::time::Duration;

use broker_core::{
    models::{DeferredEntry, DeferredJob},
    traits::{BrokerMetric, DeferredQueue, MetricsSink, WebhookNotifier},
    BrokerResult,
};
use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::timeout_supervisor::TimeoutSupervisor;

#[derive(Debug, Clone)]
pub struct DeferredRunnerConfig {
    pub poll_interval: Duration,
    pub batch_size: i64,
    pub lease: Duration,
    pub webhook_max_deliveries: i32,
    pub webhook_retry_delay: Duration,
}

impl Default for DeferredRunnerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            batch_size: 50,
            lease: Duration::from_secs(60),
            webhook_max_deliveries: 5,
            webhook_retry_delay: Duration::from_secs(30),
        }
    }
}

/// 单轮处理统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub fetched: usize,
    pub acked: usize,
    pub rescheduled: usize,
    pub failed: usize,
}

/// 延迟作业执行器
///
/// 周期性取出到期作业并分派：截止检查交给超时监督器，Webhook交给通知器。
/// 处理失败的作业不确认，租约到期后会被再次取出。
pub struct DeferredJobRunner {
    queue: Arc<dyn DeferredQueue>,
    supervisor: Arc<TimeoutSupervisor>,
    notifier: Arc<dyn WebhookNotifier>,
    metrics: Arc<dyn MetricsSink>,
    config: DeferredRunnerConfig,
}

impl DeferredJobRunner {
    pub fn new(
        queue: Arc<dyn DeferredQueue>,
        supervisor: Arc<TimeoutSupervisor>,
        notifier: Arc<dyn WebhookNotifier>,
        metrics: Arc<dyn MetricsSink>,
        config: DeferredRunnerConfig,
    ) -> Self {
        Self {
            queue,
            supervisor,
            notifier,
            metrics,
            config,
        }
    }

    /// 处理一批已到期的作业
    pub async fn run_once(&self) -> BrokerResult<RunStats> {
        let entries = self
            .queue
            .fetch_due(Utc::now(), self.config.batch_size, self.config.lease)
            .await?;

        let mut stats = RunStats {
            fetched: entries.len(),
            ..RunStats::default()
        };
        for entry in entries {
            let outcome = match &entry.job {
                DeferredJob::DeadlineCheck { .. } => self.run_deadline_check(&entry).await,
                DeferredJob::Webhook { task_id, url } => {
                    self.run_webhook(&entry, *task_id, url).await
                }
            };
            match outcome {
                Ok(JobDisposition::Acked) => stats.acked += 1,
                Ok(JobDisposition::Rescheduled) => stats.rescheduled += 1,
                Err(e) => {
                    stats.failed += 1;
                    error!(
                        job_id = entry.id,
                        kind = entry.job.kind(),
                        "延迟作业处理失败，租约到期后重试: {}",
                        e
                    );
                }
            }
        }

        if stats.fetched > 0 {
            debug!(?stats, "延迟作业批次处理完成");
        }
        Ok(stats)
    }

    async fn run_deadline_check(&self, entry: &DeferredEntry) -> BrokerResult<JobDisposition> {
        let outcome = self.supervisor.handle_job(&entry.job).await?;
        debug!(job_id = entry.id, ?outcome, "截止检查完成");
        self.queue.ack(entry.id).await?;
        Ok(JobDisposition::Acked)
    }

    async fn run_webhook(
        &self,
        entry: &DeferredEntry,
        task_id: i64,
        url: &str,
    ) -> BrokerResult<JobDisposition> {
        match self.notifier.notify(url, task_id).await {
            Ok(()) => {
                self.metrics.record(BrokerMetric::WebhookDelivered);
                info!("任务 {} 的Webhook已投递到 {}", task_id, url);
                self.queue.ack(entry.id).await?;
                Ok(JobDisposition::Acked)
            }
            Err(e) if entry.deliveries < self.config.webhook_max_deliveries => {
                let retry_at = chrono::Duration::from_std(self.config.webhook_retry_delay)
                    .ok()
                    .and_then(|delay| Utc::now().checked_add_signed(delay))
                    .unwrap_or_else(Utc::now);
                warn!(
                    "任务 {} 的Webhook投递失败 ({}/{})，将在 {} 重试: {}",
                    task_id, entry.deliveries, self.config.webhook_max_deliveries, retry_at, e
                );
                self.queue.reschedule(entry.id, retry_at).await?;
                Ok(JobDisposition::Rescheduled)
            }
            Err(e) => {
                self.metrics.record(BrokerMetric::WebhookFailed);
                error!(
                    "任务 {} 的Webhook投递 {} 次后放弃: {}",
                    task_id, entry.deliveries, e
                );
                self.queue.ack(entry.id).await?;
                Ok(JobDisposition::Acked)
            }
        }
    }

    /// 轮询循环，收到关闭信号后退出
    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "延迟作业执行器已启动"
        );
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!("拉取延迟作业失败: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("延迟作业执行器收到关闭信号");
                    break;
                }
            }
        }
    }
}

enum JobDisposition {
    Acked,
    Rescheduled,
}
