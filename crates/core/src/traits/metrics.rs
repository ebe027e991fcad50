use std::fmt;

use crate::models::TaskOutcome;

/// 核心逻辑上报的指标事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerMetric {
    TaskScheduled,
    TaskClaimed { capability: String },
    /// 比较交换领取时输给了并发的领取者
    ClaimConflict,
    TaskRequeued,
    TaskTimedOut,
    TaskCompleted { outcome: TaskOutcome },
    StaleReport,
    WebhookDelivered,
    WebhookFailed,
    PackageCreated,
    PackageDeleted,
}

impl BrokerMetric {
    pub fn name(&self) -> &'static str {
        match self {
            BrokerMetric::TaskScheduled => "broker_tasks_scheduled_total",
            BrokerMetric::TaskClaimed { .. } => "broker_tasks_claimed_total",
            BrokerMetric::ClaimConflict => "broker_claim_conflicts_total",
            BrokerMetric::TaskRequeued => "broker_tasks_requeued_total",
            BrokerMetric::TaskTimedOut => "broker_tasks_timed_out_total",
            BrokerMetric::TaskCompleted { .. } => "broker_tasks_completed_total",
            BrokerMetric::StaleReport => "broker_stale_reports_total",
            BrokerMetric::WebhookDelivered => "broker_webhooks_delivered_total",
            BrokerMetric::WebhookFailed => "broker_webhooks_failed_total",
            BrokerMetric::PackageCreated => "broker_packages_created_total",
            BrokerMetric::PackageDeleted => "broker_packages_deleted_total",
        }
    }
}

impl fmt::Display for BrokerMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 注入式的指标接收端，核心逻辑不直接持有全局计数器
pub trait MetricsSink: Send + Sync {
    fn record(&self, metric: BrokerMetric);
}

/// 丢弃所有指标
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn record(&self, _metric: BrokerMetric) {}
}
