use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::BrokerResult;
use crate::models::{DeferredEntry, DeferredJob};

/// 延迟执行队列
///
/// 保证至少一次投递：取出的作业在租约期内对其他消费者不可见，
/// 未确认的作业在租约过期后会再次出现。
#[async_trait]
pub trait DeferredQueue: Send + Sync {
    /// 安排作业在 `due_at` 之后执行
    async fn enqueue(&self, job: &DeferredJob, due_at: DateTime<Utc>) -> BrokerResult<i64>;

    /// 取出最多 `limit` 个已到期作业，并把它们的到期时间推后 `lease`
    async fn fetch_due(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        lease: Duration,
    ) -> BrokerResult<Vec<DeferredEntry>>;

    /// 确认作业处理完成并移除
    async fn ack(&self, id: i64) -> BrokerResult<()>;

    /// 重新安排作业的到期时间
    async fn reschedule(&self, id: i64, due_at: DateTime<Utc>) -> BrokerResult<()>;

    /// 尚未确认的作业数量
    async fn pending_count(&self) -> BrokerResult<i64>;
}
